use anyhow::Context;
use victoria_metrics_client::app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let report = app::main().await.context("vm-push failed")?;
    println!(
        "{}",
        serde_json::to_string(&report).context("failed to render run report")?
    );

    if report.delivery.batches_failed() > 0 {
        anyhow::bail!(
            "{} of {} batches could not be delivered",
            report.delivery.batches_failed(),
            report.delivery.batches_flushed
        );
    }
    Ok(())
}
