//! The `vm-push` binary: Prometheus text lines in, batched writes out.

pub mod config;
pub mod logging_system;
pub mod shutdown;

pub use config::{Config, ConfigError, LogFormat, LogLevel};
pub use logging_system::{LoggingError, LoggingSystem, setup_logging_safe};
pub use shutdown::SignalHandler;

use crate::buffer::BufferError;
use crate::client::{ClientError, MetricsClient, ShutdownError};
use crate::domain::{ParseError, parse_line};
use crate::reliability::{DiskOverflowSink, FailurePolicy, SinkError};
use crate::sender::{DeliveryStatsSnapshot, Transport};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause between submissions while every in-flight slot is taken.
const BACKPRESSURE_PAUSE: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),
    #[error("Client error: {0}")]
    Client(#[from] ClientError),
    #[error("Overflow sink error: {0}")]
    Sink(#[from] SinkError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Shutdown error: {0}")]
    Shutdown(#[from] ShutdownError),
}

/// What one run of [`App::run`] did with its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub lines: u64,
    pub submitted: u64,
    pub skipped: u64,
    pub rejected: u64,
    /// Input stopped early on a shutdown signal.
    pub interrupted: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RunReport {
    pub ingest: IngestSummary,
    pub delivery: DeliveryStatsSnapshot,
}

pub struct App {
    config: Config,
    client: MetricsClient,
}

impl App {
    pub async fn from_args<I, T>(args: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args(args)?;
        setup_logging_safe(config.log_level, config.log_format)?;
        Self::from_config(config).await
    }

    pub async fn from_config(config: Config) -> Result<Self, AppError> {
        let mut client_config = config.to_client_config();
        if let Some(disk) = config.disk_config() {
            info!(path = %disk.storage_path.display(), "undeliverable batches go to disk");
            client_config.failure_policy =
                FailurePolicy::overflow(DiskOverflowSink::new(disk).await?);
        }

        info!("Starting vm-push v{}", crate::VERSION);
        let client = MetricsClient::new(client_config)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read the configured input until EOF or a signal, then close the client
    /// within the grace period.
    pub async fn run(self) -> Result<RunReport, AppError> {
        let signals = SignalHandler::install();
        let shutdown = signals.token();

        let ingest = match &self.config.input {
            Some(path) => {
                let file = tokio::fs::File::open(path).await?;
                ingest(&self.client, BufReader::new(file), &shutdown).await?
            }
            None => ingest(&self.client, BufReader::new(tokio::io::stdin()), &shutdown).await?,
        };

        info!(
            lines = ingest.lines,
            submitted = ingest.submitted,
            rejected = ingest.rejected,
            interrupted = ingest.interrupted,
            "input finished, closing client"
        );
        self.client.close(self.config.grace_period).await?;

        let report = RunReport {
            ingest,
            delivery: self.client.stats(),
        };
        info!(delivery = ?report.delivery, "vm-push stopped");
        Ok(report)
    }
}

/// Submit every sample line of `reader`. Comments and blank lines are skipped,
/// malformed lines are logged and counted. While the client reports
/// `CapacityExceeded` the sample is retried until accepted or `shutdown` fires.
pub async fn ingest<T, R>(
    client: &MetricsClient<T>,
    reader: R,
    shutdown: &CancellationToken,
) -> Result<IngestSummary, std::io::Error>
where
    T: Transport,
    R: AsyncBufRead + Unpin,
{
    let mut summary = IngestSummary::default();
    let mut lines = reader.lines();

    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                summary.interrupted = true;
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        summary.lines += 1;

        let sample = match parse_line(&line) {
            Ok(sample) => sample,
            Err(ParseError::Skip) => {
                summary.skipped += 1;
                continue;
            }
            Err(e) => {
                summary.rejected += 1;
                warn!(line = summary.lines, error = %e, "skipping malformed line");
                continue;
            }
        };

        loop {
            match client.submit(sample.clone()) {
                Ok(()) => {
                    summary.submitted += 1;
                    break;
                }
                Err(BufferError::CapacityExceeded { in_flight, limit }) => {
                    debug!(in_flight, limit, "in-flight limit reached, pausing input");
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            summary.interrupted = true;
                            summary.rejected += 1;
                            return Ok(summary);
                        }
                        _ = tokio::time::sleep(BACKPRESSURE_PAUSE) => {}
                    }
                }
                Err(BufferError::Closed) => {
                    summary.rejected += 1;
                    return Ok(summary);
                }
            }
        }
    }

    Ok(summary)
}

/// Entry point of the `vm-push` binary.
pub async fn main() -> Result<RunReport, AppError> {
    let app = App::from_args(std::env::args_os()).await?;
    app.run().await
}
