use crate::buffer::{Batcher, BatchReceiver, SealedBatch};
use crate::reliability::{FailedBatch, FailurePolicy};
use crate::sender::{
    Compression, DeliveryAttempt, DeliveryError, DeliverySender, DeliveryStats, LineEncoder,
    Transport,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

/// Encode, compress and deliver one sealed batch at a time. Failures are
/// confined to the batch they happened in.
pub(crate) struct Pipeline<T: Transport> {
    pub(crate) encoder: LineEncoder,
    pub(crate) compression: Compression,
    pub(crate) sender: DeliverySender<T>,
    pub(crate) stats: Arc<DeliveryStats>,
    pub(crate) failure_policy: FailurePolicy,
}

impl<T: Transport> Pipeline<T> {
    pub(crate) async fn process(&self, sealed: SealedBatch, cancel: &CancellationToken) {
        // The in-flight slot is released when `_permit` drops, whatever the outcome.
        let SealedBatch {
            batch,
            permit: _permit,
        } = sealed;

        if cancel.is_cancelled() {
            self.stats.record_cancelled();
            warn!(batch_id = batch.id(), samples = batch.len(), "batch cancelled before delivery");
            return;
        }

        let payload = match self.encoder.encode(&batch) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.record_encoding_failure();
                error!(batch_id = batch.id(), samples = batch.len(), error = %e, "dropping batch that cannot be encoded");
                return;
            }
        };
        drop(batch);

        let batch_id = payload.batch_id.clone();
        let payload = match self.compression.apply(payload) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.record_compression_failure();
                error!(batch_id = %batch_id, error = %e, "dropping batch that cannot be compressed");
                return;
            }
        };

        let mut attempt = DeliveryAttempt::new(payload);
        match self.sender.deliver(&mut attempt, cancel).await {
            Ok(_) => self.stats.record_delivered(attempt.payload.sample_count),
            Err(DeliveryError::Cancelled) => {
                self.stats.record_cancelled();
                warn!(batch_id = %batch_id, attempts = attempt.attempt_count, "delivery cancelled");
            }
            Err(e) => {
                if matches!(e, DeliveryError::RetriesExhausted { .. }) {
                    self.stats.record_exhausted();
                } else {
                    self.stats.record_fatal();
                }
                self.handle_failure(attempt, e).await;
            }
        }
    }

    async fn handle_failure(&self, attempt: DeliveryAttempt, error: DeliveryError) {
        match &self.failure_policy {
            FailurePolicy::Drop => {
                error!(
                    batch_id = %attempt.payload.batch_id,
                    samples = attempt.payload.sample_count,
                    attempts = attempt.attempt_count,
                    %error,
                    "dropping undeliverable batch"
                );
            }
            FailurePolicy::Overflow(sink) => {
                let attempts = attempt.attempt_count;
                let failed = FailedBatch::new(attempt.into_payload(), error.to_string(), attempts);
                let batch_id = failed.batch_id.clone();
                error!(batch_id = %batch_id, attempts, %error, "handing undeliverable batch to overflow sink");
                match sink.store(failed).await {
                    Ok(()) => self.stats.record_overflowed(),
                    Err(e) => error!(batch_id = %batch_id, error = %e, "overflow sink rejected batch, dropping it"),
                }
            }
        }
    }
}

/// Seals the open batch when its interval elapses. Sleeps while no batch is open.
pub(crate) async fn run_flush_driver(batcher: Arc<Batcher>, cancel: CancellationToken) {
    loop {
        let deadline = batcher.deadline();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = batcher.batch_opened(), if deadline.is_none() => {}
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if batcher.flush_if_due(Instant::now()) {
                    debug!("interval flush");
                }
            }
        }
    }
    debug!("flush driver stopped");
}

/// Hands sealed batches to pipelines in FIFO order, at most `semaphore`'s
/// permit count at once. Returns once the batcher is closed and drained.
pub(crate) async fn run_dispatcher<T: Transport>(
    mut batches: BatchReceiver,
    pipeline: Arc<Pipeline<T>>,
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
) {
    while let Some(sealed) = batches.next_batch().await {
        pipeline.stats.record_flushed();

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            pipeline.stats.record_cancelled();
            warn!(batch_id = sealed.batch.id(), "batch cancelled while queued");
            continue;
        };

        let pipeline = Arc::clone(&pipeline);
        let cancel = cancel.clone();
        tracker.spawn(async move {
            pipeline.process(sealed, &cancel).await;
            drop(permit);
        });
    }
    debug!("dispatcher stopped");
}
