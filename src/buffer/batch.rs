use super::backpressure::{InFlightLimiter, InFlightPermit};
use super::error::BufferError;
use crate::domain::Sample;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// What closed a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlushTrigger {
    SizeThreshold,
    Interval,
    Explicit,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_batch_samples: usize,
    pub max_batch_interval: Duration,
    pub max_in_flight_batches: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_samples: 10_000,
            max_batch_interval: Duration::from_secs(1),
            max_in_flight_batches: 16,
        }
    }
}

/// A closed, immutable group of samples delivered as one unit.
#[derive(Debug, Clone)]
pub struct Batch {
    id: String,
    samples: Vec<Sample>,
    trigger: FlushTrigger,
    created_at: Instant,
    timestamp_range: Option<(i64, i64)>,
}

impl Batch {
    pub fn new(samples: Vec<Sample>, trigger: FlushTrigger) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), samples, trigger)
    }

    pub fn with_id(id: String, samples: Vec<Sample>, trigger: FlushTrigger) -> Self {
        let timestamp_range = samples
            .iter()
            .map(Sample::timestamp)
            .fold(None::<(i64, i64)>, |range, ts| {
                Some(match range {
                    None => (ts, ts),
                    Some((min, max)) => (min.min(ts), max.max(ts)),
                })
            });

        Self {
            id,
            samples,
            trigger,
            created_at: Instant::now(),
            timestamp_range,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn trigger(&self) -> FlushTrigger {
        self.trigger
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Minimum and maximum sample timestamp, for diagnostics.
    pub fn timestamp_range(&self) -> Option<(i64, i64)> {
        self.timestamp_range
    }
}

/// A batch handed downstream together with its in-flight slot.
#[derive(Debug)]
pub struct SealedBatch {
    pub batch: Batch,
    pub permit: InFlightPermit,
}

/// Receiving half of the batcher: sealed batches in the order they were closed.
#[derive(Debug)]
pub struct BatchReceiver {
    rx: mpsc::UnboundedReceiver<SealedBatch>,
}

impl BatchReceiver {
    /// Next sealed batch, or `None` once the batcher is closed and drained.
    pub async fn next_batch(&mut self) -> Option<SealedBatch> {
        self.rx.recv().await
    }

    pub fn try_next_batch(&mut self) -> Option<SealedBatch> {
        self.rx.try_recv().ok()
    }
}

/// Accumulates samples into the open batch and seals it on size, interval,
/// explicit request or shutdown.
///
/// The open batch is the only shared mutable state. The lock is held for the
/// push or the swap and the enqueue of the sealed batch, which keeps batches
/// FIFO across concurrent producers.
#[derive(Debug)]
pub struct Batcher {
    inner: Mutex<BatcherInner>,
    config: BatchConfig,
    limiter: Arc<InFlightLimiter>,
    opened: Notify,
}

#[derive(Debug)]
struct BatcherInner {
    pending: Vec<Sample>,
    opened_at: Option<Instant>,
    ready_tx: Option<mpsc::UnboundedSender<SealedBatch>>,
}

impl Batcher {
    pub fn new(config: BatchConfig) -> (Self, BatchReceiver) {
        let (ready_tx, rx) = mpsc::unbounded_channel();
        let limiter = InFlightLimiter::new(config.max_in_flight_batches);

        let batcher = Self {
            inner: Mutex::new(BatcherInner {
                pending: Vec::with_capacity(config.max_batch_samples.min(4096)),
                opened_at: None,
                ready_tx: Some(ready_tx),
            }),
            config,
            limiter,
            opened: Notify::new(),
        };

        (batcher, BatchReceiver { rx })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<InFlightLimiter> {
        &self.limiter
    }

    pub fn in_flight(&self) -> usize {
        self.limiter.in_flight()
    }

    pub fn pending_samples(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn add(&self, sample: Sample) -> Result<(), BufferError> {
        let mut inner = self.inner.lock();

        if inner.ready_tx.is_none() {
            return Err(BufferError::Closed);
        }
        if self.limiter.is_saturated() {
            return Err(BufferError::CapacityExceeded {
                in_flight: self.limiter.in_flight(),
                limit: self.limiter.limit(),
            });
        }

        if inner.pending.is_empty() {
            inner.opened_at = Some(Instant::now());
            self.opened.notify_one();
        }
        inner.pending.push(sample);

        if inner.pending.len() >= self.config.max_batch_samples {
            self.seal(&mut inner, FlushTrigger::SizeThreshold);
        }

        Ok(())
    }

    /// Explicit flush. Returns `false` when no batch was open.
    pub fn flush(&self) -> bool {
        let mut inner = self.inner.lock();
        self.seal(&mut inner, FlushTrigger::Explicit)
    }

    /// Seal the open batch if its interval has elapsed at `now`.
    pub fn flush_if_due(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        match inner.opened_at {
            Some(opened_at) if now >= opened_at + self.config.max_batch_interval => {
                self.seal(&mut inner, FlushTrigger::Interval)
            }
            _ => false,
        }
    }

    /// When the open batch becomes due, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner
            .lock()
            .opened_at
            .map(|opened_at| opened_at + self.config.max_batch_interval)
    }

    /// Resolves when a new batch is opened by the first sample after a flush.
    pub async fn batch_opened(&self) {
        self.opened.notified().await;
    }

    /// Seal the remainder and close the downstream queue. Further adds fail with `Closed`.
    pub fn close(&self) -> bool {
        let mut inner = self.inner.lock();
        let sealed = self.seal(&mut inner, FlushTrigger::Shutdown);
        inner.ready_tx = None;
        sealed
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().ready_tx.is_none()
    }

    fn seal(&self, inner: &mut BatcherInner, trigger: FlushTrigger) -> bool {
        if inner.pending.is_empty() {
            return false;
        }
        let Some(ready_tx) = inner.ready_tx.as_ref() else {
            return false;
        };

        let samples = std::mem::take(&mut inner.pending);
        inner.opened_at = None;

        let batch = Batch::new(samples, trigger);
        debug!(
            batch_id = batch.id(),
            samples = batch.len(),
            ?trigger,
            "sealed batch"
        );

        let permit = self.limiter.acquire();
        if ready_tx.send(SealedBatch { batch, permit }).is_err() {
            warn!(?trigger, "batch receiver dropped, discarding sealed batch");
            return false;
        }
        true
    }
}
