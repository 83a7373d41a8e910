//! The client facade: submit samples, flush, close.
//!
//! [`MetricsClient`] owns the batcher and two background tasks, started on the
//! current tokio runtime when the client is built:
//! - the flush driver seals the open batch when `max_batch_interval` elapses
//! - the dispatcher runs up to `max_concurrent_deliveries` pipelines
//!   (encode, compress, send) and queues the rest
//!
//! All tasks hang off one root [`CancellationToken`]. Dropping the client
//! cancels it; [`MetricsClient::close`] shuts down in order instead.

pub mod config;
mod pipeline;
pub mod serde_helpers;

pub use config::{ClientConfig, ConfigError, DEFAULT_ENDPOINT};

use crate::buffer::{Batcher, BufferError};
use crate::domain::{Sample, current_timestamp_millis};
use crate::registry::MetricRegistry;
use crate::reliability::{Clock, TokioClock};
use crate::sender::{
    DeliverySender, DeliveryStats, DeliveryStatsSnapshot, HttpTransport, LineEncoder, Transport,
    TransportError,
};
use parking_lot::Mutex;
use pipeline::{Pipeline, run_dispatcher, run_flush_driver};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    #[error("Grace period exceeded with {pending} batches still in flight")]
    GracePeriodExceeded { pending: usize },
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

pub struct MetricsClient<T: Transport = HttpTransport> {
    batcher: Arc<Batcher>,
    pipeline: Arc<Pipeline<T>>,
    root: CancellationToken,
    driver_token: CancellationToken,
    delivery_token: CancellationToken,
    tracker: TaskTracker,
    driver: Mutex<Option<JoinHandle<()>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl MetricsClient<HttpTransport> {
    /// Build a client that talks HTTP to `config.endpoint_url`.
    /// Must be called from within a tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let transport = HttpTransport::new(config.transport_config()?)?;
        Self::with_transport(config, transport, Arc::new(TokioClock))
    }
}

impl<T: Transport> MetricsClient<T> {
    pub fn with_transport(
        config: ClientConfig,
        transport: T,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let stats = Arc::new(DeliveryStats::new());
        let (batcher, batches) = Batcher::new(config.batch_config());
        let batcher = Arc::new(batcher);

        let pipeline = Arc::new(Pipeline {
            encoder: LineEncoder::new(config.wire_format),
            compression: config.compression(),
            sender: DeliverySender::new(
                Arc::new(transport),
                config.retry_policy(),
                config.send_timeout,
                clock,
                Arc::clone(&stats),
            ),
            stats,
            failure_policy: config.failure_policy.clone(),
        });

        let root = CancellationToken::new();
        let driver_token = root.child_token();
        let delivery_token = root.child_token();
        let tracker = TaskTracker::new();

        let driver = tokio::spawn(run_flush_driver(
            Arc::clone(&batcher),
            driver_token.clone(),
        ));
        let dispatcher = tokio::spawn(run_dispatcher(
            batches,
            Arc::clone(&pipeline),
            Arc::new(Semaphore::new(config.max_concurrent_deliveries)),
            tracker.clone(),
            delivery_token.clone(),
        ));

        info!(
            endpoint = %config.endpoint_url,
            wire_format = ?config.wire_format,
            compression = ?config.compression(),
            max_batch_samples = config.max_batch_samples,
            max_in_flight_batches = config.max_in_flight_batches,
            max_concurrent_deliveries = config.max_concurrent_deliveries,
            "metrics client started"
        );

        Ok(Self {
            batcher,
            pipeline,
            root,
            driver_token,
            delivery_token,
            tracker,
            driver: Mutex::new(Some(driver)),
            dispatcher: Mutex::new(Some(dispatcher)),
            closed: AtomicBool::new(false),
        })
    }

    /// Queue one sample. Fails fast with `CapacityExceeded` while
    /// `max_in_flight_batches` batches are awaiting delivery.
    pub fn submit(&self, sample: Sample) -> Result<(), BufferError> {
        self.batcher.add(sample)
    }

    /// Snapshot every metric of `registry` at the current time and submit it.
    /// Returns how many samples were queued before any error.
    pub fn submit_registry(&self, registry: &MetricRegistry) -> Result<usize, BufferError> {
        let samples = registry.collect(current_timestamp_millis());
        let total = samples.len();
        for sample in samples {
            self.submit(sample)?;
        }
        Ok(total)
    }

    /// Seal the open batch now. `false` when nothing was pending.
    pub fn flush(&self) -> bool {
        self.batcher.flush()
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.pipeline.stats.snapshot()
    }

    /// Batches sealed but not yet delivered or given up on.
    pub fn in_flight(&self) -> usize {
        self.batcher.in_flight()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the flush driver, seal the remainder and wait up to `grace_period`
    /// for in-flight deliveries. Past the deadline every send is cancelled.
    ///
    /// A failed background task does not cut shutdown short: the remainder is
    /// still sealed and drained before `TaskFailed` is reported.
    pub async fn close(&self, grace_period: Duration) -> Result<(), ShutdownError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.driver_token.cancel();
        let driver = self.driver.lock().take();
        let driver_result = match driver {
            Some(driver) => driver.await.map_err(|e| {
                warn!(error = %e, "flush driver failed, sealing remainder anyway");
                ShutdownError::TaskFailed(e.to_string())
            }),
            None => Ok(()),
        };

        self.batcher.close();
        let drained = self.drain(grace_period).await;
        driver_result.and(drained)
    }

    async fn drain(&self, grace_period: Duration) -> Result<(), ShutdownError> {
        let mut dispatcher = self.dispatcher.lock().take();

        let drained = tokio::time::timeout(grace_period, async {
            let joined = match dispatcher.as_mut() {
                Some(handle) => {
                    let joined = handle.await;
                    dispatcher = None;
                    joined.map_err(|e| ShutdownError::TaskFailed(e.to_string()))
                }
                None => Ok(()),
            };
            self.tracker.close();
            self.tracker.wait().await;
            joined
        })
        .await;

        match drained {
            Ok(result) => {
                info!(stats = ?self.stats(), "metrics client closed");
                result
            }
            Err(_) => {
                let pending = self.batcher.in_flight();
                warn!(pending, ?grace_period, "grace period exceeded, cancelling deliveries");
                self.delivery_token.cancel();

                if let Some(handle) = dispatcher.take() {
                    if let Err(e) = handle.await {
                        warn!(error = %e, "dispatcher failed during cancellation");
                    }
                }
                self.tracker.close();
                self.tracker.wait().await;

                Err(ShutdownError::GracePeriodExceeded { pending })
            }
        }
    }
}

impl<T: Transport> Drop for MetricsClient<T> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl<T: Transport> std::fmt::Debug for MetricsClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsClient")
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish()
    }
}
