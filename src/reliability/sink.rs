use crate::sender::EncodedPayload;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("Deserialization error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("Batch not found: {0}")]
    NotFound(String),
    #[error("Overflow storage full: {used} of {limit} bytes used")]
    Full { used: u64, limit: u64 },
}

/// A batch that could not be delivered, kept for later replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedBatch {
    pub batch_id: String,
    pub payload: EncodedPayload,
    pub reason: String,
    pub attempts: u32,
    /// Unix time in milliseconds.
    pub failed_at: i64,
}

impl FailedBatch {
    pub fn new(payload: EncodedPayload, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            batch_id: payload.batch_id.clone(),
            payload,
            reason: reason.into(),
            attempts,
            failed_at: crate::domain::current_timestamp_millis(),
        }
    }
}

/// Destination for batches that failed permanently.
#[cfg_attr(test, automock)]
pub trait OverflowSink: Send + Sync {
    fn store(&self, batch: FailedBatch) -> BoxFuture<'static, Result<(), SinkError>>;
}

/// What happens to a batch after a permanent delivery failure.
#[derive(Clone, Default)]
pub enum FailurePolicy {
    #[default]
    Drop,
    Overflow(Arc<dyn OverflowSink>),
}

impl fmt::Debug for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Drop => f.write_str("Drop"),
            FailurePolicy::Overflow(_) => f.write_str("Overflow(..)"),
        }
    }
}

impl FailurePolicy {
    pub fn overflow(sink: impl OverflowSink + 'static) -> Self {
        FailurePolicy::Overflow(Arc::new(sink))
    }
}

/// In-memory sink, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryOverflowSink {
    batches: Arc<Mutex<Vec<FailedBatch>>>,
}

impl MemoryOverflowSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }

    pub fn batches(&self) -> Vec<FailedBatch> {
        self.batches.lock().clone()
    }

    pub fn drain(&self) -> Vec<FailedBatch> {
        std::mem::take(&mut *self.batches.lock())
    }
}

impl OverflowSink for MemoryOverflowSink {
    fn store(&self, batch: FailedBatch) -> BoxFuture<'static, Result<(), SinkError>> {
        self.batches.lock().push(batch);
        Box::pin(std::future::ready(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::{ContentEncoding, WireFormat};
    use bytes::Bytes;

    fn failed(id: &str) -> FailedBatch {
        FailedBatch::new(
            EncodedPayload {
                body: Bytes::from_static(b"m 1 1\n"),
                content_type: WireFormat::PrometheusText.content_type().to_string(),
                content_encoding: ContentEncoding::Identity,
                wire_format: WireFormat::PrometheusText,
                batch_id: id.to_string(),
                sample_count: 1,
                uncompressed_len: 6,
            },
            "HTTP 503",
            5,
        )
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_batches() {
        let sink = MemoryOverflowSink::new();
        let policy = FailurePolicy::overflow(sink.clone());

        if let FailurePolicy::Overflow(target) = &policy {
            target.store(failed("a")).await.unwrap();
            target.store(failed("b")).await.unwrap();
        }

        assert_eq!(sink.len(), 2);
        let drained = sink.drain();
        assert_eq!(drained[0].batch_id, "a");
        assert_eq!(drained[1].attempts, 5);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_mock_sink_receives_batch() {
        let mut mock = MockOverflowSink::new();
        mock.expect_store()
            .withf(|batch| batch.batch_id == "x" && batch.reason == "HTTP 503")
            .times(1)
            .returning(|_| Box::pin(std::future::ready(Ok(()))));

        mock.store(failed("x")).await.unwrap();
    }

    #[test]
    fn test_policy_debug() {
        assert_eq!(format!("{:?}", FailurePolicy::default()), "Drop");
        assert_eq!(
            format!("{:?}", FailurePolicy::overflow(MemoryOverflowSink::new())),
            "Overflow(..)"
        );
    }
}
