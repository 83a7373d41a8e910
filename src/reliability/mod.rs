//! What happens around a delivery: retry timing and the fate of batches that
//! fail for good.

pub mod disk;
pub mod retry;
pub mod sink;

pub use disk::{DiskConfig, DiskOverflowSink};
pub use retry::{Clock, ManualClock, RetryPolicy, TokioClock};
pub use sink::{FailedBatch, FailurePolicy, MemoryOverflowSink, OverflowSink, SinkError};
