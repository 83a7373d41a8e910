//! Batching and backpressure.
//!
//! Samples accumulate in the open batch inside [`Batcher`]. A batch is sealed
//! on size, on interval, on explicit flush or at shutdown, and queued for
//! delivery through [`BatchReceiver`] together with an [`InFlightPermit`].

pub mod backpressure;
pub mod batch;
pub mod error;

pub use backpressure::{InFlightLimiter, InFlightPermit};
pub use batch::{Batch, BatchConfig, BatchReceiver, Batcher, FlushTrigger, SealedBatch};
pub use error::BufferError;
