use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Backpressure: the caller must slow down or drop the sample.
    #[error("Capacity exceeded: {in_flight} batches in flight (limit {limit})")]
    CapacityExceeded { in_flight: usize, limit: usize },

    #[error("Batcher is closed")]
    Closed,
}

impl BufferError {
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, BufferError::CapacityExceeded { .. })
    }
}
