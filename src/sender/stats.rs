// Lock-free delivery statistics.
//
// Counters are monotonic and updated with relaxed atomics; a snapshot is a
// consistent-enough view for reporting, not a transaction.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DeliveryStats {
    batches_flushed: AtomicU64,
    batches_delivered: AtomicU64,
    samples_delivered: AtomicU64,
    requests_sent: AtomicU64,
    retries: AtomicU64,
    fatal_failures: AtomicU64,
    exhausted: AtomicU64,
    cancelled: AtomicU64,
    encoding_failures: AtomicU64,
    compression_failures: AtomicU64,
    overflowed: AtomicU64,
    bytes_sent: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatsSnapshot {
    pub batches_flushed: u64,
    pub batches_delivered: u64,
    pub samples_delivered: u64,
    pub requests_sent: u64,
    pub retries: u64,
    pub fatal_failures: u64,
    pub exhausted: u64,
    pub cancelled: u64,
    pub encoding_failures: u64,
    pub compression_failures: u64,
    pub overflowed: u64,
    pub bytes_sent: u64,
}

impl DeliveryStatsSnapshot {
    /// Batches that left the pipeline without being delivered.
    pub fn batches_failed(&self) -> u64 {
        self.fatal_failures
            + self.exhausted
            + self.cancelled
            + self.encoding_failures
            + self.compression_failures
    }
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_flushed(&self) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request(&self, bytes: u64) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, samples: usize) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.samples_delivered
            .fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn record_fatal(&self) {
        self.fatal_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encoding_failure(&self) {
        self.encoding_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compression_failure(&self) {
        self.compression_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflowed(&self) {
        self.overflowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            samples_delivered: self.samples_delivered.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            fatal_failures: self.fatal_failures.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            encoding_failures: self.encoding_failures.load(Ordering::Relaxed),
            compression_failures: self.compression_failures.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}
