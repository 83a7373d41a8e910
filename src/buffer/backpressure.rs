use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Counts flushed-but-undelivered batches against `max_in_flight_batches`.
#[derive(Debug)]
pub struct InFlightLimiter {
    in_flight: AtomicUsize,
    limit: usize,
    drained: Notify,
}

impl InFlightLimiter {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            in_flight: AtomicUsize::new(0),
            limit,
            drained: Notify::new(),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_saturated(&self) -> bool {
        self.in_flight() >= self.limit
    }

    /// Take one slot. Callers check [`InFlightLimiter::is_saturated`] first.
    pub(crate) fn acquire(self: &Arc<Self>) -> InFlightPermit {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightPermit {
            limiter: Arc::clone(self),
        }
    }

    /// Resolves once the in-flight count drops to zero.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Held by a sealed batch until it leaves the pipeline, whatever the outcome.
#[derive(Debug)]
pub struct InFlightPermit {
    limiter: Arc<InFlightLimiter>,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        let previous = self.limiter.in_flight.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            self.limiter.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permits_release_on_drop() {
        let limiter = InFlightLimiter::new(2);
        let a = limiter.acquire();
        let b = limiter.acquire();
        assert_eq!(limiter.in_flight(), 2);
        assert!(limiter.is_saturated());

        drop(a);
        assert_eq!(limiter.in_flight(), 1);
        assert!(!limiter.is_saturated());

        drop(b);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_wait_drained() {
        let limiter = InFlightLimiter::new(4);
        let permit = limiter.acquire();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.wait_drained().await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(permit);
        waiter.await.unwrap();
    }
}
