use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Monotonic-by-convention integer counter. `dec` exists for up/down use.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicI64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.dec_by(1);
    }

    pub fn dec_by(&self, delta: i64) {
        self.value.fetch_sub(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

pub type GaugeSupplier = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Value read from a supplier each time the registry is collected.
#[derive(Clone)]
pub struct Gauge {
    supplier: GaugeSupplier,
}

impl Gauge {
    pub fn new(supplier: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        Self {
            supplier: Arc::new(supplier),
        }
    }

    pub fn get(&self) -> f64 {
        (self.supplier)()
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gauge").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_counter_ops() {
        let counter = Counter::new();
        counter.inc();
        counter.inc_by(10);
        counter.dec();
        counter.dec_by(3);
        assert_eq!(counter.get(), 7);
    }

    #[test]
    fn test_gauge_reads_supplier_each_time() {
        let source = Arc::new(AtomicU64::new(0));
        let gauge = {
            let source = source.clone();
            Gauge::new(move || source.load(Ordering::Relaxed) as f64)
        };
        assert_eq!(gauge.get(), 0.0);
        source.store(42, Ordering::Relaxed);
        assert_eq!(gauge.get(), 42.0);
    }
}
