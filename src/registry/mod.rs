//! Named counters, gauges, histograms and summaries that can be snapshotted
//! into samples.
//!
//! A counter or gauge yields one sample per collection. A histogram yields
//! `<name>_bucket{vmrange="..."}` for each non-empty bucket followed by
//! `<name>_sum` and `<name>_count`; a summary yields `<name>{quantile="..."}`
//! for each quantile with data followed by `<name>_sum` and `<name>_count`.

pub mod histogram;
pub mod metric;
pub mod summary;

pub use histogram::{Histogram, HistogramSnapshot};
pub use metric::{Counter, Gauge, GaugeSupplier};
pub use summary::{
    DEFAULT_AGE_BUCKETS, DEFAULT_MAX_AGE, DEFAULT_QUANTILES, Summary, SummarySnapshot,
};

use crate::domain::validation::validate_metric_name;
use crate::domain::{Labels, Sample, ValidationError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Metric '{name}' is already registered as a {existing}")]
    KindMismatch { name: String, existing: &'static str },
    #[error("Label '{label}' is reserved for {kind} series of '{name}'")]
    ReservedLabel {
        name: String,
        label: &'static str,
        kind: &'static str,
    },
    #[error("Invalid summary '{name}': {reason}")]
    InvalidSummary { name: String, reason: String },
}

/// Metric identity: name plus labels in key order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
enum Metric {
    Counter(Arc<Counter>),
    Gauge(Gauge),
    Histogram(Arc<Histogram>),
    Summary(Arc<Summary>),
}

impl Metric {
    fn kind(&self) -> &'static str {
        match self {
            Metric::Counter(_) => "counter",
            Metric::Gauge(_) => "gauge",
            Metric::Histogram(_) => "histogram",
            Metric::Summary(_) => "summary",
        }
    }

    fn write_samples(&self, key: &MetricKey, timestamp_ms: i64, out: &mut Vec<Sample>) {
        let mut push = |suffix: &str, extra: Option<(&str, String)>, value: f64| {
            let mut pairs = key.labels.clone();
            pairs.extend(extra.map(|(name, value)| (name.to_string(), value)));
            let sample = Labels::from_pairs(pairs).and_then(|labels| {
                Sample::new(format!("{}{suffix}", key.name), labels, timestamp_ms, value)
            });
            if let Ok(sample) = sample {
                out.push(sample);
            }
        };

        match self {
            Metric::Counter(counter) => push("", None, counter.get() as f64),
            Metric::Gauge(gauge) => push("", None, gauge.get()),
            Metric::Histogram(histogram) => {
                let snapshot = histogram.snapshot();
                for (range, count) in snapshot.buckets {
                    push("_bucket", Some(("vmrange", range.to_string())), count as f64);
                }
                push("_sum", None, snapshot.sum);
                push("_count", None, snapshot.count as f64);
            }
            Metric::Summary(summary) => {
                let snapshot = summary.snapshot();
                for (quantile, value) in snapshot.quantiles {
                    if !value.is_nan() {
                        push("", Some(("quantile", quantile.to_string())), value);
                    }
                }
                push("_sum", None, snapshot.sum);
                push("_count", None, snapshot.count as f64);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MetricRegistry {
    metrics: RwLock<BTreeMap<MetricKey, Metric>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the counter with this identity.
    pub fn counter(&self, name: &str, labels: &Labels) -> Result<Arc<Counter>, RegistryError> {
        let key = Self::key(name, labels)?;
        self.get_or_insert(key, || Metric::Counter(Arc::new(Counter::new())), |metric| {
            match metric {
                Metric::Counter(counter) => Some(Arc::clone(counter)),
                _ => None,
            }
        })
    }

    /// Get or create the gauge with this identity. An existing gauge keeps its
    /// original supplier.
    pub fn gauge(
        &self,
        name: &str,
        labels: &Labels,
        supplier: impl Fn() -> f64 + Send + Sync + 'static,
    ) -> Result<Gauge, RegistryError> {
        let key = Self::key(name, labels)?;
        self.get_or_insert(key, || Metric::Gauge(Gauge::new(supplier)), |metric| match metric {
            Metric::Gauge(gauge) => Some(gauge.clone()),
            _ => None,
        })
    }

    /// Get or create the histogram with this identity. `vmrange` is reserved.
    pub fn histogram(&self, name: &str, labels: &Labels) -> Result<Arc<Histogram>, RegistryError> {
        Self::check_reserved(name, labels, "vmrange", "histogram")?;
        let key = Self::key(name, labels)?;
        self.get_or_insert(key, || Metric::Histogram(Arc::new(Histogram::new())), |metric| {
            match metric {
                Metric::Histogram(histogram) => Some(Arc::clone(histogram)),
                _ => None,
            }
        })
    }

    /// Get or create a summary with the default quantiles and a five minute
    /// window.
    pub fn summary(&self, name: &str, labels: &Labels) -> Result<Arc<Summary>, RegistryError> {
        self.summary_with(
            name,
            labels,
            &DEFAULT_QUANTILES,
            DEFAULT_MAX_AGE,
            DEFAULT_AGE_BUCKETS,
        )
    }

    /// Get or create a summary. An existing summary keeps its original
    /// quantiles and window. `quantile` is reserved.
    pub fn summary_with(
        &self,
        name: &str,
        labels: &Labels,
        quantiles: &[f64],
        max_age: Duration,
        age_buckets: usize,
    ) -> Result<Arc<Summary>, RegistryError> {
        Self::check_reserved(name, labels, "quantile", "summary")?;
        Summary::validate(quantiles, max_age, age_buckets).map_err(|reason| {
            RegistryError::InvalidSummary {
                name: name.to_string(),
                reason,
            }
        })?;
        let key = Self::key(name, labels)?;
        let create = || {
            Metric::Summary(Arc::new(Summary::new(
                quantiles.to_vec(),
                max_age,
                age_buckets,
            )))
        };
        self.get_or_insert(key, create, |metric| match metric {
            Metric::Summary(summary) => Some(Arc::clone(summary)),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }

    /// Samples for every metric, ordered by name then labels.
    pub fn collect(&self, timestamp_ms: i64) -> Vec<Sample> {
        let snapshot: Vec<(MetricKey, Metric)> = self
            .metrics
            .read()
            .iter()
            .map(|(key, metric)| (key.clone(), metric.clone()))
            .collect();

        // Suppliers run outside the lock so a gauge may read the registry.
        let mut samples = Vec::with_capacity(snapshot.len());
        for (key, metric) in &snapshot {
            metric.write_samples(key, timestamp_ms, &mut samples);
        }
        samples
    }

    fn get_or_insert<R>(
        &self,
        key: MetricKey,
        create: impl FnOnce() -> Metric,
        select: impl FnOnce(&Metric) -> Option<R>,
    ) -> Result<R, RegistryError> {
        let mut metrics = self.metrics.write();
        let name = key.name.clone();
        let metric = metrics.entry(key).or_insert_with(create);
        select(metric).ok_or_else(|| RegistryError::KindMismatch {
            name,
            existing: metric.kind(),
        })
    }

    fn check_reserved(
        name: &str,
        labels: &Labels,
        label: &'static str,
        kind: &'static str,
    ) -> Result<(), RegistryError> {
        match labels.get(label) {
            Some(_) => Err(RegistryError::ReservedLabel {
                name: name.to_string(),
                label,
                kind,
            }),
            None => Ok(()),
        }
    }

    fn key(name: &str, labels: &Labels) -> Result<MetricKey, RegistryError> {
        validate_metric_name(name)?;
        Ok(MetricKey {
            name: name.to_string(),
            labels: labels
                .sorted()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_is_shared_per_identity() {
        let registry = MetricRegistry::new();
        let labels = Labels::from_pairs([("path", "/")]).unwrap();

        let a = registry.counter("requests_total", &labels).unwrap();
        let b = registry.counter("requests_total", &labels).unwrap();
        a.inc();
        b.inc_by(2);

        assert_eq!(a.get(), 3);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_label_order_does_not_split_identity() {
        let registry = MetricRegistry::new();
        let ab = Labels::from_pairs([("a", "1"), ("b", "2")]).unwrap();
        let ba = Labels::from_pairs([("b", "2"), ("a", "1")]).unwrap();

        registry.counter("m", &ab).unwrap().inc();
        registry.counter("m", &ba).unwrap().inc();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.counter("m", &ab).unwrap().get(), 2);
    }

    #[test]
    fn test_invalid_name_rejected() {
        let registry = MetricRegistry::new();
        assert!(matches!(
            registry.counter("1bad", &Labels::new()),
            Err(RegistryError::Validation(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_kind_mismatch() {
        let registry = MetricRegistry::new();
        registry.counter("x", &Labels::new()).unwrap();
        let err = registry.gauge("x", &Labels::new(), || 1.0).unwrap_err();
        assert_eq!(
            err,
            RegistryError::KindMismatch {
                name: "x".to_string(),
                existing: "counter"
            }
        );
    }

    #[test]
    fn test_collect_is_sorted_and_stamped() {
        let registry = MetricRegistry::new();
        registry.gauge("zeta", &Labels::new(), || 0.5).unwrap();
        registry.counter("alpha", &Labels::new()).unwrap().inc_by(4);

        let samples = registry.collect(1_000);
        let names: Vec<&str> = samples.iter().map(Sample::metric_name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(samples[0].value(), 4.0);
        assert_eq!(samples[1].value(), 0.5);
        assert!(samples.iter().all(|s| s.timestamp() == 1_000));
    }

    fn rendered(samples: &[Sample]) -> Vec<String> {
        samples
            .iter()
            .map(|s| {
                let labels: Vec<String> = s
                    .labels()
                    .sorted()
                    .into_iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                format!("{}{{{}}} {}", s.metric_name(), labels.join(","), s.value())
            })
            .collect()
    }

    #[test]
    fn test_histogram_collects_vmrange_buckets() {
        let registry = MetricRegistry::new();
        let labels = Labels::from_pairs([("path", "/")]).unwrap();
        let histogram = registry.histogram("request_duration_seconds", &labels).unwrap();
        histogram.observe(0.0);
        histogram.observe(1e19);

        assert_eq!(
            rendered(&registry.collect(5)),
            vec![
                "request_duration_seconds_bucket{path=/,vmrange=0...1.000e-09} 1",
                "request_duration_seconds_bucket{path=/,vmrange=1.000e+18...+Inf} 1",
                "request_duration_seconds_sum{path=/} 10000000000000000000",
                "request_duration_seconds_count{path=/} 2",
            ]
        );
        assert!(Arc::ptr_eq(
            &histogram,
            &registry.histogram("request_duration_seconds", &labels).unwrap()
        ));
    }

    #[test]
    fn test_summary_collects_quantiles() {
        let registry = MetricRegistry::new();
        let summary = registry
            .summary_with("latency", &Labels::new(), &[0.5, 1.0], DEFAULT_MAX_AGE, 2)
            .unwrap();
        for v in [4.0, 1.0, 3.0, 2.0] {
            summary.observe(v);
        }

        assert_eq!(
            rendered(&registry.collect(5)),
            vec![
                "latency{quantile=0.5} 2",
                "latency{quantile=1} 4",
                "latency_sum{} 10",
                "latency_count{} 4",
            ]
        );
    }

    #[test]
    fn test_empty_summary_skips_quantiles() {
        let registry = MetricRegistry::new();
        registry.summary("idle", &Labels::new()).unwrap();
        assert_eq!(
            rendered(&registry.collect(5)),
            vec!["idle_sum{} 0", "idle_count{} 0"]
        );
    }

    #[test]
    fn test_reserved_labels_and_bad_summaries_rejected() {
        let registry = MetricRegistry::new();
        let vmrange = Labels::from_pairs([("vmrange", "x")]).unwrap();
        assert_eq!(
            registry.histogram("h", &vmrange).unwrap_err(),
            RegistryError::ReservedLabel {
                name: "h".to_string(),
                label: "vmrange",
                kind: "histogram"
            }
        );

        let quantile = Labels::from_pairs([("quantile", "x")]).unwrap();
        assert!(matches!(
            registry.summary("s", &quantile),
            Err(RegistryError::ReservedLabel { .. })
        ));
        assert!(matches!(
            registry.summary_with("s", &Labels::new(), &[1.5], DEFAULT_MAX_AGE, 2),
            Err(RegistryError::InvalidSummary { .. })
        ));
        assert!(registry.is_empty());

        registry.histogram("h", &Labels::new()).unwrap();
        assert_eq!(
            registry.summary("h", &Labels::new()).unwrap_err(),
            RegistryError::KindMismatch {
                name: "h".to_string(),
                existing: "histogram"
            }
        );
    }
}
