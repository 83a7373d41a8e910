use super::error::ValidationError;
use super::validation::{validate_label_name, validate_metric_name};
use serde::Serialize;
use std::hash::{Hash, Hasher};

/// Ordered label set. Keys are unique, non-empty and Prometheus-compatible.
///
/// Iteration follows insertion order; encoders use [`Labels::sorted`] so the
/// wire output never depends on the order labels were added in. Equality and
/// hashing ignore insertion order for the same reason.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Labels {
    pairs: Vec<(String, String)>,
}

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut labels = Self::new();
        for (name, value) in pairs {
            labels.insert(name, value)?;
        }
        Ok(labels)
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ValidationError> {
        let name = name.into();
        validate_label_name(&name)?;
        if self.get(&name).is_some() {
            return Err(ValidationError::DuplicateLabel { name });
        }
        self.pairs.push((name, value.into()));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Labels in lexicographic key order.
    pub fn sorted(&self) -> Vec<(&str, &str)> {
        let mut sorted: Vec<_> = self.iter().collect();
        sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));
        sorted
    }
}

impl PartialEq for Labels {
    fn eq(&self, other: &Self) -> bool {
        self.pairs.len() == other.pairs.len() && self.sorted() == other.sorted()
    }
}

impl Eq for Labels {}

impl Hash for Labels {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sorted().hash(state);
    }
}

/// One observation: metric name, labels, millisecond timestamp and value.
///
/// Samples are immutable once built. Equality and hashing cover every field;
/// the value is compared by its bit pattern so that `Eq` and `Hash` hold.
#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    metric_name: String,
    labels: Labels,
    timestamp: i64,
    value: f64,
}

impl Sample {
    pub fn new(
        metric_name: impl Into<String>,
        labels: Labels,
        timestamp: i64,
        value: f64,
    ) -> Result<Self, ValidationError> {
        let metric_name = metric_name.into();
        validate_metric_name(&metric_name)?;

        Ok(Self {
            metric_name,
            labels,
            timestamp,
            value,
        })
    }

    /// Build a sample stamped with the current wall clock time.
    pub fn now(
        metric_name: impl Into<String>,
        labels: Labels,
        value: f64,
    ) -> Result<Self, ValidationError> {
        Self::new(metric_name, labels, current_timestamp_millis(), value)
    }

    pub fn builder(metric_name: impl Into<String>) -> SampleBuilder {
        SampleBuilder {
            metric_name: metric_name.into(),
            labels: Vec::new(),
            timestamp: None,
            value: 0.0,
        }
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl PartialEq for Sample {
    fn eq(&self, other: &Self) -> bool {
        self.metric_name == other.metric_name
            && self.labels == other.labels
            && self.timestamp == other.timestamp
            && self.value.to_bits() == other.value.to_bits()
    }
}

impl Eq for Sample {}

impl Hash for Sample {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.metric_name.hash(state);
        self.labels.hash(state);
        self.timestamp.hash(state);
        self.value.to_bits().hash(state);
    }
}

/// Fluent construction of a [`Sample`]; validation happens in [`SampleBuilder::build`].
#[derive(Debug, Clone)]
pub struct SampleBuilder {
    metric_name: String,
    labels: Vec<(String, String)>,
    timestamp: Option<i64>,
    value: f64,
}

impl SampleBuilder {
    pub fn label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((name.into(), value.into()));
        self
    }

    pub fn timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }

    pub fn value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    pub fn build(self) -> Result<Sample, ValidationError> {
        let labels = Labels::from_pairs(self.labels)?;
        let timestamp = self.timestamp.unwrap_or_else(current_timestamp_millis);
        Sample::new(self.metric_name, labels, timestamp, self.value)
    }
}

pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
