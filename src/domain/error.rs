use thiserror::Error;

/// A sample could not be constructed. Caller bug, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Metric name cannot be empty")]
    EmptyMetricName,

    #[error("Invalid metric name '{name}'")]
    InvalidMetricName { name: String },

    #[error("Label name cannot be empty")]
    EmptyLabelName,

    #[error("Invalid label name '{name}'")]
    InvalidLabelName { name: String },

    #[error("Duplicate label '{name}'")]
    DuplicateLabel { name: String },
}

/// A line of Prometheus text exposition could not be read.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Line carries no sample")]
    Skip,

    #[error("Invalid format at column {column}: {reason}")]
    InvalidFormat { column: usize, reason: String },

    #[error("Invalid value '{input}'")]
    InvalidValue { input: String },

    #[error("Invalid timestamp '{input}'")]
    InvalidTimestamp { input: String },

    #[error("Invalid sample: {0}")]
    Validation(#[from] ValidationError),
}
