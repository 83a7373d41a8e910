//! Domain layer for the metrics client.
//!
//! Contains the canonical types shared across all modules:
//! - `Sample`: one validated observation, the pipeline's core data type
//! - `Labels`: ordered, unique label set
//! - `ValidationError` / `ParseError`: construction and ingestion failures

pub mod error;
pub mod exposition;
pub mod sample;
pub mod validation;

pub use error::{ParseError, ValidationError};
pub use exposition::parse_line;
pub use sample::{Labels, Sample, SampleBuilder, current_timestamp_millis};
