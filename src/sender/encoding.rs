use crate::buffer::Batch;
use crate::domain::Sample;
use bytes::Bytes;
use prost::Message;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;

const ESTIMATED_LINE_SIZE: usize = 96;
const MAX_PREALLOCATION: usize = 16 * 1024 * 1024;

/// A trailing `\\` would otherwise escape the separator that follows it.
const INFLUX_TAG_SPECIAL: &[char] = &['\\', ',', ' ', '='];

pub const REMOTE_WRITE_VERSION: &str = "0.1.0";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Batch is empty")]
    EmptyBatch,

    #[error("Control character {character:?} in label '{label}' of metric '{metric}'")]
    ControlCharacter {
        metric: String,
        label: String,
        character: char,
    },

    #[error("Metric '{metric}' has non-finite value {value}, not representable in line protocol")]
    NonFiniteValue { metric: String, value: String },

    #[error("Timestamp {timestamp_ms}ms of metric '{metric}' overflows nanosecond precision")]
    TimestampOutOfRange { metric: String, timestamp_ms: i64 },
}

/// Body format sent to the ingestion endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Prometheus text exposition, for `/api/v1/import/prometheus`.
    #[default]
    PrometheusText,
    /// InfluxDB line protocol, for `/write`.
    InfluxLine,
    /// Snappy-compressed protobuf `WriteRequest`, for `/api/v1/write`.
    PrometheusRemoteWrite,
}

impl WireFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            WireFormat::PrometheusText => "text/plain; version=0.0.4",
            WireFormat::InfluxLine => "text/plain; charset=utf-8",
            WireFormat::PrometheusRemoteWrite => "application/x-protobuf",
        }
    }

    pub fn default_path(self) -> &'static str {
        match self {
            WireFormat::PrometheusText => "/api/v1/import/prometheus",
            WireFormat::InfluxLine => "/write",
            WireFormat::PrometheusRemoteWrite => "/api/v1/write",
        }
    }

    pub fn is_remote_write(self) -> bool {
        matches!(self, WireFormat::PrometheusRemoteWrite)
    }
}

impl std::str::FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prometheus" | "prometheus_text" | "text" => Ok(WireFormat::PrometheusText),
            "influx" | "influx_line" | "line" => Ok(WireFormat::InfluxLine),
            "remote_write" | "prometheus_remote_write" => Ok(WireFormat::PrometheusRemoteWrite),
            other => Err(format!("unknown wire format '{other}'")),
        }
    }
}

/// Encoding currently applied to a payload body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentEncoding {
    #[default]
    Identity,
    Gzip,
    Snappy,
}

impl ContentEncoding {
    /// Value for the `Content-Encoding` header, `None` for an uncompressed body.
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            ContentEncoding::Identity => None,
            ContentEncoding::Gzip => Some("gzip"),
            ContentEncoding::Snappy => Some("snappy"),
        }
    }
}

/// Encoded batch on its way to the endpoint. Each stage takes it by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedPayload {
    pub body: Bytes,
    pub content_type: String,
    pub content_encoding: ContentEncoding,
    pub wire_format: WireFormat,
    pub batch_id: String,
    pub sample_count: usize,
    pub uncompressed_len: usize,
}

impl EncodedPayload {
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Protobuf messages of the remote write protocol.
pub mod proto {
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    pub struct Label {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(string, tag = "2")]
        pub value: String,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Sample {
        #[prost(double, tag = "1")]
        pub value: f64,
        #[prost(int64, tag = "2")]
        pub timestamp: i64,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct TimeSeries {
        #[prost(message, repeated, tag = "1")]
        pub labels: Vec<Label>,
        #[prost(message, repeated, tag = "2")]
        pub samples: Vec<Sample>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct WriteRequest {
        #[prost(message, repeated, tag = "1")]
        pub timeseries: Vec<TimeSeries>,
    }
}

/// Turns a batch into a request body. Output is deterministic: label keys are
/// written in lexicographic order whatever order they were added in.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineEncoder {
    format: WireFormat,
}

impl LineEncoder {
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn encode(&self, batch: &Batch) -> Result<EncodedPayload, EncodingError> {
        if batch.is_empty() {
            return Err(EncodingError::EmptyBatch);
        }

        let body = match self.format {
            WireFormat::PrometheusText => Bytes::from(encode_prometheus_text(batch.samples())?),
            WireFormat::InfluxLine => Bytes::from(encode_influx_line(batch.samples())?),
            WireFormat::PrometheusRemoteWrite => {
                Bytes::from(encode_remote_write(batch.samples())?.encode_to_vec())
            }
        };

        Ok(EncodedPayload {
            uncompressed_len: body.len(),
            body,
            content_type: self.format.content_type().to_string(),
            content_encoding: ContentEncoding::Identity,
            wire_format: self.format,
            batch_id: batch.id().to_string(),
            sample_count: batch.len(),
        })
    }
}

fn estimated_capacity(samples: &[Sample]) -> usize {
    samples
        .len()
        .saturating_mul(ESTIMATED_LINE_SIZE)
        .min(MAX_PREALLOCATION)
}

/// `name{k="v",...} value timestamp_ms` per line.
pub fn encode_prometheus_text(samples: &[Sample]) -> Result<String, EncodingError> {
    let mut out = String::with_capacity(estimated_capacity(samples));

    for sample in samples {
        out.push_str(sample.metric_name());
        let labels = sample.labels().sorted();
        if !labels.is_empty() {
            out.push('{');
            for (i, (name, value)) in labels.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                check_control_chars(sample, name, value, &['\n'])?;
                out.push_str(name);
                out.push_str("=\"");
                escape_prometheus_value(&mut out, value);
                out.push('"');
            }
            out.push('}');
        }
        out.push(' ');
        push_value(&mut out, sample.value());
        let _ = write!(out, " {}", sample.timestamp());
        out.push('\n');
    }

    Ok(out)
}

/// `measurement,tag=v,... value=<f64> timestamp_ns` per line.
pub fn encode_influx_line(samples: &[Sample]) -> Result<String, EncodingError> {
    let mut out = String::with_capacity(estimated_capacity(samples));

    for sample in samples {
        let value = sample.value();
        if !value.is_finite() {
            return Err(EncodingError::NonFiniteValue {
                metric: sample.metric_name().to_string(),
                value: format_value(value),
            });
        }

        escape_influx(&mut out, sample.metric_name(), &[',', ' ']);
        for (name, tag_value) in sample.labels().sorted() {
            check_control_chars(sample, name, tag_value, &[])?;
            out.push(',');
            escape_influx(&mut out, name, INFLUX_TAG_SPECIAL);
            out.push('=');
            escape_influx(&mut out, tag_value, INFLUX_TAG_SPECIAL);
        }
        let timestamp_ns = sample.timestamp().checked_mul(1_000_000).ok_or_else(|| {
            EncodingError::TimestampOutOfRange {
                metric: sample.metric_name().to_string(),
                timestamp_ms: sample.timestamp(),
            }
        })?;
        out.push_str(" value=");
        push_value(&mut out, value);
        let _ = write!(out, " {timestamp_ns}");
        out.push('\n');
    }

    Ok(out)
}

/// One series per sample carrying `__name__` and the sorted labels.
pub fn encode_remote_write(samples: &[Sample]) -> Result<proto::WriteRequest, EncodingError> {
    let mut timeseries = Vec::with_capacity(samples.len());

    for sample in samples {
        let sorted = sample.labels().sorted();
        let mut labels = Vec::with_capacity(sorted.len() + 1);
        labels.push(proto::Label {
            name: "__name__".to_string(),
            value: sample.metric_name().to_string(),
        });
        for (name, value) in sorted {
            check_control_chars(sample, name, value, &['\n'])?;
            labels.push(proto::Label {
                name: name.to_string(),
                value: value.to_string(),
            });
        }

        timeseries.push(proto::TimeSeries {
            labels,
            samples: vec![proto::Sample {
                value: sample.value(),
                timestamp: sample.timestamp(),
            }],
        });
    }

    Ok(proto::WriteRequest { timeseries })
}

fn check_control_chars(
    sample: &Sample,
    label: &str,
    value: &str,
    allowed: &[char],
) -> Result<(), EncodingError> {
    match value
        .chars()
        .find(|c| c.is_control() && !allowed.contains(c))
    {
        Some(character) => Err(EncodingError::ControlCharacter {
            metric: sample.metric_name().to_string(),
            label: label.to_string(),
            character,
        }),
        None => Ok(()),
    }
}

fn escape_prometheus_value(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
}

fn escape_influx(out: &mut String, raw: &str, special: &[char]) {
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

fn format_value(value: f64) -> String {
    let mut out = String::new();
    push_value(&mut out, value);
    out
}

fn push_value(out: &mut String, value: f64) {
    if value.is_nan() {
        out.push_str("NaN");
    } else if value == f64::INFINITY {
        out.push_str("+Inf");
    } else if value == f64::NEG_INFINITY {
        out.push_str("-Inf");
    } else {
        let _ = write!(out, "{value}");
    }
}
