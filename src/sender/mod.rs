//! Encoding, compression and HTTP delivery of sealed batches.

pub mod client;
pub mod compression;
pub mod encoding;
pub mod stats;
pub mod transmission;

pub use client::{
    Credential, HttpTransport, Transport, TransportConfig, TransportError, TransportErrorKind,
    TransportResponse, default_user_agent,
};
pub use compression::{Compression, CompressionError};
pub use encoding::{ContentEncoding, EncodedPayload, EncodingError, LineEncoder, WireFormat};
pub use stats::{DeliveryStats, DeliveryStatsSnapshot};
pub use transmission::{
    AttemptState, DeliveryAttempt, DeliveryError, DeliveryReport, DeliverySender, classify,
};
