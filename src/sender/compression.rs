use super::encoding::{ContentEncoding, EncodedPayload};
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Gzip failed: {0}")]
    Gzip(#[from] std::io::Error),

    #[error("Snappy failed: {0}")]
    Snappy(#[from] snap::Error),

    #[error("Payload {batch_id} is already encoded as {current:?}")]
    AlreadyEncoded {
        batch_id: String,
        current: ContentEncoding,
    },
}

/// Compression applied to payload bodies. Every call is independent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    Gzip,
    /// Raw block format, required by the remote write protocol.
    Snappy,
    None,
}

impl Compression {
    pub fn content_encoding(self) -> ContentEncoding {
        match self {
            Compression::Gzip => ContentEncoding::Gzip,
            Compression::Snappy => ContentEncoding::Snappy,
            Compression::None => ContentEncoding::Identity,
        }
    }

    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        match self {
            Compression::Gzip => {
                let mut encoder =
                    GzEncoder::new(Vec::with_capacity(data.len() / 4), flate2::Compression::fast());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Compression::Snappy => Ok(snap::raw::Encoder::new().compress_vec(data)?),
            Compression::None => Ok(data.to_vec()),
        }
    }

    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        match self {
            Compression::Gzip => {
                let mut out = Vec::with_capacity(data.len() * 4);
                GzDecoder::new(data).read_to_end(&mut out)?;
                Ok(out)
            }
            Compression::Snappy => Ok(snap::raw::Decoder::new().decompress_vec(data)?),
            Compression::None => Ok(data.to_vec()),
        }
    }

    /// Compress the payload body and mark its content encoding.
    pub fn apply(self, payload: EncodedPayload) -> Result<EncodedPayload, CompressionError> {
        if payload.content_encoding != ContentEncoding::Identity {
            return Err(CompressionError::AlreadyEncoded {
                batch_id: payload.batch_id,
                current: payload.content_encoding,
            });
        }
        if self == Compression::None {
            return Ok(payload);
        }

        let body = Bytes::from(self.compress(&payload.body)?);
        Ok(EncodedPayload {
            body,
            content_encoding: self.content_encoding(),
            ..payload
        })
    }
}
