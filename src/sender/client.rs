use super::encoding::{EncodedPayload, REMOTE_WRITE_VERSION};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;
use url::Url;

const MAX_ERROR_BODY: usize = 512;

/// Authorization attached to every request.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::None => f.write_str("None"),
            Credential::Bearer { .. } => f.debug_struct("Bearer").field("token", &"***").finish(),
            Credential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Network,
    /// The request could not be built. Retrying cannot help.
    Request,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind, TransportErrorKind::Request)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        let kind = if error.is_builder() {
            TransportErrorKind::Request
        } else if error.is_timeout() {
            TransportErrorKind::Timeout
        } else if error.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Network
        };
        Self::new(kind, error.to_string())
    }
}

/// Status and (truncated) body of an endpoint response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One HTTP POST of an encoded payload. Implemented by [`HttpTransport`] and by
/// test doubles.
pub trait Transport: Send + Sync + 'static {
    fn post(
        &self,
        payload: &EncodedPayload,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint: Url,
    pub credential: Credential,
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub max_idle_per_host: usize,
}

impl TransportConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            credential: Credential::None,
            user_agent: default_user_agent(),
            connect_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(90),
            max_idle_per_host: 16,
        }
    }
}

pub fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// reqwest-backed transport over a pooled keep-alive client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let client = ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                TransportError::new(
                    TransportErrorKind::Request,
                    format!("Failed to build HTTP client: {e}"),
                )
            })?;

        Ok(Self { client, config })
    }

    pub fn endpoint(&self) -> &Url {
        &self.config.endpoint
    }
}

impl Transport for HttpTransport {
    async fn post(&self, payload: &EncodedPayload) -> Result<TransportResponse, TransportError> {
        let mut request = self
            .client
            .post(self.config.endpoint.clone())
            .header(CONTENT_TYPE, payload.content_type.as_str())
            .header("X-Batch-Id", payload.batch_id.as_str())
            .header("X-Batch-Size", payload.sample_count.to_string())
            .body(payload.body.clone());

        if let Some(encoding) = payload.content_encoding.header_value() {
            request = request.header(CONTENT_ENCODING, encoding);
        }
        if payload.wire_format.is_remote_write() {
            request = request.header("X-Prometheus-Remote-Write-Version", REMOTE_WRITE_VERSION);
        }
        request = match &self.config.credential {
            Credential::None => request,
            Credential::Bearer { token } => request.bearer_auth(token),
            Credential::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
        };

        let response = request.send().await?;
        let status = response.status().as_u16();
        trace!(batch_id = %payload.batch_id, status, "response received");

        let body = if response.status().is_success() {
            String::new()
        } else {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            body
        };

        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::compression::Compression;
    use crate::sender::encoding::{ContentEncoding, WireFormat};
    use bytes::Bytes;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload(format: WireFormat) -> EncodedPayload {
        EncodedPayload {
            body: Bytes::from_static(b"m 1 1\n"),
            content_type: format.content_type().to_string(),
            content_encoding: ContentEncoding::Identity,
            wire_format: format,
            batch_id: "batch-42".to_string(),
            sample_count: 1,
            uncompressed_len: 6,
        }
    }

    fn transport(server: &MockServer, route: &str, credential: Credential) -> HttpTransport {
        let url = Url::parse(&format!("{}{}", server.uri(), route)).unwrap();
        let mut config = TransportConfig::new(url);
        config.credential = credential;
        HttpTransport::new(config).unwrap()
    }

    #[test]
    fn test_credential_debug_redacts_secrets() {
        let bearer = Credential::Bearer {
            token: "s3cr3t".to_string(),
        };
        let basic = Credential::Basic {
            username: "vm".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{bearer:?}").contains("s3cr3t"));
        let rendered = format!("{basic:?}");
        assert!(rendered.contains("vm"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_transport_error_retryability() {
        assert!(TransportError::new(TransportErrorKind::Connect, "refused").is_retryable());
        assert!(TransportError::new(TransportErrorKind::Timeout, "slow").is_retryable());
        assert!(!TransportError::new(TransportErrorKind::Request, "bad").is_retryable());
    }

    #[tokio::test]
    async fn test_post_sends_headers_and_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/import/prometheus"))
            .and(header("content-type", "text/plain; version=0.0.4"))
            .and(header("authorization", "Bearer token-1"))
            .and(header("x-batch-id", "batch-42"))
            .and(header("x-batch-size", "1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport(
            &server,
            "/api/v1/import/prometheus",
            Credential::Bearer {
                token: "token-1".to_string(),
            },
        );
        let response = transport
            .post(&payload(WireFormat::PrometheusText))
            .await
            .unwrap();
        assert_eq!(response.status, 204);
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_remote_write_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/write"))
            .and(header("content-type", "application/x-protobuf"))
            .and(header("content-encoding", "snappy"))
            .and(header("x-prometheus-remote-write-version", "0.1.0"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport(&server, "/api/v1/write", Credential::None);
        let payload = Compression::Snappy
            .apply(payload(WireFormat::PrometheusRemoteWrite))
            .unwrap();
        assert_eq!(transport.post(&payload).await.unwrap().status, 204);
    }

    #[tokio::test]
    async fn test_error_body_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("cannot parse line"))
            .mount(&server)
            .await;

        let transport = transport(&server, "/write", Credential::None);
        let response = transport.post(&payload(WireFormat::InfluxLine)).await.unwrap();
        assert_eq!(response.status, 400);
        assert_eq!(response.body, "cannot parse line");
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        let url = Url::parse("http://127.0.0.1:1/api/v1/import/prometheus").unwrap();
        let transport = HttpTransport::new(TransportConfig::new(url)).unwrap();
        let err = transport
            .post(&payload(WireFormat::PrometheusText))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
