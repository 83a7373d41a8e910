use crate::buffer::BatchConfig;
use crate::reliability::{FailurePolicy, RetryPolicy};
use crate::sender::{Compression, Credential, TransportConfig, WireFormat, default_user_agent};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8428/api/v1/import/prometheus";

/// Rejected settings. Raised once, before anything is started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Every recognised client option. Durations are (de)serialized as milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint_url: String,
    pub auth_credential: Credential,
    pub max_batch_samples: usize,
    #[serde(with = "super::serde_helpers")]
    pub max_batch_interval: Duration,
    pub max_in_flight_batches: usize,
    pub max_concurrent_deliveries: usize,
    #[serde(with = "super::serde_helpers")]
    pub retry_base_delay: Duration,
    #[serde(with = "super::serde_helpers")]
    pub retry_max_delay: Duration,
    pub retry_max_attempts: u32,
    pub retry_jitter: bool,
    #[serde(with = "super::serde_helpers")]
    pub send_timeout: Duration,
    #[serde(with = "super::serde_helpers")]
    pub connect_timeout: Duration,
    pub compression_enabled: bool,
    pub wire_format: WireFormat,
    pub user_agent: String,
    #[serde(skip)]
    pub failure_policy: FailurePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT.to_string(),
            auth_credential: Credential::None,
            max_batch_samples: 10_000,
            max_batch_interval: Duration::from_secs(1),
            max_in_flight_batches: 16,
            max_concurrent_deliveries: 4,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            retry_max_attempts: 5,
            retry_jitter: true,
            send_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            compression_enabled: true,
            wire_format: WireFormat::PrometheusText,
            user_agent: default_user_agent(),
            failure_policy: FailurePolicy::Drop,
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.endpoint()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "Endpoint '{}' must use http or https",
                self.endpoint_url
            )));
        }

        let positive = [
            ("max_batch_samples", self.max_batch_samples),
            ("max_in_flight_batches", self.max_in_flight_batches),
            ("max_concurrent_deliveries", self.max_concurrent_deliveries),
            ("retry_max_attempts", self.retry_max_attempts as usize),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::InvalidConfig(format!(
                "{name} must be greater than 0"
            )));
        }

        for (name, value) in [
            ("max_batch_interval", self.max_batch_interval),
            ("send_timeout", self.send_timeout),
            ("connect_timeout", self.connect_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.retry_base_delay > self.retry_max_delay {
            return Err(ConfigError::InvalidConfig(format!(
                "retry_base_delay ({:?}) exceeds retry_max_delay ({:?})",
                self.retry_base_delay, self.retry_max_delay
            )));
        }

        if self.wire_format.is_remote_write() && !self.compression_enabled {
            return Err(ConfigError::InvalidConfig(
                "Remote write requires snappy compression; compression_enabled cannot be false"
                    .to_string(),
            ));
        }

        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "user_agent cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// The endpoint URL. A bare host (no path or `/`) gets the ingestion path
    /// of the configured wire format.
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.endpoint_url).map_err(|e| {
            ConfigError::InvalidUrl(format!(
                "Invalid endpoint URL '{}': {e}",
                self.endpoint_url
            ))
        })?;
        if matches!(url.path(), "" | "/") {
            url.set_path(self.wire_format.default_path());
        }
        Ok(url)
    }

    /// Remote write is always snappy; text formats are gzip when enabled.
    pub fn compression(&self) -> Compression {
        if self.wire_format.is_remote_write() {
            Compression::Snappy
        } else if self.compression_enabled {
            Compression::Gzip
        } else {
            Compression::None
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_batch_samples: self.max_batch_samples,
            max_batch_interval: self.max_batch_interval,
            max_in_flight_batches: self.max_in_flight_batches,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            max_attempts: self.retry_max_attempts,
            jitter: self.retry_jitter,
        }
    }

    pub fn transport_config(&self) -> Result<TransportConfig, ConfigError> {
        let mut transport = TransportConfig::new(self.endpoint()?);
        transport.credential = self.auth_credential.clone();
        transport.user_agent = self.user_agent.clone();
        transport.connect_timeout = self.connect_timeout;
        transport.max_idle_per_host = self.max_concurrent_deliveries.max(1);
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.compression(), Compression::Gzip);
    }

    #[test]
    fn test_invalid_endpoint() {
        let config = ClientConfig::new("not a url");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));

        let config = ClientConfig::new("ftp://example.com/upload");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_bare_host_gets_wire_format_path() {
        let mut config = ClientConfig::new("http://vm:8428");
        assert_eq!(
            config.endpoint().unwrap().as_str(),
            "http://vm:8428/api/v1/import/prometheus"
        );

        config.wire_format = WireFormat::PrometheusRemoteWrite;
        assert_eq!(config.endpoint().unwrap().path(), "/api/v1/write");

        config = ClientConfig {
            wire_format: WireFormat::InfluxLine,
            ..ClientConfig::new("http://vm:8428/")
        };
        assert_eq!(config.endpoint().unwrap().path(), "/write");

        config.endpoint_url = "http://vm:8428/custom/import".to_string();
        assert_eq!(config.endpoint().unwrap().path(), "/custom/import");
    }

    #[test]
    fn test_zero_limits_rejected() {
        for config in [
            ClientConfig {
                max_batch_samples: 0,
                ..Default::default()
            },
            ClientConfig {
                max_in_flight_batches: 0,
                ..Default::default()
            },
            ClientConfig {
                max_concurrent_deliveries: 0,
                ..Default::default()
            },
            ClientConfig {
                retry_max_attempts: 0,
                ..Default::default()
            },
            ClientConfig {
                send_timeout: Duration::ZERO,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_base_delay_above_max_rejected() {
        let config = ClientConfig {
            retry_base_delay: Duration::from_secs(10),
            retry_max_delay: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_remote_write_forces_snappy() {
        let config = ClientConfig {
            wire_format: WireFormat::PrometheusRemoteWrite,
            ..Default::default()
        };
        assert_eq!(config.compression(), Compression::Snappy);

        let uncompressed = ClientConfig {
            compression_enabled: false,
            ..config
        };
        assert!(uncompressed.validate().is_err());
    }

    #[test]
    fn test_from_toml_with_millis() {
        let config: ClientConfig = toml::from_str(
            r#"
            endpoint_url = "http://vm:8428/api/v1/import/prometheus"
            max_batch_samples = 500
            max_batch_interval = 250
            wire_format = "influx_line"

            [auth_credential]
            type = "bearer"
            token = "abc"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_batch_samples, 500);
        assert_eq!(config.max_batch_interval, Duration::from_millis(250));
        assert_eq!(config.wire_format, WireFormat::InfluxLine);
        assert_eq!(
            config.auth_credential,
            Credential::Bearer {
                token: "abc".to_string()
            }
        );
        assert_eq!(config.retry_max_attempts, 5);
        assert!(config.validate().is_ok());
    }
}
