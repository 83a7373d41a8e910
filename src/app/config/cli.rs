use super::serde_helpers::{
    load_env_flag, load_env_path_opt, load_env_string, load_env_string_opt, load_env_var,
};
use super::{ConfigError, LogFormat, LogLevel};
use crate::client::{ClientConfig, DEFAULT_ENDPOINT};
use crate::reliability::DiskConfig;
use crate::sender::{Credential, WireFormat, default_user_agent};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "vm-push", author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Write endpoint URL
    #[arg(long, env = "VM_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Bearer token sent with every request
    #[arg(long, env = "VM_BEARER_TOKEN", hide_env_values = true)]
    pub bearer_token: Option<String>,

    /// Basic auth user name
    #[arg(long, env = "VM_BASIC_AUTH_USER")]
    pub basic_auth_user: Option<String>,

    /// Basic auth password
    #[arg(long, env = "VM_BASIC_AUTH_PASSWORD", hide_env_values = true)]
    pub basic_auth_password: Option<String>,

    /// Payload format (prometheus_text, influx_line, prometheus_remote_write)
    #[arg(long, env = "VM_WIRE_FORMAT", default_value = "prometheus_text")]
    pub wire_format: WireFormat,

    /// Samples per batch
    #[arg(long, env = "VM_BATCH_SIZE", default_value = "10000")]
    pub batch_size: usize,

    /// Flush interval in milliseconds
    #[arg(long, env = "VM_FLUSH_INTERVAL_MS", default_value = "1000")]
    pub flush_interval_ms: u64,

    /// Sealed batches allowed to await delivery before submissions are rejected
    #[arg(long, env = "VM_MAX_IN_FLIGHT", default_value = "16")]
    pub max_in_flight: usize,

    /// Deliveries running at once
    #[arg(long, env = "VM_CONCURRENCY", default_value = "4")]
    pub concurrency: usize,

    #[arg(long, env = "VM_RETRY_BASE_DELAY_MS", default_value = "500")]
    pub retry_base_delay_ms: u64,

    #[arg(long, env = "VM_RETRY_MAX_DELAY_MS", default_value = "30000")]
    pub retry_max_delay_ms: u64,

    /// Attempts per batch, the first one included
    #[arg(long, env = "VM_RETRY_MAX_ATTEMPTS", default_value = "5")]
    pub retry_max_attempts: u32,

    /// Disable jitter on retry delays
    #[arg(long, env = "VM_NO_JITTER")]
    pub no_jitter: bool,

    /// Per-attempt send timeout in milliseconds
    #[arg(long, env = "VM_SEND_TIMEOUT_MS", default_value = "30000")]
    pub send_timeout_ms: u64,

    #[arg(long, env = "VM_CONNECT_TIMEOUT_MS", default_value = "5000")]
    pub connect_timeout_ms: u64,

    /// Send text payloads uncompressed
    #[arg(long, env = "VM_DISABLE_COMPRESSION")]
    pub disable_compression: bool,

    /// Keep undeliverable batches in this directory instead of dropping them
    #[arg(long, env = "VM_OVERFLOW_DIR")]
    pub overflow_dir: Option<PathBuf>,

    /// Maximum size of the overflow directory in MB
    #[arg(long, env = "VM_OVERFLOW_MAX_MB", default_value = "256")]
    pub overflow_max_mb: u64,

    /// How long to wait for in-flight deliveries on shutdown, in milliseconds
    #[arg(long, env = "VM_GRACE_PERIOD_MS", default_value = "5000")]
    pub grace_period_ms: u64,

    /// Read samples from this file instead of stdin
    #[arg(long, short)]
    pub input: Option<PathBuf>,

    #[arg(long, env = "VM_LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    #[arg(long, env = "VM_LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// TOML file replacing the command-line settings
    #[arg(long, env = "VM_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    #[serde(skip)]
    #[arg(skip)]
    pub flush_interval: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub grace_period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            bearer_token: None,
            basic_auth_user: None,
            basic_auth_password: None,
            wire_format: WireFormat::PrometheusText,
            batch_size: 10_000,
            flush_interval_ms: 1_000,
            max_in_flight: 16,
            concurrency: 4,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            retry_max_attempts: 5,
            no_jitter: false,
            send_timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
            disable_compression: false,
            overflow_dir: None,
            overflow_max_mb: 256,
            grace_period_ms: 5_000,
            input: None,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            config_file: None,
            flush_interval: Duration::from_millis(1_000),
            grace_period: Duration::from_millis(5_000),
        }
    }
}

impl Config {
    /// Parse the command line. When `--config-file` is given, that file is
    /// loaded instead; `--input` still comes from the command line.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);
        if let Some(path) = config.config_file.clone() {
            let input = config.input.take();
            config = Self::from_file(&path)?;
            config.config_file = Some(path);
            if input.is_some() {
                config.input = input;
            }
        }
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        load_env_string("VM_ENDPOINT", &mut config.endpoint);
        load_env_string_opt("VM_BEARER_TOKEN", &mut config.bearer_token);
        load_env_string_opt("VM_BASIC_AUTH_USER", &mut config.basic_auth_user);
        load_env_string_opt("VM_BASIC_AUTH_PASSWORD", &mut config.basic_auth_password);
        load_env_var("VM_WIRE_FORMAT", &mut config.wire_format)?;
        load_env_var("VM_BATCH_SIZE", &mut config.batch_size)?;
        load_env_var("VM_FLUSH_INTERVAL_MS", &mut config.flush_interval_ms)?;
        load_env_var("VM_MAX_IN_FLIGHT", &mut config.max_in_flight)?;
        load_env_var("VM_CONCURRENCY", &mut config.concurrency)?;
        load_env_var("VM_RETRY_BASE_DELAY_MS", &mut config.retry_base_delay_ms)?;
        load_env_var("VM_RETRY_MAX_DELAY_MS", &mut config.retry_max_delay_ms)?;
        load_env_var("VM_RETRY_MAX_ATTEMPTS", &mut config.retry_max_attempts)?;
        load_env_flag("VM_NO_JITTER", &mut config.no_jitter)?;
        load_env_var("VM_SEND_TIMEOUT_MS", &mut config.send_timeout_ms)?;
        load_env_var("VM_CONNECT_TIMEOUT_MS", &mut config.connect_timeout_ms)?;
        load_env_flag("VM_DISABLE_COMPRESSION", &mut config.disable_compression)?;
        load_env_path_opt("VM_OVERFLOW_DIR", &mut config.overflow_dir);
        load_env_var("VM_OVERFLOW_MAX_MB", &mut config.overflow_max_mb)?;
        load_env_var("VM_GRACE_PERIOD_MS", &mut config.grace_period_ms)?;
        load_env_var("VM_LOG_LEVEL", &mut config.log_level)?;
        load_env_var("VM_LOG_FORMAT", &mut config.log_format)?;
        load_env_path_opt("VM_CONFIG_FILE", &mut config.config_file);

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.flush_interval = Duration::from_millis(self.flush_interval_ms);
        self.grace_period = Duration::from_millis(self.grace_period_ms);
        Ok(())
    }

    pub fn credential(&self) -> Credential {
        match (&self.bearer_token, &self.basic_auth_user) {
            (Some(token), _) => Credential::Bearer {
                token: token.clone(),
            },
            (None, Some(username)) => Credential::Basic {
                username: username.clone(),
                password: self.basic_auth_password.clone().unwrap_or_default(),
            },
            (None, None) => Credential::None,
        }
    }

    /// Client settings without a failure policy; see [`Config::disk_config`].
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint_url: self.endpoint.clone(),
            auth_credential: self.credential(),
            max_batch_samples: self.batch_size,
            max_batch_interval: self.flush_interval,
            max_in_flight_batches: self.max_in_flight,
            max_concurrent_deliveries: self.concurrency,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(self.retry_max_delay_ms),
            retry_max_attempts: self.retry_max_attempts,
            retry_jitter: !self.no_jitter,
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            compression_enabled: !self.disable_compression,
            wire_format: self.wire_format,
            user_agent: default_user_agent(),
            failure_policy: Default::default(),
        }
    }

    pub fn disk_config(&self) -> Option<DiskConfig> {
        self.overflow_dir.as_ref().map(|path| DiskConfig {
            storage_path: path.clone(),
            max_disk_usage: self.overflow_max_mb * 1024 * 1024,
        })
    }
}
