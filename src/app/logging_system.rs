use super::config::{LogFormat, LogLevel};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },
    #[error("Failed to initialize logging: {0}")]
    InitFailed(String),
}

/// `target=level` pair appended to the filter after the default level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDirective {
    pub target: String,
    pub level: LogLevel,
}

impl LogDirective {
    pub fn new(target: impl Into<String>, level: LogLevel) -> Self {
        Self {
            target: target.into(),
            level,
        }
    }

    pub fn parse(input: &str) -> Result<Self, LoggingError> {
        let invalid = |reason: &str| LoggingError::InvalidDirective {
            directive: input.to_string(),
            reason: reason.to_string(),
        };
        let (target, level) = input.split_once('=').ok_or_else(|| invalid("expected target=level"))?;
        let target = target.trim();
        if target.is_empty() {
            return Err(invalid("empty target"));
        }
        let level = level.trim().parse::<LogLevel>().map_err(|e| invalid(e.as_str()))?;
        Ok(Self::new(target, level))
    }

    pub fn to_filter_string(&self) -> String {
        format!("{}={}", self.target, self.level.as_str())
    }
}

/// Builds the `EnvFilter` and installs the global subscriber.
pub struct LoggingSystem {
    directives: Arc<RwLock<Vec<LogDirective>>>,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self {
            directives: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn add_directive(&self, directive: &str) -> Result<(), LoggingError> {
        let directive = LogDirective::parse(directive)?;
        self.directives.write().push(directive);
        Ok(())
    }

    /// HTTP stack crates log every connection at debug; keep them at warn.
    pub fn add_default_directives(&self) {
        let mut directives = self.directives.write();
        for target in ["hyper", "hyper_util", "reqwest", "h2", "rustls"] {
            directives.push(LogDirective::new(target, LogLevel::Warn));
        }
    }

    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        let directives = self.directives.read();
        std::iter::once(default_level.as_str().to_string())
            .chain(directives.iter().map(LogDirective::to_filter_string))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn build_filter(&self, default_level: LogLevel) -> Result<EnvFilter, LoggingError> {
        let filter_string = self.build_filter_string(default_level);
        let mut filter = EnvFilter::new(default_level.as_str());
        for part in filter_string.split(',').skip(1) {
            let directive = part
                .parse::<Directive>()
                .map_err(|e| LoggingError::InvalidDirective {
                    directive: part.to_string(),
                    reason: e.to_string(),
                })?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }

    pub fn initialize_tracing(
        &self,
        default_level: LogLevel,
        format: LogFormat,
    ) -> Result<(), LoggingError> {
        let filter = self.build_filter(default_level)?;
        let registry = tracing_subscriber::registry().with(filter);

        let result = match format {
            LogFormat::Compact => registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true)
                        .with_writer(std::io::stderr)
                        .compact(),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(false)
                        .with_writer(std::io::stderr),
                )
                .try_init(),
        };

        result.map_err(|e| LoggingError::InitFailed(e.to_string()))
    }

    pub fn directive_count(&self) -> usize {
        self.directives.read().len()
    }
}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the global subscriber once. Later calls are no-ops.
pub fn setup_logging_safe(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    use std::sync::OnceLock;
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();

    INIT.get_or_init(|| {
        let system = LoggingSystem::new();
        system.add_default_directives();
        system
            .initialize_tracing(level, format)
            .map_err(|e| e.to_string())
    })
    .clone()
    .map_err(LoggingError::InitFailed)
}
