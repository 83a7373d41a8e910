//! Environment variable loaders used by [`Config::from_env`](super::Config::from_env).
//! Unset variables keep the current value.

use super::ConfigError;
use std::path::PathBuf;

pub fn load_env_var<T>(name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(value) = std::env::var(name) {
        *target = value
            .parse()
            .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

pub fn load_env_string(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        *target = value;
    }
}

pub fn load_env_string_opt(name: &str, target: &mut Option<String>) {
    if let Ok(value) = std::env::var(name) {
        *target = Some(value);
    }
}

pub fn load_env_path_opt(name: &str, target: &mut Option<PathBuf>) {
    if let Ok(value) = std::env::var(name) {
        *target = Some(PathBuf::from(value));
    }
}

/// Accepts the same spellings clap does for boolean flags.
pub fn load_env_flag(name: &str, target: &mut bool) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(name) {
        *target = match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            other => {
                return Err(ConfigError::EnvError(format!(
                    "Invalid {name}: '{other}' is not a boolean"
                )));
            }
        };
    }
    Ok(())
}
