use super::{Config, ConfigError};

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bearer_token.is_some() && self.basic_auth_user.is_some() {
            return Err(ConfigError::InvalidConfig(
                "Bearer token and basic auth are mutually exclusive".to_string(),
            ));
        }

        if self.basic_auth_password.is_some() && self.basic_auth_user.is_none() {
            return Err(ConfigError::InvalidConfig(
                "Basic auth password given without a user".to_string(),
            ));
        }

        if self.grace_period_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Grace period must be greater than 0".to_string(),
            ));
        }

        if self.overflow_dir.is_some() && self.overflow_max_mb == 0 {
            return Err(ConfigError::InvalidConfig(
                "Overflow size limit must be greater than 0".to_string(),
            ));
        }

        self.to_client_config().validate()?;
        Ok(())
    }
}
