use super::{Config, ConfigError};
use std::time::Duration;
use url::Url;

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server address
        let base = self.base_url();
        let url = Url::parse(&base)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid address '{}': {e}", self.address)))?;
        if url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl(format!(
                "Address '{}' has no host",
                self.address
            )));
        }

        if self.grpc_address.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "gRPC address must not be empty".to_string(),
            ));
        }

        // Validate intervals
        if self.poll_interval == Duration::ZERO {
            return Err(ConfigError::InvalidConfig(
                "Poll interval must be greater than 0".to_string(),
            ));
        }
        if self.report_interval == Duration::ZERO {
            return Err(ConfigError::InvalidConfig(
                "Report interval must be greater than 0".to_string(),
            ));
        }

        // Validate worker count
        if self.rate_limit == 0 {
            return Err(ConfigError::InvalidConfig(
                "Rate limit (worker count) must be greater than 0".to_string(),
            ));
        }

        if let Some(path) = &self.crypto_key {
            if !path.is_file() {
                return Err(ConfigError::InvalidConfig(format!(
                    "Crypto key file does not exist: {}",
                    path.display()
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_zero_values_are_rejected() {
        let config = Config {
            poll_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            rate_limit: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_crypto_key_file() {
        let config = Config {
            crypto_key: Some(PathBuf::from("/nonexistent/public.pem")),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(msg)) if msg.contains("public.pem")
        ));
    }

    #[test]
    fn test_scheme_is_optional() {
        let config = Config {
            address: "https://metrics.internal:443/".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.base_url(), "https://metrics.internal:443");
    }
}
