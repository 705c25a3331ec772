//! Redis configuration types
//!
//! Redis is optional for PeakSelf: it only backs the distributed rate
//! limiter. Without it the API falls back to per-instance counters.

use crate::{get_optional_env, parse_env, ConfigResult};

/// Redis configuration
#[derive(Debug, Clone, Default)]
pub struct RedisConfig {
    /// Redis connection URL, `None` when Redis is not configured
    pub url: Option<String>,

    /// Optional password for Redis authentication
    pub password: Option<String>,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
}

impl RedisConfig {
    /// Load Redis configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            url: get_optional_env("REDIS_URL"),
            password: get_optional_env("REDIS_PASSWORD"),
            connect_timeout_secs: parse_env("REDIS_CONNECT_TIMEOUT", 5)?,
        })
    }

    /// Create a configuration with a custom URL (useful for testing)
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            password: None,
            connect_timeout_secs: 5,
        }
    }

    /// Whether a Redis server is configured at all
    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// Build the full connection URL including password if set
    pub fn connection_url(&self) -> Option<String> {
        let url = self.url.as_ref()?;
        if let Some(ref password) = self.password {
            if let Some((scheme, rest)) = url.split_once("://") {
                return Some(format!("{}://:{}@{}", scheme, password, rest));
            }
        }
        Some(url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unconfigured() {
        let config = RedisConfig::default();
        assert!(!config.is_configured());
        assert!(config.connection_url().is_none());
    }

    #[test]
    fn test_with_url() {
        let config = RedisConfig::with_url("redis://custom:6380");
        assert!(config.is_configured());
        assert_eq!(config.connection_url().as_deref(), Some("redis://custom:6380"));
    }

    #[test]
    fn test_connection_url_with_password() {
        let mut config = RedisConfig::with_url("redis://cache:6379");
        config.password = Some("s3cret".to_string());
        assert_eq!(
            config.connection_url().as_deref(),
            Some("redis://:s3cret@cache:6379")
        );
    }
}
