//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::{AppConfig, ExecutionProfile};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `memory_max_size` or `persistent.max_entries` is 0
    /// - `persistent.eviction_batch_size` is 0
    /// - `retry.max_attempts` is 0 or exceeds 10
    /// - `retry.base_delay_ms` exceeds `retry.max_delay_ms`
    /// - `retry.timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `remote_base_url` is set but not an http(s) URL
    /// - `user_agent` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_max_size == 0 {
            return Err(ConfigError::Invalid {
                field: "memory_max_size".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.persistent.max_entries == 0 {
            return Err(ConfigError::Invalid {
                field: "persistent.max_entries".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.persistent.eviction_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "persistent.eviction_batch_size".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.retry.max_attempts == 0 || self.retry.max_attempts > 10 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts".into(),
                reason: "must be between 1 and 10".into(),
            });
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid {
                field: "retry.base_delay_ms".into(),
                reason: "must not exceed retry.max_delay_ms".into(),
            });
        }
        if self.retry.timeout_ms < 100 {
            return Err(ConfigError::Invalid {
                field: "retry.timeout_ms".into(),
                reason: "must be at least 100ms".into(),
            });
        }
        if self.retry.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "retry.timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if let Some(base) = &self.remote_base_url {
            match url::Url::parse(base.trim()) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                Ok(parsed) => {
                    return Err(ConfigError::Invalid {
                        field: "remote_base_url".into(),
                        reason: format!("unsupported scheme: {}", parsed.scheme()),
                    });
                }
                Err(e) => {
                    return Err(ConfigError::Invalid { field: "remote_base_url".into(), reason: e.to_string() });
                }
            }
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if self.profile == ExecutionProfile::Worker && self.remote_base_url.is_none() {
            tracing::warn!(
                profile = %self.profile,
                "worker profile without remote_base_url; only the memory tier will be active"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PersistentConfig, RetryPolicy};

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_memory_max_size_zero() {
        let config = AppConfig { memory_max_size: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "memory_max_size"));
    }

    #[test]
    fn test_validate_eviction_batch_zero() {
        let config = AppConfig {
            persistent: PersistentConfig { eviction_batch_size: 0, ..Default::default() },
            ..Default::default()
        };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "persistent.eviction_batch_size"));
    }

    #[test]
    fn test_validate_max_attempts_range() {
        let config = AppConfig { retry: RetryPolicy { max_attempts: 0, ..Default::default() }, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "retry.max_attempts"));

        let config = AppConfig { retry: RetryPolicy { max_attempts: 11, ..Default::default() }, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "retry.max_attempts"));
    }

    #[test]
    fn test_validate_base_delay_above_max() {
        let config = AppConfig {
            retry: RetryPolicy { base_delay_ms: 10_000, max_delay_ms: 1_000, ..Default::default() },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "retry.base_delay_ms"));
    }

    #[test]
    fn test_validate_timeout_bounds() {
        let config = AppConfig { retry: RetryPolicy { timeout_ms: 50, ..Default::default() }, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "retry.timeout_ms"));

        let config =
            AppConfig { retry: RetryPolicy { timeout_ms: 301_000, ..Default::default() }, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "retry.timeout_ms"));
    }

    #[test]
    fn test_validate_remote_base_url() {
        let config = AppConfig { remote_base_url: Some("not a url".into()), ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "remote_base_url"));

        let config = AppConfig { remote_base_url: Some("ftp://static.example.org/".into()), ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "remote_base_url"));

        let config = AppConfig { remote_base_url: Some("https://static.example.org/".into()), ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_user_agent() {
        let config = AppConfig { user_agent: String::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "user_agent"));
    }
}
