//! Configuration module for the telemetry relay.
//!
//! This module provides environment-based configuration for the relay,
//! including the collector address, device identity, queue and error
//! limits, and the relay cadence.

use std::env;
use std::time::Duration;

/// Default base URL for the remote collector
const DEFAULT_COLLECTOR_URL: &str = "http://localhost:8000";

/// Default device identifier stamped into every sample
const DEFAULT_DEVICE_ID: &str = "edge-000";

/// Default maximum number of buffered un-sent samples
const DEFAULT_QUEUE_LIMIT: usize = 16;

/// Default unclassified-outcome budget before a fatal stop
const DEFAULT_ERROR_LIMIT: usize = 8;

/// Default relay cadence in milliseconds
const DEFAULT_SEND_INTERVAL_MS: u64 = 1_000;

/// Maximum allowed queue limit to prevent memory issues
const MAX_QUEUE_LIMIT: usize = 4_096;

/// Minimum relay cadence to avoid hammering the collector
const MIN_SEND_INTERVAL_MS: u64 = 50;

/// Maximum relay cadence to keep transmitted data reasonably fresh
const MAX_SEND_INTERVAL_MS: u64 = 300_000;

/// Configuration for the telemetry relay.
///
/// All settings can be configured via environment variables:
/// - `RELAY_COLLECTOR_URL`: Collector base URL (default: http://localhost:8000)
/// - `RELAY_DEVICE_ID`: Device identifier (default: edge-000)
/// - `RELAY_QUEUE_LIMIT`: Max buffered samples (default: 16)
/// - `RELAY_ERROR_LIMIT`: Unclassified-outcome budget, 0 = unbounded (default: 8)
/// - `RELAY_SEND_INTERVAL_MS`: Relay cadence (default: 1000)
/// - `RELAY_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 10)
/// - `RELAY_RETRY_SERVER_ERRORS`: Re-enqueue samples behind 5xx (default: true)
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the remote collector
    pub collector_url: String,

    /// Full URL for the sample submit endpoint
    pub submit_url: String,

    /// Opaque device identifier, passed through unexamined
    pub device_id: String,

    /// Max buffered un-sent samples; older entries are evicted first
    pub queue_limit: usize,

    /// Unclassified outcomes tolerated before a fatal stop; `None` is
    /// unbounded
    pub error_limit: Option<usize>,

    /// Interval between relay iterations
    pub send_interval: Duration,

    /// HTTP request timeout duration
    pub request_timeout: Duration,

    /// Whether 5xx outcomes re-enqueue the failed sample
    pub retry_server_errors: bool,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Returns a new `Config` with values from the environment, falling
    /// back to defaults where a variable is unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a numeric variable fails to parse or falls
    /// outside its allowed bounds.
    pub fn from_env() -> Result<Self, ConfigError> {
        let collector_url = env::var("RELAY_COLLECTOR_URL")
            .unwrap_or_else(|_| DEFAULT_COLLECTOR_URL.to_string());
        let collector_url = collector_url.trim_end_matches('/').to_string();
        let submit_url = format!("{}/api/v1/samples", collector_url);

        let device_id =
            env::var("RELAY_DEVICE_ID").unwrap_or_else(|_| DEFAULT_DEVICE_ID.to_string());

        let queue_limit = Self::parse_queue_limit()?;
        let error_limit = Self::parse_error_limit()?;
        let send_interval = Duration::from_millis(Self::parse_send_interval()?);

        let request_timeout_secs: u64 = env::var("RELAY_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        let request_timeout = Duration::from_secs(request_timeout_secs);

        let retry_server_errors = Self::parse_retry_flag()?;

        Ok(Self {
            collector_url,
            submit_url,
            device_id,
            queue_limit,
            error_limit,
            send_interval,
            request_timeout,
            retry_server_errors,
        })
    }

    /// Parse the queue limit with bounds validation.
    fn parse_queue_limit() -> Result<usize, ConfigError> {
        let env_var = "RELAY_QUEUE_LIMIT";

        match env::var(env_var) {
            Ok(value) => {
                let limit: usize = value.parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if limit == 0 {
                    return Err(ConfigError {
                        message: "queue limit must be greater than 0".to_string(),
                        env_var: Some(env_var.to_string()),
                    });
                }

                if limit > MAX_QUEUE_LIMIT {
                    return Err(ConfigError {
                        message: format!(
                            "queue limit {} exceeds maximum allowed ({})",
                            limit, MAX_QUEUE_LIMIT
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(limit)
            }
            Err(_) => Ok(DEFAULT_QUEUE_LIMIT),
        }
    }

    /// Parse the error limit; `0` configures an unbounded budget.
    fn parse_error_limit() -> Result<Option<usize>, ConfigError> {
        let env_var = "RELAY_ERROR_LIMIT";

        match env::var(env_var) {
            Ok(value) => {
                let limit: usize = value.parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                Ok(if limit == 0 { None } else { Some(limit) })
            }
            Err(_) => Ok(Some(DEFAULT_ERROR_LIMIT)),
        }
    }

    /// Parse the send interval with bounds validation.
    fn parse_send_interval() -> Result<u64, ConfigError> {
        let env_var = "RELAY_SEND_INTERVAL_MS";

        match env::var(env_var) {
            Ok(value) => {
                let interval: u64 = value.parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if interval < MIN_SEND_INTERVAL_MS {
                    return Err(ConfigError {
                        message: format!(
                            "send interval {}ms is below minimum ({}ms)",
                            interval, MIN_SEND_INTERVAL_MS
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                if interval > MAX_SEND_INTERVAL_MS {
                    return Err(ConfigError {
                        message: format!(
                            "send interval {}ms exceeds maximum ({}ms)",
                            interval, MAX_SEND_INTERVAL_MS
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(interval)
            }
            Err(_) => Ok(DEFAULT_SEND_INTERVAL_MS),
        }
    }

    /// Parse the retry policy switch.
    fn parse_retry_flag() -> Result<bool, ConfigError> {
        let env_var = "RELAY_RETRY_SERVER_ERRORS";

        match env::var(env_var) {
            Ok(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(ConfigError {
                    message: format!("'{}' is not a valid boolean", value),
                    env_var: Some(env_var.to_string()),
                }),
            },
            Err(_) => Ok(true),
        }
    }
}

impl Default for Config {
    /// Create a default configuration using default values.
    ///
    /// This is useful for testing or when environment variables are not set.
    fn default() -> Self {
        Self {
            collector_url: DEFAULT_COLLECTOR_URL.to_string(),
            submit_url: format!("{}/api/v1/samples", DEFAULT_COLLECTOR_URL),
            device_id: DEFAULT_DEVICE_ID.to_string(),
            queue_limit: DEFAULT_QUEUE_LIMIT,
            error_limit: Some(DEFAULT_ERROR_LIMIT),
            send_interval: Duration::from_millis(DEFAULT_SEND_INTERVAL_MS),
            request_timeout: Duration::from_secs(10),
            retry_server_errors: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Serializes tests that touch process environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        original: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let original = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                original,
            }
        }

        fn remove(key: &str) -> Self {
            let original = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                original,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.original {
                Some(val) => env::set_var(&self.key, val),
                None => env::remove_var(&self.key),
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.collector_url, "http://localhost:8000");
        assert_eq!(config.submit_url, "http://localhost:8000/api/v1/samples");
        assert_eq!(config.device_id, "edge-000");
        assert_eq!(config.queue_limit, 16);
        assert_eq!(config.error_limit, Some(8));
        assert_eq!(config.send_interval, Duration::from_millis(1000));
        assert!(config.retry_server_errors);
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard1 = EnvGuard::remove("RELAY_COLLECTOR_URL");
        let _guard2 = EnvGuard::remove("RELAY_QUEUE_LIMIT");
        let _guard3 = EnvGuard::remove("RELAY_ERROR_LIMIT");
        let _guard4 = EnvGuard::remove("RELAY_SEND_INTERVAL_MS");

        let config = Config::from_env().expect("Should load with defaults");
        assert_eq!(config.collector_url, "http://localhost:8000");
        assert_eq!(config.queue_limit, 16);
        assert_eq!(config.error_limit, Some(8));
        assert_eq!(config.send_interval, Duration::from_millis(1000));
    }

    #[test]
    fn test_config_from_env_custom_values() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard1 = EnvGuard::set("RELAY_COLLECTOR_URL", "http://custom:9000/");
        let _guard2 = EnvGuard::set("RELAY_DEVICE_ID", "greenhouse-07");
        let _guard3 = EnvGuard::set("RELAY_QUEUE_LIMIT", "32");
        let _guard4 = EnvGuard::set("RELAY_SEND_INTERVAL_MS", "250");

        let config = Config::from_env().expect("Should load custom values");
        assert_eq!(config.collector_url, "http://custom:9000"); // Trailing slash removed
        assert_eq!(config.submit_url, "http://custom:9000/api/v1/samples");
        assert_eq!(config.device_id, "greenhouse-07");
        assert_eq!(config.queue_limit, 32);
        assert_eq!(config.send_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_error_limit_zero_means_unbounded() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvGuard::set("RELAY_ERROR_LIMIT", "0");

        let config = Config::from_env().expect("Should load");
        assert_eq!(config.error_limit, None);
    }

    #[test]
    fn test_invalid_queue_limit() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvGuard::set("RELAY_QUEUE_LIMIT", "not_a_number");

        let result = Config::from_env();
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.message.contains("not a valid number"));
        assert_eq!(err.env_var.as_deref(), Some("RELAY_QUEUE_LIMIT"));
    }

    #[test]
    fn test_zero_queue_limit() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvGuard::set("RELAY_QUEUE_LIMIT", "0");

        let result = Config::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("greater than 0"));
    }

    #[test]
    fn test_queue_limit_exceeds_max() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvGuard::set("RELAY_QUEUE_LIMIT", "99999");

        let result = Config::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("exceeds maximum"));
    }

    #[test]
    fn test_send_interval_below_min() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvGuard::set("RELAY_SEND_INTERVAL_MS", "10");

        let result = Config::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("below minimum"));
    }

    #[test]
    fn test_send_interval_exceeds_max() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvGuard::set("RELAY_SEND_INTERVAL_MS", "999999");

        let result = Config::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("exceeds maximum"));
    }

    #[test]
    fn test_invalid_retry_flag() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvGuard::set("RELAY_RETRY_SERVER_ERRORS", "maybe");

        let result = Config::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("not a valid boolean"));
    }

    #[test]
    fn test_retry_flag_disabled() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = EnvGuard::set("RELAY_RETRY_SERVER_ERRORS", "false");

        let config = Config::from_env().expect("Should load");
        assert!(!config.retry_server_errors);
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError {
            message: "test error".to_string(),
            env_var: Some("TEST_VAR".to_string()),
        };
        assert_eq!(
            format!("{}", error),
            "Configuration error for TEST_VAR: test error"
        );

        let error_no_var = ConfigError {
            message: "general error".to_string(),
            env_var: None,
        };
        assert_eq!(
            format!("{}", error_no_var),
            "Configuration error: general error"
        );
    }
}
