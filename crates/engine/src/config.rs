//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reliability::{CircuitBreakerConfig, RetryPolicy};
use crate::worker::ScalingConfig;

/// Configuration errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid engine configuration: {0}")]
    Invalid(String),
}

/// Engine configuration
///
/// All plain values; no file format is required. Durations serialize as
/// milliseconds.
///
/// # Example
///
/// ```
/// use bulwark_engine::{CircuitBreakerConfig, EngineConfig, RetryPolicy};
/// use std::time::Duration;
///
/// let config = EngineConfig::default()
///     .with_queue_capacity(128)
///     .with_retry(RetryPolicy::exponential().with_max_attempts(3))
///     .with_circuit_breaker(
///         CircuitBreakerConfig::new().with_open_timeout(Duration::from_secs(5)),
///     );
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Capacity of the submission queue
    pub queue_capacity: usize,

    /// Capacity of the results channel
    pub results_capacity: usize,

    /// Retry policy applied to every task
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Circuit breaker guarding the resource
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// How often the monitor samples pool statistics
    #[serde(with = "duration_millis")]
    pub monitor_interval: Duration,

    /// Optional dynamic worker scaling
    #[serde(default)]
    pub scaling: Option<ScalingConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            results_capacity: 256,
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            monitor_interval: Duration::from_secs(5),
            scaling: None,
        }
    }
}

impl EngineConfig {
    /// Create a new engine configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Missing or unparsable variables fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let retry = RetryPolicy {
            max_attempts: env_parse("BULWARK_MAX_ATTEMPTS").unwrap_or(defaults.retry.max_attempts),
            initial_interval: env_millis("BULWARK_BASE_DELAY_MS")
                .unwrap_or(defaults.retry.initial_interval),
            max_interval: env_millis("BULWARK_MAX_DELAY_MS").unwrap_or(defaults.retry.max_interval),
            ..defaults.retry
        };

        let circuit_breaker = CircuitBreakerConfig {
            failure_threshold: env_parse("BULWARK_FAILURE_THRESHOLD")
                .unwrap_or(defaults.circuit_breaker.failure_threshold),
            open_timeout: env_millis("BULWARK_OPEN_TIMEOUT_MS")
                .unwrap_or(defaults.circuit_breaker.open_timeout),
        };

        Self {
            queue_capacity: env_parse("BULWARK_QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity),
            results_capacity: env_parse("BULWARK_RESULTS_CAPACITY")
                .unwrap_or(defaults.results_capacity),
            retry,
            circuit_breaker,
            monitor_interval: env_millis("BULWARK_MONITOR_INTERVAL_MS")
                .unwrap_or(defaults.monitor_interval),
            scaling: None,
        }
    }

    /// Set the submission queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the results channel capacity
    pub fn with_results_capacity(mut self, capacity: usize) -> Self {
        self.results_capacity = capacity;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Set the circuit breaker configuration
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Set the monitor sampling interval
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// Enable dynamic worker scaling
    pub fn with_scaling(mut self, scaling: ScalingConfig) -> Self {
        self.scaling = Some(scaling);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1".into()));
        }
        if self.results_capacity == 0 {
            return Err(ConfigError::Invalid(
                "results_capacity must be at least 1".into(),
            ));
        }
        self.retry.validate()?;
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.monitor_interval.is_zero() {
            return Err(ConfigError::Invalid("monitor_interval must be non-zero".into()));
        }
        if let Some(scaling) = &self.scaling {
            scaling.validate()?;
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.results_capacity, 256);
        assert_eq!(config.monitor_interval, Duration::from_secs(5));
        assert!(config.scaling.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .with_queue_capacity(2)
            .with_results_capacity(8)
            .with_retry(RetryPolicy::no_retry())
            .with_monitor_interval(Duration::from_millis(250));

        assert_eq!(config.queue_capacity, 2);
        assert_eq!(config.results_capacity, 8);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.monitor_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_config_validation() {
        assert!(EngineConfig::new().with_queue_capacity(0).validate().is_err());
        assert!(EngineConfig::new().with_results_capacity(0).validate().is_err());
        assert!(EngineConfig::new()
            .with_monitor_interval(Duration::ZERO)
            .validate()
            .is_err());

        let mut config = EngineConfig::new();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::new();
        config.retry.jitter = 1e12;
        assert!(config.validate().is_err());

        let mut json = serde_json::to_value(EngineConfig::default()).unwrap();
        json["retry"]["backoff_coefficient"] = serde_json::json!(0.25);
        let parsed: EngineConfig = serde_json::from_value(json).unwrap();
        assert!(parsed.validate().is_err());

        let scaling = ScalingConfig::new(4)
            .with_high_watermark(0.5)
            .with_low_watermark(0.8);
        assert!(EngineConfig::new().with_scaling(scaling).validate().is_err());
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("BULWARK_QUEUE_CAPACITY", "12");
        std::env::set_var("BULWARK_OPEN_TIMEOUT_MS", "1500");
        std::env::set_var("BULWARK_MAX_ATTEMPTS", "not-a-number");

        let config = EngineConfig::from_env();

        std::env::remove_var("BULWARK_QUEUE_CAPACITY");
        std::env::remove_var("BULWARK_OPEN_TIMEOUT_MS");
        std::env::remove_var("BULWARK_MAX_ATTEMPTS");

        assert_eq!(config.queue_capacity, 12);
        assert_eq!(config.circuit_breaker.open_timeout, Duration::from_millis(1500));
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_serialization() {
        let config = EngineConfig::default().with_scaling(ScalingConfig::new(8));
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let json = serde_json::to_value(EngineConfig::default()).unwrap();
        assert_eq!(json["monitor_interval"], 5000);
        assert_eq!(json["retry"]["initial_interval"], 100);
        assert_eq!(json["circuit_breaker"]["open_timeout"], 30000);
    }
}
