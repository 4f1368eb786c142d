//! Retry policy implementation

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{duration_millis, ConfigError};
use crate::resource::ExecutionError;

/// Outcome of consulting the retry policy after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-submit the task after `delay`
    Retry { delay: Duration },
    /// Stop and report the failure
    GiveUp,
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

/// Decides whether an execution error is worth another attempt
///
/// Implemented for any `Fn(&ExecutionError) -> bool`, so a closure can be used
/// directly.
pub trait ErrorClassifier: Send + Sync {
    fn is_retryable(&self, error: &ExecutionError) -> bool;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&ExecutionError) -> bool + Send + Sync,
{
    fn is_retryable(&self, error: &ExecutionError) -> bool {
        self(error)
    }
}

/// Trusts the `retryable` flag set by the resource client
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn is_retryable(&self, error: &ExecutionError) -> bool {
        error.retryable
    }
}

/// Configuration for task retries
///
/// Supports exponential backoff with jitter to avoid thundering herd.
///
/// # Example
///
/// ```
/// use bulwark_engine::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(5)
///     .with_initial_interval(Duration::from_millis(100))
///     .with_max_interval(Duration::from_secs(10));
///
/// // First retry after ~100ms
/// // Second retry after ~200ms
/// // Third retry after ~400ms
/// // etc.
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial)
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Maximum delay between retries
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0) to add randomness
    ///
    /// A value of 0.1 means ±10% randomness.
    pub jitter: f64,

    /// Error types that should NOT be retried
    #[serde(default)]
    pub non_retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Create an exponential backoff retry policy with sensible defaults
    ///
    /// - 5 max attempts
    /// - 100ms initial interval
    /// - 10 second max interval
    /// - 2x backoff coefficient
    /// - 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            backoff_coefficient: 2.0,
            jitter: 0.1,
            non_retryable_errors: vec![],
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            non_retryable_errors: vec![],
        }
    }

    /// Create a policy with fixed intervals (no backoff)
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            non_retryable_errors: vec![],
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the initial retry interval
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum retry interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the backoff coefficient
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient.max(1.0);
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Add a non-retryable error type
    pub fn with_non_retryable_error(mut self, error_type: impl Into<String>) -> Self {
        self.non_retryable_errors.push(error_type.into());
        self
    }

    /// Backoff before retry number `retry` (1-based), without jitter
    ///
    /// `min(initial_interval * coefficient^(retry - 1), max_interval)`
    pub fn base_delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let base = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = base.min(self.max_interval.as_secs_f64());

        Duration::try_from_secs_f64(capped.max(0.0)).unwrap_or(self.max_interval)
    }

    /// Backoff before retry number `retry` (1-based), with jitter applied
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let capped = self.base_delay(retry).as_secs_f64();

        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let jitter_range = capped * jitter;
        let jittered = if jitter_range > 0.0 {
            let jitter_offset = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            (capped + jitter_offset).max(0.0)
        } else {
            capped
        };

        Duration::try_from_secs_f64(jittered).unwrap_or(self.max_interval)
    }

    /// Reject settings the builders would have clamped
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid(format!(
                "retry.jitter must be within 0.0..=1.0, got {}",
                self.jitter
            )));
        }
        if !self.backoff_coefficient.is_finite() || self.backoff_coefficient < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff_coefficient must be a finite value >= 1.0, got {}",
                self.backoff_coefficient
            )));
        }
        if self.initial_interval > self.max_interval {
            return Err(ConfigError::Invalid(
                "retry.initial_interval must not exceed retry.max_interval".into(),
            ));
        }
        Ok(())
    }

    /// Check if an error type should be retried
    pub fn should_retry(&self, error_type: Option<&str>) -> bool {
        match error_type {
            Some(error_type) => !self.non_retryable_errors.iter().any(|t| t == error_type),
            None => true,
        }
    }

    /// Check if there are remaining attempts
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }

    /// Decide what to do after attempt number `attempt` failed with `error`
    ///
    /// Uses the error's own `retryable` flag; see [`decide_with`](Self::decide_with).
    pub fn decide(&self, attempt: u32, error: &ExecutionError) -> RetryDecision {
        self.decide_with(attempt, error, &DefaultClassifier)
    }

    /// Decide with a caller-supplied classifier
    ///
    /// Gives up when attempts are exhausted (regardless of the error), when the
    /// classifier rejects the error, or when its type is listed as
    /// non-retryable.
    pub fn decide_with(
        &self,
        attempt: u32,
        error: &ExecutionError,
        classifier: &dyn ErrorClassifier,
    ) -> RetryDecision {
        if !self.has_attempts_remaining(attempt) {
            return RetryDecision::GiveUp;
        }

        if !classifier.is_retryable(error) || !self.should_retry(error.error_type.as_deref()) {
            return RetryDecision::GiveUp;
        }

        RetryDecision::Retry {
            delay: self.delay_for_retry(attempt),
        }
    }
}
