//! Reliability patterns for task execution
//!
//! This module provides:
//! - [`RetryPolicy`] - Configurable retry with exponential backoff
//! - [`CircuitBreaker`] - Guard that stops calls to a failing resource

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Clock, TokioClock};
pub use retry::{DefaultClassifier, ErrorClassifier, RetryDecision, RetryPolicy};
