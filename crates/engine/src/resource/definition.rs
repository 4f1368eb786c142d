//! Resource client trait definition

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::CallContext;

/// Error type for resource call failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Whether this error is retryable
    ///
    /// Non-retryable errors immediately end the task without further attempts.
    pub retryable: bool,

    /// Additional error details (for debugging)
    pub details: Option<serde_json::Value>,
}

impl ExecutionError {
    /// Error type used when the circuit breaker rejected the call
    pub const CIRCUIT_OPEN: &'static str = "circuit_open";

    /// Error type used when an attempt exceeded the task timeout
    pub const TIMEOUT: &'static str = "timeout";

    /// Error type used when a task panicked, in the resource call or elsewhere
    pub const PANIC: &'static str = "panic";

    /// Create a new retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: true,
            details: None,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: false,
            details: None,
        }
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Check the error type
    pub fn is_type(&self, error_type: &str) -> bool {
        self.error_type.as_deref() == Some(error_type)
    }

    pub(crate) fn circuit_open() -> Self {
        Self::retryable("circuit breaker is open").with_type(Self::CIRCUIT_OPEN)
    }

    pub(crate) fn timeout(limit: std::time::Duration) -> Self {
        Self::retryable(format!("attempt timed out after {limit:?}")).with_type(Self::TIMEOUT)
    }

    pub(crate) fn panic(message: impl Into<String>) -> Self {
        Self::non_retryable(format!("task panicked: {}", message.into()))
            .with_type(Self::PANIC)
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExecutionError {}

impl From<anyhow::Error> for ExecutionError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(err.to_string())
    }
}

/// The shared, fallible resource that tasks run against
///
/// Implementations own every protocol concern (SQL, HTTP, files); the engine
/// treats a call as an opaque, cancellable, fallible function. A single client
/// is shared by all workers.
///
/// # Example
///
/// ```ignore
/// use bulwark_engine::prelude::*;
///
/// struct Database { pool: PgPool }
///
/// #[async_trait]
/// impl ResourceClient for Database {
///     type Payload = String;
///     type Output = u64;
///
///     async fn execute(&self, ctx: &CallContext, sql: &String) -> Result<u64, ExecutionError> {
///         tokio::select! {
///             rows = sqlx::query(sql).execute(&self.pool) => {
///                 rows.map(|r| r.rows_affected()).map_err(|e| ExecutionError::retryable(e.to_string()))
///             }
///             _ = ctx.cancelled() => Err(ExecutionError::non_retryable("cancelled")),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait ResourceClient: Send + Sync + 'static {
    /// Task payload handed to every attempt
    type Payload: Send + Sync + 'static;

    /// Value produced by a successful call
    type Output: Send + 'static;

    /// Perform one attempt
    ///
    /// The context carries the cancellation token; implementations should stop
    /// promptly once it fires.
    ///
    /// # Errors
    ///
    /// Return `ExecutionError::retryable()` for transient failures that should be retried.
    /// Return `ExecutionError::non_retryable()` for permanent failures.
    async fn execute(
        &self,
        ctx: &CallContext,
        payload: &Self::Payload,
    ) -> Result<Self::Output, ExecutionError>;
}
