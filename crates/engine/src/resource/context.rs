//! Resource call context

use tokio_util::sync::CancellationToken;

use crate::task::TaskId;

/// Context provided to the resource client for one attempt
///
/// The context provides:
/// - Information about the current attempt
/// - Cancellation detection
///
/// The token fires when the engine is stopped or the task's timeout elapses,
/// whichever comes first.
///
/// # Example
///
/// ```ignore
/// async fn execute(&self, ctx: &CallContext, payload: &Query) -> Result<Rows, ExecutionError> {
///     tokio::select! {
///         rows = self.run(payload) => rows,
///         _ = ctx.cancelled() => Err(ExecutionError::non_retryable("cancelled")),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Task being executed
    pub task_id: TaskId,

    /// Current attempt number (1-based)
    pub attempt: u32,

    /// Maximum attempts allowed
    pub max_attempts: u32,

    cancel: CancellationToken,
}

impl CallContext {
    /// Create a new call context
    pub fn new(task_id: TaskId, attempt: u32, max_attempts: u32, cancel: CancellationToken) -> Self {
        Self {
            task_id,
            attempt,
            max_attempts,
            cancel,
        }
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// The underlying token, for handing to nested calls
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Check if this is the last attempt
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_context_creation() {
        let task_id = TaskId::new();
        let ctx = CallContext::new(task_id, 1, 3, CancellationToken::new());

        assert_eq!(ctx.task_id, task_id);
        assert_eq!(ctx.attempt, 1);
        assert_eq!(ctx.max_attempts, 3);
        assert!(!ctx.is_cancelled());
        assert!(!ctx.is_last_attempt());
    }

    #[test]
    fn test_is_last_attempt() {
        let ctx = CallContext::new(TaskId::new(), 3, 3, CancellationToken::new());
        assert!(ctx.is_last_attempt());
    }

    #[tokio::test]
    async fn test_cancellation() {
        let token = CancellationToken::new();
        let ctx = CallContext::new(TaskId::new(), 1, 3, token.child_token());

        assert!(!ctx.is_cancelled());

        token.cancel();

        assert!(ctx.is_cancelled());
        // Resolves immediately once cancelled
        ctx.cancelled().await;
    }
}
