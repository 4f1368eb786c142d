//! Task and result types
//!
//! A [`Task`] is what callers submit; a [`TaskResult`] is what comes back on the
//! results stream, exactly once per accepted task.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::resource::ExecutionError;

/// Unique task identifier (UUID v7, ordered by creation time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of work submitted to the engine
///
/// The payload is opaque to the engine; it is handed to the
/// [`ResourceClient`](crate::ResourceClient) on every attempt. After submission
/// only the attempt counter changes.
///
/// # Example
///
/// ```
/// use bulwark_engine::Task;
/// use std::time::Duration;
///
/// let task = Task::new("SELECT 1").with_timeout(Duration::from_secs(2));
/// assert_eq!(task.attempt(), 0);
/// ```
#[derive(Debug)]
pub struct Task<P> {
    id: TaskId,
    payload: P,
    attempt: u32,
    max_attempts: u32,
    created_at: DateTime<Utc>,
    timeout: Option<Duration>,
}

impl<P> Task<P> {
    /// Create a task with a fresh id
    pub fn new(payload: P) -> Self {
        Self {
            id: TaskId::new(),
            payload,
            attempt: 0,
            max_attempts: 0,
            created_at: Utc::now(),
            timeout: None,
        }
    }

    /// Bound every attempt of this task by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Attempts started so far (0 before the first execution)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Attempt limit, fixed when the engine accepts the task
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Time since the task was created
    pub fn elapsed(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub(crate) fn admit(&mut self, max_attempts: u32) {
        self.max_attempts = max_attempts;
    }

    /// Start the next attempt and return its number (1-based)
    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }
}

/// Why a task ended without a value
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskFailure {
    /// Every allowed attempt failed
    #[error("attempts exhausted after {attempts} attempts: {last_error}")]
    AttemptsExhausted {
        attempts: u32,
        last_error: ExecutionError,
    },

    /// The resource reported a failure that must not be retried
    #[error("non-retryable failure: {0}")]
    NonRetryable(ExecutionError),

    /// The engine was stopped before the task finished
    #[error("task cancelled by engine shutdown")]
    Cancelled,
}

impl TaskFailure {
    /// The last error reported by the resource, if any
    pub fn last_error(&self) -> Option<&ExecutionError> {
        match self {
            Self::AttemptsExhausted { last_error, .. } => Some(last_error),
            Self::NonRetryable(error) => Some(error),
            Self::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Terminal outcome of one task
#[derive(Debug)]
pub struct TaskResult<O> {
    /// Task this result belongs to
    pub task_id: TaskId,

    /// Output on success, failure reason otherwise
    pub outcome: Result<O, TaskFailure>,

    /// Time from submission to the terminal outcome
    pub elapsed: Duration,

    /// Attempts consumed (breaker rejections included)
    pub attempts: u32,
}

impl<O> TaskResult<O> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(&self.outcome, Err(failure) if failure.is_cancelled())
    }

    /// The output value, if the task succeeded
    pub fn value(&self) -> Option<&O> {
        self.outcome.as_ref().ok()
    }

    /// The failure reason, if the task failed
    pub fn failure(&self) -> Option<&TaskFailure> {
        self.outcome.as_ref().err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_are_unique() {
        let a = Task::new(());
        let b = Task::new(());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_new_task_defaults() {
        let task = Task::new(42u32);
        assert_eq!(*task.payload(), 42);
        assert_eq!(task.attempt(), 0);
        assert!(task.timeout().is_none());
    }

    #[test]
    fn test_begin_attempt_increments() {
        let mut task = Task::new(());
        task.admit(3);
        assert_eq!(task.begin_attempt(), 1);
        assert_eq!(task.begin_attempt(), 2);
        assert_eq!(task.attempt(), 2);
        assert_eq!(task.max_attempts(), 3);
    }

    #[test]
    fn test_failure_last_error() {
        let error = ExecutionError::retryable("connection reset");
        let failure = TaskFailure::AttemptsExhausted {
            attempts: 3,
            last_error: error.clone(),
        };
        assert_eq!(failure.last_error(), Some(&error));
        assert!(TaskFailure::Cancelled.last_error().is_none());
        assert!(failure.to_string().contains("connection reset"));
    }

    #[test]
    fn test_result_accessors() {
        let ok: TaskResult<u32> = TaskResult {
            task_id: TaskId::new(),
            outcome: Ok(7),
            elapsed: Duration::ZERO,
            attempts: 1,
        };
        assert!(ok.is_success());
        assert_eq!(ok.value(), Some(&7));

        let cancelled: TaskResult<u32> = TaskResult {
            task_id: TaskId::new(),
            outcome: Err(TaskFailure::Cancelled),
            elapsed: Duration::ZERO,
            attempts: 0,
        };
        assert!(!cancelled.is_success());
        assert!(cancelled.is_cancelled());
    }
}
