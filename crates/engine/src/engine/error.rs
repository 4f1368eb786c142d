//! Engine errors

use crate::config::ConfigError;

/// Why a submission was refused
///
/// A refused task was never accepted and produces no result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The queue is full and the caller asked not to wait
    #[error("submission queue is full")]
    QueueFull,

    /// The engine is draining or stopped
    #[error("engine is closed to new submissions")]
    EngineClosed,

    /// No queue slot became free before the caller's deadline
    #[error("deadline exceeded while waiting for queue capacity")]
    DeadlineExceeded,
}

/// Engine lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `start` was called with zero workers
    #[error("worker count must be at least 1")]
    InvalidWorkerCount,

    /// `start` was called twice
    #[error("engine is already started")]
    AlreadyStarted,

    /// The operation needs running workers
    #[error("engine has not been started")]
    NotStarted,

    /// The engine has been drained or stopped
    #[error("engine is closed")]
    Closed,

    /// The results stream has already been handed out
    #[error("results stream already taken")]
    ResultsTaken,

    /// The grace period ran out before every result could be delivered
    #[error("shutdown grace period elapsed with {unreported} results undelivered")]
    ShutdownTimeout { unreported: usize },
}
