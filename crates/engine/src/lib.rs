//! # Bulwark Engine
//!
//! An in-process engine for running many independent tasks against a shared,
//! unreliable resource without overwhelming it.
//!
//! ## Features
//!
//! - **Bounded queue**: Submissions block, time out or fail fast when the queue is full
//! - **Automatic retries**: Configurable retry policies with exponential backoff and jitter
//! - **Circuit breaker**: Stops hammering the resource during outages, probes with a single trial
//! - **Cancellation**: Per-task timeouts and cooperative shutdown through cancellation tokens
//! - **Exactly-once results**: Every accepted task produces one result, including on shutdown
//! - **Observability**: Periodic pool statistics and structured `tracing` events
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │   submit / try_submit / submit_timeout, drain, stop         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │   (bounded FIFO queue, N workers, retry timers)             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          CircuitBreaker  →  ResourceClient::execute         │
//! │   (closed / open / half-open, single trial call)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use bulwark_engine::prelude::*;
//!
//! struct Inventory {
//!     store: StockStore,
//! }
//!
//! #[async_trait]
//! impl ResourceClient for Inventory {
//!     type Payload = i64;
//!     type Output = u32;
//!
//!     async fn execute(&self, ctx: &CallContext, item_id: &i64) -> Result<u32, ExecutionError> {
//!         tokio::select! {
//!             _ = ctx.cancelled() => Err(ExecutionError::non_retryable("cancelled")),
//!             row = self.store.fetch(*item_id) => row.map_err(ExecutionError::from),
//!         }
//!     }
//! }
//!
//! let engine = Engine::new(Inventory { store }, EngineConfig::from_env())?;
//! let mut results = engine.results()?;
//! engine.start(8)?;
//!
//! for id in item_ids {
//!     engine.submit(Task::new(id)).await?;
//! }
//! ```

pub mod config;
pub mod engine;
pub mod reliability;
pub mod resource;
pub mod task;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ConfigError, EngineConfig};
    pub use crate::engine::{Engine, EngineError, EngineStatus, ResultStream, SubmitError};
    pub use crate::reliability::{
        CircuitBreakerConfig, CircuitState, ErrorClassifier, RetryPolicy,
    };
    pub use crate::resource::{CallContext, ExecutionError, ResourceClient};
    pub use crate::task::{Task, TaskFailure, TaskId, TaskResult};
    pub use crate::worker::{PoolStats, ScalingConfig};
    pub use async_trait::async_trait;
}

// Re-export key types at crate root
pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineBuilder, EngineError, EngineStatus, ResultStream, SubmitError};
pub use reliability::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ErrorClassifier, RetryDecision,
    RetryPolicy,
};
pub use resource::{CallContext, ExecutionError, ResourceClient};
pub use task::{Task, TaskFailure, TaskId, TaskResult};
pub use worker::{PoolStats, ScalingConfig};
