//! Resource abstractions
//!
//! The resource is the shared downstream collaborator every task runs against.
//! Calls:
//! - May fail and be retried according to the retry policy
//! - Are guarded by the engine's circuit breaker
//! - Support cancellation via tokens

mod context;
mod definition;

pub use context::CallContext;
pub use definition::{ExecutionError, ResourceClient};
