//! Task execution engine
//!
//! The engine module provides the [`Engine`] façade: submission, the results
//! stream, and the start/drain/stop lifecycle around the worker pool.

mod dispatcher;
mod error;
mod results;

pub use dispatcher::{Engine, EngineBuilder, EngineStatus};
pub use error::{EngineError, SubmitError};
pub use results::ResultStream;
