//! Worker pool for task execution
//!
//! This module provides:
//! - [`WorkerPool`] - Workers pulling from the shared submission queue
//! - [`PoolMonitor`] - Periodic statistics sampling
//! - [`WorkerScaler`] - Optional watermark-based pool resizing
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │        Submission queue (bounded, FIFO)              │◄──┼── submit
//! │  └──────────────────────────┬───────────────────────────┘   │
//! │                             │                        ▲      │
//! │                             ▼                        │      │
//! │  ┌──────────────────────────────────────────────┐    │      │
//! │  │  [Worker 1] [Worker 2] ... [Worker N]        │    │      │
//! │  │   breaker.allow() → client.execute()         │    │      │
//! │  └────────────┬─────────────────────┬───────────┘    │      │
//! │               │ done                │ retry          │      │
//! │               ▼                     ▼                │      │
//! │  ┌────────────────────┐  ┌──────────────────────┐    │      │
//! │  │   TaskLedger       │  │  Retry timers        │────┘      │
//! │  │ (exactly-once)     │  │  (backoff sleep)     │           │
//! │  └─────────┬──────────┘  └──────────────────────┘           │
//! │            ▼                                                 │
//! │      results channel                                         │
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐                          │
//! │  │ PoolMonitor  │  │ WorkerScaler │                          │
//! │  │ (interval)   │  │ (optional)   │                          │
//! │  └──────────────┘  └──────────────┘                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod ledger;
mod monitor;
mod pool;
mod scaling;
mod stats;

pub use monitor::PoolMonitor;
pub use pool::WorkerPool;
pub use scaling::{ScalingAction, ScalingConfig, WorkerScaler};
pub use stats::{PoolCounters, PoolStats};

pub(crate) use pool::{PoolShared, StatsSource, WorkerControl};
