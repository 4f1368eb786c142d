//! Pool statistics
//!
//! [`PoolCounters`] are the live accumulators updated by workers;
//! [`PoolStats`] is the read-only snapshot handed to observers.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::reliability::CircuitState;

/// Snapshot of pool state for observability
///
/// Recomputed on every sample; never used for control decisions inside the
/// core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    /// Tasks waiting in the submission queue
    pub queue_depth: usize,

    /// Capacity of the submission queue
    pub queue_capacity: usize,

    /// Running workers
    pub workers: usize,

    /// Workers currently executing a task
    pub busy_workers: usize,

    /// Workers waiting for work
    pub idle_workers: usize,

    /// Circuit breaker state at sampling time
    pub circuit_state: CircuitState,

    /// Accepted tasks without a delivered result (queued, running or waiting to retry)
    pub outstanding: usize,

    /// Tasks accepted by `submit`
    pub submitted: u64,

    /// Tasks that finished successfully
    pub succeeded: u64,

    /// Tasks that finished with a failure (exhausted or non-retryable)
    pub failed: u64,

    /// Retries scheduled
    pub retried: u64,

    /// Tasks cancelled by shutdown
    pub cancelled: u64,

    /// When this snapshot was taken
    pub sampled_at: DateTime<Utc>,
}

impl PoolStats {
    /// Fraction of the queue in use (0.0 - 1.0)
    pub fn queue_fill_ratio(&self) -> f64 {
        self.queue_depth as f64 / self.queue_capacity.max(1) as f64
    }
}

/// Live counters shared by all workers
///
/// Uses atomic operations for thread-safe access without locks.
#[derive(Debug, Default)]
pub struct PoolCounters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    cancelled: AtomicU64,
    workers: AtomicUsize,
    busy: AtomicUsize,
}

impl PoolCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_started(&self) {
        self.workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_stopped(&self) {
        self.workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn worker_busy(&self) {
        self.busy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_idle(&self) {
        self.busy.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn workers(&self) -> usize {
        self.workers.load(Ordering::Relaxed)
    }

    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::Relaxed)
    }

    /// Build a snapshot from the counters plus externally sampled values
    pub fn snapshot(
        &self,
        queue_depth: usize,
        queue_capacity: usize,
        circuit_state: CircuitState,
        outstanding: usize,
    ) -> PoolStats {
        let workers = self.workers();
        let busy_workers = self.busy().min(workers);

        PoolStats {
            queue_depth,
            queue_capacity,
            workers,
            busy_workers,
            idle_workers: workers - busy_workers,
            circuit_state,
            outstanding,
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            sampled_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let counters = PoolCounters::new();
        counters.worker_started();
        counters.worker_started();
        counters.worker_busy();
        counters.task_submitted();
        counters.task_submitted();
        counters.task_succeeded();
        counters.task_retried();

        let stats = counters.snapshot(3, 10, CircuitState::Closed, 1);

        assert_eq!(stats.workers, 2);
        assert_eq!(stats.busy_workers, 1);
        assert_eq!(stats.idle_workers, 1);
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.queue_depth, 3);
        assert_eq!(stats.outstanding, 1);
        assert!((stats.queue_fill_ratio() - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_worker_lifecycle_counters() {
        let counters = PoolCounters::new();
        counters.worker_started();
        counters.worker_busy();
        counters.worker_idle();
        counters.worker_stopped();

        assert_eq!(counters.workers(), 0);
        assert_eq!(counters.busy(), 0);
    }
}
