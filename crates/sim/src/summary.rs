//! Run summary

use std::time::Duration;

use bulwark_engine::{TaskFailure, TaskResult};

/// Tally of task outcomes
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Summary {
    pub succeeded: u64,
    pub exhausted: u64,
    pub non_retryable: u64,
    pub cancelled: u64,
    total_attempts: u64,
    total_elapsed: Duration,
}

impl Summary {
    pub fn record<O>(&mut self, result: &TaskResult<O>) {
        match &result.outcome {
            Ok(_) => self.succeeded += 1,
            Err(TaskFailure::AttemptsExhausted { .. }) => self.exhausted += 1,
            Err(TaskFailure::NonRetryable(_)) => self.non_retryable += 1,
            Err(TaskFailure::Cancelled) => self.cancelled += 1,
        }
        self.total_attempts += u64::from(result.attempts);
        self.total_elapsed += result.elapsed;
    }

    pub fn total(&self) -> u64 {
        self.succeeded + self.exhausted + self.non_retryable + self.cancelled
    }

    /// Average attempts per task (0 when nothing was recorded)
    pub fn mean_attempts(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.total_attempts as f64 / total as f64,
        }
    }

    /// Average time from submission to result
    pub fn mean_elapsed(&self) -> Duration {
        match u32::try_from(self.total()) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(total) => self.total_elapsed / total,
        }
    }
}
