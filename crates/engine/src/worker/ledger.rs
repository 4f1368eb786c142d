//! Outstanding task bookkeeping
//!
//! Every accepted task has an entry here until its result has been handed to
//! the results channel. Claiming an entry is the single point that guarantees
//! a task produces exactly one result, even when a worker and a forced
//! shutdown race to report it.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::task::TaskId;

/// What the ledger remembers about an outstanding task
#[derive(Debug, Clone, Copy)]
pub(crate) struct LedgerEntry {
    pub accepted_at: Instant,
    pub attempts: u32,
}

#[derive(Debug, Default)]
pub(crate) struct TaskLedger {
    entries: DashMap<TaskId, LedgerEntry>,
    // Accepted tasks whose result has not been delivered yet. Stays above
    // zero between `claim` and `settle`, so waiters see the result sent first.
    outstanding: AtomicUsize,
    idle: Notify,
}

impl TaskLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a task that is about to enter the queue
    pub fn register(&self, id: TaskId) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.entries.insert(
            id,
            LedgerEntry {
                accepted_at: Instant::now(),
                attempts: 0,
            },
        );
    }

    /// Undo a registration for a task that never made it into the queue
    pub fn unregister(&self, id: TaskId) {
        if self.entries.remove(&id).is_some() {
            self.settle();
        }
    }

    pub fn record_attempt(&self, id: TaskId, attempt: u32) {
        if let Some(mut entry) = self.entries.get_mut(&id) {
            entry.attempts = attempt;
        }
    }

    /// Take the right to report this task's result
    ///
    /// Returns `None` if someone else already claimed it. A successful claim
    /// must be followed by [`settle`](Self::settle) once the result is sent.
    pub fn claim(&self, id: TaskId) -> Option<LedgerEntry> {
        self.entries.remove(&id).map(|(_, entry)| entry)
    }

    /// Claim every task still outstanding
    pub fn claim_all(&self) -> Vec<(TaskId, LedgerEntry)> {
        let ids: Vec<TaskId> = self.entries.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.claim(id).map(|entry| (id, entry)))
            .collect()
    }

    /// Mark one claimed result as delivered
    pub fn settle(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            self.idle.notify_waiters();
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Wait until no task is outstanding
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.outstanding() == 0 {
                return;
            }

            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_claim_is_exactly_once() {
        let ledger = TaskLedger::new();
        let id = TaskId::new();
        ledger.register(id);

        assert!(ledger.claim(id).is_some());
        assert!(ledger.claim(id).is_none());
        assert_eq!(ledger.outstanding(), 1);

        ledger.settle();
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn test_record_attempt() {
        let ledger = TaskLedger::new();
        let id = TaskId::new();
        ledger.register(id);
        ledger.record_attempt(id, 2);

        assert_eq!(ledger.claim(id).map(|e| e.attempts), Some(2));
    }

    #[test]
    fn test_unregister_settles() {
        let ledger = TaskLedger::new();
        let id = TaskId::new();
        ledger.register(id);
        ledger.unregister(id);

        assert_eq!(ledger.outstanding(), 0);
        assert!(ledger.claim(id).is_none());

        // Unregistering twice is harmless
        ledger.unregister(id);
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn test_claim_all() {
        let ledger = TaskLedger::new();
        for _ in 0..3 {
            ledger.register(TaskId::new());
        }

        let claimed = ledger.claim_all();
        assert_eq!(claimed.len(), 3);
        assert!(ledger.claim_all().is_empty());
        assert_eq!(ledger.outstanding(), 3);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_when_settled() {
        let ledger = Arc::new(TaskLedger::new());
        let id = TaskId::new();
        ledger.register(id);

        let waiter = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.wait_idle().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        ledger.claim(id);
        ledger.settle();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_idle_when_empty() {
        let ledger = TaskLedger::new();
        ledger.wait_idle().await;
    }
}
