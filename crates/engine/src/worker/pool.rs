//! Worker pool for task execution
//!
//! Workers pull tasks from the shared submission queue, run them against the
//! resource client behind the circuit breaker, and either report a result or
//! hand the task to a retry timer that puts it back on the queue.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::ledger::TaskLedger;
use super::stats::{PoolCounters, PoolStats};
use crate::engine::SubmitError;
use crate::reliability::{
    CircuitBreaker, CircuitState, DefaultClassifier, ErrorClassifier, RetryDecision, RetryPolicy,
};
use crate::resource::{CallContext, ExecutionError, ResourceClient};
use crate::task::{Task, TaskFailure, TaskId, TaskResult};

/// Source of pool statistics for the monitor and the scaler
pub(crate) trait StatsSource: Send + Sync {
    fn sample(&self) -> PoolStats;

    fn publish(&self, stats: PoolStats);
}

/// Worker management used by the scaler
pub(crate) trait WorkerControl: Send + Sync {
    fn worker_count(&self) -> usize;

    fn spawn_worker(&self) -> usize;

    fn retire_worker(&self, keep: usize) -> Option<usize>;
}

enum CallOutcome<O> {
    Succeeded(O),
    Failed(ExecutionError),
    Cancelled,
}

/// State shared by workers, retry timers and the engine
pub(crate) struct PoolShared<C: ResourceClient> {
    client: Arc<C>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    classifier: Arc<dyn ErrorClassifier>,
    queue_tx: mpsc::Sender<Task<C::Payload>>,
    queue_rx: tokio::sync::Mutex<mpsc::Receiver<Task<C::Payload>>>,
    results_tx: Mutex<Option<mpsc::Sender<TaskResult<C::Output>>>>,
    stats_tx: watch::Sender<PoolStats>,
    pub(crate) ledger: TaskLedger,
    pub(crate) counters: PoolCounters,
    pub(crate) timers: TaskTracker,
    /// Fired by `stop`: interrupts in-flight calls and pending retries
    pub(crate) shutdown: CancellationToken,
    /// Fired when the shutdown grace period runs out: stop waiting on a full
    /// results channel
    pub(crate) abandon: CancellationToken,
    undelivered: AtomicUsize,
    closed: AtomicBool,
}

impl<C: ResourceClient> PoolShared<C> {
    pub fn new(
        client: Arc<C>,
        breaker: CircuitBreaker,
        retry: RetryPolicy,
        classifier: Arc<dyn ErrorClassifier>,
        queue_capacity: usize,
        results_tx: mpsc::Sender<TaskResult<C::Output>>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity);
        let counters = PoolCounters::new();
        let (stats_tx, _) =
            watch::channel(counters.snapshot(0, queue_capacity, breaker.state(), 0));

        Self {
            client,
            breaker,
            retry,
            classifier,
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            results_tx: Mutex::new(Some(results_tx)),
            stats_tx,
            ledger: TaskLedger::new(),
            counters,
            timers: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            abandon: CancellationToken::new(),
            undelivered: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<PoolStats> {
        self.stats_tx.subscribe()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_tx.max_capacity() - self.queue_tx.capacity()
    }

    /// Refuse all further submissions
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drop the engine's results sender so the stream ends once drained
    pub fn close_results(&self) {
        self.results_tx.lock().take();
    }

    /// Accept a task into the submission queue, waiting for space
    ///
    /// With a deadline, gives up with `DeadlineExceeded` once it passes.
    pub async fn enqueue(
        &self,
        mut task: Task<C::Payload>,
        deadline: Option<Duration>,
    ) -> Result<TaskId, SubmitError> {
        let id = self.admit(&mut task)?;

        let sent = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(SubmitError::EngineClosed),
            sent = send_within(&self.queue_tx, task, deadline) => sent,
        };

        self.complete_admission(id, sent)
    }

    /// Accept a task only if the queue has room right now
    pub fn try_enqueue(&self, mut task: Task<C::Payload>) -> Result<TaskId, SubmitError> {
        let id = self.admit(&mut task)?;

        let sent = self.queue_tx.try_send(task).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SubmitError::EngineClosed,
        });

        self.complete_admission(id, sent)
    }

    fn admit(&self, task: &mut Task<C::Payload>) -> Result<TaskId, SubmitError> {
        let id = task.id();
        task.admit(self.retry.max_attempts);

        // Register before checking `closed` so a concurrent drain either sees
        // this task as outstanding or this submit sees the engine closed.
        self.ledger.register(id);
        if self.is_closed() {
            self.ledger.unregister(id);
            return Err(SubmitError::EngineClosed);
        }
        Ok(id)
    }

    fn complete_admission(
        &self,
        id: TaskId,
        sent: Result<(), SubmitError>,
    ) -> Result<TaskId, SubmitError> {
        match sent {
            Ok(()) => {
                self.counters.task_submitted();
                debug!(task_id = %id, "Task accepted");
                Ok(id)
            }
            Err(err) => {
                self.ledger.unregister(id);
                debug!(task_id = %id, error = %err, "Task rejected");
                Err(err)
            }
        }
    }

    /// Worker loop: runs until `retire` fires
    async fn run_worker(self: Arc<Self>, worker_id: usize, retire: CancellationToken) {
        self.counters.worker_started();
        debug!(worker_id, "Worker started");

        loop {
            let task = tokio::select! {
                biased;
                _ = retire.cancelled() => break,
                task = self.next_task() => task,
            };

            let Some(task) = task else {
                break;
            };

            let id = task.id();
            self.counters.worker_busy();
            let processed = AssertUnwindSafe(self.process(worker_id, task))
                .catch_unwind()
                .await;
            if let Err(panic) = processed {
                let message = panic_message(panic.as_ref());
                error!(worker_id, task_id = %id, panic = %message, "Worker panicked while processing task");
                self.emit(id, Err(TaskFailure::NonRetryable(ExecutionError::panic(message))))
                    .await;
            }
            self.counters.worker_idle();
        }

        self.counters.worker_stopped();
        debug!(worker_id, "Worker exited");
    }

    async fn next_task(&self) -> Option<Task<C::Payload>> {
        let mut queue = self.queue_rx.lock().await;
        queue.recv().await
    }

    async fn process(self: &Arc<Self>, worker_id: usize, mut task: Task<C::Payload>) {
        let id = task.id();

        if self.shutdown.is_cancelled() {
            self.emit(id, Err(TaskFailure::Cancelled)).await;
            return;
        }

        let attempt = task.begin_attempt();
        self.ledger.record_attempt(id, attempt);

        if !self.breaker.allow() {
            let floor = self.breaker.remaining_open();
            debug!(worker_id, task_id = %id, attempt, "Circuit open, call rejected");
            self.handle_failure(task, ExecutionError::circuit_open(), &DefaultClassifier, floor)
                .await;
            return;
        }

        match self.call(&task, attempt).await {
            CallOutcome::Succeeded(output) => {
                self.breaker.record_success();
                debug!(worker_id, task_id = %id, attempt, "Task succeeded");
                self.emit(id, Ok(output)).await;
            }
            CallOutcome::Failed(err) => {
                self.breaker.record_failure();
                debug!(worker_id, task_id = %id, attempt, error = %err, "Attempt failed");
                let classifier = Arc::clone(&self.classifier);
                self.handle_failure(task, err, classifier.as_ref(), Duration::ZERO)
                    .await;
            }
            CallOutcome::Cancelled => {
                self.breaker.release_trial();
                debug!(worker_id, task_id = %id, attempt, "Call cancelled by shutdown");
                self.emit(id, Err(TaskFailure::Cancelled)).await;
            }
        }
    }

    /// One resource call, bounded by the task timeout and by shutdown
    async fn call(&self, task: &Task<C::Payload>, attempt: u32) -> CallOutcome<C::Output> {
        let token = self.shutdown.child_token();
        let ctx = CallContext::new(task.id(), attempt, task.max_attempts(), token.clone());

        let limit = task.timeout();
        let deadline = async move {
            match limit {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        let execution = AssertUnwindSafe(self.client.execute(&ctx, task.payload())).catch_unwind();

        tokio::select! {
            result = execution => match result {
                Ok(Ok(output)) => CallOutcome::Succeeded(output),
                Ok(Err(err)) => CallOutcome::Failed(err),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(task_id = %task.id(), attempt, panic = %message, "Resource call panicked");
                    CallOutcome::Failed(ExecutionError::panic(message))
                }
            },
            limit = deadline => {
                token.cancel();
                warn!(task_id = %task.id(), attempt, timeout_ms = limit.as_millis() as u64, "Attempt timed out");
                CallOutcome::Failed(ExecutionError::timeout(limit))
            }
            _ = self.shutdown.cancelled() => CallOutcome::Cancelled,
        }
    }

    async fn handle_failure(
        self: &Arc<Self>,
        task: Task<C::Payload>,
        err: ExecutionError,
        classifier: &dyn ErrorClassifier,
        floor: Duration,
    ) {
        let id = task.id();
        let attempt = task.attempt();

        let classified =
            std::panic::catch_unwind(AssertUnwindSafe(|| classifier.is_retryable(&err)));
        let (err, retryable) = match classified {
            Ok(retryable) => (err, retryable),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(task_id = %id, attempt, error = %err, panic = %message, "Error classifier panicked");
                (ExecutionError::panic(message), false)
            }
        };

        match self
            .retry
            .decide_with(attempt, &err, &|_: &ExecutionError| retryable)
        {
            RetryDecision::Retry { delay } => {
                let delay = delay.max(floor);
                self.counters.task_retried();
                debug!(
                    task_id = %id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Scheduling retry"
                );
                self.schedule_retry(task, delay);
            }
            RetryDecision::GiveUp => {
                let failure = if retryable && self.retry.should_retry(err.error_type.as_deref()) {
                    warn!(task_id = %id, attempts = attempt, error = %err, "Retry attempts exhausted");
                    TaskFailure::AttemptsExhausted {
                        attempts: attempt,
                        last_error: err,
                    }
                } else {
                    warn!(task_id = %id, attempt, error = %err, "Non-retryable failure");
                    TaskFailure::NonRetryable(err)
                };

                self.emit(id, Err(failure)).await;
            }
        }
    }

    /// Put the task back on the queue after `delay`
    ///
    /// The timer does not hold a worker while it waits.
    fn schedule_retry(self: &Arc<Self>, task: Task<C::Payload>, delay: Duration) {
        let shared = Arc::clone(self);

        self.timers.spawn(async move {
            let id = task.id();

            let requeued = tokio::select! {
                biased;
                _ = shared.shutdown.cancelled() => false,
                _ = tokio::time::sleep(delay) => tokio::select! {
                    biased;
                    _ = shared.shutdown.cancelled() => false,
                    sent = shared.queue_tx.send(task) => sent.is_ok(),
                },
            };

            if !requeued {
                shared.emit(id, Err(TaskFailure::Cancelled)).await;
            }
        });
    }

    /// Deliver the one and only result for a task
    async fn emit(&self, id: TaskId, outcome: Result<C::Output, TaskFailure>) {
        let Some(entry) = self.ledger.claim(id) else {
            return;
        };

        match &outcome {
            Ok(_) => self.counters.task_succeeded(),
            Err(TaskFailure::Cancelled) => self.counters.task_cancelled(),
            Err(_) => self.counters.task_failed(),
        }

        let result = TaskResult {
            task_id: id,
            outcome,
            elapsed: entry.accepted_at.elapsed(),
            attempts: entry.attempts,
        };

        let sender = self.results_tx.lock().clone();
        if let Some(sender) = sender {
            if self.abandon.is_cancelled() {
                if sender.try_send(result).is_err() {
                    self.undelivered.fetch_add(1, Ordering::Relaxed);
                }
            } else {
                tokio::select! {
                    biased;
                    _ = self.abandon.cancelled() => {
                        self.undelivered.fetch_add(1, Ordering::Relaxed);
                        warn!(task_id = %id, "Result abandoned after shutdown grace period");
                    }
                    sent = sender.send(result) => {
                        if sent.is_err() {
                            debug!(task_id = %id, "Results stream dropped, discarding result");
                        }
                    }
                }
            }
        }

        self.ledger.settle();
    }

    /// Results that could not be delivered after the grace period ran out
    pub fn undelivered(&self) -> usize {
        self.undelivered.load(Ordering::Relaxed)
    }

    /// Report every task that never produced a result as cancelled
    ///
    /// Called once workers and retry timers have exited; whatever is left in
    /// the ledger never reached a worker. Returns how many of these results
    /// could not be handed to the results channel.
    pub fn report_unresolved(&self) -> usize {
        let sender = self.results_tx.lock().clone();
        let mut unreported = 0;

        for (id, entry) in self.ledger.claim_all() {
            self.counters.task_cancelled();

            let result = TaskResult {
                task_id: id,
                outcome: Err(TaskFailure::Cancelled),
                elapsed: entry.accepted_at.elapsed(),
                attempts: entry.attempts,
            };

            let delivered = match &sender {
                Some(sender) => sender.try_send(result).is_ok(),
                None => false,
            };
            if !delivered {
                unreported += 1;
            }

            self.ledger.settle();
        }

        unreported
    }
}

impl<C: ResourceClient> StatsSource for PoolShared<C> {
    fn sample(&self) -> PoolStats {
        self.counters.snapshot(
            self.queue_depth(),
            self.queue_tx.max_capacity(),
            self.breaker.state(),
            self.ledger.outstanding(),
        )
    }

    fn publish(&self, stats: PoolStats) {
        self.stats_tx.send_replace(stats);
    }
}

async fn send_within<T>(
    queue: &mpsc::Sender<T>,
    item: T,
    deadline: Option<Duration>,
) -> Result<(), SubmitError> {
    match deadline {
        Some(deadline) => match tokio::time::timeout(deadline, queue.send(item)).await {
            Ok(sent) => sent.map_err(|_| SubmitError::EngineClosed),
            Err(_) => Err(SubmitError::DeadlineExceeded),
        },
        None => queue
            .send(item)
            .await
            .map_err(|_| SubmitError::EngineClosed),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

struct WorkerHandle {
    id: usize,
    retire: CancellationToken,
    join: JoinHandle<()>,
}

/// Set of running workers
///
/// Every worker gets a retire token derived from the pool's halt token, so a
/// single worker can be retired by the scaler and all of them can be stopped
/// at once. Retired workers stay tracked until they exit so `join` waits for
/// them too.
pub struct WorkerPool<C: ResourceClient> {
    shared: Arc<PoolShared<C>>,
    workers: Mutex<Vec<WorkerHandle>>,
    retired: Mutex<Vec<WorkerHandle>>,
    next_id: AtomicUsize,
    halt: CancellationToken,
}

impl<C: ResourceClient> WorkerPool<C> {
    pub(crate) fn new(shared: Arc<PoolShared<C>>, halt: CancellationToken) -> Self {
        Self {
            shared,
            workers: Mutex::new(Vec::new()),
            retired: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            halt,
        }
    }

    /// Start one more worker and return its id
    pub fn spawn_worker(&self) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let retire = self.halt.child_token();
        let join = tokio::spawn(Arc::clone(&self.shared).run_worker(id, retire.clone()));

        self.workers.lock().push(WorkerHandle { id, retire, join });
        id
    }

    /// Retire the newest worker unless only `keep` remain
    ///
    /// The worker finishes its current task before exiting.
    pub fn retire_worker(&self, keep: usize) -> Option<usize> {
        let handle = {
            let mut workers = self.workers.lock();
            if workers.len() <= keep {
                return None;
            }
            workers.pop()?
        };

        handle.retire.cancel();
        let id = handle.id;

        let mut retired = self.retired.lock();
        retired.retain(|handle| !handle.join.is_finished());
        retired.push(handle);
        Some(id)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Stop all workers once their current task is done and wait for them
    pub(crate) async fn join(&self) {
        self.halt.cancel();
        let mut handles: Vec<WorkerHandle> = std::mem::take(&mut *self.workers.lock());
        handles.append(&mut self.retired.lock());

        for handle in handles {
            if let Err(err) = handle.join.await {
                error!(worker_id = handle.id, error = %err, "Worker task failed");
            }
        }
        info!("All workers stopped");
    }
}

impl<C: ResourceClient> WorkerControl for WorkerPool<C> {
    fn worker_count(&self) -> usize {
        WorkerPool::worker_count(self)
    }

    fn spawn_worker(&self) -> usize {
        WorkerPool::spawn_worker(self)
    }

    fn retire_worker(&self, keep: usize) -> Option<usize> {
        WorkerPool::retire_worker(self, keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::CircuitBreakerConfig;
    use async_trait::async_trait;

    struct SlowClient;

    #[async_trait]
    impl ResourceClient for SlowClient {
        type Payload = u32;
        type Output = u32;

        async fn execute(&self, _ctx: &CallContext, payload: &u32) -> Result<u32, ExecutionError> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(*payload)
        }
    }

    fn shared() -> (Arc<PoolShared<SlowClient>>, mpsc::Receiver<TaskResult<u32>>) {
        let (results_tx, results_rx) = mpsc::channel(8);
        let shared = PoolShared::new(
            Arc::new(SlowClient),
            CircuitBreaker::new(CircuitBreakerConfig::new()),
            RetryPolicy::no_retry(),
            Arc::new(DefaultClassifier),
            8,
            results_tx,
        );
        (Arc::new(shared), results_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_waits_for_retired_workers() {
        let (shared, mut results) = shared();
        let pool = WorkerPool::new(Arc::clone(&shared), CancellationToken::new());

        pool.spawn_worker();
        shared.try_enqueue(Task::new(9)).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(shared.counters.busy(), 1);

        // Retired mid-call: it finishes the task before exiting
        assert_eq!(pool.retire_worker(0), Some(0));
        assert_eq!(pool.worker_count(), 0);

        pool.join().await;

        assert_eq!(shared.counters.workers(), 0);
        assert_eq!(shared.ledger.outstanding(), 0);
        let result = results.try_recv().unwrap();
        assert_eq!(result.value(), Some(&9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retire_keeps_base_workers() {
        let (shared, _results) = shared();
        let pool = WorkerPool::new(Arc::clone(&shared), CancellationToken::new());

        pool.spawn_worker();
        pool.spawn_worker();
        assert_eq!(pool.retire_worker(2), None);
        assert_eq!(pool.retire_worker(1), Some(1));
        assert_eq!(pool.worker_count(), 1);

        pool.join().await;
        assert_eq!(shared.counters.workers(), 0);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");

        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
