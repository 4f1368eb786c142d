//! Engine façade
//!
//! The `Engine` owns the submission queue, the worker pool, the circuit
//! breaker, the retry policy and the results channel, and drives their
//! lifecycle: start, drain and stop.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::{EngineError, SubmitError};
use super::results::ResultStream;
use crate::config::EngineConfig;
use crate::reliability::{
    CircuitBreaker, CircuitState, Clock, DefaultClassifier, ErrorClassifier, TokioClock,
};
use crate::resource::ResourceClient;
use crate::task::{Task, TaskId, TaskResult};
use crate::worker::{
    PoolMonitor, PoolShared, PoolStats, StatsSource, WorkerControl, WorkerPool, WorkerScaler,
};

/// Engine lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Accepting submissions, no workers yet
    Created,
    /// Workers are processing tasks
    Running,
    /// Closed to submissions, finishing outstanding work
    Draining,
    /// Closed to submissions, cancelling outstanding work
    Stopping,
    /// All workers have exited
    Stopped,
}

/// Builder for an [`Engine`]
pub struct EngineBuilder<C: ResourceClient> {
    client: Arc<C>,
    config: EngineConfig,
    classifier: Arc<dyn ErrorClassifier>,
    clock: Arc<dyn Clock>,
}

impl<C: ResourceClient> EngineBuilder<C> {
    /// Use this configuration instead of the defaults
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Decide retryability with a custom classifier
    ///
    /// Only consulted for errors returned by the resource; circuit-open
    /// rejections are always retryable.
    pub fn classifier(mut self, classifier: impl ErrorClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Drive the circuit breaker from a custom clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the configuration and build the engine
    pub fn build(self) -> Result<Engine<C>, EngineError> {
        self.config.validate()?;

        let breaker = CircuitBreaker::with_clock(self.config.circuit_breaker.clone(), self.clock);
        let (results_tx, results_rx) = mpsc::channel(self.config.results_capacity);

        let shared = Arc::new(PoolShared::new(
            self.client,
            breaker,
            self.config.retry.clone(),
            self.classifier,
            self.config.queue_capacity,
            results_tx,
        ));

        let halt = CancellationToken::new();
        let pool = Arc::new(WorkerPool::new(Arc::clone(&shared), halt.clone()));

        Ok(Engine {
            config: self.config,
            shared,
            pool,
            halt,
            status: RwLock::new(EngineStatus::Created),
            results_rx: Mutex::new(Some(results_rx)),
            background: Mutex::new(Vec::new()),
        })
    }
}

/// Resilient task execution engine
///
/// Runs tasks against a shared resource with a bounded queue, a fixed pool
/// of workers, retries with exponential backoff and a circuit breaker.
///
/// # Example
///
/// ```ignore
/// use bulwark_engine::prelude::*;
///
/// let engine = Engine::new(MyClient::new(), EngineConfig::default())?;
/// let mut results = engine.results()?;
///
/// engine.start(4)?;
/// engine.submit(Task::new(payload)).await?;
///
/// while let Some(result) = results.recv().await {
///     println!("{} -> {:?}", result.task_id, result.outcome);
/// }
///
/// engine.drain().await?;
/// ```
pub struct Engine<C: ResourceClient> {
    config: EngineConfig,
    shared: Arc<PoolShared<C>>,
    pool: Arc<WorkerPool<C>>,
    /// Stops workers and background loops
    halt: CancellationToken,
    status: RwLock<EngineStatus>,
    results_rx: Mutex<Option<mpsc::Receiver<TaskResult<C::Output>>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: ResourceClient> Engine<C> {
    /// Create an engine with the default error classifier and clock
    pub fn new(client: C, config: EngineConfig) -> Result<Self, EngineError> {
        Self::builder(client).config(config).build()
    }

    /// Start building an engine around `client`
    pub fn builder(client: C) -> EngineBuilder<C> {
        EngineBuilder {
            client: Arc::new(client),
            config: EngineConfig::default(),
            classifier: Arc::new(DefaultClassifier),
            clock: Arc::new(TokioClock),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> EngineStatus {
        *self.status.read()
    }

    /// Start `worker_count` workers plus the monitor (and scaler, if configured)
    ///
    /// Must be called from within a Tokio runtime. Tasks submitted before
    /// `start` wait in the queue.
    #[instrument(skip(self))]
    pub fn start(&self, worker_count: usize) -> Result<(), EngineError> {
        if worker_count == 0 {
            return Err(EngineError::InvalidWorkerCount);
        }

        {
            let mut status = self.status.write();
            match *status {
                EngineStatus::Created => *status = EngineStatus::Running,
                EngineStatus::Running => return Err(EngineError::AlreadyStarted),
                _ => return Err(EngineError::Closed),
            }
        }

        for _ in 0..worker_count {
            self.pool.spawn_worker();
        }

        let source: Arc<dyn StatsSource> = self.shared.clone();
        let mut background = self.background.lock();

        background.push(
            PoolMonitor::new(self.config.monitor_interval)
                .spawn(Arc::clone(&source), self.halt.clone()),
        );

        if let Some(scaling) = &self.config.scaling {
            let workers: Arc<dyn WorkerControl> = self.pool.clone();
            background.push(WorkerScaler::new(scaling.clone(), worker_count).spawn(
                source,
                workers,
                self.halt.clone(),
            ));
        }

        info!(
            workers = worker_count,
            queue_capacity = self.config.queue_capacity,
            max_attempts = self.config.retry.max_attempts,
            failure_threshold = self.config.circuit_breaker.failure_threshold,
            "Engine started"
        );
        Ok(())
    }

    /// Submit a task, waiting for queue space if necessary
    ///
    /// On success the task is accepted and will produce exactly one result.
    pub async fn submit(&self, task: Task<C::Payload>) -> Result<TaskId, SubmitError> {
        self.shared.enqueue(task, None).await
    }

    /// Submit a task, waiting at most `deadline` for queue space
    pub async fn submit_timeout(
        &self,
        task: Task<C::Payload>,
        deadline: Duration,
    ) -> Result<TaskId, SubmitError> {
        self.shared.enqueue(task, Some(deadline)).await
    }

    /// Submit a task only if the queue has room right now
    pub fn try_submit(&self, task: Task<C::Payload>) -> Result<TaskId, SubmitError> {
        self.shared.try_enqueue(task)
    }

    /// Take the results stream
    ///
    /// There is a single consumer; the stream can only be taken once.
    pub fn results(&self) -> Result<ResultStream<C::Output>, EngineError> {
        self.results_rx
            .lock()
            .take()
            .map(ResultStream::new)
            .ok_or(EngineError::ResultsTaken)
    }

    /// Stop accepting tasks and wait until every accepted task has a result
    ///
    /// Workers, retry timers and background loops have exited when this
    /// returns, and the results stream ends once its buffered results are
    /// read. The consumer must keep reading results while draining.
    #[instrument(skip(self))]
    pub async fn drain(&self) -> Result<(), EngineError> {
        {
            let mut status = self.status.write();
            match *status {
                EngineStatus::Created => return Err(EngineError::NotStarted),
                EngineStatus::Running => *status = EngineStatus::Draining,
                EngineStatus::Draining | EngineStatus::Stopping | EngineStatus::Stopped => {
                    return Ok(())
                }
            }
        }

        self.shared.close();
        info!(outstanding = self.shared.ledger.outstanding(), "Draining engine");

        self.shared.ledger.wait_idle().await;
        self.finish().await;
        self.seal();

        info!("Engine drained");
        Ok(())
    }

    /// Cancel all outstanding work and shut down
    ///
    /// In-flight calls are cancelled right away and every outstanding task is
    /// reported as cancelled. If results are still undeliverable after
    /// `grace` (the consumer stopped reading), they are dropped and
    /// [`EngineError::ShutdownTimeout`] reports how many.
    #[instrument(skip(self))]
    pub async fn stop(&self, grace: Duration) -> Result<(), EngineError> {
        let previous = {
            let mut status = self.status.write();
            let previous = *status;
            if matches!(previous, EngineStatus::Stopping | EngineStatus::Stopped) {
                return Ok(());
            }
            *status = EngineStatus::Stopping;
            previous
        };

        self.shared.close();
        self.shared.shutdown.cancel();
        info!(outstanding = self.shared.ledger.outstanding(), "Stopping engine");

        // Without workers nothing will settle queued tasks before the
        // unresolved sweep below
        let settled = previous == EngineStatus::Created
            || tokio::time::timeout(grace, self.shared.ledger.wait_idle())
                .await
                .is_ok();

        if !settled {
            warn!(
                outstanding = self.shared.ledger.outstanding(),
                grace_ms = grace.as_millis() as u64,
                "Shutdown grace period elapsed, abandoning undelivered results"
            );
            self.shared.abandon.cancel();
        }

        self.finish().await;

        // Tasks still queued never reached a worker
        let unreported = self.shared.undelivered() + self.shared.report_unresolved();
        self.seal();

        if unreported > 0 {
            warn!(unreported, "Engine stopped with undelivered results");
            return Err(EngineError::ShutdownTimeout { unreported });
        }

        info!("Engine stopped");
        Ok(())
    }

    /// Tear down workers, timers and background loops
    async fn finish(&self) {
        self.halt.cancel();
        self.pool.join().await;

        self.shared.timers.close();
        self.shared.timers.wait().await;

        let background: Vec<JoinHandle<()>> = std::mem::take(&mut *self.background.lock());
        for handle in background {
            if let Err(err) = handle.await {
                debug!(error = %err, "Background task ended abnormally");
            }
        }
    }

    /// End the results stream and mark the engine stopped
    fn seal(&self) {
        self.shared.close_results();
        *self.status.write() = EngineStatus::Stopped;
    }

    /// Current pool statistics
    pub fn stats(&self) -> PoolStats {
        self.shared.sample()
    }

    /// Subscribe to the monitor's periodic samples
    pub fn subscribe_stats(&self) -> watch::Receiver<PoolStats> {
        self.shared.subscribe()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.shared.circuit_state()
    }

    /// Running workers
    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Accepted tasks that have not produced a result yet
    pub fn outstanding(&self) -> usize {
        self.shared.ledger.outstanding()
    }
}

impl<C: ResourceClient> Drop for Engine<C> {
    fn drop(&mut self) {
        // Dropping without drain/stop: cancel whatever is still running
        self.shared.shutdown.cancel();
        self.halt.cancel();
    }
}
