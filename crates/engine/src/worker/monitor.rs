//! Periodic pool statistics sampling

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::pool::StatsSource;

/// Samples pool statistics on a fixed interval
///
/// Each sample is logged at debug level and published to the engine's stats
/// channel, replacing the previous one. Samples nobody reads are simply
/// overwritten.
pub struct PoolMonitor {
    interval: Duration,
}

impl PoolMonitor {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run the sampling loop until `halt` fires
    pub(crate) fn spawn(
        self,
        source: Arc<dyn StatsSource>,
        halt: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = source.sample();
                        debug!(
                            queue_depth = stats.queue_depth,
                            workers = stats.workers,
                            busy_workers = stats.busy_workers,
                            circuit_state = %stats.circuit_state,
                            outstanding = stats.outstanding,
                            succeeded = stats.succeeded,
                            failed = stats.failed,
                            retried = stats.retried,
                            "Pool stats"
                        );
                        source.publish(stats);
                    }
                    _ = halt.cancelled() => {
                        // Final sample so subscribers see the stopped pool
                        source.publish(source.sample());
                        debug!("Pool monitor stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliability::CircuitState;
    use crate::worker::{PoolCounters, PoolStats};
    use parking_lot::Mutex;

    struct FakeSource {
        counters: PoolCounters,
        published: Mutex<Vec<PoolStats>>,
    }

    impl StatsSource for FakeSource {
        fn sample(&self) -> PoolStats {
            self.counters.snapshot(1, 4, CircuitState::Closed, 1)
        }

        fn publish(&self, stats: PoolStats) {
            self.published.lock().push(stats);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_publishes_on_interval() {
        let source = Arc::new(FakeSource {
            counters: PoolCounters::new(),
            published: Mutex::new(Vec::new()),
        });
        let halt = CancellationToken::new();

        let handle = PoolMonitor::new(Duration::from_millis(100))
            .spawn(Arc::clone(&source) as Arc<dyn StatsSource>, halt.clone());

        // First tick fires immediately, then at 100ms and 200ms
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(source.published.lock().len(), 3);

        halt.cancel();
        handle.await.unwrap();

        let published = source.published.lock();
        assert_eq!(published.len(), 4);
        assert_eq!(published[0].queue_depth, 1);
        assert_eq!(published[0].queue_capacity, 4);
    }
}
