//! Simulated flaky resource

use std::time::Duration;

use async_trait::async_trait;
use bulwark_engine::{CallContext, ExecutionError, ResourceClient};
use rand::Rng;
use tokio::time::Instant;

use crate::config::SimConfig;

/// Resource with random latency, random failures and an optional outage
///
/// During the outage window every call fails with a retryable
/// `unavailable` error, which is what trips the circuit breaker.
#[derive(Debug)]
pub struct FlakyResource {
    started_at: Instant,
    failure_rate: f64,
    fatal_rate: f64,
    outage_start: Duration,
    outage_end: Duration,
    min_latency: Duration,
    max_latency: Duration,
}

impl FlakyResource {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            started_at: Instant::now(),
            failure_rate: config.failure_rate,
            fatal_rate: config.fatal_rate,
            outage_start: config.outage_after,
            outage_end: config.outage_after + config.outage,
            min_latency: config.min_latency,
            max_latency: config.max_latency,
        }
    }

    /// Whether the outage window covers the current time
    pub fn in_outage(&self) -> bool {
        let elapsed = self.started_at.elapsed();
        elapsed >= self.outage_start && elapsed < self.outage_end
    }

    fn latency(&self) -> Duration {
        if self.max_latency <= self.min_latency {
            return self.min_latency;
        }
        rand::thread_rng().gen_range(self.min_latency..=self.max_latency)
    }
}

#[async_trait]
impl ResourceClient for FlakyResource {
    type Payload = u64;
    type Output = Duration;

    async fn execute(&self, ctx: &CallContext, job: &u64) -> Result<Duration, ExecutionError> {
        let latency = self.latency();

        tokio::select! {
            _ = ctx.cancelled() => {
                return Err(ExecutionError::retryable("call cancelled").with_type("cancelled"));
            }
            _ = tokio::time::sleep(latency) => {}
        }

        if self.in_outage() {
            return Err(ExecutionError::retryable("resource unavailable").with_type("unavailable"));
        }

        let (failed, fatal) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_bool(self.failure_rate),
                rng.gen_bool(self.fatal_rate),
            )
        };

        match (failed, fatal) {
            (true, true) => Err(ExecutionError::non_retryable(format!("job {job} rejected"))
                .with_type("rejected")),
            (true, false) => Err(ExecutionError::retryable(format!("job {job} failed"))
                .with_type("transient")),
            (false, _) => Ok(latency),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_engine::TaskId;
    use tokio_util::sync::CancellationToken;

    fn ctx(cancel: CancellationToken) -> CallContext {
        CallContext::new(TaskId::new(), 1, 3, cancel)
    }

    fn reliable() -> SimConfig {
        SimConfig {
            failure_rate: 0.0,
            fatal_rate: 0.0,
            ..SimConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reliable_resource_succeeds() {
        let resource = FlakyResource::new(&reliable());
        let latency = resource
            .execute(&ctx(CancellationToken::new()), &1)
            .await
            .unwrap();

        assert!(latency >= Duration::from_millis(10));
        assert!(latency <= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_resource() {
        let config = SimConfig {
            failure_rate: 1.0,
            fatal_rate: 0.0,
            ..SimConfig::default()
        };
        let resource = FlakyResource::new(&config);
        let err = resource
            .execute(&ctx(CancellationToken::new()), &1)
            .await
            .unwrap_err();

        assert!(err.retryable);
        assert!(err.is_type("transient"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_window() {
        let config = SimConfig {
            outage: Duration::from_millis(200),
            outage_after: Duration::from_millis(100),
            ..reliable()
        };
        let resource = FlakyResource::new(&config);
        assert!(!resource.in_outage());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(resource.in_outage());
        let err = resource
            .execute(&ctx(CancellationToken::new()), &1)
            .await
            .unwrap_err();
        assert!(err.is_type("unavailable"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!resource.in_outage());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_call() {
        let resource = FlakyResource::new(&reliable());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = resource.execute(&ctx(cancel), &1).await.unwrap_err();
        assert!(err.is_type("cancelled"));
    }
}
