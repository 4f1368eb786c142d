//! Dynamic worker scaling
//!
//! Grows the pool while the submission queue is filling up and shrinks it
//! back to the base worker count once the queue has emptied.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::pool::{StatsSource, WorkerControl};
use crate::config::{duration_millis, ConfigError};

/// Scaling configuration
///
/// The two watermarks are queue fill ratios; between them the worker count
/// is left alone so the pool does not oscillate.
///
/// # Example
///
/// ```
/// use bulwark_engine::worker::ScalingConfig;
///
/// let config = ScalingConfig::new(16)
///     .with_high_watermark(0.75)
///     .with_low_watermark(0.1);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingConfig {
    /// Upper bound on running workers
    pub max_workers: usize,

    /// Add a worker when the queue is at least this full (0.0 - 1.0)
    pub high_watermark: f64,

    /// Retire an extra worker when the queue is at most this full (0.0 - 1.0)
    pub low_watermark: f64,

    /// How often the scaler re-evaluates
    #[serde(with = "duration_millis")]
    pub interval: Duration,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            max_workers: 16,
            high_watermark: 0.8,
            low_watermark: 0.2,
            interval: Duration::from_secs(1),
        }
    }
}

impl ScalingConfig {
    /// Create a scaling configuration with the given worker ceiling
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            ..Default::default()
        }
    }

    pub fn with_high_watermark(mut self, watermark: f64) -> Self {
        self.high_watermark = watermark.clamp(0.0, 1.0);
        self
    }

    pub fn with_low_watermark(mut self, watermark: f64) -> Self {
        self.low_watermark = watermark.clamp(0.0, 1.0);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid(
                "scaling.max_workers must be at least 1".into(),
            ));
        }
        if self.low_watermark >= self.high_watermark {
            return Err(ConfigError::Invalid(
                "scaling.low_watermark must be less than scaling.high_watermark".into(),
            ));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid("scaling.interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// What the scaler wants to do on one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingAction {
    Grow,
    Shrink,
    Hold,
}

/// Scaling decisions for a pool whose base size is `min_workers`
#[derive(Debug, Clone)]
pub struct WorkerScaler {
    config: ScalingConfig,
    min_workers: usize,
}

impl WorkerScaler {
    pub fn new(config: ScalingConfig, min_workers: usize) -> Self {
        Self {
            config,
            min_workers,
        }
    }

    /// Decide based on the current queue fill ratio and worker count
    pub fn evaluate(&self, fill_ratio: f64, workers: usize) -> ScalingAction {
        if fill_ratio >= self.config.high_watermark && workers < self.config.max_workers {
            ScalingAction::Grow
        } else if fill_ratio <= self.config.low_watermark && workers > self.min_workers {
            ScalingAction::Shrink
        } else {
            ScalingAction::Hold
        }
    }

    /// Run the scaling loop until `halt` fires
    pub(crate) fn spawn(
        self,
        source: Arc<dyn StatsSource>,
        workers: Arc<dyn WorkerControl>,
        halt: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = halt.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let ratio = source.sample().queue_fill_ratio();
                let count = workers.worker_count();

                match self.evaluate(ratio, count) {
                    ScalingAction::Grow => {
                        let worker_id = workers.spawn_worker();
                        info!(worker_id, workers = count + 1, fill_ratio = ratio, "Scaled up");
                    }
                    ScalingAction::Shrink => {
                        if let Some(worker_id) = workers.retire_worker(self.min_workers) {
                            info!(worker_id, workers = count - 1, fill_ratio = ratio, "Scaled down");
                        }
                    }
                    ScalingAction::Hold => {}
                }
            }

            debug!("Worker scaler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaler() -> WorkerScaler {
        WorkerScaler::new(
            ScalingConfig::new(4)
                .with_high_watermark(0.8)
                .with_low_watermark(0.2),
            2,
        )
    }

    #[test]
    fn test_default_config() {
        let config = ScalingConfig::default();
        assert_eq!(config.max_workers, 16);
        assert_eq!(config.high_watermark, 0.8);
        assert_eq!(config.low_watermark, 0.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let inverted = ScalingConfig::new(4)
            .with_high_watermark(0.3)
            .with_low_watermark(0.6);
        assert!(inverted.validate().is_err());

        assert!(ScalingConfig::new(0).validate().is_err());
        assert!(ScalingConfig::new(4)
            .with_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_watermarks_are_clamped() {
        let config = ScalingConfig::new(4)
            .with_high_watermark(1.5)
            .with_low_watermark(-0.5);
        assert_eq!(config.high_watermark, 1.0);
        assert_eq!(config.low_watermark, 0.0);
    }

    #[test]
    fn test_grows_at_high_watermark() {
        let scaler = scaler();
        assert_eq!(scaler.evaluate(0.8, 2), ScalingAction::Grow);
        assert_eq!(scaler.evaluate(1.0, 3), ScalingAction::Grow);
    }

    #[test]
    fn test_never_exceeds_max_workers() {
        assert_eq!(scaler().evaluate(1.0, 4), ScalingAction::Hold);
    }

    #[test]
    fn test_shrinks_only_extra_workers() {
        let scaler = scaler();
        assert_eq!(scaler.evaluate(0.0, 4), ScalingAction::Shrink);
        assert_eq!(scaler.evaluate(0.1, 3), ScalingAction::Shrink);
        assert_eq!(scaler.evaluate(0.0, 2), ScalingAction::Hold);
    }

    #[test]
    fn test_hysteresis_band_holds() {
        let scaler = scaler();
        // Between the watermarks nothing changes, whatever the worker count
        for workers in 2..=4 {
            assert_eq!(scaler.evaluate(0.5, workers), ScalingAction::Hold);
        }
    }
}
