//! Simulation configuration

use std::time::Duration;

/// Simulation parameters
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Tasks to submit
    pub tasks: u64,

    /// Base worker count
    pub workers: usize,

    /// Probability that a call fails outside the outage window (0.0 - 1.0)
    pub failure_rate: f64,

    /// Probability that a failure is permanent rather than transient
    pub fatal_rate: f64,

    /// Length of the outage window; zero disables it
    pub outage: Duration,

    /// When the outage starts, measured from startup
    pub outage_after: Duration,

    /// Lower bound of simulated call latency
    pub min_latency: Duration,

    /// Upper bound of simulated call latency
    pub max_latency: Duration,

    /// Grace period for stop on Ctrl-C
    pub shutdown_grace: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tasks: 200,
            workers: 4,
            failure_rate: 0.2,
            fatal_rate: 0.05,
            outage: Duration::ZERO,
            outage_after: Duration::from_millis(500),
            min_latency: Duration::from_millis(10),
            max_latency: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl SimConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `SIM_TASKS`: Tasks to submit (default: 200)
    /// - `SIM_WORKERS`: Worker count (default: 4)
    /// - `SIM_FAILURE_RATE`: Transient failure probability (default: 0.2)
    /// - `SIM_FATAL_RATE`: Share of failures that are permanent (default: 0.05)
    /// - `SIM_OUTAGE_MS`: Outage length, 0 for none (default: 0)
    /// - `SIM_OUTAGE_AFTER_MS`: Outage start (default: 500)
    /// - `SIM_MIN_LATENCY_MS` / `SIM_MAX_LATENCY_MS`: Call latency range (default: 10-50)
    /// - `SIM_SHUTDOWN_GRACE_MS`: Grace period on Ctrl-C (default: 2000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let min_latency = env_millis("SIM_MIN_LATENCY_MS").unwrap_or(defaults.min_latency);
        let max_latency = env_millis("SIM_MAX_LATENCY_MS")
            .unwrap_or(defaults.max_latency)
            .max(min_latency);

        Self {
            tasks: env_parse("SIM_TASKS").unwrap_or(defaults.tasks),
            workers: env_parse::<usize>("SIM_WORKERS")
                .unwrap_or(defaults.workers)
                .max(1),
            failure_rate: env_rate("SIM_FAILURE_RATE").unwrap_or(defaults.failure_rate),
            fatal_rate: env_rate("SIM_FATAL_RATE").unwrap_or(defaults.fatal_rate),
            outage: env_millis("SIM_OUTAGE_MS").unwrap_or(defaults.outage),
            outage_after: env_millis("SIM_OUTAGE_AFTER_MS").unwrap_or(defaults.outage_after),
            min_latency,
            max_latency,
            shutdown_grace: env_millis("SIM_SHUTDOWN_GRACE_MS").unwrap_or(defaults.shutdown_grace),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

/// A probability in 0.0..=1.0; non-finite values are ignored
fn env_rate(key: &str) -> Option<f64> {
    env_parse::<f64>(key)
        .filter(|rate| rate.is_finite())
        .map(|rate| rate.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_rates() {
        std::env::set_var("SIM_FAILURE_RATE", "NaN");
        std::env::set_var("SIM_FATAL_RATE", "7.5");

        let config = SimConfig::from_env();

        std::env::remove_var("SIM_FAILURE_RATE");
        std::env::remove_var("SIM_FATAL_RATE");

        assert_eq!(config.failure_rate, SimConfig::default().failure_rate);
        assert_eq!(config.fatal_rate, 1.0);
    }

    #[test]
    fn test_env_rate_rejects_non_finite() {
        std::env::set_var("SIM_TEST_RATE_INF", "inf");
        std::env::set_var("SIM_TEST_RATE_NEG", "-0.5");

        assert_eq!(env_rate("SIM_TEST_RATE_INF"), None);
        assert_eq!(env_rate("SIM_TEST_RATE_NEG"), Some(0.0));
        assert_eq!(env_rate("SIM_TEST_RATE_UNSET"), None);

        std::env::remove_var("SIM_TEST_RATE_INF");
        std::env::remove_var("SIM_TEST_RATE_NEG");
    }
}
