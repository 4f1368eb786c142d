//! Circuit breaker

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::duration_millis;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,

    /// Failure threshold exceeded - all calls rejected
    Open,

    /// Testing if the resource recovered - a single trial call allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
///
/// Circuit breakers protect a shared resource from cascading failures.
/// When consecutive failures reach a threshold, the circuit "opens" and calls
/// fail fast without touching the resource.
///
/// # State Machine
///
/// ```text
/// ┌─────────┐  failure threshold  ┌─────────┐  open timeout   ┌──────────┐
/// │ Closed  │ ─────────────────► │  Open   │ ──────────────► │ HalfOpen │
/// └─────────┘                     └─────────┘                 └──────────┘
///      ▲                               ▲      trial failure        │
///      │                               └───────────────────────────┤
///      │                 trial success                             │
///      └───────────────────────────────────────────────────────────┘
/// ```
///
/// # Example
///
/// ```
/// use bulwark_engine::CircuitBreakerConfig;
/// use std::time::Duration;
///
/// let config = CircuitBreakerConfig::default()
///     .with_failure_threshold(5)
///     .with_open_timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit
    pub failure_threshold: u32,

    /// Time to wait before transitioning from open to half-open
    #[serde(with = "duration_millis")]
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold to open the circuit
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the open timeout (time before a trial call is admitted)
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }
}

/// Time source for the breaker
///
/// The default [`TokioClock`] follows tokio's clock, which tests can pause and
/// advance.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Clock backed by `tokio::time::Instant`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// In-process circuit breaker shared by all workers
///
/// Every operation takes one short lock; no resource call happens while it is
/// held. Half-open admission is a check-and-set under that lock, so exactly
/// one concurrent caller wins the trial.
///
/// # Example
///
/// ```
/// use bulwark_engine::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
///
/// let breaker = CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_threshold(2));
///
/// assert!(breaker.allow());
/// breaker.record_failure();
/// breaker.record_failure();
///
/// assert_eq!(breaker.state(), CircuitState::Open);
/// assert!(!breaker.allow());
/// ```
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a breaker using the tokio clock
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    /// Create a breaker with a custom time source
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, as last transitioned
    ///
    /// An open circuit whose timeout has elapsed still reports `Open` until a
    /// caller is admitted by [`allow`](Self::allow).
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consecutive failures observed while closed
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Ask for permission to call the resource
    ///
    /// - Closed: always allowed
    /// - Open: rejected until the open timeout elapses, then the circuit moves
    ///   to half-open and this caller becomes the trial
    /// - HalfOpen: rejected while the trial is in flight
    pub fn allow(&self) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened| now.saturating_duration_since(opened))
                    .unwrap_or(Duration::MAX);

                if elapsed >= self.config.open_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    debug!("Circuit half-open, admitting trial call");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                info!("Circuit closed after successful trial");
            }
            // Late result from a call admitted before the circuit opened
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    warn!(
                        failures = inner.consecutive_failures,
                        open_timeout_ms = self.config.open_timeout.as_millis() as u64,
                        "Circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.trial_in_flight = false;
                warn!("Trial call failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }

    /// Give back a trial slot whose call ended without an outcome
    ///
    /// Used when the trial was cancelled; the circuit stays half-open and the
    /// next caller becomes the trial.
    pub fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    /// Time left before an open circuit admits a trial
    ///
    /// Zero unless the circuit is open.
    pub fn remaining_open(&self) -> Duration {
        let now = self.clock.now();
        let inner = self.inner.lock();

        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened)) => self
                .config
                .open_timeout
                .saturating_sub(now.saturating_duration_since(opened)),
            _ => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Manually advanced clock
    struct ManualClock {
        start: Instant,
        offset: Mutex<Duration>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                start: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            })
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.start + *self.offset.lock()
        }
    }

    fn breaker(threshold: u32, open_timeout: Duration) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = ManualClock::new();
        let config = CircuitBreakerConfig::new()
            .with_failure_threshold(threshold)
            .with_open_timeout(open_timeout);
        (CircuitBreaker::with_clock(config, clock.clone()), clock)
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.open_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_builder() {
        let config = CircuitBreakerConfig::new()
            .with_failure_threshold(10)
            .with_open_timeout(Duration::from_secs(60));

        assert_eq!(config.failure_threshold, 10);
        assert_eq!(config.open_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    }

    #[test]
    fn test_serialization() {
        let config = CircuitBreakerConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CircuitBreakerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_opens_after_threshold_consecutive_failures() {
        let (breaker, _clock) = breaker(3, Duration::from_secs(1));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (breaker, _clock) = breaker(3, Duration::from_secs(1));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_rejects_until_open_timeout() {
        let (breaker, clock) = breaker(1, Duration::from_secs(1));
        breaker.record_failure();

        clock.advance(Duration::from_millis(999));
        assert!(!breaker.allow());
        assert_eq!(breaker.remaining_open(), Duration::from_millis(1));

        clock.advance(Duration::from_millis(1));
        assert!(breaker.allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.remaining_open(), Duration::ZERO);
    }

    #[test]
    fn test_half_open_admits_single_trial() {
        let (breaker, clock) = breaker(1, Duration::from_secs(1));
        breaker.record_failure();
        clock.advance(Duration::from_secs(2));

        assert!(breaker.allow());
        assert!(!breaker.allow());
        assert!(!breaker.allow());
    }

    #[test]
    fn test_trial_success_closes() {
        let (breaker, clock) = breaker(1, Duration::from_secs(1));
        breaker.record_failure();
        clock.advance(Duration::from_secs(1));

        assert!(breaker.allow());
        breaker.record_success();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow());
        assert!(breaker.allow());
    }

    #[test]
    fn test_trial_failure_reopens() {
        let (breaker, clock) = breaker(1, Duration::from_secs(1));
        breaker.record_failure();
        clock.advance(Duration::from_secs(1));

        assert!(breaker.allow());
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());
        assert_eq!(breaker.remaining_open(), Duration::from_secs(1));

        clock.advance(Duration::from_secs(1));
        assert!(breaker.allow());
    }

    #[test]
    fn test_release_trial_admits_next_caller() {
        let (breaker, clock) = breaker(1, Duration::from_secs(1));
        breaker.record_failure();
        clock.advance(Duration::from_secs(1));

        assert!(breaker.allow());
        assert!(!breaker.allow());

        breaker.release_trial();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.allow());
    }

    #[test]
    fn test_late_results_while_open_are_ignored() {
        let (breaker, _clock) = breaker(1, Duration::from_secs(1));
        breaker.record_failure();

        breaker.record_success();
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.remaining_open(), Duration::from_secs(1));
    }

    #[test]
    fn test_concurrent_allow_in_half_open_admits_exactly_one() {
        let (breaker, clock) = breaker(1, Duration::from_secs(1));
        breaker.record_failure();
        clock.advance(Duration::from_secs(1));

        let breaker = Arc::new(breaker);
        let admitted = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(std::sync::Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                let admitted = Arc::clone(&admitted);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    if breaker.allow() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }
}
