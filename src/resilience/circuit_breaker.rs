/// Circuit breaker for a single remote dependency
///
/// After a run of consecutive failures the circuit opens and calls fail
/// fast without touching the network. Once the cooldown elapses the next
/// call is let through as a half-open probe; its outcome decides whether
/// the circuit closes again or reopens with a longer cooldown.
use crate::error::{OrchestratorError, OrchestratorResult};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing fast; no network calls until the cooldown elapses
    Open,
    /// One probe call allowed to test recovery
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Cooldown after the first open
    pub base_cooldown: Duration,
    /// Ceiling on the cooldown regardless of how often the circuit reopens
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_cooldown: Duration::from_secs(10),
            max_cooldown: Duration::from_secs(120),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    /// Invariant: `Some` exactly while state is `Open`, always in the future
    /// at the moment it is set
    open_until: Option<Instant>,
}

/// Circuit breaker guarding one client instance
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

/// Snapshot of breaker state for observers
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub open_remaining: Option<Duration>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                open_until: None,
            }),
        }
    }

    /// Gate a call: `Ok` to proceed, `CircuitOpen` to fail fast
    ///
    /// An elapsed cooldown transitions the circuit to half-open and lets
    /// the call through as a probe.
    pub fn check(&self) -> OrchestratorResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let now = Instant::now();
                match inner.open_until {
                    Some(open_until) if now < open_until => Err(OrchestratorError::CircuitOpen {
                        retry_after_ms: (open_until - now).as_millis() as u64,
                    }),
                    _ => {
                        inner.state = CircuitState::HalfOpen;
                        inner.open_until = None;
                        info!("Circuit breaker: cooldown elapsed, transitioned to HalfOpen");
                        Ok(())
                    }
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = 0;
        if inner.state != CircuitState::Closed {
            info!("Circuit breaker: transitioned from {:?} to Closed", inner.state);
        }
        inner.state = CircuitState::Closed;
        inner.open_until = None;
    }

    /// Record a failed call
    ///
    /// Only transient failures belong here; the caller filters
    /// cancellations and non-retriable outcomes with
    /// `OrchestratorError::counts_as_failure`.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());

        let should_open = inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.config.failure_threshold;

        if should_open {
            let cooldown = self.cooldown_for(inner.consecutive_failures);
            inner.state = CircuitState::Open;
            inner.open_until = Some(Instant::now() + cooldown);
            warn!(
                "Circuit breaker: opened after {} consecutive failures, cooldown {:?}",
                inner.consecutive_failures, cooldown
            );
        } else {
            debug!(
                "Circuit breaker: failure {}/{}",
                inner.consecutive_failures, self.config.failure_threshold
            );
        }
    }

    /// Force a half-open probe ahead of schedule
    ///
    /// Used by on-demand health checks; a no-op unless the circuit is open.
    pub fn force_probe(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::Open {
            inner.state = CircuitState::HalfOpen;
            inner.open_until = None;
            info!("Circuit breaker: forced HalfOpen probe");
        }
    }

    /// Current state without side effects
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Snapshot for observers
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock().unwrap();
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            open_remaining: inner
                .open_until
                .map(|until| until.saturating_duration_since(Instant::now())),
        }
    }

    /// Cooldown grows with the failure run past the threshold, capped
    fn cooldown_for(&self, failures: u32) -> Duration {
        let excess = failures.saturating_sub(self.config.failure_threshold);
        let scaled = self.config.base_cooldown.as_secs_f64() * 2f64.powi(excess.min(16) as i32);
        Duration::from_secs_f64(scaled.min(self.config.max_cooldown.as_secs_f64()))
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            base_cooldown: Duration::from_millis(cooldown_ms),
            max_cooldown: Duration::from_secs(10),
        })
    }

    #[test]
    fn test_initial_state_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = breaker(3, 1000);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(
            cb.check(),
            Err(OrchestratorError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn test_success_resets_failure_run() {
        let cb = breaker(3, 1000);

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_after_cooldown_then_close() {
        let cb = breaker(2, 50);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(2, 50);

        cb.record_failure();
        cb.record_failure();
        tokio::time::sleep(Duration::from_millis(80)).await;
        cb.check().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_force_probe_skips_cooldown() {
        let cb = breaker(1, 60_000);

        cb.record_failure();
        assert!(matches!(
            cb.check(),
            Err(OrchestratorError::CircuitOpen { .. })
        ));

        cb.force_probe();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn test_open_always_has_future_open_until() {
        let cb = breaker(1, 500);
        cb.record_failure();

        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert!(stats.open_remaining.unwrap() > Duration::ZERO);
    }

    #[test]
    fn test_cooldown_grows_and_caps() {
        let cb = breaker(1, 100);
        assert_eq!(cb.cooldown_for(1), Duration::from_millis(100));
        assert_eq!(cb.cooldown_for(2), Duration::from_millis(200));
        assert_eq!(cb.cooldown_for(3), Duration::from_millis(400));
        // Capped at max_cooldown (10s)
        assert_eq!(cb.cooldown_for(30), Duration::from_secs(10));
    }
}
