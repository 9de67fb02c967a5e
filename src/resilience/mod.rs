/// Resilience layer for outbound remote calls
///
/// Composes three independently testable pieces around a single "remote
/// call" abstraction: a token-bucket rate limiter, a circuit breaker, and
/// retry with exponential backoff. The circuit check runs before the
/// rate-limit wait, so an open circuit fails fast without burning permit
/// wait time.
pub mod circuit_breaker;
pub mod rate_limit;
pub mod retry;


pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use rate_limit::{RateLimiterConfig, TokenBucket};
pub use retry::RetryPolicy;

use crate::config::ResilienceConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

/// Executor wrapping any single outbound call with rate limiting, circuit
/// breaking, and retry
pub struct ResilienceExecutor {
    policy: RetryPolicy,
    limiter: TokenBucket,
    breaker: CircuitBreaker,
    telemetry: Arc<dyn TelemetrySink>,
}

impl ResilienceExecutor {
    pub fn new(
        policy: RetryPolicy,
        limiter: TokenBucket,
        breaker: CircuitBreaker,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            policy,
            limiter,
            breaker,
            telemetry,
        }
    }

    /// Build an executor from the shared resilience configuration
    pub fn from_config(config: &ResilienceConfig, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self::new(
            RetryPolicy {
                max_attempts: config.max_attempts,
                base_delay: config.base_delay,
                multiplier: config.multiplier,
                max_delay: config.max_delay,
                jitter_fraction: config.jitter_fraction,
            },
            TokenBucket::new(RateLimiterConfig {
                capacity: config.rate_capacity,
                refill_per_sec: config.rate_refill_per_sec,
                max_wait: config.rate_max_wait,
            }),
            CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: config.failure_threshold,
                base_cooldown: config.base_cooldown,
                max_cooldown: config.max_cooldown,
            }),
            telemetry,
        )
    }

    /// Execute an idempotent-or-safely-retriable operation
    ///
    /// Per attempt: circuit check, then permit acquisition, then the call.
    /// Only retriable failures consume retry attempts; cancellation returns
    /// immediately without touching circuit accounting.
    pub async fn execute<F, Fut, T>(
        &self,
        op_name: &'static str,
        correlation_id: Uuid,
        operation: F,
    ) -> OrchestratorResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..self.policy.max_attempts {
            // Circuit check takes precedence over the rate-limit wait
            self.breaker.check()?;
            self.limiter.acquire().await?;

            match operation().await {
                Ok(result) => {
                    self.breaker.record_success();
                    if attempt > 0 {
                        debug!("{} succeeded after {} retries", op_name, attempt);
                    }
                    return Ok(result);
                }
                Err(error) if error.is_canceled() => {
                    // Cancellation is not a dependency failure
                    return Err(error);
                }
                Err(error) => {
                    if error.counts_as_failure() {
                        self.breaker.record_failure();
                    }

                    if !error.is_retriable() {
                        debug!("{}: not retrying error: {}", op_name, error);
                        return Err(error);
                    }

                    last_error = Some(error.clone());

                    if attempt + 1 < self.policy.max_attempts {
                        let delay = self.policy.delay_for_attempt(attempt);
                        warn!(
                            "{} failed (attempt {}/{}), retrying in {:?}: {}",
                            op_name,
                            attempt + 1,
                            self.policy.max_attempts,
                            delay,
                            error
                        );
                        self.telemetry.record(TelemetryEvent::new(
                            correlation_id,
                            "resilience.retry",
                            json!({
                                "operation": op_name,
                                "attempt": attempt + 1,
                                "delay_ms": delay.as_millis() as u64,
                                "error": error.to_string(),
                            }),
                        ));
                        sleep(delay).await;
                    } else {
                        warn!(
                            "{} failed after {} attempts: {}",
                            op_name, self.policy.max_attempts, error
                        );
                        self.telemetry.record(TelemetryEvent::new(
                            correlation_id,
                            "resilience.exhausted",
                            json!({
                                "operation": op_name,
                                "attempts": self.policy.max_attempts,
                                "error": error.to_string(),
                            }),
                        ));
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| OrchestratorError::Internal("no attempts made".to_string())))
    }

    /// Force a half-open probe on the guarded circuit
    pub fn force_probe(&self) {
        self.breaker.force_probe();
    }

    /// Circuit state snapshot for observers
    pub fn circuit_stats(&self) -> CircuitBreakerStats {
        self.breaker.stats()
    }
}
