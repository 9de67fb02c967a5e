/// Token-bucket rate limiter for outbound calls
///
/// Callers block until a token is available or a configured wait ceiling is
/// exceeded, in which case the permit request fails with `RateLimited`.
use crate::error::{OrchestratorError, OrchestratorResult};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Token bucket configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum number of stored tokens
    pub capacity: f64,
    /// Tokens added per second
    pub refill_per_sec: f64,
    /// Ceiling on how long one permit request may wait
    pub max_wait: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 10.0,
            refill_per_sec: 5.0,
            max_wait: Duration::from_secs(5),
        }
    }
}

/// Bucket state, mutated on every permit request
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter
///
/// Tokens are always within `[0, capacity]`. The bucket starts full.
pub struct TokenBucket {
    config: RateLimiterConfig,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(config: RateLimiterConfig) -> Self {
        let tokens = config.capacity;
        Self {
            config,
            state: Mutex::new(BucketState {
                tokens,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Acquire one permit, waiting up to the configured ceiling
    pub async fn acquire(&self) -> OrchestratorResult<()> {
        let start = Instant::now();
        loop {
            let wait = match self.take_or_wait() {
                None => return Ok(()),
                Some(wait) => wait,
            };

            if start.elapsed() + wait > self.config.max_wait {
                debug!(
                    "Permit wait of {:?} would exceed ceiling {:?}",
                    wait, self.config.max_wait
                );
                return Err(OrchestratorError::RateLimited(format!(
                    "permit wait exceeds ceiling of {:?}",
                    self.config.max_wait
                )));
            }

            tokio::time::sleep(wait).await;
        }
    }

    /// Take a token if one is available, without waiting
    pub fn try_acquire(&self) -> bool {
        self.take_or_wait().is_none()
    }

    /// Current token count, refilled to now
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap();
        Self::refill(&mut state, &self.config);
        state.tokens
    }

    /// Consume a token or report how long until one is expected
    fn take_or_wait(&self) -> Option<Duration> {
        let mut state = self.state.lock().unwrap();
        Self::refill(&mut state, &self.config);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - state.tokens;
            Some(Duration::from_secs_f64(deficit / self.config.refill_per_sec))
        }
    }

    fn refill(state: &mut BucketState, config: &RateLimiterConfig) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * config.refill_per_sec).min(config.capacity);
        state.last_refill = now;
    }
}
