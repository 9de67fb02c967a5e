/// Retry policy with exponential backoff and jitter
///
/// Transient failures are retried with exponentially growing delays; jitter
/// spreads retries from concurrent callers to avoid thundering herd.
use rand::Rng;
use std::time::Duration;

/// Immutable retry configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (>= 1)
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Multiplier applied per attempt
    pub multiplier: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Jitter fraction (0.0 to 1.0) to add randomness
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100), // 100ms, 200ms, 400ms
            multiplier: 2.0,
            max_delay: Duration::from_secs(2),
            jitter_fraction: 0.1, // 10% jitter
        }
    }
}

impl RetryPolicy {
    /// Policy that attempts the operation exactly once
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Backoff delay before retrying after the given zero-based attempt
    ///
    /// `min(max_delay, base_delay * multiplier^attempt)`, scaled by
    /// `1 +/- jitter_fraction`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter_fraction > 0.0 {
            let factor = 1.0
                + rand::thread_rng().gen_range(-self.jitter_fraction..=self.jitter_fraction);
            capped * factor
        } else {
            capped
        };

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progression_without_jitter() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(1000),
            jitter_fraction: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(300),
            jitter_fraction: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(1000),
            jitter_fraction: 0.1,
        };

        for _ in 0..100 {
            let delay = policy.delay_for_attempt(1); // nominal 200ms
            assert!(delay >= Duration::from_millis(180));
            assert!(delay <= Duration::from_millis(220));
        }
    }

    #[test]
    fn test_single_attempt_policy() {
        assert_eq!(RetryPolicy::single_attempt().max_attempts, 1);
    }
}
