//! Bounded retry policy with exponential backoff and jitter
//!
//! Kept as an explicit value so the dispatcher's backoff behavior is
//! independently testable and reusable.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Backoff before the retry following `attempt` (1-based).
    ///
    /// The deterministic part grows as base * multiplier^(attempt-1);
    /// jitter adds a uniformly random slice on top so concurrent loops
    /// do not thunder in lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let base_ms = self.base_delay.as_millis() as f64 * exp;
        let jitter_ms = if self.jitter.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64)
        };
        Duration::from_millis(base_ms as u64 + jitter_ms)
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn test_delays_grow_exponentially() {
        let policy = no_jitter(5);
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: Duration::from_millis(50),
        };
        for _ in 0..100 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_should_retry_respects_ceiling() {
        let policy = no_jitter(3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_from_config_clamps_zero_attempts() {
        let config = RetryConfig {
            max_attempts: 0,
            base_delay_ms: 10,
            multiplier: 1.5,
            jitter_ms: 0,
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn test_default_matches_config_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(1000));
    }
}
