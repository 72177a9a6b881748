//! Exponential backoff for cursor write-back.

use std::time::Duration;

/// Backoff settings for a failed cursor write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Total write attempts per token, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// One attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Stateless policy: maps the number of failed attempts to the next delay.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay to wait after `failures` failed attempts (1-based), or `None`
    /// once the attempt budget is spent.
    pub fn next_delay(&self, failures: u32) -> Option<Duration> {
        if failures == 0 || failures >= self.config.max_attempts {
            return None;
        }
        let base_ms =
            self.config.initial_backoff.as_millis() as f64 * self.config.multiplier.powi((failures - 1) as i32);
        let cap_ms = self.config.max_backoff.as_millis() as f64;
        Some(Duration::from_millis(base_ms.min(cap_ms) as u64))
    }

    /// Returns `true` if another attempt is allowed after `failures` failures.
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.config.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<u128> = (1..5).filter_map(|n| policy.next_delay(n)).map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![200, 400, 800, 1600]);
        assert!(policy.next_delay(5).is_none());
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 20,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        });
        assert_eq!(policy.next_delay(10), Some(Duration::from_secs(5)));
    }

    #[test]
    fn no_retry_gives_up_immediately() {
        let policy = RetryPolicy::new(RetryConfig::no_retry());
        assert!(!policy.should_retry(1));
        assert!(policy.next_delay(1).is_none());
    }

    #[test]
    fn should_retry_boundary() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            ..Default::default()
        });
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
