//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::AuditConfig;

/// Bounded retry schedule: `base * 2^(attempt-1)`, capped, plus up to 10% jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2u64.saturating_pow(attempt - 1);
        let capped = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);

        let jitter_range = capped / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl From<&AuditConfig> for RetryPolicy {
    fn from(config: &AuditConfig) -> Self {
        Self::new(config.max_write_attempts, config.base_delay_ms, config.max_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::new(5, 100, 1000);
        assert!(policy.delay_after(1).as_millis() >= 100);
        assert!(policy.delay_after(2).as_millis() >= 200);
        let capped = policy.delay_after(10).as_millis();
        assert!((1000..1100).contains(&capped));
        assert_eq!(policy.delay_after(0), Duration::ZERO);
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::new(3, 10, 100);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert_eq!(RetryPolicy::new(0, 1, 1).max_attempts, 1);
    }
}
