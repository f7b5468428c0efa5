// ============================================================================
// Retry Policy
// ============================================================================
//
// Exponential backoff for transient pipeline failures:
//   delay(attempt) = min(base * 2^(attempt-1), max)
//
// `max_attempts` counts every attempt, the first one included. Once they
// are spent the entry is dead-lettered.
//
// ============================================================================

use courier_config::DeliveryPolicy;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn from_policy(policy: &DeliveryPolicy) -> Self {
        Self::new(
            policy.max_retries,
            Duration::from_millis(policy.retry_base_delay_ms),
            Duration::from_millis(policy.retry_max_delay_ms),
        )
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 2_u32.saturating_pow(exponent);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_policy(&DeliveryPolicy::default())
    }
}
