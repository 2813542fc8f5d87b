//! Backoff policy for dispatch retries
//!
//! Delays grow exponentially with the retry attempt and are capped, so the
//! schedule for a given policy is fully deterministic (no jitter).

use std::time::Duration;

/// Exponential backoff between dispatch rounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry (doubles on each further retry)
    pub base_delay: Duration,
    /// Maximum delay to cap exponential growth
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (0 for the first retry)
    ///
    /// `base_delay * 2^attempt`, capped at `max_delay`. Overflow saturates to
    /// the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_is_powers_of_two_seconds() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(5), Duration::from_secs(32));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(50));

        assert_eq!(policy.backoff(0), Duration::from_millis(10));
        assert_eq!(policy.backoff(1), Duration::from_millis(20));
        assert_eq!(policy.backoff(2), Duration::from_millis(40));
        assert_eq!(policy.backoff(3), Duration::from_millis(50));
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(40), policy.max_delay);
        assert_eq!(policy.backoff(u32::MAX), policy.max_delay);
    }
}
