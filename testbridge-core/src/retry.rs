//! Backoff schedule for remote calls.

use std::time::Duration;

use crate::error::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub attempts: u32,
    /// Delay after the first failed attempt.
    pub delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.attempts
    }

    /// Exponential delay after failed attempt `attempt` (1-based):
    /// `delay * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before retrying `error`. A server supplied retry-after wins over
    /// the schedule but is still capped.
    pub fn backoff_for(&self, attempt: u32, error: &RemoteError) -> Duration {
        match error {
            RemoteError::RateLimited {
                retry_after: Some(retry_after),
            } => (*retry_after).min(self.max_delay),
            _ => self.delay_after(attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 5,
            delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        }
    }

    #[test]
    fn delay_doubles_until_capped() {
        let p = policy();
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(400));
        assert_eq!(p.delay_after(4), Duration::from_millis(500));
        assert_eq!(p.delay_after(40), Duration::from_millis(500));
    }

    #[test]
    fn retry_after_overrides_schedule_but_respects_cap() {
        let p = policy();
        let short = RemoteError::RateLimited {
            retry_after: Some(Duration::from_millis(250)),
        };
        let long = RemoteError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(p.backoff_for(1, &short), Duration::from_millis(250));
        assert_eq!(p.backoff_for(1, &long), Duration::from_millis(500));
        assert_eq!(
            p.backoff_for(2, &RemoteError::transient("reset")),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn attempts_bound_retries() {
        let p = RetryPolicy {
            attempts: 2,
            ..policy()
        };
        assert!(p.allows_retry_after(1));
        assert!(!p.allows_retry_after(2));
    }
}
