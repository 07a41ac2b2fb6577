// Retry policy for failed action steps

use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per step, including the first
    pub max_attempts: i32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempts`-th failure: `base * 2^(attempts-1)`, capped at `max_delay`
    pub fn backoff(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 31) as u32;
        self.base_delay
            .checked_mul(2u32.saturating_pow(exponent))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether a step that has failed `attempts` times gets another try
    pub fn should_retry(&self, attempts: i32) -> bool {
        attempts < self.max_attempts
    }

    /// When the next attempt is due, or `None` once attempts are exhausted
    pub fn next_attempt_at(&self, attempts: i32, failed_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.should_retry(attempts) {
            return None;
        }
        let delay = chrono::Duration::from_std(self.backoff(attempts)).unwrap_or(chrono::Duration::MAX);
        Some(failed_at.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}
