//! Retry policy for failed scan tasks.
//!
//! Backoff is flat: the scarce resource is the daily call budget, so retries
//! are spread over the day rather than backed off exponentially.

use crate::config::ScanSchedulerSettings;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts allowed before a task fails permanently.
    pub max_attempts: i32,
    /// Delay before a failed task becomes claimable again.
    pub backoff_secs: u64,
}

impl RetryPolicy {
    pub fn new(config: &ScanSchedulerSettings) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_secs: config.retry_backoff_secs,
        }
    }

    /// Unix timestamp at which a task failing at `now` may be retried.
    pub fn next_attempt_at(&self, now: i64) -> i64 {
        now + self.backoff_secs as i64
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 15 * 60,
        }
    }
}
