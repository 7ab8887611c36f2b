//! Retry policy for transient failures.
//!
//! A request that fails with a transient error (timeout, lost connectivity,
//! 5xx) is resent unchanged after a linearly growing delay, up to
//! `max_retries` additional attempts.

use std::time::Duration;
use vesta_config::ApiConfig;
use vesta_types::NetworkError;

/// Linear-backoff retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub max_retries: u32,
    /// Delay unit; retry `n` waits `n × base_delay`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &ApiConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay(),
        }
    }

    /// Whether `error` warrants another attempt after `retries_done` retries.
    #[must_use]
    pub fn should_retry(&self, error: &NetworkError, retries_done: u32) -> bool {
        error.is_transient() && retries_done < self.max_retries
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }
}
