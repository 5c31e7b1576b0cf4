//! Retry policy: failure classification and backoff computation.

use std::time::Duration;

use crate::error::ServiceError;
use crate::types::config::RetryConfig;

/// Decides whether a failed call is retried and how long to wait.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Create a policy from configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Total attempt budget per call.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Whether `error` should be retried after the given 1-based attempt.
    pub fn should_retry(&self, error: &ServiceError, attempt: u32) -> bool {
        error.kind.is_retryable() && attempt < self.max_attempts()
    }

    /// Backoff before the next attempt: exponential with a cap, jittered
    /// between half and full delay so concurrent workers don't retry in
    /// lockstep.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.max_delay_ms);
        let half = raw / 2;
        Duration::from_millis(half + fastrand::u64(0..=half.max(1)))
    }
}
