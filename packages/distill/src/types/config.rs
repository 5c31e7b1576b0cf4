//! Configuration types for the pipeline and its components.

use serde::{Deserialize, Serialize};

/// Retry behavior for outbound completion calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per call (first try included). Default: 3.
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds. Default: 500.
    pub base_delay_ms: u64,

    /// Backoff cap in milliseconds. Default: 30_000.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Set the attempt budget.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the base delay.
    pub fn with_base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    /// Set the delay cap.
    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }
}

/// Completion client behavior around each outbound call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Retry policy for transient failures.
    pub retry: RetryConfig,

    /// Per-call timeout in milliseconds, independent of cancellation.
    /// Default: 60_000.
    pub request_timeout_ms: u64,

    /// Optional client-side pacing across all workers, requests per second.
    pub requests_per_second: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout_ms: 60_000,
            requests_per_second: None,
        }
    }
}

impl ClientConfig {
    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-call timeout.
    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    /// Enable client-side pacing.
    pub fn with_requests_per_second(mut self, rps: u32) -> Self {
        self.requests_per_second = Some(rps);
        self
    }
}

/// Extraction worker pool sizing and failure policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers. Bounded so that even with every
    /// worker active the aggregate stays under rate limits. Default: 4.
    pub workers: usize,

    /// Failure ratio above which the batch is marked a partial failure.
    /// Default: 0.5.
    pub failure_ratio_threshold: f32,

    /// Whether breaching the ratio fails the episode rather than just
    /// flagging the stage. Default: false (advisory).
    pub fail_episode_on_partial: bool,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            failure_ratio_threshold: 0.5,
            fail_episode_on_partial: false,
        }
    }
}

impl WorkerPoolConfig {
    /// Set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the partial-failure threshold.
    pub fn with_failure_ratio_threshold(mut self, threshold: f32) -> Self {
        self.failure_ratio_threshold = threshold;
        self
    }

    /// Make the threshold fatal to the episode.
    pub fn fail_on_partial(mut self) -> Self {
        self.fail_episode_on_partial = true;
        self
    }
}

/// Entity resolution tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Token-set similarity at or above which same-type mentions merge.
    /// Default: 0.8.
    pub similarity_threshold: f32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
        }
    }
}

impl ResolverConfig {
    /// Set the merge threshold.
    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }
}

/// Credential pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Consecutive transient failures before a key is circuit-broken.
    /// Default: 3.
    pub failure_threshold: u32,

    /// How long a circuit-broken key cools down, in seconds. Default: 300.
    pub circuit_cooldown_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            circuit_cooldown_secs: 300,
        }
    }
}

impl PoolConfig {
    /// Set the circuit-breaker threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the circuit-breaker cooldown.
    pub fn with_circuit_cooldown_secs(mut self, secs: u64) -> Self {
        self.circuit_cooldown_secs = secs;
        self
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    /// Worker pool settings for the extraction stage.
    pub workers: WorkerPoolConfig,

    /// Entity resolution settings.
    pub resolver: ResolverConfig,
}

impl PipelineConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set worker pool settings.
    pub fn with_workers(mut self, workers: WorkerPoolConfig) -> Self {
        self.workers = workers;
        self
    }

    /// Set resolver settings.
    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = PipelineConfig::default();
        assert!(config.workers.workers >= 1);
        assert!(!config.workers.fail_episode_on_partial);
        assert!(config.resolver.similarity_threshold > 0.0);
    }

    #[test]
    fn worker_count_never_zero() {
        let config = WorkerPoolConfig::default().with_workers(0);
        assert_eq!(config.workers, 1);
    }
}
