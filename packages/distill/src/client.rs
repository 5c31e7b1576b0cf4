//! Completion client: credential acquisition, retry, and pacing around
//! every outbound completion call.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use tracing::{debug, warn};

use crate::credentials::{CallOutcome, CredentialPool};
use crate::error::{CompletionError, CompletionResult, ServiceError};
use crate::retry::RetryPolicy;
use crate::traits::completion::CompletionService;
use crate::types::config::ClientConfig;

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Routes completion calls through the credential pool with retry.
///
/// Each attempt re-acquires from the pool, so a retry naturally lands on
/// a different credential when one's failure was key-specific. Pool
/// exhaustion returns immediately without a network call.
pub struct CompletionClient<S: CompletionService> {
    service: S,
    pool: Arc<CredentialPool>,
    policy: RetryPolicy,
    request_timeout: Duration,
    limiter: Option<Arc<DefaultRateLimiter>>,
}

impl<S: CompletionService> CompletionClient<S> {
    /// Create a client with default configuration.
    pub fn new(service: S, pool: Arc<CredentialPool>) -> Self {
        Self::with_config(service, pool, ClientConfig::default())
    }

    /// Create a client with custom configuration.
    pub fn with_config(service: S, pool: Arc<CredentialPool>, config: ClientConfig) -> Self {
        let limiter = config.requests_per_second.map(|rps| {
            let quota =
                Quota::per_second(NonZeroU32::new(rps.max(1)).expect("rps clamped to >= 1"));
            Arc::new(RateLimiter::direct(quota))
        });
        Self {
            service,
            pool,
            policy: RetryPolicy::new(config.retry),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            limiter,
        }
    }

    /// The credential pool this client draws from.
    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// Send one prompt, rotating credentials across retries.
    pub async fn complete(&self, model: &str, prompt: &str) -> CompletionResult<String> {
        let mut attempt: u32 = 1;
        loop {
            let lease = match self.pool.acquire(model) {
                Ok(lease) => lease,
                Err(exhausted) => {
                    warn!(model, "credential pool exhausted, no call made");
                    return Err(CompletionError::QuotaExhausted {
                        model: exhausted.model,
                    });
                }
            };

            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            let send = self.service.send(model, prompt, &lease);
            let result = match tokio::time::timeout(self.request_timeout, send).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::timeout(format!(
                    "no response within {:?}",
                    self.request_timeout
                ))),
            };

            match result {
                Ok(text) => {
                    self.pool
                        .report_outcome(&lease.key_id, model, CallOutcome::Success);
                    debug!(model, key_id = %lease.key_id, attempt, "completion succeeded");
                    return Ok(text);
                }
                Err(error) => {
                    self.pool
                        .report_outcome(&lease.key_id, model, CallOutcome::from_kind(error.kind));

                    if !error.kind.is_retryable() {
                        return Err(CompletionError::Fatal(error));
                    }
                    if !self.policy.should_retry(&error, attempt) {
                        return Err(CompletionError::RetriesExhausted {
                            attempts: attempt,
                            last: error,
                        });
                    }

                    let delay = self.policy.backoff(attempt);
                    warn!(
                        model,
                        key_id = %lease.key_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient completion failure, retrying with next credential"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCompletionService;
    use crate::types::config::{PoolConfig, RetryConfig};

    fn fast_config() -> ClientConfig {
        ClientConfig::default().with_retry(
            RetryConfig::default()
                .with_max_attempts(3)
                .with_base_delay_ms(1)
                .with_max_delay_ms(2),
        )
    }

    fn pool(keys: &[&str], limit: u32) -> Arc<CredentialPool> {
        let mut pool = CredentialPool::new(PoolConfig::default());
        for key in keys {
            pool = pool.with_key(*key, format!("sk-{key}"), [("m".to_string(), limit)]);
        }
        Arc::new(pool)
    }

    #[tokio::test]
    async fn success_charges_quota() {
        let service = MockCompletionService::new().with_default_response("ok");
        let client = CompletionClient::with_config(service, pool(&["k1"], 5), fast_config());

        let text = client.complete("m", "prompt").await.unwrap();
        assert_eq!(text, "ok");
        assert_eq!(client.pool().usage("k1", "m"), Some(1));
    }

    #[tokio::test]
    async fn exhausted_pool_fails_without_network_call() {
        let service = MockCompletionService::new().with_default_response("ok");
        let client = CompletionClient::with_config(service, pool(&["k1"], 1), fast_config());

        client.complete("m", "p").await.unwrap();
        let err = client.complete("m", "p").await.unwrap_err();
        assert!(matches!(err, CompletionError::QuotaExhausted { .. }));

        // Only the first call reached the service.
        assert_eq!(client.service.call_count(), 1);
    }

    #[tokio::test]
    async fn retry_rotates_to_a_different_credential() {
        let service = MockCompletionService::new()
            .with_script([
                Err(ServiceError::server("boom")),
                Ok("recovered".to_string()),
            ])
            .with_default_response("ok");
        let client = CompletionClient::with_config(service, pool(&["k1", "k2"], 5), fast_config());

        let text = client.complete("m", "p").await.unwrap();
        assert_eq!(text, "recovered");

        let keys: Vec<String> = client
            .service
            .calls()
            .into_iter()
            .map(|c| c.key_id)
            .collect();
        assert_eq!(keys.len(), 2);
        assert_ne!(keys[0], keys[1]);
    }

    #[tokio::test]
    async fn auth_failure_is_fatal_and_not_retried() {
        let service = MockCompletionService::new()
            .with_script([Err(ServiceError::auth("revoked"))])
            .with_default_response("ok");
        let client = CompletionClient::with_config(service, pool(&["k1", "k2"], 5), fast_config());

        let err = client.complete("m", "p").await.unwrap_err();
        assert!(matches!(err, CompletionError::Fatal(_)));
        assert_eq!(client.service.call_count(), 1);
    }

    #[tokio::test]
    async fn retries_exhausted_after_budget() {
        let service = MockCompletionService::new().with_script([
            Err(ServiceError::server("1")),
            Err(ServiceError::server("2")),
            Err(ServiceError::server("3")),
        ]);
        let client = CompletionClient::with_config(service, pool(&["k1", "k2"], 9), fast_config());

        let err = client.complete("m", "p").await.unwrap_err();
        match err {
            CompletionError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }
}
