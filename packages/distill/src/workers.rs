//! Bounded-concurrency extraction worker pool.
//!
//! A fixed number of workers consume units from a shared queue, call the
//! completion client, and parse each response. Failures are isolated per
//! unit and collected through a single aggregation mutex; only fatal
//! service errors (auth, contract violations) abort the whole batch.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::CompletionClient;
use crate::error::{CompletionError, PipelineError, Result};
use crate::pipeline::cancel::ShutdownSignal;
use crate::traits::completion::CompletionService;
use crate::traits::extractor::UnitExtractor;
use crate::types::config::WorkerPoolConfig;
use crate::types::knowledge::{ExtractionResult, UnitFailure};
use crate::types::unit::Unit;

/// Outcome of processing one batch of units.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Successful per-unit results, in completion order.
    pub results: Vec<ExtractionResult>,

    /// Units that failed after their retry and repair budgets.
    pub failures: Vec<UnitFailure>,

    /// Size of the batch as dispatched.
    pub total_units: usize,

    /// Whether the failure ratio breached the configured threshold.
    ///
    /// Advisory by default: successful results are returned either way.
    pub partial_failure: bool,
}

impl BatchOutcome {
    /// Fraction of the batch that failed.
    pub fn failure_ratio(&self) -> f32 {
        if self.total_units == 0 {
            0.0
        } else {
            self.failures.len() as f32 / self.total_units as f32
        }
    }

    /// The failed unit ids.
    pub fn failed_unit_ids(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.unit_id.clone()).collect()
    }
}

enum UnitOutcome {
    Done(ExtractionResult),
    Failed(UnitFailure),
    Fatal(CompletionError),
}

#[derive(Default)]
struct Aggregation {
    results: Vec<ExtractionResult>,
    failures: Vec<UnitFailure>,
    fatal: Option<CompletionError>,
}

/// Fixed-size pool of extraction workers.
pub struct ExtractionWorkerPool<S: CompletionService, X: UnitExtractor> {
    client: Arc<CompletionClient<S>>,
    extractor: Arc<X>,
    config: WorkerPoolConfig,
}

impl<S, X> ExtractionWorkerPool<S, X>
where
    S: CompletionService + 'static,
    X: UnitExtractor + 'static,
{
    /// Create a pool with default configuration.
    pub fn new(client: Arc<CompletionClient<S>>, extractor: Arc<X>) -> Self {
        Self::with_config(client, extractor, WorkerPoolConfig::default())
    }

    /// Create a pool with custom configuration.
    pub fn with_config(
        client: Arc<CompletionClient<S>>,
        extractor: Arc<X>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            client,
            extractor,
            config,
        }
    }

    /// The pool's configuration.
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Process a batch of units with bounded concurrency.
    ///
    /// Workers stop dequeuing once `shutdown` is raised, but a unit in
    /// flight always runs to completion or its own budget exhaustion.
    /// Fatal service errors abort the batch; everything else is absorbed
    /// as that unit's failure.
    pub async fn process_units(
        &self,
        units: Vec<Unit>,
        shutdown: &ShutdownSignal,
    ) -> Result<BatchOutcome> {
        let total_units = units.len();
        if total_units == 0 {
            return Ok(BatchOutcome::default());
        }

        let queue: Arc<Mutex<VecDeque<Unit>>> = Arc::new(Mutex::new(units.into()));
        let agg: Arc<Mutex<Aggregation>> = Arc::new(Mutex::new(Aggregation::default()));

        let worker_count = self.config.workers.min(total_units).max(1);
        info!(total_units, workers = worker_count, "extraction batch started");

        let handles: Vec<_> = (0..worker_count)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let agg = Arc::clone(&agg);
                let client = Arc::clone(&self.client);
                let extractor = Arc::clone(&self.extractor);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let worker_id = Uuid::new_v4();
                    loop {
                        if shutdown.is_stopping() {
                            debug!(%worker_id, "shutdown requested, worker draining");
                            break;
                        }
                        // Stop dequeuing once a sibling hit a fatal error.
                        if agg.lock().unwrap().fatal.is_some() {
                            break;
                        }
                        let unit = { queue.lock().unwrap().pop_front() };
                        let Some(unit) = unit else { break };

                        let outcome = process_one(&client, extractor.as_ref(), &unit).await;
                        let mut agg = agg.lock().unwrap();
                        match outcome {
                            UnitOutcome::Done(result) => agg.results.push(result),
                            UnitOutcome::Failed(failure) => {
                                warn!(unit_id = %failure.unit_id, reason = %failure.reason, "unit failed");
                                agg.failures.push(failure);
                            }
                            UnitOutcome::Fatal(error) => {
                                if agg.fatal.is_none() {
                                    agg.fatal = Some(error);
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        join_all(handles).await;

        let agg = Arc::try_unwrap(agg)
            .map_err(|_| PipelineError::fatal("aggregation state still shared after join"))?
            .into_inner()
            .map_err(|_| PipelineError::fatal("aggregation mutex poisoned"))?;

        if let Some(error) = agg.fatal {
            return Err(PipelineError::Completion(error));
        }

        let mut outcome = BatchOutcome {
            results: agg.results,
            failures: agg.failures,
            total_units,
            partial_failure: false,
        };
        outcome.partial_failure = outcome.failure_ratio() > self.config.failure_ratio_threshold;

        info!(
            succeeded = outcome.results.len(),
            failed = outcome.failures.len(),
            failure_ratio = outcome.failure_ratio(),
            partial_failure = outcome.partial_failure,
            "extraction batch finished"
        );
        Ok(outcome)
    }
}

/// Process a single unit: prompt, complete, parse, and at most one repair
/// round on parseable-but-invalid output.
async fn process_one<S: CompletionService, X: UnitExtractor + ?Sized>(
    client: &CompletionClient<S>,
    extractor: &X,
    unit: &Unit,
) -> UnitOutcome {
    let model = extractor.model().to_string();
    let prompt = extractor.prompt(unit);

    let raw = match client.complete(&model, &prompt).await {
        Ok(raw) => raw,
        Err(error) if error.is_fatal() => return UnitOutcome::Fatal(error),
        Err(error) => {
            return UnitOutcome::Failed(UnitFailure {
                unit_id: unit.unit_id.clone(),
                reason: error.to_string(),
            })
        }
    };

    let malformed = match extractor.parse(unit, &raw) {
        Ok(result) => return UnitOutcome::Done(result),
        Err(malformed) => malformed,
    };

    debug!(unit_id = %unit.unit_id, reason = %malformed.reason, "malformed output, attempting repair");
    let repair = extractor.repair_prompt(unit, &raw);
    let raw = match client.complete(&model, &repair).await {
        Ok(raw) => raw,
        Err(error) if error.is_fatal() => return UnitOutcome::Fatal(error),
        Err(error) => {
            return UnitOutcome::Failed(UnitFailure {
                unit_id: unit.unit_id.clone(),
                reason: error.to_string(),
            })
        }
    };

    match extractor.parse(unit, &raw) {
        Ok(result) => UnitOutcome::Done(result),
        Err(still_malformed) => UnitOutcome::Failed(UnitFailure {
            unit_id: unit.unit_id.clone(),
            reason: format!("malformed after repair: {}", still_malformed.reason),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialPool;
    use crate::error::ServiceError;
    use crate::testing::{MockCompletionService, MockUnitExtractor};
    use crate::types::config::{ClientConfig, PoolConfig, RetryConfig};
    use crate::types::unit::TimeRange;

    fn units(n: usize) -> Vec<Unit> {
        (0..n)
            .map(|i| Unit::new(i, format!("unit text {i}"), TimeRange::new(0, 1000)))
            .collect()
    }

    fn client(service: MockCompletionService) -> Arc<CompletionClient<MockCompletionService>> {
        let pool = Arc::new(
            CredentialPool::new(PoolConfig::default()).with_key("k1", "sk-k1", []),
        );
        let config = ClientConfig::default().with_retry(
            RetryConfig::default()
                .with_max_attempts(1)
                .with_base_delay_ms(1)
                .with_max_delay_ms(1),
        );
        Arc::new(CompletionClient::with_config(service, pool, config))
    }

    #[tokio::test]
    async fn all_units_succeed() {
        let service = MockCompletionService::new().with_default_response("ok");
        let pool = ExtractionWorkerPool::with_config(
            client(service),
            Arc::new(MockUnitExtractor::new()),
            WorkerPoolConfig::default().with_workers(3),
        );

        let outcome = pool
            .process_units(units(5), &ShutdownSignal::new())
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 5);
        assert!(outcome.failures.is_empty());
        assert!(!outcome.partial_failure);
    }

    #[tokio::test]
    async fn partial_failure_preserves_successes() {
        // 10 units; responses for 6 of them are rejected by the parser
        // even after repair, so exactly 4 succeed.
        let extractor = MockUnitExtractor::new();
        let mut service = MockCompletionService::new().with_default_response("ok");
        for i in 0..6 {
            service = service.with_response_containing(&format!("unit-000{i}"), "garbled");
        }
        let extractor = extractor.with_rejected_raw("garbled");

        let pool = ExtractionWorkerPool::with_config(
            client(service),
            Arc::new(extractor),
            WorkerPoolConfig::default().with_workers(4),
        );

        let outcome = pool
            .process_units(units(10), &ShutdownSignal::new())
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 4);
        assert_eq!(outcome.failures.len(), 6);
        assert!(outcome.partial_failure);

        let mut failed = outcome.failed_unit_ids();
        failed.sort();
        let expected: Vec<String> = (0..6).map(|i| format!("unit-000{i}")).collect();
        assert_eq!(failed, expected);
    }

    #[tokio::test]
    async fn repair_is_attempted_exactly_once() {
        // First response is garbled, the repair response is fine.
        let service = MockCompletionService::new()
            .with_script([Ok("garbled".to_string()), Ok("ok".to_string())])
            .with_default_response("ok");
        let service_handle = service.clone();
        let extractor = MockUnitExtractor::new().with_rejected_raw("garbled");

        let pool = ExtractionWorkerPool::with_config(
            client(service),
            Arc::new(extractor),
            WorkerPoolConfig::default().with_workers(1),
        );

        let outcome = pool
            .process_units(units(1), &ShutdownSignal::new())
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 1);

        // Two calls for the unit: original plus one repair.
        let calls = service_handle.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].prompt.starts_with("repair:"));
    }

    #[tokio::test]
    async fn repair_failure_fails_only_that_unit() {
        let service = MockCompletionService::new()
            .with_response_containing("unit-0000", "garbled")
            .with_default_response("ok");
        let extractor = MockUnitExtractor::new().with_rejected_raw("garbled");

        let pool = ExtractionWorkerPool::with_config(
            client(service),
            Arc::new(extractor),
            WorkerPoolConfig::default().with_workers(2),
        );

        let outcome = pool
            .process_units(units(3), &ShutdownSignal::new())
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.failed_unit_ids(), vec!["unit-0000".to_string()]);
    }

    #[tokio::test]
    async fn fatal_error_aborts_the_batch() {
        let service = MockCompletionService::new()
            .with_script([Err(ServiceError::auth("revoked"))])
            .with_default_response("ok");
        let pool = ExtractionWorkerPool::with_config(
            client(service),
            Arc::new(MockUnitExtractor::new()),
            WorkerPoolConfig::default().with_workers(1),
        );

        let err = pool
            .process_units(units(3), &ShutdownSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Completion(CompletionError::Fatal(_))));
    }

    #[tokio::test]
    async fn shutdown_stops_dequeuing_new_units() {
        let service = MockCompletionService::new().with_default_response("ok");
        let pool = ExtractionWorkerPool::with_config(
            client(service),
            Arc::new(MockUnitExtractor::new()),
            WorkerPoolConfig::default().with_workers(1),
        );

        let shutdown = ShutdownSignal::new();
        shutdown.request_stop();

        let outcome = pool
            .process_units(units(5), &ShutdownSignal::new())
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 5);

        let stopped = pool.process_units(units(5), &shutdown).await.unwrap();
        assert!(stopped.results.is_empty());
        assert!(stopped.failures.is_empty());
    }
}
