//! Credential pool with per-key, per-model quota rotation.
//!
//! Every outbound completion call leases a credential from this pool.
//! Selection is round-robin over the healthy keys; a key is skipped while
//! it is cooling down or while its usage for the requested model has hit
//! the configured limit. Usage counters reset lazily when the UTC day
//! rolls over, and the pool state can be snapshotted so restarts do not
//! reset daily quotas mid-day.
//!
//! Concurrency: one mutex per key so workers contending for different
//! keys do not serialize; the shared round-robin cursor has its own
//! lightweight lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use indexmap::IndexMap;
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ServiceErrorKind;
use crate::types::config::PoolConfig;

/// An API key held in `secrecy`-backed storage.
///
/// Formatting always yields `[REDACTED]`; the raw value only leaves the
/// wrapper through [`SecretString::expose`], at the call site that puts
/// it on the wire.
pub struct SecretString {
    inner: SecretBox<str>,
}

impl SecretString {
    /// Wrap a raw key.
    pub fn new(value: impl Into<String>) -> Self {
        let value: String = value.into();
        Self {
            inner: SecretBox::new(value.into_boxed_str()),
        }
    }

    /// The raw key, for building the outbound request.
    pub fn expose(&self) -> &str {
        self.inner.expose_secret()
    }
}

impl Clone for SecretString {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One API key's usage state.
pub struct CredentialRecord {
    /// Stable identifier for reporting and logs.
    pub key_id: String,

    api_key: SecretString,

    /// Calls made today, per model.
    per_model_usage: IndexMap<String, u32>,

    /// Daily call budget, per model. Models absent from the map are
    /// unlimited for this key.
    per_model_limit: IndexMap<String, u32>,

    /// The key is ineligible until this instant, if set.
    pub cooldown_until: Option<DateTime<Utc>>,

    /// Transient failures since the last success.
    pub consecutive_failures: u32,

    /// UTC day the usage counters belong to.
    last_reset_day: NaiveDate,
}

impl CredentialRecord {
    fn new(key_id: String, api_key: SecretString, limits: IndexMap<String, u32>) -> Self {
        Self {
            key_id,
            api_key,
            per_model_usage: IndexMap::new(),
            per_model_limit: limits,
            cooldown_until: None,
            consecutive_failures: 0,
            last_reset_day: Utc::now().date_naive(),
        }
    }

    /// Reset usage when the UTC day has rolled over.
    fn maybe_reset(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.last_reset_day {
            debug!(key_id = %self.key_id, "daily quota reset");
            self.per_model_usage.clear();
            self.last_reset_day = today;
        }
    }

    fn usage(&self, model: &str) -> u32 {
        self.per_model_usage.get(model).copied().unwrap_or(0)
    }

    fn limit(&self, model: &str) -> u32 {
        self.per_model_limit.get(model).copied().unwrap_or(u32::MAX)
    }

    fn eligible(&self, model: &str, now: DateTime<Utc>) -> bool {
        if let Some(until) = self.cooldown_until {
            if until > now {
                return false;
            }
        }
        self.usage(model) < self.limit(model)
    }

    /// Charge one call against the quota at lease time, so a key can
    /// never be leased past its limit while earlier calls are in flight.
    fn reserve(&mut self, model: &str) {
        *self.per_model_usage.entry(model.to_string()).or_insert(0) += 1;
    }

    /// Return a reservation whose call did not complete successfully.
    fn refund(&mut self, model: &str) {
        if let Some(usage) = self.per_model_usage.get_mut(model) {
            *usage = usage.saturating_sub(1);
        }
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("key_id", &self.key_id)
            .field("api_key", &"[REDACTED]")
            .field("per_model_usage", &self.per_model_usage)
            .field("cooldown_until", &self.cooldown_until)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish()
    }
}

/// A leased credential, valid for one outbound call.
#[derive(Clone)]
pub struct CredentialLease {
    /// Which key was selected.
    pub key_id: String,

    api_key: SecretString,
}

impl CredentialLease {
    /// Expose the API key for the outbound request.
    pub fn api_key(&self) -> &str {
        self.api_key.expose()
    }
}

impl fmt::Debug for CredentialLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialLease")
            .field("key_id", &self.key_id)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// No credential can serve the requested model right now.
#[derive(Debug, Clone, Error)]
#[error("all credentials exhausted for model: {model}")]
pub struct Exhausted {
    /// The model that could not be served.
    pub model: String,
}

/// The outcome of one call, reported back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The call succeeded; usage is charged.
    Success,

    /// The service rate-limited this key; cool it down until the next
    /// daily quota reset without penalizing other keys.
    RateLimited,

    /// Some other transient failure; counts toward the circuit breaker.
    TransientFailure,

    /// Non-retryable failure; the pool does not penalize the key.
    Fatal,
}

impl CallOutcome {
    /// Map a service failure kind to a pool outcome.
    pub fn from_kind(kind: ServiceErrorKind) -> Self {
        match kind {
            ServiceErrorKind::RateLimit => CallOutcome::RateLimited,
            ServiceErrorKind::Timeout | ServiceErrorKind::ServerError => {
                CallOutcome::TransientFailure
            }
            ServiceErrorKind::Auth | ServiceErrorKind::Malformed => CallOutcome::Fatal,
        }
    }
}

/// Serializable pool state (usage only, never the keys themselves).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PoolSnapshot {
    /// Per-key usage records.
    pub keys: Vec<KeySnapshot>,
}

/// Snapshot of one key's counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySnapshot {
    /// Which key this is.
    pub key_id: String,

    /// Calls made today, per model.
    pub per_model_usage: IndexMap<String, u32>,

    /// Cooldown, if any.
    pub cooldown_until: Option<DateTime<Utc>>,

    /// Circuit-breaker counter.
    pub consecutive_failures: u32,

    /// UTC day the counters belong to.
    pub last_reset_day: NaiveDate,
}

/// Pool of API credentials with round-robin selection.
pub struct CredentialPool {
    keys: Vec<Mutex<CredentialRecord>>,
    slots: HashMap<String, usize>,
    cursor: Mutex<usize>,
    config: PoolConfig,
}

impl CredentialPool {
    /// Create an empty pool.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            keys: Vec::new(),
            slots: HashMap::new(),
            cursor: Mutex::new(0),
            config,
        }
    }

    /// Add a key with per-model daily limits.
    pub fn with_key(
        mut self,
        key_id: impl Into<String>,
        api_key: impl Into<SecretString>,
        limits: impl IntoIterator<Item = (String, u32)>,
    ) -> Self {
        let key_id = key_id.into();
        let record =
            CredentialRecord::new(key_id.clone(), api_key.into(), limits.into_iter().collect());
        self.slots.insert(key_id, self.keys.len());
        self.keys.push(Mutex::new(record));
        self
    }

    /// Number of keys in the pool.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Lease a credential for one call against `model`.
    ///
    /// Iterates keys round-robin starting after the last selection,
    /// skipping cooled-down and over-quota keys. The lease reserves one
    /// call against the key's quota immediately, so overlapping leases
    /// can never push usage past the limit; report a non-success outcome
    /// to refund the reservation.
    pub fn acquire(&self, model: &str) -> Result<CredentialLease, Exhausted> {
        self.acquire_at(model, Utc::now())
    }

    pub(crate) fn acquire_at(
        &self,
        model: &str,
        now: DateTime<Utc>,
    ) -> Result<CredentialLease, Exhausted> {
        if self.keys.is_empty() {
            return Err(Exhausted {
                model: model.to_string(),
            });
        }

        // Snapshot the round-robin cursor rather than holding it for the
        // whole scan; per-key locks do the real gating.
        let start = *self.cursor.lock().unwrap();
        let n = self.keys.len();
        for offset in 0..n {
            let slot = (start + offset) % n;
            let mut record = self.keys[slot].lock().unwrap();
            record.maybe_reset(now);
            if record.eligible(model, now) {
                record.reserve(model);
                debug!(key_id = %record.key_id, model, usage = record.usage(model), "credential leased");
                let lease = CredentialLease {
                    key_id: record.key_id.clone(),
                    api_key: record.api_key.clone(),
                };
                drop(record);
                *self.cursor.lock().unwrap() = (slot + 1) % n;
                return Ok(lease);
            }
        }

        Err(Exhausted {
            model: model.to_string(),
        })
    }

    /// Report the outcome of a call made with a leased credential.
    pub fn report_outcome(&self, key_id: &str, model: &str, outcome: CallOutcome) {
        self.report_outcome_at(key_id, model, outcome, Utc::now());
    }

    pub(crate) fn report_outcome_at(
        &self,
        key_id: &str,
        model: &str,
        outcome: CallOutcome,
        now: DateTime<Utc>,
    ) {
        let Some(&slot) = self.slots.get(key_id) else {
            warn!(key_id, "outcome reported for unknown credential");
            return;
        };
        let mut record = self.keys[slot].lock().unwrap();
        record.maybe_reset(now);

        // The lease already reserved the call; success keeps the charge,
        // everything else refunds it.
        match outcome {
            CallOutcome::Success => {
                record.consecutive_failures = 0;
            }
            CallOutcome::RateLimited => {
                record.refund(model);
                let reset = next_daily_reset(now);
                record.cooldown_until = Some(reset);
                warn!(key_id, model, cooldown_until = %reset, "credential rate limited");
            }
            CallOutcome::TransientFailure => {
                record.refund(model);
                record.consecutive_failures += 1;
                if record.consecutive_failures >= self.config.failure_threshold {
                    let until = now + Duration::seconds(self.config.circuit_cooldown_secs as i64);
                    record.cooldown_until = Some(until);
                    record.consecutive_failures = 0;
                    warn!(key_id, cooldown_until = %until, "credential circuit broken");
                }
            }
            CallOutcome::Fatal => {
                record.refund(model);
            }
        }
    }

    /// Today's usage for a key/model pair (for monitoring and tests).
    pub fn usage(&self, key_id: &str, model: &str) -> Option<u32> {
        let slot = *self.slots.get(key_id)?;
        Some(self.keys[slot].lock().unwrap().usage(model))
    }

    /// Export counters so quotas survive a restart. API keys are never
    /// included.
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            keys: self
                .keys
                .iter()
                .map(|k| {
                    let record = k.lock().unwrap();
                    KeySnapshot {
                        key_id: record.key_id.clone(),
                        per_model_usage: record.per_model_usage.clone(),
                        cooldown_until: record.cooldown_until,
                        consecutive_failures: record.consecutive_failures,
                        last_reset_day: record.last_reset_day,
                    }
                })
                .collect(),
        }
    }

    /// Restore counters from a snapshot, matching by `key_id`.
    /// Snapshots for keys no longer in the pool are ignored.
    pub fn restore(&self, snapshot: &PoolSnapshot) {
        for key in &snapshot.keys {
            let Some(&slot) = self.slots.get(&key.key_id) else {
                continue;
            };
            let mut record = self.keys[slot].lock().unwrap();
            record.per_model_usage = key.per_model_usage.clone();
            record.cooldown_until = key.cooldown_until;
            record.consecutive_failures = key.consecutive_failures;
            record.last_reset_day = key.last_reset_day;
        }
    }
}

/// Next UTC midnight after `now` (the daily quota reset boundary).
fn next_daily_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Duration::days(1);
    tomorrow
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pool_with(limits: &[(&str, u32)], keys: &[&str]) -> CredentialPool {
        let mut pool = CredentialPool::new(PoolConfig::default());
        for key in keys {
            pool = pool.with_key(
                *key,
                format!("sk-{key}"),
                limits.iter().map(|(m, l)| (m.to_string(), *l)),
            );
        }
        pool
    }

    #[test]
    fn round_robin_until_exhausted() {
        // 3 keys, limit 2 for model m: expect k1,k2,k3,k1,k2,k3,Exhausted.
        let pool = pool_with(&[("m", 2)], &["k1", "k2", "k3"]);

        let mut selected = Vec::new();
        for _ in 0..6 {
            let lease = pool.acquire("m").unwrap();
            pool.report_outcome(&lease.key_id, "m", CallOutcome::Success);
            selected.push(lease.key_id);
        }
        assert_eq!(selected, ["k1", "k2", "k3", "k1", "k2", "k3"]);

        let err = pool.acquire("m").unwrap_err();
        assert_eq!(err.model, "m");
    }

    #[test]
    fn round_robin_fairness_window() {
        let pool = pool_with(&[], &["a", "b", "c", "d"]);
        let n = pool.key_count();

        let mut selections = Vec::new();
        for _ in 0..n * 5 {
            let lease = pool.acquire("m").unwrap();
            pool.report_outcome(&lease.key_id, "m", CallOutcome::Success);
            selections.push(lease.key_id);
        }

        // Every key appears in any window of N consecutive acquires.
        for window in selections.windows(n) {
            for key in ["a", "b", "c", "d"] {
                assert!(window.iter().any(|k| k == key), "missing {key} in {window:?}");
            }
        }
    }

    #[test]
    fn rate_limit_cools_one_key_until_next_day() {
        let pool = pool_with(&[("m", 10)], &["k1", "k2"]);
        let now = Utc::now();

        let lease = pool.acquire_at("m", now).unwrap();
        pool.report_outcome_at(&lease.key_id, "m", CallOutcome::RateLimited, now);

        // The cooled key is skipped, the other still serves.
        for _ in 0..3 {
            let next = pool.acquire_at("m", now).unwrap();
            assert_ne!(next.key_id, lease.key_id);
            pool.report_outcome_at(&next.key_id, "m", CallOutcome::Success, now);
        }

        // After the daily boundary the key is eligible again.
        let tomorrow = next_daily_reset(now) + Duration::seconds(1);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..2 {
            let l = pool.acquire_at("m", tomorrow).unwrap();
            seen.insert(l.key_id.clone());
            pool.report_outcome_at(&l.key_id, "m", CallOutcome::Success, tomorrow);
        }
        assert!(seen.contains(&lease.key_id));
    }

    #[test]
    fn circuit_breaker_after_consecutive_failures() {
        let config = PoolConfig::default()
            .with_failure_threshold(2)
            .with_circuit_cooldown_secs(60);
        let pool = CredentialPool::new(config).with_key("k1", "sk-k1", []);
        let now = Utc::now();

        pool.report_outcome_at("k1", "m", CallOutcome::TransientFailure, now);
        assert!(pool.acquire_at("m", now).is_ok());
        pool.report_outcome_at("k1", "m", CallOutcome::TransientFailure, now);

        // Circuit open: the only key is cooling down.
        assert!(pool.acquire_at("m", now).is_err());

        // Cooldown over: key serves again.
        let later = now + Duration::seconds(61);
        assert!(pool.acquire_at("m", later).is_ok());
    }

    #[test]
    fn success_resets_failure_count() {
        let config = PoolConfig::default().with_failure_threshold(2);
        let pool = CredentialPool::new(config).with_key("k1", "sk-k1", []);
        let now = Utc::now();

        pool.report_outcome_at("k1", "m", CallOutcome::TransientFailure, now);
        pool.report_outcome_at("k1", "m", CallOutcome::Success, now);
        pool.report_outcome_at("k1", "m", CallOutcome::TransientFailure, now);

        // One failure since the last success: still below threshold.
        assert!(pool.acquire_at("m", now).is_ok());
    }

    #[test]
    fn usage_resets_on_day_rollover() {
        let pool = pool_with(&[("m", 1)], &["k1"]);
        let now = Utc::now();

        let lease = pool.acquire_at("m", now).unwrap();
        pool.report_outcome_at(&lease.key_id, "m", CallOutcome::Success, now);
        assert!(pool.acquire_at("m", now).is_err());

        let tomorrow = next_daily_reset(now) + Duration::seconds(1);
        assert!(pool.acquire_at("m", tomorrow).is_ok());
    }

    #[test]
    fn overlapping_leases_never_exceed_quota() {
        // Both calls are in flight before either reports: the limit-1
        // keys must hand out one lease each and then refuse.
        let pool = pool_with(&[("m", 1)], &["k1", "k2"]);

        let first = pool.acquire("m").unwrap();
        let second = pool.acquire("m").unwrap();
        assert_ne!(first.key_id, second.key_id);
        assert!(pool.acquire("m").is_err());

        pool.report_outcome(&first.key_id, "m", CallOutcome::Success);
        pool.report_outcome(&second.key_id, "m", CallOutcome::Success);
        assert_eq!(pool.usage("k1", "m"), Some(1));
        assert_eq!(pool.usage("k2", "m"), Some(1));
        assert!(pool.acquire("m").is_err());
    }

    #[test]
    fn failed_call_refunds_the_reservation() {
        let pool = pool_with(&[("m", 1)], &["k1"]);

        let lease = pool.acquire("m").unwrap();
        assert!(pool.acquire("m").is_err());

        pool.report_outcome(&lease.key_id, "m", CallOutcome::TransientFailure);
        assert_eq!(pool.usage("k1", "m"), Some(0));
        assert!(pool.acquire("m").is_ok());
    }

    #[test]
    fn snapshot_restore_preserves_quota() {
        let pool = pool_with(&[("m", 2)], &["k1"]);
        let lease = pool.acquire("m").unwrap();
        pool.report_outcome(&lease.key_id, "m", CallOutcome::Success);

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.keys.len(), 1);

        // A fresh pool (simulated restart) picks the counters back up.
        let restarted = pool_with(&[("m", 2)], &["k1"]);
        restarted.restore(&snapshot);
        assert_eq!(restarted.usage("k1", "m"), Some(1));

        let l2 = restarted.acquire("m").unwrap();
        restarted.report_outcome(&l2.key_id, "m", CallOutcome::Success);
        assert!(restarted.acquire("m").is_err());
    }

    #[test]
    fn secret_never_in_debug_output() {
        let pool = pool_with(&[], &["k1"]);
        let lease = pool.acquire("m").unwrap();
        let debug = format!("{lease:?}");
        assert!(!debug.contains("sk-k1"));
        assert!(debug.contains("[REDACTED]"));
    }

    proptest! {
        // Usage can never exceed the configured limit, whatever the
        // interleaving of acquires and outcome reports.
        #[test]
        fn quota_never_exceeded(limit in 1u32..8, calls in 1usize..64, failures in proptest::collection::vec(any::<bool>(), 64)) {
            let pool = pool_with(&[("m", limit)], &["k1", "k2"]);
            for i in 0..calls {
                match pool.acquire("m") {
                    Ok(lease) => {
                        let outcome = if failures[i % failures.len()] {
                            CallOutcome::TransientFailure
                        } else {
                            CallOutcome::Success
                        };
                        pool.report_outcome(&lease.key_id, "m", outcome);
                    }
                    Err(_) => break,
                }
                for key in ["k1", "k2"] {
                    prop_assert!(pool.usage(key, "m").unwrap() <= limit);
                }
            }
        }
    }
}
