//! Checkpoint records and stage payloads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::episode::Stage;
use crate::types::knowledge::{ExtractionResult, KnowledgeBundle};
use crate::types::unit::{Segment, Speaker, StructureOutline, Unit};

/// Durable record of an episode's furthest-completed stage.
///
/// Invariant: a checkpoint at stage S implies every stage before S
/// completed and its artifacts are present in the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// The episode this belongs to.
    pub episode_id: String,

    /// Last fully-completed stage.
    pub stage: Stage,

    /// Stage artifacts, opaque to the store.
    pub payload: serde_json::Value,

    /// Why the last run failed, if it did. Resume uses `stage` regardless.
    pub failure_reason: Option<String>,

    /// When this record was written.
    pub saved_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Create a record for a stage boundary.
    pub fn new(episode_id: impl Into<String>, stage: Stage, payload: serde_json::Value) -> Self {
        Self {
            episode_id: episode_id.into(),
            stage,
            payload,
            failure_reason: None,
            saved_at: Utc::now(),
        }
    }

    /// Annotate the record with a failure reason.
    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }
}

/// Accumulated stage artifacts, serialized into the checkpoint payload.
///
/// Fields fill in progressively as stages complete; a field required by a
/// later stage but absent from the payload is a contract violation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StagePayload {
    /// Parsed transcript segments (set at `Parsed`).
    pub segments: Option<Vec<Segment>>,

    /// Identified speakers (set at `SpeakersIdentified`).
    pub speakers: Option<Vec<Speaker>>,

    /// Structural outline (set at `StructureAnalyzed`).
    pub outline: Option<StructureOutline>,

    /// Meaningful units (set at `UnitsCreated`).
    pub units: Option<Vec<Unit>>,

    /// Per-unit extraction results, keyed by `unit_id`.
    ///
    /// May be partial after a cancelled run; resume recomputes only the
    /// missing ids.
    #[serde(default)]
    pub unit_results: BTreeMap<String, ExtractionResult>,

    /// Units that failed extraction in the last completed attempt.
    #[serde(default)]
    pub failed_unit_ids: Vec<String>,

    /// Recorded extraction failure ratio (set at `Extracted`), surfaced
    /// for callers that want stricter behavior than the default.
    pub failure_ratio: Option<f32>,

    /// Resolved knowledge (set at `Resolved`).
    pub resolved: Option<KnowledgeBundle>,
}

impl StagePayload {
    /// Serialize for a checkpoint record.
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Deserialize from a checkpoint record.
    pub fn from_value(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_through_json() {
        let mut payload = StagePayload::default();
        payload.segments = Some(vec![]);
        payload.failure_ratio = Some(0.25);
        payload
            .unit_results
            .insert("unit-0001".to_string(), ExtractionResult::empty("unit-0001"));

        let value = payload.to_value().unwrap();
        let restored = StagePayload::from_value(value).unwrap();
        assert!(restored.segments.is_some());
        assert_eq!(restored.failure_ratio, Some(0.25));
        assert!(restored.unit_results.contains_key("unit-0001"));
    }
}
