//! Episode identity and the stage state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The stage an episode has most recently completed.
///
/// Stages run strictly in declaration order; `Failed` is terminal and
/// reachable from any non-terminal stage. Checkpoints always record the
/// last *completed* stage, so a resumed run picks up after it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Nothing has run yet.
    #[default]
    Pending,

    /// Transcript parsed into timestamped segments.
    Parsed,

    /// Speakers attributed to segments.
    SpeakersIdentified,

    /// High-level structure (sections/topics) derived.
    StructureAnalyzed,

    /// Meaningful units created from segments and structure.
    UnitsCreated,

    /// Knowledge extracted from all units.
    Extracted,

    /// Raw entity mentions merged into canonical entities.
    Resolved,

    /// Canonical knowledge upserted to the graph store.
    Stored,

    /// Terminal success.
    Completed,

    /// Terminal failure; the checkpoint carries the reason.
    Failed,
}

impl Stage {
    /// Whether this stage is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }
}

/// One input transcript being processed.
///
/// Owned exclusively by the pipeline executor for the duration of a run;
/// between runs only the checkpoint record survives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// Stable identifier derived from the source content.
    pub id: String,

    /// Current stage.
    pub stage: Stage,

    /// Why the episode failed, if it did.
    pub failure_reason: Option<String>,

    /// When this run started.
    pub started_at: DateTime<Utc>,

    /// Last stage-transition time.
    pub updated_at: DateTime<Utc>,
}

impl Episode {
    /// Create an episode for a transcript.
    ///
    /// The id is a content hash, so re-running the same transcript resumes
    /// the same episode.
    pub fn from_transcript(transcript: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Self::content_id(transcript),
            stage: Stage::Pending,
            failure_reason: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Stable content hash used as the episode id.
    pub fn content_id(transcript: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(transcript.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Advance the in-memory state machine.
    pub fn advance(&mut self, stage: Stage) {
        self.stage = stage;
        self.updated_at = Utc::now();
    }

    /// Mark the episode failed with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.stage = Stage::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
    }
}

/// Outcome of one `run` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// All stages completed and the knowledge was stored.
    Completed,

    /// A fatal error stopped the run; resumable after the cause is fixed.
    Failed {
        /// The triggering reason.
        reason: String,
    },

    /// A shutdown request stopped the run at a safe point; resumable.
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_ordering_follows_declaration() {
        assert!(Stage::Pending < Stage::Parsed);
        assert!(Stage::Parsed < Stage::SpeakersIdentified);
        assert!(Stage::UnitsCreated < Stage::Extracted);
        assert!(Stage::Stored < Stage::Completed);
    }

    #[test]
    fn episode_id_is_stable() {
        let a = Episode::from_transcript("hello world");
        let b = Episode::from_transcript("hello world");
        let c = Episode::from_transcript("different");
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn fail_sets_reason_and_terminal_stage() {
        let mut episode = Episode::from_transcript("t");
        episode.fail("credentials revoked");
        assert_eq!(episode.stage, Stage::Failed);
        assert!(episode.stage.is_terminal());
        assert_eq!(episode.failure_reason.as_deref(), Some("credentials revoked"));
    }
}
