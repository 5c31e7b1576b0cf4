//! Checkpoint storage collaborator trait.

use async_trait::async_trait;

use crate::error::CollaboratorResult;
use crate::types::checkpoint::CheckpointRecord;

/// Durable key/value store of episode progress.
///
/// Written at every stage boundary; read once at episode start to
/// determine the resume point.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint, replacing any previous record for the episode.
    async fn save(&self, record: &CheckpointRecord) -> CollaboratorResult<()>;

    /// Load the checkpoint for an episode, if one exists.
    async fn load(&self, episode_id: &str) -> CollaboratorResult<Option<CheckpointRecord>>;

    /// Remove an episode's checkpoint.
    async fn clear(&self, episode_id: &str) -> CollaboratorResult<()>;
}
