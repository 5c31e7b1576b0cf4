//! Graph storage collaborator trait.

use async_trait::async_trait;

use crate::error::CollaboratorResult;
use crate::types::knowledge::KnowledgeBundle;

/// Destination store for resolved knowledge.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Upsert an episode's resolved knowledge.
    ///
    /// Must be idempotent under repeated calls with the same `episode_id`
    /// so that a crash during the store stage can be safely re-run.
    async fn upsert(&self, episode_id: &str, bundle: &KnowledgeBundle) -> CollaboratorResult<()>;
}
