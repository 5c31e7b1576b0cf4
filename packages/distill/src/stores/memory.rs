//! In-memory store implementations.
//!
//! Suitable for tests and single-process runs; durable backends implement
//! the same traits.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::error::CollaboratorResult;
use crate::traits::checkpoint::CheckpointStore;
use crate::traits::graph::GraphStore;
use crate::types::checkpoint::CheckpointRecord;
use crate::types::knowledge::KnowledgeBundle;

/// Checkpoint store backed by a `RwLock<HashMap>`.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: RwLock<HashMap<String, CheckpointRecord>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of episodes with a checkpoint.
    pub fn count(&self) -> usize {
        self.records.read().unwrap().len()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, record: &CheckpointRecord) -> CollaboratorResult<()> {
        debug!(episode_id = %record.episode_id, stage = ?record.stage, "saving checkpoint");
        self.records
            .write()
            .unwrap()
            .insert(record.episode_id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, episode_id: &str) -> CollaboratorResult<Option<CheckpointRecord>> {
        Ok(self.records.read().unwrap().get(episode_id).cloned())
    }

    async fn clear(&self, episode_id: &str) -> CollaboratorResult<()> {
        self.records.write().unwrap().remove(episode_id);
        Ok(())
    }
}

/// Graph store backed by a `RwLock<HashMap>`, keyed by episode.
///
/// Upsert replaces the episode's bundle wholesale, which makes repeated
/// store attempts for the same episode idempotent.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    bundles: RwLock<HashMap<String, KnowledgeBundle>>,
}

impl MemoryGraphStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of episodes stored.
    pub fn count(&self) -> usize {
        self.bundles.read().unwrap().len()
    }

    /// The stored bundle for an episode, if any.
    pub fn get(&self, episode_id: &str) -> Option<KnowledgeBundle> {
        self.bundles.read().unwrap().get(episode_id).cloned()
    }

    /// Total canonical entities across all episodes.
    pub fn entity_count(&self) -> usize {
        self.bundles
            .read()
            .unwrap()
            .values()
            .map(|b| b.entities.len())
            .sum()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert(&self, episode_id: &str, bundle: &KnowledgeBundle) -> CollaboratorResult<()> {
        debug!(
            %episode_id,
            entities = bundle.entities.len(),
            relationships = bundle.relationships.len(),
            "upserting knowledge bundle"
        );
        self.bundles
            .write()
            .unwrap()
            .insert(episode_id.to_string(), bundle.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::episode::Stage;
    use crate::types::knowledge::Entity;
    use crate::types::knowledge::RawEntity;

    #[tokio::test]
    async fn checkpoint_save_replaces_previous() {
        let store = MemoryCheckpointStore::new();
        let first = CheckpointRecord::new("ep-1", Stage::Parsed, serde_json::Value::Null);
        let second = CheckpointRecord::new("ep-1", Stage::Extracted, serde_json::Value::Null);

        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        assert_eq!(store.count(), 1);
        let loaded = store.load("ep-1").await.unwrap().unwrap();
        assert_eq!(loaded.stage, Stage::Extracted);
    }

    #[tokio::test]
    async fn checkpoint_clear_removes_record() {
        let store = MemoryCheckpointStore::new();
        let record = CheckpointRecord::new("ep-1", Stage::Parsed, serde_json::Value::Null);
        store.save(&record).await.unwrap();
        store.clear("ep-1").await.unwrap();
        assert!(store.load("ep-1").await.unwrap().is_none());
        assert_eq!(store.count(), 0);
    }

    #[tokio::test]
    async fn graph_upsert_is_idempotent() {
        let store = MemoryGraphStore::new();
        let mut bundle = KnowledgeBundle::default();
        bundle
            .entities
            .push(Entity::from_mention(&RawEntity::new("Acme", "Org", 0.9, "unit-0001")));

        store.upsert("ep-1", &bundle).await.unwrap();
        store.upsert("ep-1", &bundle).await.unwrap();

        assert_eq!(store.count(), 1);
        assert_eq!(store.entity_count(), 1);
        assert_eq!(store.get("ep-1").unwrap().entities.len(), 1);
    }
}
