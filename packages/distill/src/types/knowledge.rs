//! Extracted and resolved knowledge types.
//!
//! Extraction output is schema-less by design: entity types are free-form
//! strings and are only interpreted at the resolver boundary (type equality
//! gates merge eligibility), never validated at ingestion.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A raw entity mention as extracted from one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEntity {
    /// The name as it appeared.
    pub name: String,

    /// Free-form type string (e.g. "Person", "Org", "Concept").
    pub entity_type: String,

    /// Extractor confidence, 0.0 to 1.0.
    pub confidence: f32,

    /// The unit this mention came from.
    pub source_unit_id: String,

    /// Arbitrary key/value properties. Insertion order is preserved and
    /// drives first-seen tie-breaks during resolution.
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

impl RawEntity {
    /// Create a mention.
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        confidence: f32,
        source_unit_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            confidence,
            source_unit_id: source_unit_id.into(),
            properties: IndexMap::new(),
        }
    }

    /// Add a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A canonical knowledge-graph node candidate.
///
/// One canonical entity may absorb many raw mentions; it is mutated only
/// by the resolver, which runs single-threaded after all units complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// The surviving name (from the highest-confidence merged mention).
    pub canonical_name: String,

    /// Free-form type string; merges never cross type boundaries.
    pub entity_type: String,

    /// Highest confidence among merged mentions.
    pub confidence: f32,

    /// Every unit that mentioned this entity.
    pub source_unit_ids: BTreeSet<String>,

    /// Merged properties; conflicts resolved toward higher confidence.
    pub properties: IndexMap<String, String>,
}

impl Entity {
    /// Promote a raw mention to a fresh canonical entity.
    pub fn from_mention(mention: &RawEntity) -> Self {
        let mut source_unit_ids = BTreeSet::new();
        source_unit_ids.insert(mention.source_unit_id.clone());
        Self {
            canonical_name: mention.name.clone(),
            entity_type: mention.entity_type.clone(),
            confidence: mention.confidence,
            source_unit_ids,
            properties: mention.properties.clone(),
        }
    }
}

/// A directed relationship between two named entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Source entity name.
    pub from: String,

    /// Target entity name.
    pub to: String,

    /// Free-form predicate (e.g. "works at", "founded").
    pub predicate: String,

    /// Extractor confidence, 0.0 to 1.0.
    pub confidence: f32,

    /// The unit this relationship came from.
    pub source_unit_id: String,
}

/// A notable verbatim quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    /// The quoted text.
    pub text: String,

    /// Who said it, if attributed.
    pub speaker: Option<String>,

    /// The unit this quote came from.
    pub source_unit_id: String,
}

/// A derived insight or takeaway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    /// The insight text.
    pub text: String,

    /// Extractor confidence, 0.0 to 1.0.
    pub confidence: f32,

    /// The unit this insight came from.
    pub source_unit_id: String,
}

/// Everything extracted from a single unit.
///
/// Created by one worker, consumed once by the aggregation step, then
/// folded into the episode-level accumulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// The unit this result belongs to.
    pub unit_id: String,

    /// Raw entity mentions.
    #[serde(default)]
    pub entities: Vec<RawEntity>,

    /// Relationships.
    #[serde(default)]
    pub relationships: Vec<Relationship>,

    /// Quotes.
    #[serde(default)]
    pub quotes: Vec<Quote>,

    /// Insights.
    #[serde(default)]
    pub insights: Vec<Insight>,
}

impl ExtractionResult {
    /// An empty result for a unit.
    pub fn empty(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            entities: Vec::new(),
            relationships: Vec::new(),
            quotes: Vec::new(),
            insights: Vec::new(),
        }
    }

    /// Whether nothing was extracted.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.relationships.is_empty()
            && self.quotes.is_empty()
            && self.insights.is_empty()
    }
}

/// One unit's failure, absorbed by the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitFailure {
    /// The unit that failed.
    pub unit_id: String,

    /// Why it failed.
    pub reason: String,
}

/// The resolved episode-level knowledge handed to the graph store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KnowledgeBundle {
    /// Canonical, deduplicated entities.
    pub entities: Vec<Entity>,

    /// All relationships, in unit order.
    pub relationships: Vec<Relationship>,

    /// All quotes, in unit order.
    pub quotes: Vec<Quote>,

    /// All insights, in unit order.
    pub insights: Vec<Insight>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_from_mention_carries_source() {
        let mention = RawEntity::new("OpenAI", "Org", 0.9, "unit-0001")
            .with_property("website", "openai.com");
        let entity = Entity::from_mention(&mention);
        assert_eq!(entity.canonical_name, "OpenAI");
        assert!(entity.source_unit_ids.contains("unit-0001"));
        assert_eq!(entity.properties.get("website").map(String::as_str), Some("openai.com"));
    }

    #[test]
    fn empty_result() {
        let result = ExtractionResult::empty("unit-0001");
        assert!(result.is_empty());
        assert_eq!(result.unit_id, "unit-0001");
    }
}
