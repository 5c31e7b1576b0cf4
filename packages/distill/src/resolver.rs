//! Entity resolution: merging raw mentions into canonical entities.
//!
//! Runs single-threaded after all units of an episode have produced raw
//! mentions; deferring resolution to this point avoids merge races.
//! Given the same input order, output is fully deterministic.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::types::config::ResolverConfig;
use crate::types::knowledge::{Entity, RawEntity};

/// Merges newly extracted entities into a canonical set.
#[derive(Debug, Clone, Default)]
pub struct EntityResolver {
    config: ResolverConfig,
}

/// Working state for one canonical entity during a resolve pass.
struct Canonical {
    entity: Entity,
    tokens: BTreeSet<String>,
    /// Confidence of the mention that supplied each property value.
    property_confidence: IndexMap<String, f32>,
}

impl EntityResolver {
    /// Create a resolver with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a resolver with custom configuration.
    pub fn with_config(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Deduplicate raw mentions into canonical entities.
    ///
    /// Mentions are grouped by exact normalized-name-and-type match first,
    /// then merged into a same-type canonical whose normalized name is
    /// similar enough (token-set Jaccard at or above the configured
    /// threshold). Mentions with different types never merge, no matter
    /// how similar their names are.
    pub fn resolve(&self, mentions: &[RawEntity]) -> Vec<Entity> {
        let mut canonicals: Vec<Canonical> = Vec::new();
        // (normalized name, type) -> canonical index, for the cheap path.
        let mut exact: HashMap<(String, String), usize> = HashMap::new();

        for mention in mentions {
            let norm = normalize(&mention.name);
            if norm.is_empty() {
                debug!(name = %mention.name, "mention normalizes to nothing, skipped");
                continue;
            }
            let key = (norm.clone(), mention.entity_type.clone());

            if let Some(&idx) = exact.get(&key) {
                merge(&mut canonicals[idx], mention);
                continue;
            }

            let tokens = token_set(&norm);
            let similar = canonicals
                .iter()
                .enumerate()
                .filter(|(_, c)| c.entity.entity_type == mention.entity_type)
                .map(|(i, c)| (i, jaccard(&tokens, &c.tokens)))
                .filter(|(_, score)| *score >= self.config.similarity_threshold)
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i);

            match similar {
                Some(idx) => {
                    merge(&mut canonicals[idx], mention);
                    exact.insert(key, idx);
                }
                None => {
                    let idx = canonicals.len();
                    canonicals.push(Canonical {
                        entity: Entity::from_mention(mention),
                        tokens,
                        property_confidence: mention
                            .properties
                            .keys()
                            .map(|k| (k.clone(), mention.confidence))
                            .collect(),
                    });
                    exact.insert(key, idx);
                }
            }
        }

        info!(
            mentions = mentions.len(),
            canonical = canonicals.len(),
            "entity resolution complete"
        );
        canonicals.into_iter().map(|c| c.entity).collect()
    }
}

/// Fold a mention into an existing canonical entity.
///
/// The canonical takes the highest confidence among merged mentions (and
/// that mention's surface name); ties keep the first-seen value. Property
/// conflicts keep the value from the higher-confidence mention.
fn merge(canonical: &mut Canonical, mention: &RawEntity) {
    if mention.confidence > canonical.entity.confidence {
        canonical.entity.canonical_name = mention.name.clone();
        canonical.entity.confidence = mention.confidence;
    }
    canonical
        .entity
        .source_unit_ids
        .insert(mention.source_unit_id.clone());

    for (key, value) in &mention.properties {
        match canonical.property_confidence.get(key) {
            Some(&existing) if mention.confidence <= existing => {}
            _ => {
                canonical
                    .entity
                    .properties
                    .insert(key.clone(), value.clone());
                canonical
                    .property_confidence
                    .insert(key.clone(), mention.confidence);
            }
        }
    }
}

/// Case-fold and strip punctuation, collapsing whitespace.
fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_space = true;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

fn token_set(normalized: &str) -> BTreeSet<String> {
    normalized.split_whitespace().map(str::to_string).collect()
}

/// Token-set overlap score.
fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f32 / union as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_fold_merge_keeps_highest_confidence() {
        let resolver = EntityResolver::new();
        let mentions = vec![
            RawEntity::new("OpenAI", "Org", 0.9, "unit-0001"),
            RawEntity::new("openai", "Org", 0.6, "unit-0002"),
        ];

        let entities = resolver.resolve(&mentions);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].canonical_name, "OpenAI");
        assert_eq!(entities[0].confidence, 0.9);
        assert_eq!(entities[0].source_unit_ids.len(), 2);
    }

    #[test]
    fn never_merges_across_types() {
        let resolver = EntityResolver::new();
        let mentions = vec![
            RawEntity::new("Mercury", "Planet", 0.9, "unit-0001"),
            RawEntity::new("Mercury", "Element", 0.9, "unit-0002"),
        ];

        let entities = resolver.resolve(&mentions);
        assert_eq!(entities.len(), 2);
    }

    #[test]
    fn similar_names_merge_within_threshold() {
        let resolver = EntityResolver::with_config(
            ResolverConfig::default().with_similarity_threshold(0.5),
        );
        let mentions = vec![
            RawEntity::new("Acme Corporation", "Org", 0.8, "unit-0001"),
            RawEntity::new("Acme Corporation Inc.", "Org", 0.7, "unit-0002"),
            RawEntity::new("Globex", "Org", 0.9, "unit-0003"),
        ];

        let entities = resolver.resolve(&mentions);
        assert_eq!(entities.len(), 2);
        let acme = entities
            .iter()
            .find(|e| e.canonical_name == "Acme Corporation")
            .unwrap();
        assert_eq!(acme.source_unit_ids.len(), 2);
    }

    #[test]
    fn property_conflicts_favor_higher_confidence() {
        let resolver = EntityResolver::new();
        let mentions = vec![
            RawEntity::new("Acme", "Org", 0.5, "unit-0001").with_property("hq", "Toledo"),
            RawEntity::new("acme", "Org", 0.9, "unit-0002").with_property("hq", "Berlin"),
            RawEntity::new("ACME", "Org", 0.4, "unit-0003").with_property("hq", "Oslo"),
        ];

        let entities = resolver.resolve(&mentions);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].properties.get("hq").map(String::as_str), Some("Berlin"));
    }

    #[test]
    fn property_ties_keep_first_seen() {
        let resolver = EntityResolver::new();
        let mentions = vec![
            RawEntity::new("Acme", "Org", 0.7, "unit-0001").with_property("hq", "Toledo"),
            RawEntity::new("acme", "Org", 0.7, "unit-0002").with_property("hq", "Berlin"),
        ];

        let entities = resolver.resolve(&mentions);
        assert_eq!(entities[0].properties.get("hq").map(String::as_str), Some("Toledo"));
    }

    #[test]
    fn resolution_is_deterministic() {
        let resolver = EntityResolver::new();
        let mentions = vec![
            RawEntity::new("Jane Doe", "Person", 0.8, "unit-0001"),
            RawEntity::new("jane doe", "Person", 0.8, "unit-0002"),
            RawEntity::new("J. Doe", "Person", 0.6, "unit-0003"),
        ];

        let a = resolver.resolve(&mentions);
        let b = resolver.resolve(&mentions);
        let names_a: Vec<_> = a.iter().map(|e| e.canonical_name.clone()).collect();
        let names_b: Vec<_> = b.iter().map(|e| e.canonical_name.clone()).collect();
        assert_eq!(names_a, names_b);
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("  OpenAI, Inc.! "), "openai inc");
        assert_eq!(normalize("foo-bar"), "foo bar");
        assert_eq!(normalize("..."), "");
    }

    #[test]
    fn jaccard_scores() {
        let a = token_set("acme corporation");
        let b = token_set("acme corporation inc");
        let score = jaccard(&a, &b);
        assert!((score - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(jaccard(&a, &a), 1.0);
    }
}
