//! Entity reduction and per-document statistics.
//!
//! The annotation service is called once per confidence threshold, so the
//! same URI usually appears several times in the merged raw list. The
//! reducer collapses those occurrences into one entity per URI, keeping the
//! attributes of the highest-confidence occurrence and recording how many
//! occurrences each threshold contributed. Reduction is deterministic: the
//! same raw multiset always yields the same output.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::models::{Entity, EntityMetadata, RawEntity};

/// Collapse raw occurrences into one entity per URI.
///
/// Output order is first-seen order of each URI. Each surviving entity takes
/// the attributes of its strictly highest-confidence occurrence; among
/// occurrences tied at that confidence the first seen wins. `duplicates`
/// counts occurrences per threshold, including single ones.
pub fn reduce_entities(raw: &[RawEntity], thresholds: &[u32]) -> Vec<Entity> {
    let mut order: Vec<&str> = Vec::new();
    let mut best: BTreeMap<&str, &RawEntity> = BTreeMap::new();

    for occurrence in raw {
        match best.get(occurrence.uri.as_str()) {
            None => {
                order.push(&occurrence.uri);
                best.insert(&occurrence.uri, occurrence);
            }
            Some(current) if occurrence.confidence > current.confidence => {
                best.insert(&occurrence.uri, occurrence);
            }
            Some(_) => {}
        }
    }

    order
        .into_iter()
        .map(|uri| {
            let winner = best[uri];
            let duplicates = thresholds
                .iter()
                .map(|&t| {
                    let count = raw
                        .iter()
                        .filter(|o| o.uri == uri && o.confidence == t)
                        .count() as u32;
                    (t, count)
                })
                .collect();
            Entity {
                uri: winner.uri.clone(),
                confidence: winner.confidence,
                surface_form: winner.surface_form.clone(),
                similarity_score: winner.similarity_score,
                percentage_of_second_rank: winner.percentage_of_second_rank,
                duplicates,
            }
        })
        .collect()
}

/// Fold a reduced entity list into aggregate statistics.
///
/// An entity counts as a duplicate at a threshold when it has more than one
/// occurrence there. For an empty list the average is zero and min/max keep
/// their fold seeds (min 100, max 0).
pub fn entity_metadata(entities: &[Entity], thresholds: &[u32]) -> EntityMetadata {
    let count = entities.len() as u32;
    let sum: u64 = entities.iter().map(|e| e.confidence as u64).sum();
    let confidence_avg = if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    };
    let confidence_max = entities.iter().map(|e| e.confidence).fold(0, u32::max);
    let confidence_min = entities.iter().map(|e| e.confidence).fold(100, u32::min);

    let mut duplicate_counts = BTreeMap::new();
    let mut duplicate_ratios = BTreeMap::new();
    for &t in thresholds {
        let dupes = entities
            .iter()
            .filter(|e| e.duplicates.get(&t).copied().unwrap_or(0) > 1)
            .count() as u32;
        duplicate_counts.insert(t, dupes);
        let ratio = if count == 0 {
            0.0
        } else {
            dupes as f64 / count as f64
        };
        duplicate_ratios.insert(t, ratio);
    }

    let mut confidence_counts: BTreeMap<u32, u32> = BTreeMap::new();
    for entity in entities {
        *confidence_counts.entry(entity.confidence).or_insert(0) += 1;
    }

    EntityMetadata {
        entities_count: count,
        confidence_avg,
        confidence_max,
        confidence_min,
        duplicate_counts,
        duplicate_ratios,
        confidence_counts,
    }
}

/// Typed nested mapping for the entity field, one `duplicates_<t>` column
/// per configured threshold.
pub fn entity_mapping(thresholds: &[u32]) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert("URI".into(), json!({ "type": "keyword" }));
    properties.insert("confidence".into(), json!({ "type": "integer" }));
    properties.insert("surfaceForm".into(), json!({ "type": "text" }));
    properties.insert("similarityScore".into(), json!({ "type": "float" }));
    properties.insert("percentageOfSecondRank".into(), json!({ "type": "float" }));
    for &t in thresholds {
        properties.insert(format!("duplicates_{}", t), json!({ "type": "integer" }));
    }
    json!({ "type": "nested", "properties": properties })
}

/// Typed mapping for the per-document metadata object produced by
/// [`entity_metadata`]. The confidence histogram is mapped per decile.
pub fn metadata_mapping(thresholds: &[u32]) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert("entities_count".into(), json!({ "type": "integer" }));
    properties.insert("confidence_avg".into(), json!({ "type": "float" }));
    properties.insert("confidence_max".into(), json!({ "type": "integer" }));
    properties.insert("confidence_min".into(), json!({ "type": "integer" }));
    for &t in thresholds {
        properties.insert(format!("dupes_{}_count", t), json!({ "type": "integer" }));
        properties.insert(format!("dupes_{}_ratio", t), json!({ "type": "float" }));
    }
    let mut counts = serde_json::Map::new();
    for decile in (0..=100).step_by(10) {
        counts.insert(decile.to_string(), json!({ "type": "integer" }));
    }
    properties.insert("confidence_counts".into(), json!({ "properties": counts }));
    json!({ "properties": properties })
}
