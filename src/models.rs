//! Core data models shared by the transfer pipelines.

use std::collections::BTreeMap;

use serde_json::{json, Value};

/// A document hit returned by the search index's scroll API.
#[derive(Debug, Clone)]
pub struct Hit {
    /// Index-assigned document id (`_id`).
    pub id: String,
    /// The document body (`_source`).
    pub source: Value,
}

/// One document in a bulk mutation request: optional stable id plus payload.
#[derive(Debug, Clone)]
pub struct BulkDoc {
    pub id: Option<String>,
    pub payload: Value,
}

/// A raw entity occurrence returned by one annotation call.
///
/// `confidence` is the threshold of the call that produced it, scaled to an
/// integer percentage (`0.6` → `60`). The service returns its numeric fields
/// as strings; `annotation` recasts them before constructing this type.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntity {
    pub uri: String,
    pub confidence: u32,
    pub surface_form: String,
    pub similarity_score: f64,
    pub percentage_of_second_rank: f64,
}

/// A deduplicated, confidence-ranked entity produced by the reducer.
///
/// `duplicates` maps each configured threshold to the number of raw
/// occurrences of this URI tagged with exactly that confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub uri: String,
    pub confidence: u32,
    pub surface_form: String,
    pub similarity_score: f64,
    pub percentage_of_second_rank: f64,
    pub duplicates: BTreeMap<u32, u32>,
}

impl Entity {
    /// Serialize to the index document shape: flat `duplicates_<t>` keys
    /// alongside the entity fields.
    pub fn to_json(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("URI".into(), json!(self.uri));
        obj.insert("confidence".into(), json!(self.confidence));
        obj.insert("surfaceForm".into(), json!(self.surface_form));
        obj.insert("similarityScore".into(), json!(self.similarity_score));
        obj.insert(
            "percentageOfSecondRank".into(),
            json!(self.percentage_of_second_rank),
        );
        for (threshold, count) in &self.duplicates {
            obj.insert(format!("duplicates_{}", threshold), json!(count));
        }
        Value::Object(obj)
    }
}

/// Aggregate statistics over a document's deduplicated entity list.
///
/// Recomputed in full on every annotation run, never partially updated.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMetadata {
    pub entities_count: u32,
    pub confidence_avg: f64,
    pub confidence_max: u32,
    pub confidence_min: u32,
    /// threshold → number of entities with more than one occurrence at it.
    pub duplicate_counts: BTreeMap<u32, u32>,
    /// threshold → duplicate count over total entities.
    pub duplicate_ratios: BTreeMap<u32, f64>,
    /// exact confidence score → number of entities with that score.
    pub confidence_counts: BTreeMap<u32, u32>,
}

impl EntityMetadata {
    pub fn to_json(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("entities_count".into(), json!(self.entities_count));
        obj.insert("confidence_avg".into(), json!(self.confidence_avg));
        obj.insert("confidence_max".into(), json!(self.confidence_max));
        obj.insert("confidence_min".into(), json!(self.confidence_min));
        for (threshold, count) in &self.duplicate_counts {
            obj.insert(format!("dupes_{}_count", threshold), json!(count));
        }
        for (threshold, ratio) in &self.duplicate_ratios {
            obj.insert(format!("dupes_{}_ratio", threshold), json!(ratio));
        }
        let counts: serde_json::Map<String, Value> = self
            .confidence_counts
            .iter()
            .map(|(score, count)| (score.to_string(), json!(count)))
            .collect();
        obj.insert("confidence_counts".into(), Value::Object(counts));
        Value::Object(obj)
    }
}

/// A completed multipart segment.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedPart {
    pub part_number: i32,
    pub etag: String,
}

/// End-of-run accounting: what moved, what was skipped, what failed.
///
/// Skips are documents deliberately left alone (empty input text, empty
/// annotation result). Failures retain their detail for inspection.
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    pub transferred: u64,
    pub skipped: u64,
    pub failed: u64,
    pub failures: Vec<String>,
}

impl RunReport {
    pub fn record_failure(&mut self, detail: impl Into<String>) {
        self.failed += 1;
        self.failures.push(detail.into());
    }
}
