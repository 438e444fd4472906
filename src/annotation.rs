//! Entity-annotation collaborator.
//!
//! Defines the [`Annotator`] seam and [`AnnotationClient`], which talks to a
//! DBpedia-Spotlight-compatible endpoint. One remote call is made per
//! confidence threshold; the per-threshold results are merged into a single
//! list tagged with the threshold they came from. A failed threshold is
//! logged and dropped rather than failing the whole document.
//!
//! The endpoint returns every numeric field as a string, so responses are
//! recast before use.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;

use crate::error::TransferError;
use crate::models::RawEntity;

/// The annotation operation the enrichment pipeline depends on.
#[async_trait]
pub trait Annotator: Send + Sync {
    /// Annotate `text` at one confidence threshold (0.0..=1.0).
    async fn annotate(
        &self,
        text: &str,
        confidence: f64,
    ) -> Result<Vec<RawEntity>, TransferError>;
}

/// HTTP client for a Spotlight-compatible annotation service.
pub struct AnnotationClient {
    endpoint: String,
    client: reqwest::Client,
}

impl AnnotationClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Annotator for AnnotationClient {
    async fn annotate(
        &self,
        text: &str,
        confidence: f64,
    ) -> Result<Vec<RawEntity>, TransferError> {
        let params = [
            ("text", text.to_string()),
            ("confidence", confidence.to_string()),
        ];
        let resp = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(TransferError::Annotation(format!(
                "annotation failed (HTTP {}): {}",
                status,
                detail.chars().take(500).collect::<String>()
            )));
        }

        let body: Value = resp.json().await?;
        Ok(cast_annotations(&body, confidence))
    }
}

/// Recast one annotation response into typed entities.
///
/// The service serializes numbers as strings; unparseable values fall back
/// to zero rather than dropping the entity. A response with no `Resources`
/// key means no entities were found.
pub fn cast_annotations(body: &Value, confidence: f64) -> Vec<RawEntity> {
    let threshold = (confidence * 100.0).round() as u32;
    body["Resources"]
        .as_array()
        .map(|resources| {
            resources
                .iter()
                .map(|resource| RawEntity {
                    uri: resource["@URI"].as_str().unwrap_or_default().to_string(),
                    confidence: threshold,
                    surface_form: resource["@surfaceForm"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    similarity_score: parse_number(&resource["@similarityScore"]),
                    percentage_of_second_rank: parse_number(&resource["@percentageOfSecondRank"]),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_number(value: &Value) -> f64 {
    match value {
        Value::String(s) => s.parse().unwrap_or(0.0),
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Annotate one text at every threshold, concurrently, merging the results.
/// Thresholds whose call fails are logged and skipped.
pub async fn annotate_at_thresholds(
    annotator: &dyn Annotator,
    text: &str,
    thresholds: &[f64],
) -> Vec<RawEntity> {
    let calls = thresholds
        .iter()
        .map(|&confidence| annotator.annotate(text, confidence));
    let mut merged = Vec::new();
    for (threshold, outcome) in thresholds.iter().zip(join_all(calls).await) {
        match outcome {
            Ok(entities) => merged.extend(entities),
            Err(err) => {
                tracing::warn!(threshold, %err, "annotation threshold skipped");
            }
        }
    }
    merged
}

/// Annotate a batch of texts, preserving input order. Empty or
/// whitespace-only texts never reach the remote service and yield an empty
/// entity list.
pub async fn annotate_many(
    annotator: &dyn Annotator,
    texts: &[String],
    thresholds: &[f64],
) -> Vec<Vec<RawEntity>> {
    let calls = texts.iter().map(|text| async move {
        if text.trim().is_empty() {
            return Vec::new();
        }
        annotate_at_thresholds(annotator, text, thresholds).await
    });
    join_all(calls).await
}
