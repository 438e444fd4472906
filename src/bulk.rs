//! Compound bulk mutations against the search index.
//!
//! Builds one newline-delimited request encoding an operation header plus
//! payload per document, submits it through the [`SearchIndex`] seam, and
//! interprets the per-item outcome. Empty input never issues a network call.
//!
//! `create` is not idempotent; `index` and `update` are idempotent keyed by
//! id. Callers needing at-most-once creation must supply stable ids.

use serde_json::{json, Value};

use crate::client::SearchIndex;
use crate::error::TransferError;
use crate::models::BulkDoc;

/// The mutation operation encoded in each bulk action header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkMethod {
    Create,
    Index,
    Update,
}

impl BulkMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            BulkMethod::Create => "create",
            BulkMethod::Index => "index",
            BulkMethod::Update => "update",
        }
    }
}

/// What to do when the index reports failures: abort the pipeline, or log
/// and keep going (data-quality tolerant mode). Selected per call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    Fatal,
    LogAndContinue,
}

/// Result of one bulk submission.
#[derive(Debug, Clone)]
pub enum BulkOutcome {
    /// No documents were supplied; no network call was made.
    NothingToDo,
    /// The request was submitted; `failed` holds per-item failure detail.
    Submitted { code: u16, failed: Vec<String> },
}

impl BulkOutcome {
    pub fn failed_count(&self) -> usize {
        match self {
            BulkOutcome::NothingToDo => 0,
            BulkOutcome::Submitted { failed, .. } => failed.len(),
        }
    }
}

/// Serialize documents into the newline-delimited bulk wire format.
///
/// One action header and one payload line per document; `update` payloads
/// are wrapped in a `doc` envelope. The body ends with a newline as the
/// wire format requires.
pub fn ndjson_payload(method: BulkMethod, index_name: &str, docs: &[BulkDoc]) -> String {
    let mut out = String::new();
    for doc in docs {
        let mut header = serde_json::Map::new();
        let mut action = serde_json::Map::new();
        if let Some(ref id) = doc.id {
            action.insert("_id".into(), json!(id));
        }
        action.insert("_index".into(), json!(index_name));
        header.insert(method.as_str().into(), Value::Object(action));
        out.push_str(&Value::Object(header).to_string());
        out.push('\n');

        let payload = match method {
            BulkMethod::Update => json!({ "doc": doc.payload }),
            _ => doc.payload.clone(),
        };
        out.push_str(&payload.to_string());
        out.push('\n');
    }
    out
}

/// Submit one bulk mutation for `docs`.
///
/// Failures inside the response are handled per `policy`: `Fatal` turns any
/// rejection or item failure into an error; `LogAndContinue` records item
/// failures in the outcome and logs them.
pub async fn submit(
    index: &dyn SearchIndex,
    index_name: &str,
    docs: &[BulkDoc],
    method: BulkMethod,
    policy: ErrorPolicy,
    refresh: Option<&str>,
) -> Result<BulkOutcome, TransferError> {
    if docs.is_empty() {
        tracing::debug!(index = index_name, "bulk payload empty, nothing to do");
        return Ok(BulkOutcome::NothingToDo);
    }

    let payload = ndjson_payload(method, index_name, docs);
    let reply = index.bulk(index_name, payload, refresh).await?;

    // A top-level error means the whole request was rejected.
    if reply.body.get("error").is_some_and(|e| !e.is_null()) {
        let detail = reply.body.to_string();
        return match policy {
            ErrorPolicy::Fatal => Err(TransferError::BulkRejected(detail)),
            ErrorPolicy::LogAndContinue => {
                tracing::error!(index = index_name, %detail, "bulk request rejected");
                Ok(BulkOutcome::Submitted {
                    code: reply.code,
                    failed: docs
                        .iter()
                        .map(|d| format!("rejected: {:?}", d.id))
                        .collect(),
                })
            }
        };
    }

    let failed = failed_items(&reply.body, method);
    if !failed.is_empty() {
        match policy {
            ErrorPolicy::Fatal => {
                return Err(TransferError::BulkRejected(failed.join("; ")));
            }
            ErrorPolicy::LogAndContinue => {
                for detail in &failed {
                    tracing::warn!(index = index_name, %detail, "bulk item failed");
                }
            }
        }
    }

    Ok(BulkOutcome::Submitted {
        code: reply.code,
        failed,
    })
}

/// Collect per-item failure details from a bulk response body.
fn failed_items(body: &Value, method: BulkMethod) -> Vec<String> {
    if body["errors"].as_bool() != Some(true) {
        return Vec::new();
    }
    body["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let outcome = &item[method.as_str()];
                    outcome.get("error").map(|error| {
                        format!(
                            "{}: {}",
                            outcome["_id"].as_str().unwrap_or("<no id>"),
                            error
                        )
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{BulkReply, ScrollPage};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingIndex {
        calls: AtomicUsize,
        last_payload: Mutex<String>,
        reply: Value,
    }

    impl RecordingIndex {
        fn replying(reply: Value) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                last_payload: Mutex::new(String::new()),
                reply,
            }
        }
    }

    #[async_trait]
    impl SearchIndex for RecordingIndex {
        async fn count(&self, _index: &str) -> Result<u64, TransferError> {
            Ok(0)
        }

        async fn create_index(&self, _index: &str) -> Result<(), TransferError> {
            Ok(())
        }

        async fn update_mapping(
            &self,
            _index: &str,
            _mapping: &Value,
        ) -> Result<(), TransferError> {
            Ok(())
        }

        async fn scroll_start(
            &self,
            _index: &str,
            _page_size: usize,
        ) -> Result<ScrollPage, TransferError> {
            unreachable!()
        }

        async fn scroll_next(&self, _scroll_id: &str) -> Result<ScrollPage, TransferError> {
            unreachable!()
        }

        async fn clear_scroll(&self, _scroll_id: &str) -> Result<(), TransferError> {
            Ok(())
        }

        async fn bulk(
            &self,
            _index: &str,
            ndjson: String,
            _refresh: Option<&str>,
        ) -> Result<BulkReply, TransferError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_payload.lock().unwrap() = ndjson;
            Ok(BulkReply {
                code: 200,
                body: self.reply.clone(),
            })
        }
    }

    fn docs() -> Vec<BulkDoc> {
        vec![
            BulkDoc {
                id: Some("a".into()),
                payload: json!({ "title": "alpha" }),
            },
            BulkDoc {
                id: None,
                payload: json!({ "title": "beta" }),
            },
        ]
    }

    #[test]
    fn ndjson_alternates_headers_and_payloads() {
        let payload = ndjson_payload(BulkMethod::Create, "docs", &docs());
        let lines: Vec<&str> = payload.lines().collect();
        assert_eq!(lines.len(), 4);

        let header: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(header["create"]["_id"], "a");
        assert_eq!(header["create"]["_index"], "docs");

        let second_header: Value = serde_json::from_str(lines[2]).unwrap();
        assert!(second_header["create"].get("_id").is_none());

        let body: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(body["title"], "alpha");
        assert!(payload.ends_with('\n'));
    }

    #[test]
    fn update_wraps_payload_in_doc_envelope() {
        let payload = ndjson_payload(BulkMethod::Update, "docs", &docs()[..1]);
        let lines: Vec<&str> = payload.lines().collect();
        let body: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(body["doc"]["title"], "alpha");
    }

    #[tokio::test]
    async fn empty_input_issues_zero_network_calls() {
        let index = RecordingIndex::replying(json!({ "errors": false, "items": [] }));
        let outcome = submit(
            &index,
            "docs",
            &[],
            BulkMethod::Index,
            ErrorPolicy::Fatal,
            None,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, BulkOutcome::NothingToDo));
        assert_eq!(index.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn partial_failures_are_recorded_in_tolerant_mode() {
        let index = RecordingIndex::replying(json!({
            "errors": true,
            "items": [
                { "update": { "_id": "a", "status": 200 } },
                { "update": { "_id": "b", "status": 409, "error": { "type": "version_conflict" } } }
            ]
        }));
        let outcome = submit(
            &index,
            "docs",
            &docs(),
            BulkMethod::Update,
            ErrorPolicy::LogAndContinue,
            Some("wait_for"),
        )
        .await
        .unwrap();
        assert_eq!(outcome.failed_count(), 1);
    }

    #[tokio::test]
    async fn partial_failures_abort_in_fatal_mode() {
        let index = RecordingIndex::replying(json!({
            "errors": true,
            "items": [
                { "create": { "_id": "a", "status": 400, "error": { "type": "mapper_parsing" } } }
            ]
        }));
        let err = submit(
            &index,
            "docs",
            &docs(),
            BulkMethod::Create,
            ErrorPolicy::Fatal,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::BulkRejected(_)));
    }

    #[tokio::test]
    async fn whole_request_rejection_respects_policy() {
        let index = RecordingIndex::replying(json!({
            "error": { "type": "index_closed_exception" }
        }));
        let err = submit(
            &index,
            "docs",
            &docs(),
            BulkMethod::Index,
            ErrorPolicy::Fatal,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::BulkRejected(_)));

        let outcome = submit(
            &index,
            "docs",
            &docs(),
            BulkMethod::Index,
            ErrorPolicy::LogAndContinue,
            None,
        )
        .await
        .unwrap();
        assert_eq!(outcome.failed_count(), 2);
    }
}
