//! Search-index collaborator.
//!
//! Defines the [`SearchIndex`] seam used by the pipelines and [`EsIndex`],
//! the Elasticsearch-compatible implementation. Requests are signed with
//! SigV4 (service `es`) the same way the object store signs its calls, which
//! covers managed domains; unsigned local clusters accept the extra headers.
//!
//! The seam covers exactly what the pipelines need: document count, index
//! creation, mapping update, scroll start/continue/release, and the NDJSON
//! bulk call. Snapshot triggering is a concrete [`EsIndex`] capability only;
//! the CLI wires it in as an optional safety step before annotation runs.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::TransferError;
use crate::models::Hit;
use crate::sign::{canonical_query, sign_request, AwsCredentials, SignableRequest};

/// How long the server keeps scroll contexts alive between page fetches.
const SCROLL_KEEPALIVE: &str = "1h";

/// One page of a scrolled export.
#[derive(Debug, Clone)]
pub struct ScrollPage {
    pub scroll_id: String,
    pub hits: Vec<Hit>,
}

/// Raw outcome of a bulk call; interpreted by `bulk`.
#[derive(Debug, Clone)]
pub struct BulkReply {
    pub code: u16,
    pub body: Value,
}

/// The search-index operations the pipelines depend on.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn count(&self, index: &str) -> Result<u64, TransferError>;

    /// Create an index; an already-existing index is not an error.
    async fn create_index(&self, index: &str) -> Result<(), TransferError>;

    async fn update_mapping(&self, index: &str, mapping: &Value) -> Result<(), TransferError>;

    /// Open a scroll over the whole index and fetch the first page.
    async fn scroll_start(
        &self,
        index: &str,
        page_size: usize,
    ) -> Result<ScrollPage, TransferError>;

    /// Fetch the next page for an open scroll.
    async fn scroll_next(&self, scroll_id: &str) -> Result<ScrollPage, TransferError>;

    /// Release the server-side scroll context.
    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), TransferError>;

    /// Submit a pre-built NDJSON bulk payload.
    async fn bulk(
        &self,
        index: &str,
        ndjson: String,
        refresh: Option<&str>,
    ) -> Result<BulkReply, TransferError>;
}

/// Elasticsearch-compatible domain client.
pub struct EsIndex {
    domain: String,
    region: String,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl EsIndex {
    pub fn new(domain: &str, region: &str) -> Result<Self, TransferError> {
        let creds = AwsCredentials::from_env()?;
        Ok(Self {
            domain: domain.to_string(),
            region: region.to_string(),
            creds,
            client: reqwest::Client::new(),
        })
    }

    /// Trigger a snapshot before a destructive operation. Optional safety
    /// collaborator — only called when snapshot config is present.
    pub async fn trigger_snapshot(
        &self,
        repository: &str,
        snapshot: &str,
    ) -> Result<(), TransferError> {
        let path = format!("/_snapshot/{}/{}", repository, snapshot);
        let resp = self
            .send(reqwest::Method::PUT, &path, &[], Vec::new(), "application/json")
            .await?;
        if !resp.status().is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(TransferError::Transient(format!(
                "snapshot trigger failed: {}",
                detail.chars().take(500).collect::<String>()
            )));
        }
        Ok(())
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(String, String)],
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<reqwest::Response, TransferError> {
        let signable = SignableRequest {
            method: method.as_str(),
            host: &self.domain,
            path,
            query,
            payload: &body,
        };
        let signed = sign_request(&signable, "es", &self.region, &self.creds);

        let querystring = canonical_query(query);
        let url = if querystring.is_empty() {
            format!("https://{}{}", self.domain, path)
        } else {
            format!("https://{}{}?{}", self.domain, path, querystring)
        };

        let mut req = self
            .client
            .request(method, &url)
            .header("Content-Type", content_type)
            .body(body);
        for (name, value) in signed {
            req = req.header(name, value);
        }
        Ok(req.send().await?)
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(String, String)],
        payload: Option<&Value>,
    ) -> Result<(u16, Value), TransferError> {
        let body = match payload {
            Some(value) => serde_json::to_vec(value)
                .map_err(|e| TransferError::Config(format!("unserializable payload: {}", e)))?,
            None => Vec::new(),
        };
        let resp = self
            .send(method, path, query, body, "application/json")
            .await?;
        let code = resp.status().as_u16();
        let text = resp.text().await?;
        let value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok((code, value))
    }
}

fn parse_scroll_page(body: &Value) -> Result<ScrollPage, TransferError> {
    let scroll_id = body["_scroll_id"]
        .as_str()
        .ok_or_else(|| TransferError::Transient("scroll response missing _scroll_id".into()))?
        .to_string();
    let hits = body["hits"]["hits"]
        .as_array()
        .map(|docs| {
            docs.iter()
                .map(|doc| Hit {
                    id: doc["_id"].as_str().unwrap_or_default().to_string(),
                    source: doc["_source"].clone(),
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(ScrollPage { scroll_id, hits })
}

#[async_trait]
impl SearchIndex for EsIndex {
    async fn count(&self, index: &str) -> Result<u64, TransferError> {
        let path = format!("/{}/_count", index);
        let (code, body) = self.send_json(reqwest::Method::GET, &path, &[], None).await?;
        if code == 404 {
            return Err(TransferError::NotFound(format!("index {}", index)));
        }
        body["count"]
            .as_u64()
            .ok_or_else(|| TransferError::Transient(format!("count failed: {}", body)))
    }

    async fn create_index(&self, index: &str) -> Result<(), TransferError> {
        let path = format!("/{}", index);
        let (code, body) = self
            .send_json(reqwest::Method::PUT, &path, &[], Some(&json!({})))
            .await?;
        if code == 200 {
            return Ok(());
        }
        if body["error"]["type"].as_str() == Some("resource_already_exists_exception") {
            tracing::warn!(index, "index already exists, so was not created");
            return Ok(());
        }
        Err(TransferError::Transient(format!(
            "create index failed (HTTP {}): {}",
            code, body
        )))
    }

    async fn update_mapping(&self, index: &str, mapping: &Value) -> Result<(), TransferError> {
        let path = format!("/{}/_mappings", index);
        let (code, body) = self
            .send_json(reqwest::Method::PUT, &path, &[], Some(mapping))
            .await?;
        if code == 200 {
            Ok(())
        } else {
            Err(TransferError::Transient(format!(
                "mapping update failed (HTTP {}): {}",
                code, body
            )))
        }
    }

    async fn scroll_start(
        &self,
        index: &str,
        page_size: usize,
    ) -> Result<ScrollPage, TransferError> {
        let path = format!("/{}/_search", index);
        let query = vec![("scroll".to_string(), SCROLL_KEEPALIVE.to_string())];
        let payload = json!({ "size": page_size, "sort": ["_doc"] });
        let (code, body) = self
            .send_json(reqwest::Method::POST, &path, &query, Some(&payload))
            .await?;
        match code {
            200 => parse_scroll_page(&body),
            404 => Err(TransferError::NotFound(format!("index {}", index))),
            _ => Err(TransferError::Transient(format!(
                "scroll start failed (HTTP {}): {}",
                code, body
            ))),
        }
    }

    async fn scroll_next(&self, scroll_id: &str) -> Result<ScrollPage, TransferError> {
        let payload = json!({ "scroll": SCROLL_KEEPALIVE, "scroll_id": scroll_id });
        let (code, body) = self
            .send_json(reqwest::Method::POST, "/_search/scroll", &[], Some(&payload))
            .await?;
        match code {
            200 => parse_scroll_page(&body),
            // the server forgets expired contexts; resuming is impossible
            404 => Err(TransferError::CursorExpired(scroll_id.to_string())),
            _ => Err(TransferError::Transient(format!(
                "scroll continuation failed (HTTP {}): {}",
                code, body
            ))),
        }
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), TransferError> {
        let payload = json!({ "scroll_id": scroll_id });
        let (code, body) = self
            .send_json(reqwest::Method::DELETE, "/_search/scroll", &[], Some(&payload))
            .await?;
        if code == 200 || code == 404 {
            Ok(())
        } else {
            Err(TransferError::Transient(format!(
                "clear scroll failed (HTTP {}): {}",
                code, body
            )))
        }
    }

    async fn bulk(
        &self,
        index: &str,
        ndjson: String,
        refresh: Option<&str>,
    ) -> Result<BulkReply, TransferError> {
        let path = format!("/{}/_bulk", index);
        let query = match refresh {
            Some(value) => vec![("refresh".to_string(), value.to_string())],
            None => Vec::new(),
        };
        let resp = self
            .send(
                reqwest::Method::POST,
                &path,
                &query,
                ndjson.into_bytes(),
                "application/x-ndjson",
            )
            .await?;
        let code = resp.status().as_u16();
        let body: Value = resp.json().await?;
        Ok(BulkReply { code, body })
    }
}
