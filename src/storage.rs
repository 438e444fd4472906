//! Object storage collaborator.
//!
//! Defines the [`ObjectStore`] seam the pipelines pull from and push to, and
//! [`S3Store`], which talks to S3 (or an S3-compatible endpoint such as MinIO
//! or LocalStack) using the plain REST API with SigV4 signing — no vendor
//! SDK.
//!
//! The store exposes exactly the operations the pipelines need: byte-range
//! reads with end-of-object detection, an object-size lookup, plain PUT, and
//! the multipart upload sequence (create / part / complete / abort).

use async_trait::async_trait;

use crate::error::TransferError;
use crate::models::UploadedPart;
use crate::sign::{canonical_query, encode_key, sign_request, AwsCredentials, SignableRequest};

/// Result of one byte-range read.
#[derive(Debug, Clone)]
pub struct RangeChunk {
    pub bytes: Vec<u8>,
    /// True when the returned span is shorter than the requested one, i.e.
    /// the read ran into the end of the object.
    pub reached_end: bool,
}

/// The object-storage operations the pipelines depend on.
///
/// Range reads are single-consumer: callers issue monotonically increasing,
/// non-overlapping ranges. Multipart sessions are mutated by one producer at
/// a time; the orchestrator guarantees sequential appends.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the inclusive byte range `start..=end` of an object.
    async fn read_range(&self, key: &str, start: u64, end: u64)
        -> Result<RangeChunk, TransferError>;

    /// Total size of the object in bytes.
    async fn object_size(&self, key: &str) -> Result<u64, TransferError>;

    /// Upload a whole object in one call.
    async fn put_object(&self, key: &str, body: String) -> Result<(), TransferError>;

    /// Start a multipart upload session, returning its id.
    async fn create_upload(&self, key: &str) -> Result<String, TransferError>;

    /// Upload one part, returning the storage service's checksum (ETag).
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: String,
    ) -> Result<String, TransferError>;

    /// Assemble the uploaded parts into the final object.
    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<(), TransferError>;

    /// Abandon a multipart session, releasing its server-side resources.
    async fn abort_upload(&self, key: &str, upload_id: &str) -> Result<(), TransferError>;
}

/// S3 client implementing [`ObjectStore`] over signed REST calls.
pub struct S3Store {
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3Store {
    pub fn new(bucket: &str, region: &str, endpoint_url: Option<String>) -> Result<Self, TransferError> {
        let creds = AwsCredentials::from_env()?;
        Ok(Self {
            bucket: bucket.to_string(),
            region: region.to_string(),
            endpoint_url,
            creds,
            client: reqwest::Client::new(),
        })
    }

    /// Compute the S3 hostname for the configured bucket and region.
    ///
    /// If a custom `endpoint_url` is set (for MinIO, LocalStack, etc.),
    /// that is used instead of the standard `<bucket>.s3.<region>.amazonaws.com`.
    fn host(&self) -> String {
        if let Some(ref endpoint) = self.endpoint_url {
            endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string()
        } else {
            format!("{}.s3.{}.amazonaws.com", self.bucket, self.region)
        }
    }

    async fn send(
        &self,
        method: reqwest::Method,
        key: &str,
        query: &[(String, String)],
        body: Vec<u8>,
        extra_headers: &[(&str, String)],
    ) -> Result<reqwest::Response, TransferError> {
        let host = self.host();
        let path = format!("/{}", encode_key(key));
        let signable = SignableRequest {
            method: method.as_str(),
            host: &host,
            path: &path,
            query,
            payload: &body,
        };
        let signed = sign_request(&signable, "s3", &self.region, &self.creds);

        let querystring = canonical_query(query);
        let url = if querystring.is_empty() {
            format!("https://{}{}", host, path)
        } else {
            format!("https://{}{}?{}", host, path, querystring)
        };

        let mut req = self.client.request(method, &url).body(body);
        for (name, value) in signed {
            req = req.header(name, value);
        }
        for (name, value) in extra_headers {
            req = req.header(*name, value);
        }
        Ok(req.send().await?)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn read_range(
        &self,
        key: &str,
        start: u64,
        end: u64,
    ) -> Result<RangeChunk, TransferError> {
        let range = format!("bytes={}-{}", start, end);
        let resp = self
            .send(
                reqwest::Method::GET,
                key,
                &[],
                Vec::new(),
                &[("Range", range)],
            )
            .await?;

        let status = resp.status();
        // The server answers 416 when the range starts past the end.
        if status.as_u16() == 416 {
            return Ok(RangeChunk {
                bytes: Vec::new(),
                reached_end: true,
            });
        }
        if status.as_u16() == 404 {
            return Err(TransferError::NotFound(format!(
                "s3://{}/{}",
                self.bucket, key
            )));
        }
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(TransferError::Transient(format!(
                "range read failed (HTTP {}): {}",
                status,
                detail.chars().take(500).collect::<String>()
            )));
        }

        let bytes = resp.bytes().await?.to_vec();
        let span = end - start + 1;
        let reached_end = (bytes.len() as u64) < span;
        Ok(RangeChunk { bytes, reached_end })
    }

    async fn object_size(&self, key: &str) -> Result<u64, TransferError> {
        let resp = self
            .send(reqwest::Method::HEAD, key, &[], Vec::new(), &[])
            .await?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(TransferError::NotFound(format!(
                "s3://{}/{}",
                self.bucket, key
            )));
        }
        if !status.is_success() {
            return Err(TransferError::Transient(format!(
                "object size lookup failed (HTTP {})",
                status
            )));
        }

        resp.headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                TransferError::Transient("object size response missing content length".into())
            })
    }

    async fn put_object(&self, key: &str, body: String) -> Result<(), TransferError> {
        let resp = self
            .send(
                reqwest::Method::PUT,
                key,
                &[],
                body.into_bytes(),
                &[],
            )
            .await?;
        expect_success(resp, "put object").await
    }

    async fn create_upload(&self, key: &str) -> Result<String, TransferError> {
        let query = vec![("uploads".to_string(), String::new())];
        let resp = self
            .send(reqwest::Method::POST, key, &query, Vec::new(), &[])
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(TransferError::Transient(format!(
                "create multipart upload failed (HTTP {}): {}",
                status,
                detail.chars().take(500).collect::<String>()
            )));
        }

        let xml = resp.text().await?;
        extract_xml_value(&xml, "UploadId").ok_or_else(|| {
            TransferError::Transient("multipart create response missing UploadId".into())
        })
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: String,
    ) -> Result<String, TransferError> {
        let query = vec![
            ("partNumber".to_string(), part_number.to_string()),
            ("uploadId".to_string(), upload_id.to_string()),
        ];
        let resp = self
            .send(reqwest::Method::PUT, key, &query, body.into_bytes(), &[])
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransferError::Transient(format!(
                "part {} upload failed (HTTP {})",
                part_number, status
            )));
        }

        resp.headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string())
            .ok_or_else(|| TransferError::Transient("part upload response missing ETag".into()))
    }

    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<(), TransferError> {
        let mut xml = String::from("<CompleteMultipartUpload>");
        for part in parts {
            xml.push_str(&format!(
                "<Part><PartNumber>{}</PartNumber><ETag>\"{}\"</ETag></Part>",
                part.part_number, part.etag
            ));
        }
        xml.push_str("</CompleteMultipartUpload>");

        let query = vec![("uploadId".to_string(), upload_id.to_string())];
        let resp = self
            .send(reqwest::Method::POST, key, &query, xml.into_bytes(), &[])
            .await?;
        expect_success(resp, "complete multipart upload").await
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) -> Result<(), TransferError> {
        let query = vec![("uploadId".to_string(), upload_id.to_string())];
        let resp = self
            .send(reqwest::Method::DELETE, key, &query, Vec::new(), &[])
            .await?;
        expect_success(resp, "abort multipart upload").await
    }
}

async fn expect_success(resp: reqwest::Response, what: &str) -> Result<(), TransferError> {
    let status = resp.status();
    if status.as_u16() == 404 {
        return Err(TransferError::NotFound(what.to_string()));
    }
    if !status.is_success() {
        let detail = resp.text().await.unwrap_or_default();
        return Err(TransferError::Transient(format!(
            "{} failed (HTTP {}): {}",
            what,
            status,
            detail.chars().take(500).collect::<String>()
        )));
    }
    Ok(())
}

/// Extract the text content of an XML tag (simple, non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    if let Some(start) = xml.find(&open) {
        let value_start = start + open.len();
        if let Some(end) = xml[value_start..].find(&close) {
            return Some(xml[value_start..value_start + end].to_string());
        }
    }
    None
}
