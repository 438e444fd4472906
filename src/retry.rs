//! Bounded retry of transient failures.
//!
//! Remote collaborators fail in two ways: conditions that waiting can fix
//! (throttling, timeouts, 5xx) and conditions it cannot (missing objects,
//! expired cursors, malformed input). Only the former are retried, with a
//! fixed delay between attempts and a hard attempt bound.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::client::{BulkReply, ScrollPage, SearchIndex};
use crate::error::TransferError;
use crate::models::UploadedPart;
use crate::storage::{ObjectStore, RangeChunk};

/// Fixed-delay retry schedule.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay_ms: u64) -> Self {
        Self {
            attempts: attempts.max(1),
            delay: Duration::from_millis(delay_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, 5000)
    }
}

/// Run `op`, retrying transient failures per `policy`.
///
/// Non-transient errors and the final transient failure propagate unchanged,
/// so callers can still distinguish what went wrong.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, TransferError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransferError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.attempts => {
                tracing::warn!(
                    label,
                    attempt,
                    max_attempts = policy.attempts,
                    %err,
                    "transient failure, retrying after delay"
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// [`ObjectStore`] decorator retrying every call per the policy.
///
/// Non-idempotent sequencing is preserved by the callers: part numbers and
/// upload ids are fixed per call, so a replayed part upload overwrites the
/// same part rather than duplicating it.
pub struct RetryingStore<'a> {
    inner: &'a dyn ObjectStore,
    policy: RetryPolicy,
}

impl<'a> RetryingStore<'a> {
    pub fn new(inner: &'a dyn ObjectStore, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ObjectStore for RetryingStore<'_> {
    async fn read_range(
        &self,
        key: &str,
        start: u64,
        end: u64,
    ) -> Result<RangeChunk, TransferError> {
        with_retry(&self.policy, "range read", || {
            self.inner.read_range(key, start, end)
        })
        .await
    }

    async fn object_size(&self, key: &str) -> Result<u64, TransferError> {
        with_retry(&self.policy, "object size", || self.inner.object_size(key)).await
    }

    async fn put_object(&self, key: &str, body: String) -> Result<(), TransferError> {
        with_retry(&self.policy, "put object", || {
            self.inner.put_object(key, body.clone())
        })
        .await
    }

    async fn create_upload(&self, key: &str) -> Result<String, TransferError> {
        with_retry(&self.policy, "create upload", || {
            self.inner.create_upload(key)
        })
        .await
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: String,
    ) -> Result<String, TransferError> {
        with_retry(&self.policy, "upload part", || {
            self.inner.upload_part(key, upload_id, part_number, body.clone())
        })
        .await
    }

    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<(), TransferError> {
        with_retry(&self.policy, "complete upload", || {
            self.inner.complete_upload(key, upload_id, parts)
        })
        .await
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) -> Result<(), TransferError> {
        with_retry(&self.policy, "abort upload", || {
            self.inner.abort_upload(key, upload_id)
        })
        .await
    }
}

/// [`SearchIndex`] decorator retrying every call per the policy.
///
/// Cursor expiry surfaces as [`TransferError::CursorExpired`], which is not
/// transient, so an expired scroll is never blindly replayed.
pub struct RetryingIndex<'a> {
    inner: &'a dyn SearchIndex,
    policy: RetryPolicy,
}

impl<'a> RetryingIndex<'a> {
    pub fn new(inner: &'a dyn SearchIndex, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl SearchIndex for RetryingIndex<'_> {
    async fn count(&self, index: &str) -> Result<u64, TransferError> {
        with_retry(&self.policy, "count", || self.inner.count(index)).await
    }

    async fn create_index(&self, index: &str) -> Result<(), TransferError> {
        with_retry(&self.policy, "create index", || {
            self.inner.create_index(index)
        })
        .await
    }

    async fn update_mapping(&self, index: &str, mapping: &Value) -> Result<(), TransferError> {
        with_retry(&self.policy, "update mapping", || {
            self.inner.update_mapping(index, mapping)
        })
        .await
    }

    async fn scroll_start(
        &self,
        index: &str,
        page_size: usize,
    ) -> Result<ScrollPage, TransferError> {
        with_retry(&self.policy, "scroll start", || {
            self.inner.scroll_start(index, page_size)
        })
        .await
    }

    async fn scroll_next(&self, scroll_id: &str) -> Result<ScrollPage, TransferError> {
        with_retry(&self.policy, "scroll page", || {
            self.inner.scroll_next(scroll_id)
        })
        .await
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), TransferError> {
        with_retry(&self.policy, "clear scroll", || {
            self.inner.clear_scroll(scroll_id)
        })
        .await
    }

    async fn bulk(
        &self,
        index: &str,
        ndjson: String,
        refresh: Option<&str>,
    ) -> Result<BulkReply, TransferError> {
        with_retry(&self.policy, "bulk", || {
            self.inner.bulk(index, ndjson.clone(), refresh)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(5, 1000);
        let value = with_retry(&policy, "flaky", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TransferError::Transient("throttled".into()))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(5, 1000);
        let err = with_retry(&policy, "missing", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TransferError::NotFound("s3://bucket/key".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::NotFound(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_bound_propagates_the_last_error() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(3, 1000);
        let err = with_retry(&policy, "down", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TransferError::Transient("service unavailable".into()))
        })
        .await
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    struct FlakyStore {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn read_range(
            &self,
            _key: &str,
            _start: u64,
            _end: u64,
        ) -> Result<RangeChunk, TransferError> {
            unreachable!()
        }

        async fn object_size(&self, _key: &str) -> Result<u64, TransferError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.fail_first {
                Err(TransferError::Transient("throttled".into()))
            } else {
                Ok(128)
            }
        }

        async fn put_object(&self, _key: &str, _body: String) -> Result<(), TransferError> {
            unreachable!()
        }

        async fn create_upload(&self, _key: &str) -> Result<String, TransferError> {
            unreachable!()
        }

        async fn upload_part(
            &self,
            _key: &str,
            _upload_id: &str,
            _part_number: i32,
            _body: String,
        ) -> Result<String, TransferError> {
            unreachable!()
        }

        async fn complete_upload(
            &self,
            _key: &str,
            _upload_id: &str,
            _parts: &[UploadedPart],
        ) -> Result<(), TransferError> {
            unreachable!()
        }

        async fn abort_upload(&self, _key: &str, _upload_id: &str) -> Result<(), TransferError> {
            unreachable!()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn store_decorator_absorbs_transient_failures() {
        let inner = FlakyStore {
            calls: AtomicUsize::new(0),
            fail_first: 2,
        };
        let store = RetryingStore::new(&inner, RetryPolicy::new(5, 1000));
        assert_eq!(store.object_size("data.json").await.unwrap(), 128);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_between_attempts_is_fixed() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(3, 5000);
        let started = tokio::time::Instant::now();
        let _ = with_retry(&policy, "slow", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TransferError::Transient("timeout".into()))
        })
        .await;
        // two sleeps between three attempts
        assert_eq!(started.elapsed(), Duration::from_millis(10_000));
    }
}
