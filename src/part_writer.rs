//! Buffered multipart-upload writer.
//!
//! [`PartWriter`] accumulates appended text and flushes a part whenever the
//! buffer reaches the storage service's minimum part size. Only the final
//! part, flushed by [`PartWriter::finalize`], may be smaller than the
//! minimum. Part numbers are contiguous from 1 and parts are completed in
//! upload order, so the assembled object is the exact concatenation of every
//! appended string.
//!
//! The multipart session is opened lazily, on the first flush. Output that
//! never fills a single part is stored with one plain put instead, so small
//! exports cost two calls rather than three.

use crate::error::TransferError;
use crate::models::UploadedPart;
use crate::storage::ObjectStore;

/// Writer state over one upload. Single producer; appends are sequential.
pub struct PartWriter<'a> {
    store: &'a dyn ObjectStore,
    key: String,
    upload_id: Option<String>,
    min_part_size: usize,
    buffer: String,
    next_part: i32,
    parts: Vec<UploadedPart>,
    finished: bool,
}

impl<'a> PartWriter<'a> {
    pub fn new(store: &'a dyn ObjectStore, key: &str, min_part_size: usize) -> PartWriter<'a> {
        Self {
            store,
            key: key.to_string(),
            upload_id: None,
            min_part_size,
            buffer: String::new(),
            next_part: 1,
            parts: Vec::new(),
            finished: false,
        }
    }

    /// Append text, flushing a part once the buffer reaches the minimum
    /// part size.
    pub async fn append(&mut self, text: &str) -> Result<(), TransferError> {
        self.buffer.push_str(text);
        if self.buffer.len() >= self.min_part_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Flush the remainder (if any) and assemble the object. If no part was
    /// ever flushed the whole buffer is stored with a single put.
    pub async fn finalize(mut self) -> Result<(), TransferError> {
        if self.upload_id.is_none() {
            let body = std::mem::take(&mut self.buffer);
            self.store.put_object(&self.key, body).await?;
            self.finished = true;
            tracing::info!(key = %self.key, "object stored with a single put");
            return Ok(());
        }
        if !self.buffer.is_empty() {
            self.flush().await?;
        }
        if let Some(upload_id) = self.upload_id.take() {
            self.store
                .complete_upload(&self.key, &upload_id, &self.parts)
                .await?;
        }
        self.finished = true;
        tracing::info!(key = %self.key, parts = self.parts.len(), "multipart upload completed");
        Ok(())
    }

    /// Abandon the writer, discarding any uploaded parts.
    pub async fn abort(mut self) -> Result<(), TransferError> {
        if let Some(upload_id) = self.upload_id.take() {
            self.store.abort_upload(&self.key, &upload_id).await?;
            tracing::warn!(key = %self.key, "multipart upload aborted");
        }
        self.finished = true;
        Ok(())
    }

    /// Parts uploaded so far.
    pub fn parts_uploaded(&self) -> usize {
        self.parts.len()
    }

    async fn flush(&mut self) -> Result<(), TransferError> {
        let upload_id = match &self.upload_id {
            Some(id) => id.clone(),
            None => {
                let id = self.store.create_upload(&self.key).await?;
                tracing::debug!(key = %self.key, upload_id = %id, "multipart upload opened");
                self.upload_id = Some(id.clone());
                id
            }
        };
        let body = std::mem::take(&mut self.buffer);
        let etag = self
            .store
            .upload_part(&self.key, &upload_id, self.next_part, body)
            .await?;
        self.parts.push(UploadedPart {
            part_number: self.next_part,
            etag,
        });
        self.next_part += 1;
        Ok(())
    }
}

impl Drop for PartWriter<'_> {
    fn drop(&mut self) {
        if !self.finished && self.upload_id.is_some() {
            // Sessions that were neither finalized nor aborted leak
            // server-side parts; the orchestrator aborts on error paths.
            tracing::warn!(key = %self.key, "multipart upload dropped without finalize or abort");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RangeChunk;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemUploads {
        parts: Mutex<Vec<(i32, String)>>,
        completed: Mutex<Option<Vec<UploadedPart>>>,
        puts: Mutex<Vec<(String, String)>>,
        aborted: AtomicBool,
    }

    #[async_trait]
    impl ObjectStore for MemUploads {
        async fn read_range(
            &self,
            _key: &str,
            _start: u64,
            _end: u64,
        ) -> Result<RangeChunk, TransferError> {
            unreachable!()
        }

        async fn object_size(&self, _key: &str) -> Result<u64, TransferError> {
            unreachable!()
        }

        async fn put_object(&self, key: &str, body: String) -> Result<(), TransferError> {
            self.puts.lock().unwrap().push((key.to_string(), body));
            Ok(())
        }

        async fn create_upload(&self, _key: &str) -> Result<String, TransferError> {
            Ok("upload-1".to_string())
        }

        async fn upload_part(
            &self,
            _key: &str,
            _upload_id: &str,
            part_number: i32,
            body: String,
        ) -> Result<String, TransferError> {
            self.parts.lock().unwrap().push((part_number, body));
            Ok(format!("etag-{}", part_number))
        }

        async fn complete_upload(
            &self,
            _key: &str,
            _upload_id: &str,
            parts: &[UploadedPart],
        ) -> Result<(), TransferError> {
            *self.completed.lock().unwrap() = Some(parts.to_vec());
            Ok(())
        }

        async fn abort_upload(&self, _key: &str, _upload_id: &str) -> Result<(), TransferError> {
            self.aborted.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn only_the_final_part_may_be_undersized() {
        let store = MemUploads::default();
        let mut writer = PartWriter::new(&store, "out.json", 10);
        for chunk in ["abc", "defg", "hijkl", "mn"] {
            writer.append(chunk).await.unwrap();
        }
        writer.finalize().await.unwrap();

        let parts = store.parts.lock().unwrap();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].1.len() >= 10);
        // last part carries the remainder, whatever its size
        assert_eq!(parts[1].1, "mn");
    }

    #[tokio::test]
    async fn assembled_object_is_exact_concatenation() {
        let store = MemUploads::default();
        let mut writer = PartWriter::new(&store, "out.json", 8);
        let inputs = ["[", "{\"a\":1}", ",", "{\"b\":2}", "]"];
        for chunk in &inputs {
            writer.append(chunk).await.unwrap();
        }
        writer.finalize().await.unwrap();

        let joined: String = store
            .parts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| body.as_str())
            .collect();
        assert_eq!(joined, inputs.concat());
    }

    #[tokio::test]
    async fn part_numbers_are_contiguous_from_one() {
        let store = MemUploads::default();
        let mut writer = PartWriter::new(&store, "out.json", 2);
        for chunk in ["aa", "bb", "cc"] {
            writer.append(chunk).await.unwrap();
        }
        writer.finalize().await.unwrap();

        let parts = store.parts.lock().unwrap();
        let numbers: Vec<i32> = parts.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        let completed = store.completed.lock().unwrap();
        let completed_numbers: Vec<i32> = completed
            .as_ref()
            .unwrap()
            .iter()
            .map(|p| p.part_number)
            .collect();
        assert_eq!(completed_numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn finalize_with_empty_buffer_completes_without_extra_part() {
        let store = MemUploads::default();
        let mut writer = PartWriter::new(&store, "out.json", 4);
        writer.append("abcd").await.unwrap();
        writer.finalize().await.unwrap();
        assert_eq!(store.parts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn output_below_one_part_is_stored_with_a_single_put() {
        let store = MemUploads::default();
        let mut writer = PartWriter::new(&store, "out.json", 1024);
        writer.append("[").await.unwrap();
        writer.append("{\"a\":1}").await.unwrap();
        writer.append("]").await.unwrap();
        writer.finalize().await.unwrap();

        let puts = store.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0], ("out.json".to_string(), "[{\"a\":1}]".to_string()));
        // no multipart session was ever opened
        assert!(store.parts.lock().unwrap().is_empty());
        assert!(store.completed.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn abort_discards_the_session() {
        let store = MemUploads::default();
        let mut writer = PartWriter::new(&store, "out.json", 4);
        writer.append("abcd").await.unwrap();
        writer.abort().await.unwrap();
        assert!(store.aborted.load(Ordering::SeqCst));
        assert!(store.completed.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn abort_before_any_flush_touches_nothing() {
        let store = MemUploads::default();
        let mut writer = PartWriter::new(&store, "out.json", 1024);
        writer.append("ab").await.unwrap();
        writer.abort().await.unwrap();
        assert!(!store.aborted.load(Ordering::SeqCst));
        assert!(store.puts.lock().unwrap().is_empty());
    }
}
