//! Incremental decoder for large remote JSON collections.
//!
//! Reconstructs the top-level elements of a JSON array (or the entries of a
//! JSON object) from byte-range fetches, without ever holding the whole
//! remote object in memory. The first non-whitespace byte is verified once
//! against the expected root kind, then each fetch appends to a carry buffer
//! and the buffer is scanned **from the end backward** for the last comma or
//! closing-bracket position whose prefix, wrapped in the root delimiters,
//! parses as valid JSON. Scanning backward finds the largest complete prefix
//! in one pass; the unparsed suffix is carried into the next fetch.
//!
//! Element boundaries are never known a priori, so a fetch may end anywhere —
//! including inside a multi-byte character. The carry buffer holds raw bytes
//! and candidate prefixes are parsed with `serde_json::from_slice`; `,`, `}`
//! and `]` are ASCII and cannot occur inside a UTF-8 continuation sequence,
//! so boundary positions are always safe split points.
//!
//! Buffer growth is bounded by a mandatory cap: a malformed object that never
//! yields a boundary fails with `BufferOverflow` instead of exhausting
//! memory.

use serde_json::Value;

use crate::error::TransferError;
use crate::storage::ObjectStore;

/// How far into the object to look for the opening delimiter.
const MAX_LEADING_WHITESPACE: u64 = 1024;

/// Root structure of the remote JSON document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Array,
    Object,
}

impl RootKind {
    fn delimiters(self) -> (u8, u8) {
        match self {
            RootKind::Array => (b'[', b']'),
            RootKind::Object => (b'{', b'}'),
        }
    }

    fn name(self) -> &'static str {
        match self {
            RootKind::Array => "array",
            RootKind::Object => "object",
        }
    }
}

/// One decoded top-level element. `key` is present for object roots only.
#[derive(Debug, Clone)]
pub struct Element {
    pub key: Option<String>,
    pub value: Value,
}

/// Pull-based stream of decoded elements over an [`ObjectStore`].
///
/// Single-consumer; restartable only from the beginning of the object.
pub struct ElementStream<'a> {
    store: &'a dyn ObjectStore,
    object_key: String,
    kind: RootKind,
    chunk_size: u64,
    max_buffer: usize,
    buffer: Vec<u8>,
    /// Next byte offset to fetch (starts just past the opening delimiter).
    pos: u64,
    size: u64,
    fetched_all: bool,
    drained: bool,
}

impl<'a> ElementStream<'a> {
    /// Open the stream: verify the root kind against the object's first
    /// non-whitespace byte and look up the total size.
    pub async fn open(
        store: &'a dyn ObjectStore,
        object_key: &str,
        kind: RootKind,
        chunk_size: u64,
        max_buffer: usize,
    ) -> Result<ElementStream<'a>, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::Config("decode chunk size must be > 0".into()));
        }

        let mut offset = 0u64;
        let first = loop {
            let probe = store.read_range(object_key, offset, offset).await?;
            match probe.bytes.first() {
                None => {
                    return Err(TransferError::Config(format!(
                        "object {} is empty",
                        object_key
                    )))
                }
                Some(b) if b.is_ascii_whitespace() => {
                    offset += 1;
                    if offset >= MAX_LEADING_WHITESPACE {
                        return Err(TransferError::Config(format!(
                            "object {} has no opening delimiter in its first {} bytes",
                            object_key, MAX_LEADING_WHITESPACE
                        )));
                    }
                }
                Some(&b) => break b,
            }
        };

        let (open, _) = kind.delimiters();
        if first != open {
            return Err(TransferError::RootMismatch {
                expected: kind.name(),
                found: first as char,
            });
        }

        let size = store.object_size(object_key).await?;

        Ok(ElementStream {
            store,
            object_key: object_key.to_string(),
            kind,
            chunk_size,
            max_buffer,
            buffer: Vec::new(),
            pos: offset + 1,
            size,
            fetched_all: offset + 1 >= size,
            drained: false,
        })
    }

    /// Total object size in bytes, for progress reporting.
    pub fn total_size(&self) -> u64 {
        self.size
    }

    /// Bytes fetched so far, for progress reporting.
    pub fn offset(&self) -> u64 {
        self.pos.min(self.size)
    }

    /// Fetch until at least one complete element is available, or the object
    /// is exhausted. Returns `None` once the stream is fully drained. An
    /// empty collection drains without yielding.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Element>>, TransferError> {
        loop {
            if self.drained {
                return Ok(None);
            }

            if self.fetched_all {
                if self.buffer.iter().all(|b| b.is_ascii_whitespace()) {
                    self.drained = true;
                    return Ok(None);
                }
                match parse_most(&self.buffer, self.kind) {
                    Some((elements, leftover)) => {
                        self.buffer = leftover;
                        if !elements.is_empty() {
                            return Ok(Some(elements));
                        }
                        continue;
                    }
                    None => {
                        return Err(TransferError::Config(format!(
                            "object {} has trailing bytes that do not parse as JSON",
                            self.object_key
                        )))
                    }
                }
            }

            let end = self.pos + self.chunk_size - 1;
            let chunk = self
                .store
                .read_range(&self.object_key, self.pos, end)
                .await?;
            self.pos += self.chunk_size;
            if chunk.reached_end || self.pos >= self.size {
                self.fetched_all = true;
            }
            self.buffer.extend_from_slice(&chunk.bytes);

            if let Some((elements, leftover)) = parse_most(&self.buffer, self.kind) {
                self.buffer = leftover;
                if !elements.is_empty() {
                    return Ok(Some(elements));
                }
                continue;
            }

            if self.buffer.len() > self.max_buffer {
                return Err(TransferError::BufferOverflow {
                    cap: self.max_buffer,
                });
            }
        }
    }
}

/// Find the largest prefix of `buffer` that forms complete elements.
///
/// Tries every comma / closing-delimiter position from the end backward; the
/// first position whose prefix parses wins. Returns the parsed elements and
/// the unparsed suffix, or `None` when no boundary parses yet.
fn parse_most(buffer: &[u8], kind: RootKind) -> Option<(Vec<Element>, Vec<u8>)> {
    let (open, close) = kind.delimiters();
    for i in (0..buffer.len()).rev() {
        let b = buffer[i];
        if b != b',' && b != close {
            continue;
        }
        let mut candidate = Vec::with_capacity(i + 2);
        candidate.push(open);
        candidate.extend_from_slice(&buffer[..i]);
        candidate.push(close);

        let elements = match kind {
            RootKind::Array => serde_json::from_slice::<Vec<Value>>(&candidate)
                .ok()
                .map(|values| {
                    values
                        .into_iter()
                        .map(|value| Element { key: None, value })
                        .collect::<Vec<_>>()
                }),
            RootKind::Object => {
                serde_json::from_slice::<serde_json::Map<String, Value>>(&candidate)
                    .ok()
                    .map(|map| {
                        map.into_iter()
                            .map(|(key, value)| Element {
                                key: Some(key),
                                value,
                            })
                            .collect()
                    })
            }
        };

        if let Some(elements) = elements {
            return Some((elements, buffer[i + 1..].to_vec()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UploadedPart;
    use crate::storage::RangeChunk;
    use async_trait::async_trait;
    use serde_json::json;

    /// In-memory object store serving a fixed byte buffer.
    struct MemStore {
        data: Vec<u8>,
    }

    impl MemStore {
        fn new(data: &str) -> Self {
            Self {
                data: data.as_bytes().to_vec(),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for MemStore {
        async fn read_range(
            &self,
            _key: &str,
            start: u64,
            end: u64,
        ) -> Result<RangeChunk, TransferError> {
            let len = self.data.len() as u64;
            if start >= len {
                return Ok(RangeChunk {
                    bytes: Vec::new(),
                    reached_end: true,
                });
            }
            let stop = (end + 1).min(len);
            let bytes = self.data[start as usize..stop as usize].to_vec();
            let reached_end = (bytes.len() as u64) < end - start + 1;
            Ok(RangeChunk { bytes, reached_end })
        }

        async fn object_size(&self, _key: &str) -> Result<u64, TransferError> {
            Ok(self.data.len() as u64)
        }

        async fn put_object(&self, _key: &str, _body: String) -> Result<(), TransferError> {
            unreachable!("not used by decoder tests")
        }

        async fn create_upload(&self, _key: &str) -> Result<String, TransferError> {
            unreachable!("not used by decoder tests")
        }

        async fn upload_part(
            &self,
            _key: &str,
            _upload_id: &str,
            _part_number: i32,
            _body: String,
        ) -> Result<String, TransferError> {
            unreachable!("not used by decoder tests")
        }

        async fn complete_upload(
            &self,
            _key: &str,
            _upload_id: &str,
            _parts: &[UploadedPart],
        ) -> Result<(), TransferError> {
            unreachable!("not used by decoder tests")
        }

        async fn abort_upload(&self, _key: &str, _upload_id: &str) -> Result<(), TransferError> {
            unreachable!("not used by decoder tests")
        }
    }

    async fn decode_all(
        data: &str,
        kind: RootKind,
        chunk_size: u64,
    ) -> Result<Vec<Element>, TransferError> {
        let store = MemStore::new(data);
        let mut stream = ElementStream::open(&store, "data.json", kind, chunk_size, 1 << 20).await?;
        let mut all = Vec::new();
        while let Some(batch) = stream.next_batch().await? {
            all.extend(batch);
        }
        Ok(all)
    }

    #[tokio::test]
    async fn array_elements_match_reference_parse_at_every_chunk_size() {
        let data = r#"[{"a":1,"b":[1,2,3]},{"c":"x,y]z"},42,null,{"d":{"e":[]}}]"#;
        let reference: Vec<Value> = serde_json::from_str(data).unwrap();
        for chunk_size in 1..=data.len() as u64 + 4 {
            let elements = decode_all(data, RootKind::Array, chunk_size).await.unwrap();
            let values: Vec<Value> = elements.into_iter().map(|e| e.value).collect();
            assert_eq!(values, reference, "chunk size {}", chunk_size);
        }
    }

    #[tokio::test]
    async fn object_entries_yield_in_file_order() {
        // chunk boundary falls mid-entry
        let elements = decode_all(r#"{"a":1,"b":2}"#, RootKind::Object, 8)
            .await
            .unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].key.as_deref(), Some("a"));
        assert_eq!(elements[0].value, json!(1));
        assert_eq!(elements[1].key.as_deref(), Some("b"));
        assert_eq!(elements[1].value, json!(2));
    }

    #[tokio::test]
    async fn multibyte_characters_split_across_chunks() {
        let data = r#"["héllo","wörld","日本語テキスト"]"#;
        let reference: Vec<Value> = serde_json::from_str(data).unwrap();
        for chunk_size in 1..8u64 {
            let elements = decode_all(data, RootKind::Array, chunk_size).await.unwrap();
            let values: Vec<Value> = elements.into_iter().map(|e| e.value).collect();
            assert_eq!(values, reference, "chunk size {}", chunk_size);
        }
    }

    #[tokio::test]
    async fn empty_collections_drain_without_yield() {
        assert!(decode_all("[]", RootKind::Array, 4).await.unwrap().is_empty());
        assert!(decode_all("{}", RootKind::Object, 4)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn root_kind_mismatch_is_fatal() {
        let err = decode_all(r#"{"a":1}"#, RootKind::Array, 4)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::RootMismatch {
                expected: "array",
                found: '{'
            }
        ));
    }

    #[tokio::test]
    async fn leading_whitespace_is_skipped() {
        let elements = decode_all("  \n[1,2]", RootKind::Array, 4).await.unwrap();
        let values: Vec<Value> = elements.into_iter().map(|e| e.value).collect();
        assert_eq!(values, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn buffer_cap_bounds_malformed_input() {
        let store = MemStore::new("[this is not json and never closes ................");
        let mut stream = ElementStream::open(&store, "data.json", RootKind::Array, 8, 16)
            .await
            .unwrap();
        let err = stream.next_batch().await.unwrap_err();
        assert!(matches!(err, TransferError::BufferOverflow { cap: 16 }));
    }

    #[tokio::test]
    async fn commas_inside_strings_do_not_split_elements() {
        let data = r#"["a,b","c]d","e}f"]"#;
        let reference: Vec<Value> = serde_json::from_str(data).unwrap();
        let elements = decode_all(data, RootKind::Array, 3).await.unwrap();
        let values: Vec<Value> = elements.into_iter().map(|e| e.value).collect();
        assert_eq!(values, reference);
    }
}
