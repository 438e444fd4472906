//! Transfer pipelines: import, export, and annotation.
//!
//! Each pipeline wires the collaborators together behind their seams, so the
//! whole flow is testable against in-memory doubles. The pipelines own the
//! lifecycle rules: a scroll cursor is released on every exit path and a
//! multipart session is finalized on success and aborted on error. Retry of
//! transient failures happens below this layer, in the `retry` decorators
//! the CLI wraps around the concrete collaborators.

use futures::future::join_all;
use serde_json::{json, Value};

use crate::annotation::{annotate_at_thresholds, Annotator};
use crate::bulk::{self, BulkMethod, BulkOutcome, ErrorPolicy};
use crate::client::SearchIndex;
use crate::config::{AnnotationConfig, TransferConfig};
use crate::decode::{Element, ElementStream, RootKind};
use crate::entities::{entity_mapping, entity_metadata, metadata_mapping, reduce_entities};
use crate::error::TransferError;
use crate::models::{BulkDoc, Hit, RunReport};
use crate::part_writer::PartWriter;
use crate::progress::{TransferEvent, TransferReporter};
use crate::scroll::{PageCursor, PageLimit};
use crate::storage::ObjectStore;

/// Documents per update call during annotation.
const UPDATE_BATCH: usize = 500;

/// What each exported hit is reduced to before formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportProcessor {
    /// The full hit: id plus source.
    Raw,
    /// The document body only.
    Source,
    /// A flat object: id merged with the source fields, with each linked
    /// entity trimmed to its URI and confidence.
    Simple,
}

impl ExportProcessor {
    fn process(self, hit: &Hit, entity_field: &str) -> Value {
        match self {
            ExportProcessor::Raw => json!({ "_id": hit.id, "_source": hit.source }),
            ExportProcessor::Source => hit.source.clone(),
            ExportProcessor::Simple => {
                let mut obj = serde_json::Map::new();
                obj.insert("id".into(), json!(hit.id));
                if let Some(source) = hit.source.as_object() {
                    for (key, value) in source {
                        obj.insert(key.clone(), value.clone());
                    }
                }
                let trimmed = obj.get(entity_field).and_then(Value::as_array).map(|entities| {
                    entities
                        .iter()
                        .map(|e| json!({ "URI": e["URI"], "confidence": e["confidence"] }))
                        .collect()
                });
                if let Some(trimmed) = trimmed {
                    obj.insert(entity_field.to_string(), Value::Array(trimmed));
                }
                Value::Object(obj)
            }
        }
    }
}

/// Shape of the exported object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// A JSON array of processed hits.
    Array,
    /// A JSON object keyed by document id.
    Object,
    /// A JSON object keyed by document id whose values are that document's
    /// linked-entity lists. Hits without the entity field are omitted.
    Entities,
}

impl ExportFormat {
    fn delimiters(self) -> (&'static str, &'static str) {
        match self {
            ExportFormat::Array => ("[", "]"),
            ExportFormat::Object | ExportFormat::Entities => ("{", "}"),
        }
    }
}

pub struct ImportOptions {
    /// Source object in the store.
    pub object_key: String,
    pub index_name: String,
    pub root: RootKind,
    /// Array roots: element field supplying the document id.
    pub id_field: Option<String>,
}

pub struct ExportOptions {
    pub index_name: String,
    /// Destination object in the store.
    pub object_key: String,
    pub processor: ExportProcessor,
    pub format: ExportFormat,
    /// Source field holding the entity list (entities format).
    pub entity_field: String,
    /// Entities format: drop entities at or below this confidence.
    pub min_confidence: Option<u64>,
}

/// Stream a remote JSON collection into the index.
///
/// The index is created first (already existing is fine), then decoded
/// elements are submitted in bulk per decoder batch. Array elements become
/// documents directly; object entries use their key as the document id.
pub async fn run_import(
    store: &dyn ObjectStore,
    index: &dyn SearchIndex,
    reporter: &dyn TransferReporter,
    cfg: &TransferConfig,
    options: &ImportOptions,
) -> Result<RunReport, TransferError> {
    index.create_index(&options.index_name).await?;

    let mut stream = ElementStream::open(
        store,
        &options.object_key,
        options.root,
        cfg.chunk_size as u64,
        cfg.max_buffer_bytes,
    )
    .await?;

    let policy = if cfg.bulk_errors_fatal {
        ErrorPolicy::Fatal
    } else {
        ErrorPolicy::LogAndContinue
    };

    let mut report = RunReport::default();
    while let Some(batch) = stream.next_batch().await? {
        let docs: Vec<BulkDoc> = batch
            .iter()
            .map(|element| import_doc(element, options.id_field.as_deref()))
            .collect();

        let outcome = bulk::submit(
            index,
            &options.index_name,
            &docs,
            BulkMethod::Index,
            policy,
            None,
        )
        .await?;
        record_bulk(&mut report, docs.len(), &outcome);

        reporter.report(TransferEvent::BytesDecoded {
            key: options.object_key.clone(),
            n: stream.offset(),
            total: stream.total_size(),
        });
    }

    tracing::info!(
        index = %options.index_name,
        transferred = report.transferred,
        failed = report.failed,
        "import finished"
    );
    Ok(report)
}

fn import_doc(element: &Element, id_field: Option<&str>) -> BulkDoc {
    match &element.key {
        // object roots: the entry key is the document id
        Some(key) => {
            let payload = if element.value.is_object() {
                element.value.clone()
            } else {
                json!({ "value": element.value })
            };
            BulkDoc {
                id: Some(key.clone()),
                payload,
            }
        }
        None => {
            let id = id_field.and_then(|field| match &element.value[field] {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
            BulkDoc {
                id,
                payload: element.value.clone(),
            }
        }
    }
}

fn record_bulk(report: &mut RunReport, submitted: usize, outcome: &BulkOutcome) {
    match outcome {
        BulkOutcome::NothingToDo => {}
        BulkOutcome::Submitted { failed, .. } => {
            report.transferred += (submitted - failed.len()) as u64;
            for detail in failed {
                report.record_failure(detail.clone());
            }
        }
    }
}

/// Stream an index into one object in the store.
///
/// Hits are pulled page by page through a scroll cursor and written through
/// a multipart session, or a single put when the output never fills one
/// part. The cursor is released whether the run succeeds or fails; a failed
/// run aborts the upload so no partial object survives.
pub async fn run_export(
    store: &dyn ObjectStore,
    index: &dyn SearchIndex,
    reporter: &dyn TransferReporter,
    cfg: &TransferConfig,
    options: &ExportOptions,
) -> Result<RunReport, TransferError> {
    let total = index.count(&options.index_name).await?;
    let total_pages = total.div_ceil(cfg.page_size as u64);

    let limit = match cfg.pages {
        Some(pages) => PageLimit::Pages(pages),
        None => PageLimit::All,
    };
    let mut cursor = PageCursor::new(index, &options.index_name, cfg.page_size, limit);
    let mut writer = PartWriter::new(store, &options.object_key, cfg.min_part_size);

    let outcome = export_pages(
        &mut cursor,
        &mut writer,
        reporter,
        options,
        total_pages,
    )
    .await;

    if let Err(release_err) = cursor.release().await {
        tracing::warn!(%release_err, "scroll release failed after export");
    }

    match outcome {
        Ok(report) => {
            writer.finalize().await?;
            tracing::info!(
                index = %options.index_name,
                key = %options.object_key,
                transferred = report.transferred,
                "export finished"
            );
            Ok(report)
        }
        Err(err) => {
            if let Err(abort_err) = writer.abort().await {
                tracing::warn!(%abort_err, "upload abort failed after export error");
            }
            Err(err)
        }
    }
}

async fn export_pages(
    cursor: &mut PageCursor<'_>,
    writer: &mut PartWriter<'_>,
    reporter: &dyn TransferReporter,
    options: &ExportOptions,
    total_pages: u64,
) -> Result<RunReport, TransferError> {
    let (open, close) = options.format.delimiters();
    writer.append(open).await?;

    let mut report = RunReport::default();
    let mut first = true;
    while let Some(hits) = cursor.next_page().await? {
        for hit in &hits {
            for element in format_hit(hit, options) {
                if !first {
                    writer.append(",").await?;
                }
                writer.append(&element).await?;
                first = false;
            }
            report.transferred += 1;
        }
        reporter.report(TransferEvent::PagesConsumed {
            index: options.index_name.clone(),
            n: cursor.pages_seen() as u64,
            total: Some(total_pages),
        });
    }

    writer.append(close).await?;
    Ok(report)
}

/// Render one hit as zero or more serialized elements of the output.
fn format_hit(hit: &Hit, options: &ExportOptions) -> Vec<String> {
    match options.format {
        ExportFormat::Array => {
            vec![options.processor.process(hit, &options.entity_field).to_string()]
        }
        ExportFormat::Object => {
            let payload = options.processor.process(hit, &options.entity_field);
            vec![format!("{}:{}", json!(hit.id), payload)]
        }
        ExportFormat::Entities => hit.source[&options.entity_field]
            .as_array()
            .map(|entities| {
                let kept: Vec<&Value> = entities
                    .iter()
                    .filter(|entity| match options.min_confidence {
                        Some(min) => entity["confidence"].as_u64().unwrap_or(0) > min,
                        None => true,
                    })
                    .collect();
                vec![format!("{}:{}", json!(hit.id), json!(kept))]
            })
            .unwrap_or_default(),
    }
}

/// Annotate every document in an index with linked entities.
///
/// Pages are split into batches, each batch into concurrently-annotated
/// groups. Documents with no text or no recognized entities are skipped and
/// left untouched. Updates go out in large idempotent batches with
/// `refresh=wait_for`; item failures are logged, not fatal, so one bad
/// document cannot sink an hours-long run.
pub async fn run_annotate(
    index: &dyn SearchIndex,
    annotator: &dyn Annotator,
    reporter: &dyn TransferReporter,
    cfg: &TransferConfig,
    annotation: &AnnotationConfig,
    index_name: &str,
) -> Result<RunReport, TransferError> {
    let thresholds_pct: Vec<u32> = annotation
        .confidence_thresholds
        .iter()
        .map(|&t| (t * 100.0).round() as u32)
        .collect();

    // declare typed mappings up front so none of the written fields fall
    // back to dynamic mapping
    let mut properties = serde_json::Map::new();
    properties.insert(
        annotation.entity_field.clone(),
        entity_mapping(&thresholds_pct),
    );
    if annotation.include_metadata {
        properties.insert(
            format!("{}_metadata", annotation.entity_field),
            metadata_mapping(&thresholds_pct),
        );
    }
    let mapping = json!({ "properties": properties });
    index.update_mapping(index_name, &mapping).await?;

    let limit = match cfg.pages {
        Some(pages) => PageLimit::Pages(pages),
        None => PageLimit::All,
    };
    let mut cursor = PageCursor::new(index, index_name, cfg.page_size, limit);

    let outcome = annotate_pages(
        &mut cursor,
        index,
        annotator,
        reporter,
        cfg,
        annotation,
        &thresholds_pct,
        index_name,
    )
    .await;

    if let Err(release_err) = cursor.release().await {
        tracing::warn!(%release_err, "scroll release failed after annotation");
    }

    let report = outcome?;
    tracing::info!(
        index = index_name,
        annotated = report.transferred,
        skipped = report.skipped,
        failed = report.failed,
        "annotation finished"
    );
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
async fn annotate_pages(
    cursor: &mut PageCursor<'_>,
    index: &dyn SearchIndex,
    annotator: &dyn Annotator,
    reporter: &dyn TransferReporter,
    cfg: &TransferConfig,
    annotation: &AnnotationConfig,
    thresholds_pct: &[u32],
    index_name: &str,
) -> Result<RunReport, TransferError> {
    let mut report = RunReport::default();
    let mut pending: Vec<BulkDoc> = Vec::new();

    while let Some(hits) = cursor.next_page().await? {
        // batches within a group run concurrently; groups run sequentially,
        // bounding load on the annotation service
        let batches: Vec<&[Hit]> = hits.chunks(cfg.batch_size).collect();
        for group in batches.chunks(cfg.group_size) {
            let annotated = join_all(group.iter().map(|batch| {
                annotate_batch(batch, annotator, annotation, thresholds_pct)
            }))
            .await;

            for (batch, docs) in group.iter().zip(annotated) {
                for (hit, doc) in batch.iter().zip(docs) {
                    match doc {
                        Some(doc) => pending.push(doc),
                        None => {
                            tracing::debug!(id = %hit.id, "document skipped");
                            report.skipped += 1;
                        }
                    }
                }
            }

            while pending.len() >= UPDATE_BATCH {
                let docs: Vec<BulkDoc> = pending.drain(..UPDATE_BATCH).collect();
                flush_updates(index, index_name, &docs, &mut report).await?;
            }
        }

        reporter.report(TransferEvent::DocsAnnotated {
            index: index_name.to_string(),
            annotated: report.transferred + pending.len() as u64,
            skipped: report.skipped,
            failed: report.failed,
        });
    }

    if !pending.is_empty() {
        let docs = std::mem::take(&mut pending);
        flush_updates(index, index_name, &docs, &mut report).await?;
    }
    Ok(report)
}

/// Annotate one batch, preserving document order in the result.
async fn annotate_batch(
    batch: &[Hit],
    annotator: &dyn Annotator,
    annotation: &AnnotationConfig,
    thresholds_pct: &[u32],
) -> Vec<Option<BulkDoc>> {
    join_all(
        batch
            .iter()
            .map(|hit| annotate_hit(hit, annotator, annotation, thresholds_pct)),
    )
    .await
}

/// Annotate one document. `None` means the document is skipped: either it
/// has no text in the configured field, or the service recognized nothing.
async fn annotate_hit(
    hit: &Hit,
    annotator: &dyn Annotator,
    annotation: &AnnotationConfig,
    thresholds_pct: &[u32],
) -> Option<BulkDoc> {
    let text = hit.source[&annotation.field].as_str().unwrap_or_default();
    if text.trim().is_empty() {
        return None;
    }

    let raw = annotate_at_thresholds(annotator, text, &annotation.confidence_thresholds).await;
    let entities = reduce_entities(&raw, thresholds_pct);
    if entities.is_empty() {
        tracing::warn!(id = %hit.id, "no entities recognized, document left untouched");
        return None;
    }

    let mut payload = serde_json::Map::new();
    payload.insert(
        annotation.entity_field.clone(),
        Value::Array(entities.iter().map(|e| e.to_json()).collect()),
    );
    if annotation.include_metadata {
        let metadata = entity_metadata(&entities, thresholds_pct);
        payload.insert(
            format!("{}_metadata", annotation.entity_field),
            metadata.to_json(),
        );
    }

    Some(BulkDoc {
        id: Some(hit.id.clone()),
        payload: Value::Object(payload),
    })
}

async fn flush_updates(
    index: &dyn SearchIndex,
    index_name: &str,
    docs: &[BulkDoc],
    report: &mut RunReport,
) -> Result<(), TransferError> {
    let outcome = bulk::submit(
        index,
        index_name,
        docs,
        BulkMethod::Update,
        ErrorPolicy::LogAndContinue,
        Some("wait_for"),
    )
    .await?;
    record_bulk(report, docs.len(), &outcome);
    Ok(())
}
