//! Transfer progress reporting.
//!
//! Reports observable progress while a pipeline runs so users see how far
//! along an import, export, or annotation run is. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a transfer run.
#[derive(Clone, Debug)]
pub enum TransferEvent {
    /// Import: bytes of the source object decoded so far.
    BytesDecoded { key: String, n: u64, total: u64 },
    /// Export or annotation: pages consumed out of the expected total.
    PagesConsumed {
        index: String,
        n: u64,
        total: Option<u64>,
    },
    /// Annotation: documents enriched, skipped, and failed so far.
    DocsAnnotated {
        index: String,
        annotated: u64,
        skipped: u64,
        failed: u64,
    },
}

/// Reports transfer progress. Implementations write to stderr (human or JSON).
pub trait TransferReporter: Send + Sync {
    /// Emit a progress event. Called from the pipelines.
    fn report(&self, event: TransferEvent);
}

/// Human-friendly progress on stderr: "import data.json  12,345,678 / 98,765,432 bytes".
pub struct StderrProgress;

impl TransferReporter for StderrProgress {
    fn report(&self, event: TransferEvent) {
        let line = match &event {
            TransferEvent::BytesDecoded { key, n, total } => {
                format!(
                    "import {}  {} / {} bytes\n",
                    key,
                    format_number(*n),
                    format_number(*total)
                )
            }
            TransferEvent::PagesConsumed { index, n, total } => match total {
                Some(total) => format!(
                    "scroll {}  page {} / {}\n",
                    index,
                    format_number(*n),
                    format_number(*total)
                ),
                None => format!("scroll {}  page {}\n", index, format_number(*n)),
            },
            TransferEvent::DocsAnnotated {
                index,
                annotated,
                skipped,
                failed,
            } => {
                format!(
                    "annotate {}  {} annotated, {} skipped, {} failed\n",
                    index,
                    format_number(*annotated),
                    format_number(*skipped),
                    format_number(*failed)
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl TransferReporter for JsonProgress {
    fn report(&self, event: TransferEvent) {
        let obj = match &event {
            TransferEvent::BytesDecoded { key, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "decode",
                "key": key,
                "n": n,
                "total": total
            }),
            TransferEvent::PagesConsumed { index, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "scroll",
                "index": index,
                "n": n,
                "total": total
            }),
            TransferEvent::DocsAnnotated {
                index,
                annotated,
                skipped,
                failed,
            } => serde_json::json!({
                "event": "progress",
                "phase": "annotate",
                "index": index,
                "annotated": annotated,
                "skipped": skipped,
                "failed": failed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl TransferReporter for NoProgress {
    fn report(&self, _event: TransferEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode. Caller can pass it to the pipelines.
    pub fn reporter(&self) -> Box<dyn TransferReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(5_242_880), "5,242,880");
    }
}
