//! # Index Ferry CLI (`ferry`)
//!
//! The `ferry` binary drives the transfer pipelines: importing JSON
//! collections from object storage into a search index, exporting indices
//! back into storage, and annotating indexed documents with linked entities.
//!
//! ## Usage
//!
//! ```bash
//! ferry --config ./config/ferry.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ferry import <key>` | Stream a JSON object from storage into an index |
//! | `ferry export <index>` | Stream an index into one object in storage |
//! | `ferry annotate <index>` | Enrich every document with linked entities |
//!
//! ## Examples
//!
//! ```bash
//! # Import a JSON array of documents
//! ferry import dumps/articles.json --index articles --id-field slug
//!
//! # Import a JSON object keyed by document id
//! ferry import dumps/pages.json --index pages --root object
//!
//! # Export only the linked entities above 50% confidence
//! ferry export articles --key dumps/entities.json --format entities --min-confidence 50
//!
//! # Annotate, with machine-readable progress
//! ferry annotate articles --progress json
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use index_ferry::client::EsIndex;
use index_ferry::config::{self, Config};
use index_ferry::decode::RootKind;
use index_ferry::models::RunReport;
use index_ferry::progress::ProgressMode;
use index_ferry::retry::{RetryPolicy, RetryingIndex, RetryingStore};
use index_ferry::storage::S3Store;
use index_ferry::transfer::{
    self, ExportFormat, ExportOptions, ExportProcessor, ImportOptions,
};

/// Index Ferry — streaming bulk transfer between object storage and a
/// search index.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ferry.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ferry",
    about = "Index Ferry — streaming bulk transfer between object storage and a search index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ferry.toml")]
    config: PathBuf,

    /// Progress output: auto (TTY detection), off, human, or json.
    #[arg(long, global = true, default_value = "auto")]
    progress: ProgressArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProgressArg {
    Auto,
    Off,
    Human,
    Json,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RootArg {
    Array,
    Object,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProcessorArg {
    Raw,
    Source,
    Simple,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Array,
    Object,
    Entities,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Stream a JSON object from storage into an index.
    ///
    /// The object is decoded incrementally via byte-range reads, so
    /// arbitrarily large collections import in constant memory. The target
    /// index is created if it does not exist.
    Import {
        /// Source object key in the configured bucket.
        key: String,

        /// Target index name.
        #[arg(long)]
        index: String,

        /// Root structure of the source object.
        #[arg(long, value_enum, default_value = "array")]
        root: RootArg,

        /// Array roots: element field supplying the document id.
        #[arg(long)]
        id_field: Option<String>,
    },

    /// Stream an index into one object in storage.
    ///
    /// Hits are pulled through a scroll cursor and written via multipart
    /// upload. A failed export aborts the upload; no partial object is
    /// left behind.
    Export {
        /// Source index name.
        index: String,

        /// Destination object key in the configured bucket.
        #[arg(long)]
        key: String,

        /// What each hit is reduced to: raw (id + source), source, or
        /// simple (flat object, entities trimmed to URI + confidence).
        #[arg(long, value_enum, default_value = "source")]
        processor: ProcessorArg,

        /// Output shape: array, object (keyed by id), or entities (entity
        /// lists keyed by id).
        #[arg(long, value_enum, default_value = "array")]
        format: FormatArg,

        /// Entities format: drop entities at or below this confidence.
        #[arg(long)]
        min_confidence: Option<u64>,
    },

    /// Enrich every document in an index with linked entities.
    ///
    /// Requires the `[annotation]` config section. When `[snapshot]` is
    /// configured, a snapshot is triggered before any document is touched.
    Annotate {
        /// Index to annotate in place.
        index: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let reporter = cli.progress.mode().reporter();

    let s3 = S3Store::new(
        &cfg.storage.bucket,
        &cfg.storage.region,
        cfg.storage.endpoint_url.clone(),
    )?;
    let es = EsIndex::new(&cfg.index.domain, &cfg.storage.region)?;

    // every outbound call goes through the fixed-delay retry decorators
    let retry = RetryPolicy::new(cfg.retry.attempts, cfg.retry.delay_ms);
    let store = RetryingStore::new(&s3, retry);
    let search = RetryingIndex::new(&es, retry);

    let report = match cli.command {
        Commands::Import {
            key,
            index,
            root,
            id_field,
        } => {
            let options = ImportOptions {
                object_key: key,
                index_name: index,
                root: match root {
                    RootArg::Array => RootKind::Array,
                    RootArg::Object => RootKind::Object,
                },
                id_field,
            };
            transfer::run_import(&store, &search, reporter.as_ref(), &cfg.transfer, &options)
                .await?
        }
        Commands::Export {
            index,
            key,
            processor,
            format,
            min_confidence,
        } => {
            let entity_field = cfg
                .annotation
                .as_ref()
                .map(|a| a.entity_field.clone())
                .unwrap_or_else(|| "linked_entities".to_string());
            let options = ExportOptions {
                index_name: index,
                object_key: key,
                processor: match processor {
                    ProcessorArg::Raw => ExportProcessor::Raw,
                    ProcessorArg::Source => ExportProcessor::Source,
                    ProcessorArg::Simple => ExportProcessor::Simple,
                },
                format: match format {
                    FormatArg::Array => ExportFormat::Array,
                    FormatArg::Object => ExportFormat::Object,
                    FormatArg::Entities => ExportFormat::Entities,
                },
                entity_field,
                min_confidence,
            };
            transfer::run_export(&store, &search, reporter.as_ref(), &cfg.transfer, &options)
                .await?
        }
        Commands::Annotate { index } => {
            annotate_command(&cfg, &es, &search, reporter.as_ref(), &index).await?
        }
    };

    print_report(&report);
    Ok(())
}

async fn annotate_command(
    cfg: &Config,
    es: &EsIndex,
    search: &RetryingIndex<'_>,
    reporter: &dyn index_ferry::progress::TransferReporter,
    index: &str,
) -> anyhow::Result<RunReport> {
    let annotation = cfg
        .annotation
        .as_ref()
        .context("the annotate command requires an [annotation] config section")?;

    if let Some(snapshot) = &cfg.snapshot {
        es.trigger_snapshot(&snapshot.repository, &snapshot.snapshot)
            .await
            .context("pre-annotation snapshot failed")?;
    }

    let annotator = index_ferry::annotation::AnnotationClient::new(&annotation.endpoint);
    let report = transfer::run_annotate(
        search,
        &annotator,
        reporter,
        &cfg.transfer,
        annotation,
        index,
    )
    .await?;
    Ok(report)
}

fn print_report(report: &RunReport) {
    println!(
        "done: {} transferred, {} skipped, {} failed",
        report.transferred, report.skipped, report.failed
    );
    for failure in report.failures.iter().take(20) {
        println!("  failed: {}", failure);
    }
    if report.failures.len() > 20 {
        println!("  ... and {} more", report.failures.len() - 20);
    }
}
