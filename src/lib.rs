//! # Index Ferry
//!
//! A streaming bulk-transfer and enrichment toolkit between object storage
//! and a search index.
//!
//! Index Ferry moves large JSON collections from S3-compatible storage into
//! an Elasticsearch-compatible index, exports whole indices back into
//! storage via multipart upload, and enriches indexed documents with linked
//! entities from a DBpedia-Spotlight-compatible annotation service. Every
//! transfer is streamed: neither the source object nor the index contents
//! are ever held in memory at once.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//! │ Object store │──▶│   Pipelines    │──▶│ Search index │
//! │ range reads  │   │ decode / page │   │ bulk / scroll│
//! │ multipart    │◀──│ annotate      │◀──│              │
//! └──────────────┘   └───────┬───────┘   └──────────────┘
//!                            │
//!                            ▼
//!                    ┌──────────────┐
//!                    │  Annotation  │
//!                    │   service    │
//!                    └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ferry import data.json --index articles       # storage → index
//! ferry export articles --key dump.json         # index → storage
//! ferry annotate articles                       # enrich in place
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy (transient vs. fatal) |
//! | [`sign`] | SigV4 request signing |
//! | [`storage`] | Object-store seam and S3 client |
//! | [`client`] | Search-index seam and Elasticsearch client |
//! | [`decode`] | Incremental JSON decoding over range reads |
//! | [`scroll`] | Cursor-based pagination |
//! | [`bulk`] | NDJSON bulk mutations |
//! | [`part_writer`] | Buffered multipart upload |
//! | [`annotation`] | Entity-annotation seam and client |
//! | [`entities`] | Entity reduction and statistics |
//! | [`retry`] | Bounded retry of transient failures |
//! | [`transfer`] | Import / export / annotation pipelines |
//! | [`progress`] | Progress reporting |

pub mod annotation;
pub mod bulk;
pub mod client;
pub mod config;
pub mod decode;
pub mod entities;
pub mod error;
pub mod models;
pub mod part_writer;
pub mod progress;
pub mod retry;
pub mod scroll;
pub mod sign;
pub mod storage;
pub mod transfer;
