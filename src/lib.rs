//! VFX Ingest - rule-driven ingestion of delivered media
//!
//! This library turns a delivery folder into publish-ready records:
//! - Frame sequence grouping of the files in each directory
//! - Category classification from a TOML rule catalog
//! - Shot/sequence/scan-id extraction and destination path rendering
//! - Resolution probing (DPX headers, raster decoders, ffprobe)
//! - Row editing, validation and version resolution
//! - Copy-based publishing with a manifest of tracking/transfer requests

pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metadata;
pub mod probe;
pub mod publish;
pub mod record;
pub mod sequence;
pub mod transfer;

pub use classify::{CategoryMatcher, Classification, MatchReason};
pub use cli::Cli;
pub use config::{ConfigError, RuleCatalog, RuleEntry};
pub use error::{Error, Result};
pub use ingest::{IngestResultSet, IngestSession, ScanStats, ValidationReport};
pub use metadata::MetadataBuilder;
pub use probe::{Resolution, ResolutionProber, ResolutionSource};
pub use publish::{ManifestSink, PublishReport, PublishSink, PublishStatus, Publisher};
pub use record::{FieldRecord, FieldValue};
pub use sequence::FileSequence;
pub use transfer::{JobState, TransferRequest};
