//! Snapdown - chunked snapshot download and extraction
//!
//! This library downloads a sharded database snapshot from an object store
//! and unpacks it:
//!
//! - [`manifest`]: per-shard manifests, fetched once and saved for resume
//! - [`download`]: bounded-concurrency chunk downloads with size-based resume
//! - [`extract`]: streaming extraction of split `.tar.gz` part files
//! - [`snapshot`]: sequential whole-snapshot runs over all shards
//! - [`progress`]: the event channel both pipelines report on
//!
//! Progress is published as typed events on a bounded channel. Intermediate
//! progress is best-effort; terminal events are always delivered.

pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod manifest;
pub mod progress;
pub mod snapshot;

pub use config::{ConfigFile, SnapshotConfig};
pub use download::{DownloadEvent, ShardDownloadCoordinator, ShardDownloadReport};
pub use error::{SnapshotError, SnapshotResult};
pub use extract::{select_extractor, ArchiveExtractor, ExtractionEvent, ExtractionSummary};
pub use manifest::{ManifestSet, Network, ShardManifest};
pub use snapshot::{prepare_manifests, SnapshotDownloader, SnapshotExtractor};
