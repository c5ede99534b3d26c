//! Whole-snapshot download and extraction.
//!
//! Shards are processed one after another in ascending id order. Each side
//! ends its event stream with a single `Quit`, delivered even when a shard
//! could not be started, so a consumer can always read until `Quit`.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::{shard_dir, SnapshotConfig};
use crate::download::{
    ChunkFetcher, DownloadEvent, HttpChunkFetcher, ShardDownloadCoordinator, ShardDownloadReport,
};
use crate::error::SnapshotResult;
use crate::extract::{ArchiveExtractor, ExtractionEvent, ExtractionSummary, ShardExtraction};
use crate::manifest::{ManifestOrigin, ManifestSet, MetadataClient};
use crate::progress::ProgressSender;

/// Load the saved manifests in the output directory or fetch fresh ones.
pub fn prepare_manifests(
    config: &SnapshotConfig,
) -> SnapshotResult<(ManifestSet, ManifestOrigin)> {
    let client = MetadataClient::new(&config.endpoint, config.network, config.timeout)?;
    ManifestSet::load_or_fetch(&config.output_dir, &client, &config.shards)
}

/// Downloads every shard of a manifest set.
#[derive(Debug)]
pub struct SnapshotDownloader<F: ChunkFetcher = HttpChunkFetcher> {
    coordinator: ShardDownloadCoordinator<F>,
}

impl SnapshotDownloader<HttpChunkFetcher> {
    /// Create a downloader using HTTP.
    pub fn from_config(config: &SnapshotConfig) -> SnapshotResult<Self> {
        Ok(Self::new(ShardDownloadCoordinator::from_config(config)?))
    }
}

impl<F: ChunkFetcher> SnapshotDownloader<F> {
    pub fn new(coordinator: ShardDownloadCoordinator<F>) -> Self {
        Self { coordinator }
    }

    /// Download all shards, then deliver `Quit`.
    ///
    /// Stops at the first shard whose directory cannot be created; chunk
    /// failures are only reported and never stop the run.
    pub fn run(
        &self,
        manifests: &ManifestSet,
        events: &ProgressSender<DownloadEvent>,
    ) -> SnapshotResult<Vec<ShardDownloadReport>> {
        let result = self.run_shards(manifests, events);
        events.send(DownloadEvent::Quit);
        result
    }

    fn run_shards(
        &self,
        manifests: &ManifestSet,
        events: &ProgressSender<DownloadEvent>,
    ) -> SnapshotResult<Vec<ShardDownloadReport>> {
        info!(
            shards = manifests.len(),
            chunks = manifests.total_chunks(),
            "Downloading snapshot"
        );

        let mut reports = Vec::with_capacity(manifests.len());
        for (shard, manifest) in manifests.iter() {
            reports.push(self.coordinator.run(shard, manifest, events)?);
        }
        Ok(reports)
    }
}

/// Extracts downloaded shards into one destination.
pub struct SnapshotExtractor {
    extractor: Box<dyn ArchiveExtractor>,
    source_dir: PathBuf,
    dest_dir: PathBuf,
}

impl SnapshotExtractor {
    /// # Arguments
    ///
    /// * `extractor` - Strategy used for every shard
    /// * `source_dir` - Download directory holding `shard-<N>/`
    /// * `dest_dir` - Where archive entries are written
    pub fn new(
        extractor: Box<dyn ArchiveExtractor>,
        source_dir: impl Into<PathBuf>,
        dest_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            extractor,
            source_dir: source_dir.into(),
            dest_dir: dest_dir.into(),
        }
    }

    pub fn strategy(&self) -> &'static str {
        self.extractor.name()
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// Extract each shard in order, then deliver `Quit`.
    ///
    /// A failed shard is reported and the next one is still attempted.
    /// Returns the summaries of the shards that completed.
    pub fn run(
        &self,
        shards: &[u32],
        events: &ProgressSender<ExtractionEvent>,
    ) -> Vec<ExtractionSummary> {
        let mut completed = Vec::with_capacity(shards.len());
        let mut ordered = shards.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        for shard in ordered {
            let source = shard_dir(&self.source_dir, shard);
            let mut extraction = ShardExtraction::new(shard, source, &self.dest_dir);
            match extraction.run(self.extractor.as_ref(), events) {
                Ok(summary) => completed.push(summary),
                Err(e) => warn!(shard, error = %e, "Continuing with next shard"),
            }
        }

        events.send(ExtractionEvent::Quit);
        completed
    }
}

impl std::fmt::Debug for SnapshotExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotExtractor")
            .field("strategy", &self.extractor.name())
            .field("source_dir", &self.source_dir)
            .field("dest_dir", &self.dest_dir)
            .finish()
    }
}
