//! Per-shard download outcome tracking.

use super::events::ChunkFailure;

/// Outcome of downloading one shard's chunks.
#[derive(Debug, Clone)]
pub struct ShardDownloadReport {
    /// Shard id.
    pub shard: u32,
    /// Number of chunks in the manifest.
    pub total_chunks: usize,
    /// Chunks that reached `Done`, including skipped ones.
    pub completed: usize,
    /// Chunks already present locally and not re-downloaded.
    pub skipped: usize,
    /// Total bytes of completed chunks.
    pub bytes: u64,
    /// Chunks that failed.
    pub failed: Vec<ChunkFailure>,
}

impl ShardDownloadReport {
    /// Create an empty report.
    pub fn new(shard: u32, total_chunks: usize) -> Self {
        Self {
            shard,
            total_chunks,
            completed: 0,
            skipped: 0,
            bytes: 0,
            failed: Vec::new(),
        }
    }

    /// Every chunk completed and none failed.
    pub fn is_complete(&self) -> bool {
        self.completed == self.total_chunks && self.failed.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    /// Chunks that reached a terminal state.
    pub fn finished(&self) -> usize {
        self.completed + self.failed.len()
    }

    /// Progress by chunk count, as a percentage.
    pub fn progress_percent(&self) -> f64 {
        if self.total_chunks == 0 {
            100.0
        } else {
            (self.finished() as f64 / self.total_chunks as f64) * 100.0
        }
    }

    /// Record a completed chunk.
    pub fn record_success(&mut self, bytes: u64, skipped: bool) {
        self.completed += 1;
        self.bytes += bytes;
        if skipped {
            self.skipped += 1;
        }
    }

    /// Record a failed chunk.
    pub fn record_failure(&mut self, failure: ChunkFailure) {
        self.failed.push(failure);
    }

    /// Fold a worker's tally into this report.
    pub fn merge(&mut self, other: ShardDownloadReport) {
        self.completed += other.completed;
        self.skipped += other.skipped;
        self.bytes += other.bytes;
        self.failed.extend(other.failed);
    }
}
