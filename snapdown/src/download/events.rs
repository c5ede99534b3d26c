//! Events published by the download pipeline.

use std::sync::Arc;

use super::state::ShardDownloadReport;
use crate::error::SnapshotError;
use crate::progress::Delivery;

/// Point-in-time byte count for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkProgress {
    pub shard: u32,
    pub chunk: String,
    pub bytes_downloaded: u64,
    pub bytes_total: u64,
}

/// A chunk that reached a terminal error.
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    pub shard: u32,
    pub chunk: String,
    pub error: Arc<SnapshotError>,
}

/// Download progress stream.
///
/// Per chunk, `Progress` values never decrease and exactly one of `Done` or
/// `Failed` is sent. Across chunks there is no ordering; consumers key their
/// state by `(shard, chunk)`.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// Intermediate progress (best-effort).
    Progress(ChunkProgress),
    /// Chunk complete, `bytes_downloaded == bytes_total`.
    Done(ChunkProgress),
    /// Chunk failed.
    Failed(ChunkFailure),
    /// Every chunk of a shard reached a terminal state.
    ShardComplete(ShardDownloadReport),
    /// No more events will follow.
    Quit,
}

impl DownloadEvent {
    /// `(shard, chunk)` identity of a per-chunk event.
    pub fn chunk_key(&self) -> Option<(u32, &str)> {
        match self {
            DownloadEvent::Progress(p) | DownloadEvent::Done(p) => Some((p.shard, &p.chunk)),
            DownloadEvent::Failed(f) => Some((f.shard, &f.chunk)),
            DownloadEvent::ShardComplete(_) | DownloadEvent::Quit => None,
        }
    }
}

impl Delivery for DownloadEvent {
    fn is_terminal(&self) -> bool {
        !matches!(self, DownloadEvent::Progress(_))
    }
}
