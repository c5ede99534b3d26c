//! Bounded worker pool for one shard's chunks.
//!
//! All chunk jobs are queued up front and the queue is closed; `N` workers
//! drain it. A failed chunk becomes a `Failed` event and the worker moves on,
//! so one bad chunk never aborts its siblings. `run` returns only after every
//! job has reached a terminal event.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::events::{ChunkFailure, ChunkProgress, DownloadEvent};
use super::http::{ChunkFetcher, HttpChunkFetcher};
use super::state::ShardDownloadReport;
use crate::config::{shard_dir, SnapshotConfig};
use crate::error::{SnapshotError, SnapshotResult};
use crate::manifest::{ChunkJob, ShardManifest};
use crate::progress::ProgressSender;

/// Downloads the chunks of one shard with bounded concurrency.
#[derive(Debug)]
pub struct ShardDownloadCoordinator<F: ChunkFetcher> {
    fetcher: F,
    endpoint: String,
    output_dir: PathBuf,
    concurrency: usize,
}

impl ShardDownloadCoordinator<HttpChunkFetcher> {
    /// Create a coordinator using the HTTP fetcher.
    pub fn from_config(config: &SnapshotConfig) -> SnapshotResult<Self> {
        Ok(Self::new(
            HttpChunkFetcher::from_config(config)?,
            config.endpoint.clone(),
            config.output_dir.clone(),
            config.concurrency,
        ))
    }
}

impl<F: ChunkFetcher> ShardDownloadCoordinator<F> {
    /// Create a coordinator.
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Downloads individual chunks
    /// * `endpoint` - Base URL the manifest key is resolved against
    /// * `output_dir` - Base directory; chunks land in `shard-<N>/`
    /// * `concurrency` - Worker count (minimum 1)
    pub fn new(
        fetcher: F,
        endpoint: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        concurrency: usize,
    ) -> Self {
        Self {
            fetcher,
            endpoint: endpoint.into(),
            output_dir: output_dir.into(),
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Download every chunk in `manifest`.
    ///
    /// Per-chunk failures are reported as events and collected in the report.
    /// Only a failure to create the shard directory is returned as an error,
    /// in which case no job is started.
    pub fn run(
        &self,
        shard: u32,
        manifest: &ShardManifest,
        events: &ProgressSender<DownloadEvent>,
    ) -> SnapshotResult<ShardDownloadReport> {
        let dir = shard_dir(&self.output_dir, shard);
        fs::create_dir_all(&dir).map_err(|e| SnapshotError::CreateDirFailed {
            path: dir.clone(),
            source: e,
        })?;

        let jobs = manifest.jobs(shard);
        let total = jobs.len();
        info!(
            shard,
            chunks = total,
            workers = self.concurrency.min(total),
            "Downloading shard"
        );

        let report = self.run_jobs(shard, jobs, manifest, &dir, events);

        info!(
            shard,
            completed = report.completed,
            skipped = report.skipped,
            failed = report.failure_count(),
            "Shard download finished"
        );
        events.send(DownloadEvent::ShardComplete(report.clone()));

        Ok(report)
    }

    fn run_jobs(
        &self,
        shard: u32,
        jobs: Vec<ChunkJob>,
        manifest: &ShardManifest,
        dir: &Path,
        events: &ProgressSender<DownloadEvent>,
    ) -> ShardDownloadReport {
        let mut report = ShardDownloadReport::new(shard, jobs.len());
        if jobs.is_empty() {
            return report;
        }

        let workers = self.concurrency.min(jobs.len());

        // Fill and close the queue; workers stop once it is drained.
        let (job_tx, job_rx) = mpsc::channel();
        for job in jobs {
            // Receiver is alive until the scope below ends.
            let _ = job_tx.send(job);
        }
        drop(job_tx);
        let queue = Mutex::new(job_rx);

        thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    let queue = &queue;
                    let events = events.clone();
                    scope.spawn(move || {
                        let mut tally = ShardDownloadReport::new(shard, 0);
                        loop {
                            let next = queue.lock().recv();
                            let Ok(job) = next else { break };
                            self.process(worker, &job, manifest, dir, &events, &mut tally);
                        }
                        tally
                    })
                })
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok(tally) => report.merge(tally),
                    Err(_) => error!(shard, "Download worker panicked"),
                }
            }
        });

        report
    }

    /// Fetch one chunk and publish its terminal event.
    fn process(
        &self,
        worker: usize,
        job: &ChunkJob,
        manifest: &ShardManifest,
        dir: &Path,
        events: &ProgressSender<DownloadEvent>,
        tally: &mut ShardDownloadReport,
    ) {
        let url = manifest.chunk_url(&self.endpoint, &job.chunk_name);
        debug!(worker, shard = job.shard, chunk = %job.chunk_name, %url, "Fetching chunk");

        let mut on_progress = |downloaded: u64, total: u64| {
            events.send(DownloadEvent::Progress(ChunkProgress {
                shard: job.shard,
                chunk: job.chunk_name.clone(),
                bytes_downloaded: downloaded,
                bytes_total: total,
            }));
        };

        let fetched = chunk_path(dir, &job.chunk_name, &url)
            .and_then(|dest| self.fetcher.fetch(&url, &dest, &mut on_progress));

        match fetched {
            Ok(outcome) => {
                tally.record_success(outcome.bytes, outcome.skipped);
                events.send(DownloadEvent::Done(ChunkProgress {
                    shard: job.shard,
                    chunk: job.chunk_name.clone(),
                    bytes_downloaded: outcome.bytes,
                    bytes_total: outcome.bytes,
                }));
            }
            Err(e) => {
                warn!(shard = job.shard, chunk = %job.chunk_name, error = %e, "Chunk download failed");
                let failure = ChunkFailure {
                    shard: job.shard,
                    chunk: job.chunk_name.clone(),
                    error: Arc::new(e),
                };
                tally.record_failure(failure.clone());
                events.send(DownloadEvent::Failed(failure));
            }
        }
    }
}

/// Local path of a chunk. Names may nest but never leave the shard directory.
fn chunk_path(dir: &Path, chunk_name: &str, url: &str) -> SnapshotResult<PathBuf> {
    let name = Path::new(chunk_name);
    let contained = name
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !contained || !name.components().any(|c| matches!(c, Component::Normal(_))) {
        return Err(SnapshotError::Transfer {
            url: url.to_string(),
            reason: format!("chunk name {:?} escapes the shard directory", chunk_name),
        });
    }
    Ok(dir.join(name))
}
