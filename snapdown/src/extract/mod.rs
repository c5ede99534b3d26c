//! Shard archive extraction.
//!
//! A downloaded shard is a gzip-compressed tar stream split across part
//! files. Extraction reads the parts back in name order as one stream
//! (`assembler`) and unpacks it with one of two interchangeable strategies:
//!
//! - [`NativeExtractor`]: in-process gzip + tar decoding
//! - [`ShellExtractor`]: pipes the stream into the system `tar`
//!
//! Both publish the same [`ExtractionEvent`] shape, so consumers do not care
//! which one ran. [`select_extractor`] picks one at startup.
//!
//! # Architecture
//!
//! ```text
//! ShardExtraction (Idle → Streaming → Completed | Failed)
//!         │
//!         └── ArchiveExtractor (trait)
//!                 ├── NativeExtractor ── PartStream → MultiGzDecoder → tar::Archive
//!                 └── ShellExtractor  ── PartStream → tar -xzvf - (stdin)
//!                                            stdout/stderr → entry trackers
//! ```

mod assembler;
mod native;
mod shell;

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::SnapshotError;
use crate::progress::{Delivery, ProgressSender};

pub use assembler::{list_parts, PartCallback, PartStream};
pub use native::NativeExtractor;
pub use shell::ShellExtractor;

/// Extraction progress stream.
#[derive(Debug, Clone)]
pub enum ExtractionEvent {
    /// A part file was fully streamed (best-effort).
    PartConsumed { shard: u32, index: usize, total: usize },
    /// An archive entry was written (best-effort).
    ///
    /// `total_known` is the entry count when the strategy knows it up front.
    EntryWritten {
        shard: u32,
        index: usize,
        total_known: Option<usize>,
        path: PathBuf,
        cumulative_bytes: u64,
    },
    /// The shard's extraction stopped with an error.
    Failed { shard: u32, error: Arc<SnapshotError> },
    /// The shard was fully extracted.
    ShardComplete(ExtractionSummary),
    /// No more events will follow.
    Quit,
}

impl ExtractionEvent {
    pub fn shard(&self) -> Option<u32> {
        match self {
            ExtractionEvent::PartConsumed { shard, .. }
            | ExtractionEvent::EntryWritten { shard, .. }
            | ExtractionEvent::Failed { shard, .. } => Some(*shard),
            ExtractionEvent::ShardComplete(summary) => Some(summary.shard),
            ExtractionEvent::Quit => None,
        }
    }
}

impl Delivery for ExtractionEvent {
    fn is_terminal(&self) -> bool {
        !matches!(
            self,
            ExtractionEvent::PartConsumed { .. } | ExtractionEvent::EntryWritten { .. }
        )
    }
}

/// Totals for one extracted shard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub shard: u32,
    /// Entries materialized (directories and files).
    pub entries: usize,
    /// Payload bytes written to regular files.
    pub bytes_written: u64,
    /// Part files streamed.
    pub parts: usize,
}

/// Strategy for unpacking one shard.
pub trait ArchiveExtractor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Unpack the parts in `source_dir` into `dest_dir`.
    ///
    /// Emits only best-effort events; the caller owns the terminal one.
    /// Any error stops the shard, there is no partial recovery.
    fn extract(
        &self,
        shard: u32,
        source_dir: &Path,
        dest_dir: &Path,
        events: &ProgressSender<ExtractionEvent>,
    ) -> Result<ExtractionSummary, SnapshotError>;
}

/// Lifecycle of one shard's extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionPhase {
    Idle,
    Streaming,
    Completed,
    Failed,
}

impl ExtractionPhase {
    pub fn is_finished(&self) -> bool {
        matches!(self, ExtractionPhase::Completed | ExtractionPhase::Failed)
    }
}

/// One shard's extraction run.
///
/// Runs at most once. The terminal event (`ShardComplete` or `Failed`) is
/// delivered exactly once, when the run leaves `Streaming`.
#[derive(Debug)]
pub struct ShardExtraction {
    shard: u32,
    source_dir: PathBuf,
    dest_dir: PathBuf,
    phase: ExtractionPhase,
}

impl ShardExtraction {
    pub fn new(shard: u32, source_dir: impl Into<PathBuf>, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            shard,
            source_dir: source_dir.into(),
            dest_dir: dest_dir.into(),
            phase: ExtractionPhase::Idle,
        }
    }

    pub fn shard(&self) -> u32 {
        self.shard
    }

    pub fn phase(&self) -> ExtractionPhase {
        self.phase
    }

    /// Run the extraction and deliver its terminal event.
    ///
    /// The error is shared with the `Failed` event.
    pub fn run(
        &mut self,
        extractor: &dyn ArchiveExtractor,
        events: &ProgressSender<ExtractionEvent>,
    ) -> Result<ExtractionSummary, Arc<SnapshotError>> {
        if self.phase != ExtractionPhase::Idle {
            return Err(Arc::new(SnapshotError::InvalidConfig(format!(
                "extraction of shard {} already ran",
                self.shard
            ))));
        }

        self.phase = ExtractionPhase::Streaming;
        info!(
            shard = self.shard,
            strategy = extractor.name(),
            source = %self.source_dir.display(),
            dest = %self.dest_dir.display(),
            "Extracting shard"
        );

        match extractor.extract(self.shard, &self.source_dir, &self.dest_dir, events) {
            Ok(summary) => {
                self.phase = ExtractionPhase::Completed;
                info!(
                    shard = self.shard,
                    entries = summary.entries,
                    bytes = summary.bytes_written,
                    "Shard extracted"
                );
                events.send(ExtractionEvent::ShardComplete(summary.clone()));
                Ok(summary)
            }
            Err(e) => {
                self.phase = ExtractionPhase::Failed;
                warn!(shard = self.shard, error = %e, "Shard extraction failed");
                let error = Arc::new(e);
                events.send(ExtractionEvent::Failed {
                    shard: self.shard,
                    error: Arc::clone(&error),
                });
                Err(error)
            }
        }
    }
}

/// Whether `tool --version` runs successfully.
pub fn tool_available(tool: &str) -> bool {
    Command::new(tool)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Pick the extraction strategy.
///
/// The external `tar` path is used when preferred and available.
pub fn select_extractor(prefer_external: bool) -> Box<dyn ArchiveExtractor> {
    if prefer_external {
        let shell = ShellExtractor::new();
        if tool_available(shell.tool()) {
            debug!(tool = shell.tool(), "Using external extractor");
            return Box::new(shell);
        }
        warn!(
            tool = shell.tool(),
            "External tool not available, falling back to native extraction"
        );
    }
    Box::new(NativeExtractor::new())
}
