//! Extraction through the system `tar`.
//!
//! The part stream is piped into `tar -xzvf - -C <dest>`. Three threads share
//! the child's pipes, each draining its own so that back-pressure on one pipe
//! cannot stall another:
//!
//! - feeder: part stream → stdin, one `PartConsumed` tick per part
//! - two trackers: stdout / stderr listing lines → `EntryWritten`
//!
//! Verbose `tar` names an entry when it starts writing it, so a tracker only
//! reports a path once the next line (or end of stream) shows it finished.
//! All three threads are joined before the exit status is read.

use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::assembler::PartStream;
use super::{ArchiveExtractor, ExtractionEvent, ExtractionSummary};
use crate::error::SnapshotError;
use crate::progress::ProgressSender;

/// Pipe buffer between the part stream and `tar` (1MB).
const FEED_BUFFER_SIZE: usize = 1024 * 1024;

/// Diagnostic lines kept for the error message.
const MAX_DIAGNOSTICS: usize = 8;

/// Shell-based archive extractor.
///
/// Uses the system `tar` for decompression and unpacking. Overwrite and
/// permission semantics are those of the tool.
#[derive(Debug, Clone)]
pub struct ShellExtractor {
    tool: String,
}

impl Default for ShellExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellExtractor {
    /// Create an extractor using `tar` from `PATH`.
    pub fn new() -> Self {
        Self::with_tool("tar")
    }

    /// Create an extractor using a specific `tar` binary.
    pub fn with_tool(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }
}

/// Counters shared by both listing trackers.
#[derive(Debug, Default)]
struct EntryTally {
    entries: AtomicUsize,
    bytes: AtomicU64,
    diagnostics: Mutex<Vec<String>>,
}

impl EntryTally {
    /// Account for one finished path and publish it.
    fn record(
        &self,
        shard: u32,
        dest: &Path,
        name: &str,
        events: &ProgressSender<ExtractionEvent>,
    ) {
        let path = dest.join(name);
        let size = match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => 0,
        };
        let index = self.entries.fetch_add(1, Ordering::SeqCst) + 1;
        let cumulative_bytes = self.bytes.fetch_add(size, Ordering::SeqCst) + size;

        events.send(ExtractionEvent::EntryWritten {
            shard,
            index,
            total_known: None,
            path,
            cumulative_bytes,
        });
    }

    fn note(&self, line: &str) {
        let mut diagnostics = self.diagnostics.lock();
        if diagnostics.len() == MAX_DIAGNOSTICS {
            diagnostics.remove(0);
        }
        diagnostics.push(line.to_string());
    }
}

/// Entry name from one line of `tar -v` output.
///
/// bsdtar prefixes names with `x `. Lines naming the tool itself are
/// diagnostics, not entries.
fn parse_listing_line<'a>(line: &'a str, tool: &str) -> Listing<'a> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.trim().is_empty() {
        return Listing::Blank;
    }

    let tool_name = Path::new(tool)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(tool);
    if line.starts_with(&format!("{}: ", tool_name)) || line.starts_with("gzip: ") {
        return Listing::Diagnostic(line);
    }

    Listing::Entry(line.strip_prefix("x ").unwrap_or(line))
}

#[derive(Debug, PartialEq, Eq)]
enum Listing<'a> {
    Blank,
    Entry(&'a str),
    Diagnostic(&'a str),
}

/// Follow one listing stream, reporting each entry one line behind.
fn track_listing(
    pipe: impl Read,
    tool: &str,
    shard: u32,
    dest: &Path,
    tally: &EntryTally,
    events: &ProgressSender<ExtractionEvent>,
) -> io::Result<()> {
    let mut reader = BufReader::new(pipe);
    let mut line = Vec::new();
    let mut pending: Option<String> = None;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        match parse_listing_line(&text, tool) {
            Listing::Blank => {}
            Listing::Diagnostic(message) => {
                debug!(shard, line = message, "tar diagnostic");
                tally.note(message);
            }
            Listing::Entry(name) => {
                if let Some(finished) = pending.replace(name.to_string()) {
                    tally.record(shard, dest, &finished, events);
                }
            }
        }
    }

    if let Some(finished) = pending.take() {
        tally.record(shard, dest, &finished, events);
    }
    Ok(())
}

/// Copy the part stream into `tar`'s stdin, closing it at the end.
fn feed(stream: PartStream, mut stdin: impl Write) -> io::Result<u64> {
    let mut reader = BufReader::with_capacity(FEED_BUFFER_SIZE, stream);
    let copied = io::copy(&mut reader, &mut stdin)?;
    stdin.flush()?;
    Ok(copied)
}

impl ShellExtractor {
    fn failure(
        &self,
        source_dir: &Path,
        status: ExitStatus,
        tally: &EntryTally,
    ) -> SnapshotError {
        let diagnostics = tally.diagnostics.lock();
        let detail = if diagnostics.is_empty() {
            String::new()
        } else {
            format!(": {}", diagnostics.join("; "))
        };
        SnapshotError::ExtractionEntry {
            path: source_dir.to_path_buf(),
            reason: format!("{} exited with {}{}", self.tool, status, detail),
        }
    }
}

impl ArchiveExtractor for ShellExtractor {
    fn name(&self) -> &'static str {
        "tar"
    }

    fn extract(
        &self,
        shard: u32,
        source_dir: &Path,
        dest_dir: &Path,
        events: &ProgressSender<ExtractionEvent>,
    ) -> Result<ExtractionSummary, SnapshotError> {
        let stream = PartStream::open_dir(source_dir)?;
        let parts = stream.parts().len();

        let ticks = events.clone();
        let stream = stream.with_part_callback(Box::new(move |index, total| {
            ticks.send(ExtractionEvent::PartConsumed {
                shard,
                index,
                total,
            });
        }));

        fs::create_dir_all(dest_dir).map_err(|e| SnapshotError::ExtractionSetup {
            path: dest_dir.to_path_buf(),
            reason: e.to_string(),
        })?;

        let setup = |reason: String| SnapshotError::ExtractionSetup {
            path: source_dir.to_path_buf(),
            reason,
        };

        let mut child = Command::new(&self.tool)
            .args(["-xzvf", "-", "-C"])
            .arg(dest_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| setup(format!("failed to run {}: {}", self.tool, e)))?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            // Without its pipes the child can only be reaped.
            let _ = child.kill();
            let _ = child.wait();
            return Err(setup(format!("{} pipes unavailable", self.tool)));
        };

        let tally = EntryTally::default();
        let (fed, listed_out, listed_err) = thread::scope(|scope| {
            let feeder = scope.spawn(move || feed(stream, stdin));
            let out = scope
                .spawn(|| track_listing(stdout, &self.tool, shard, dest_dir, &tally, events));
            let err = scope
                .spawn(|| track_listing(stderr, &self.tool, shard, dest_dir, &tally, events));

            (feeder.join(), out.join(), err.join())
        });

        let status = child
            .wait()
            .map_err(|e| setup(format!("failed to wait for {}: {}", self.tool, e)))?;

        if !status.success() {
            return Err(self.failure(source_dir, status, &tally));
        }

        let panicked = |task: &str| SnapshotError::ExtractionEntry {
            path: source_dir.to_path_buf(),
            reason: format!("{} thread panicked", task),
        };
        match fed.map_err(|_| panicked("feeder"))? {
            Ok(bytes) => debug!(shard, bytes, "Part stream fed to tar"),
            // tar may stop reading once it has seen the end-of-archive blocks.
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!(shard, "tar closed its input early")
            }
            Err(e) => {
                return Err(SnapshotError::ExtractionEntry {
                    path: source_dir.to_path_buf(),
                    reason: format!("streaming parts: {}", e),
                })
            }
        }
        for listed in [listed_out, listed_err] {
            if let Err(e) = listed.map_err(|_| panicked("listing"))? {
                warn!(shard, error = %e, "Lost part of the tar listing");
            }
        }

        Ok(ExtractionSummary {
            shard,
            entries: tally.entries.load(Ordering::SeqCst),
            bytes_written: tally.bytes.load(Ordering::SeqCst),
            parts,
        })
    }
}
