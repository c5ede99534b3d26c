//! Download progress rendering.

use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use console::style;
use indicatif::{HumanBytes, MultiProgress, ProgressBar};
use snapdown::download::{ChunkFailure, DownloadEvent};
use snapdown::ShardDownloadReport;

use super::OutputMode;

/// What the consumer saw on the download stream.
#[derive(Debug, Default)]
pub struct DownloadTally {
    pub done: usize,
    pub bytes: u64,
    pub failed: Vec<ChunkFailure>,
    pub shards: Vec<ShardDownloadReport>,
}

impl DownloadTally {
    fn record(&mut self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Done(p) => {
                self.done += 1;
                self.bytes += p.bytes_downloaded;
            }
            DownloadEvent::Failed(f) => self.failed.push(f.clone()),
            DownloadEvent::ShardComplete(report) => self.shards.push(report.clone()),
            DownloadEvent::Progress(_) | DownloadEvent::Quit => {}
        }
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }
}

trait DownloadView {
    fn handle(&mut self, event: &DownloadEvent);
    fn finish(&mut self, tally: &DownloadTally);
}

/// Read the stream until `Quit` (or until every sender is gone).
pub fn consume(
    rx: Receiver<DownloadEvent>,
    mode: OutputMode,
    total_chunks: usize,
) -> DownloadTally {
    let mut view: Box<dyn DownloadView> = match mode {
        OutputMode::Plain => Box::new(PlainDownload),
        OutputMode::Bars => Box::new(BarDownload::new(total_chunks)),
    };
    let mut tally = DownloadTally::default();

    for event in rx {
        tally.record(&event);
        view.handle(&event);
        if matches!(event, DownloadEvent::Quit) {
            break;
        }
    }

    view.finish(&tally);
    tally
}

// ============================================================================
// Plain output
// ============================================================================

struct PlainDownload;

impl DownloadView for PlainDownload {
    fn handle(&mut self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Progress(_) | DownloadEvent::Quit => {}
            DownloadEvent::Done(p) => {
                println!(
                    "[DONE] shard-{}/{} ({})",
                    p.shard,
                    p.chunk,
                    HumanBytes(p.bytes_total)
                );
            }
            DownloadEvent::Failed(f) => {
                eprintln!("[ERROR] shard-{}/{}: {}", f.shard, f.chunk, f.error);
            }
            DownloadEvent::ShardComplete(r) => {
                println!(
                    "Shard {}: {}/{} chunks ({} already present), {} failed",
                    r.shard,
                    r.completed,
                    r.total_chunks,
                    r.skipped,
                    r.failure_count()
                );
            }
        }
    }

    fn finish(&mut self, tally: &DownloadTally) {
        println!(
            "Downloaded {} chunks ({}), {} failed",
            tally.done,
            HumanBytes(tally.bytes),
            tally.failure_count()
        );
    }
}

// ============================================================================
// Progress bars
// ============================================================================

/// One overall bar plus one bar per chunk in flight, keyed by `(shard, chunk)`.
struct BarDownload {
    multi: MultiProgress,
    overall: ProgressBar,
    chunks: HashMap<(u32, String), ProgressBar>,
}

impl BarDownload {
    fn new(total_chunks: usize) -> Self {
        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(total_chunks as u64));
        overall.set_style(super::style(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} chunks {msg}",
        ));
        overall.enable_steady_tick(Duration::from_millis(120));

        Self {
            multi,
            overall,
            chunks: HashMap::new(),
        }
    }

    fn chunk_bar(&mut self, shard: u32, chunk: &str, total: u64) -> &ProgressBar {
        let multi = &self.multi;
        self.chunks
            .entry((shard, chunk.to_string()))
            .or_insert_with(|| {
                let bar = multi.add(ProgressBar::new(total));
                bar.set_style(super::style(
                    "  {msg:24} {bar:30.green/white} {bytes:>10}/{total_bytes:<10} {bytes_per_sec}",
                ));
                bar.set_message(super::truncate_start(&format!("{}/{}", shard, chunk), 24));
                bar
            })
    }

    fn retire(&mut self, shard: u32, chunk: &str) {
        if let Some(bar) = self.chunks.remove(&(shard, chunk.to_string())) {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
        self.overall.inc(1);
    }
}

impl DownloadView for BarDownload {
    fn handle(&mut self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Progress(p) => {
                let bar = self.chunk_bar(p.shard, &p.chunk, p.bytes_total);
                bar.set_length(p.bytes_total);
                bar.set_position(p.bytes_downloaded);
            }
            DownloadEvent::Done(p) => self.retire(p.shard, &p.chunk),
            DownloadEvent::Failed(f) => {
                self.retire(f.shard, &f.chunk);
                let _ = self.multi.println(format!(
                    "{} shard-{}/{}: {}",
                    style("error").red().bold(),
                    f.shard,
                    f.chunk,
                    f.error
                ));
            }
            DownloadEvent::ShardComplete(r) => {
                let _ = self.multi.println(format!(
                    "{} shard {}: {}/{} chunks",
                    style("✓").green(),
                    r.shard,
                    r.completed,
                    r.total_chunks
                ));
            }
            DownloadEvent::Quit => {}
        }
    }

    fn finish(&mut self, tally: &DownloadTally) {
        for (_, bar) in self.chunks.drain() {
            bar.finish_and_clear();
        }
        self.overall.finish_with_message(format!(
            "{} downloaded, {} failed",
            HumanBytes(tally.bytes),
            tally.failure_count()
        ));
    }
}
