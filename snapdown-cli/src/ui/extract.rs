//! Extraction progress rendering.

use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use console::style;
use indicatif::{HumanBytes, MultiProgress, ProgressBar};
use snapdown::{ExtractionEvent, ExtractionSummary, SnapshotError};
use tracing::debug;

use super::OutputMode;

/// What the consumer saw on the extraction stream.
#[derive(Debug, Default)]
pub struct ExtractionTally {
    pub completed: Vec<ExtractionSummary>,
    pub failed: Vec<(u32, Arc<SnapshotError>)>,
    /// Latest cumulative byte count per shard.
    pub bytes_out: BTreeMap<u32, u64>,
}

impl ExtractionTally {
    fn record(&mut self, event: &ExtractionEvent) {
        match event {
            ExtractionEvent::EntryWritten {
                shard,
                cumulative_bytes,
                ..
            } => {
                let bytes = self.bytes_out.entry(*shard).or_default();
                *bytes = (*bytes).max(*cumulative_bytes);
            }
            ExtractionEvent::ShardComplete(summary) => {
                self.bytes_out.insert(summary.shard, summary.bytes_written);
                self.completed.push(summary.clone());
            }
            ExtractionEvent::Failed { shard, error } => {
                self.failed.push((*shard, Arc::clone(error)));
            }
            ExtractionEvent::PartConsumed { .. } | ExtractionEvent::Quit => {}
        }
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }
}

trait ExtractionView {
    fn handle(&mut self, event: &ExtractionEvent);
    fn finish(&mut self, tally: &ExtractionTally);
}

/// Read the stream until `Quit` (or until every sender is gone).
pub fn consume(rx: Receiver<ExtractionEvent>, mode: OutputMode) -> ExtractionTally {
    let mut view: Box<dyn ExtractionView> = match mode {
        OutputMode::Plain => Box::new(PlainExtraction),
        OutputMode::Bars => Box::new(BarExtraction::new()),
    };
    let mut tally = ExtractionTally::default();

    for event in rx {
        tally.record(&event);
        view.handle(&event);
        if matches!(event, ExtractionEvent::Quit) {
            break;
        }
    }

    view.finish(&tally);
    tally
}

// ============================================================================
// Plain output
// ============================================================================

struct PlainExtraction;

impl ExtractionView for PlainExtraction {
    fn handle(&mut self, event: &ExtractionEvent) {
        match event {
            ExtractionEvent::PartConsumed {
                shard,
                index,
                total,
            } => println!("[PART] shard-{}: {}/{}", shard, index, total),
            ExtractionEvent::EntryWritten {
                path,
                cumulative_bytes,
                ..
            } => debug!(path = %path.display(), cumulative_bytes, "Extracted"),
            ExtractionEvent::Failed { shard, error } => {
                eprintln!("[ERROR] shard-{}: {}", shard, error);
            }
            ExtractionEvent::ShardComplete(s) => println!(
                "[DONE] shard-{}: {} entries, {} written",
                s.shard,
                s.entries,
                HumanBytes(s.bytes_written)
            ),
            ExtractionEvent::Quit => {}
        }
    }

    fn finish(&mut self, tally: &ExtractionTally) {
        for (shard, bytes) in &tally.bytes_out {
            println!("Total bytes out for shard-{}: {}", shard, HumanBytes(*bytes));
        }
    }
}

// ============================================================================
// Progress bars
// ============================================================================

/// One bar per shard, advanced per part file streamed.
struct BarExtraction {
    multi: MultiProgress,
    shards: BTreeMap<u32, ProgressBar>,
}

impl BarExtraction {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            shards: BTreeMap::new(),
        }
    }

    fn shard_bar(&mut self, shard: u32) -> &ProgressBar {
        let multi = &self.multi;
        self.shards.entry(shard).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(0));
            bar.set_style(super::style(
                "{prefix:>9} {bar:30.cyan/blue} {pos}/{len} parts {msg}",
            ));
            bar.set_prefix(format!("shard {}", shard));
            bar
        })
    }
}

impl ExtractionView for BarExtraction {
    fn handle(&mut self, event: &ExtractionEvent) {
        match event {
            ExtractionEvent::PartConsumed {
                shard,
                index,
                total,
            } => {
                let bar = self.shard_bar(*shard);
                bar.set_length(*total as u64);
                bar.set_position(*index as u64);
            }
            ExtractionEvent::EntryWritten {
                shard,
                path,
                cumulative_bytes,
                ..
            } => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let bar = self.shard_bar(*shard);
                bar.set_message(format!(
                    "{} {}",
                    HumanBytes(*cumulative_bytes),
                    super::truncate_start(&name, 28)
                ));
            }
            ExtractionEvent::Failed { shard, error } => {
                let bar = self.shard_bar(*shard);
                bar.abandon_with_message(format!("{}", style("failed").red().bold()));
                let _ = self.multi.println(format!(
                    "{} shard {}: {}",
                    style("error").red().bold(),
                    shard,
                    error
                ));
            }
            ExtractionEvent::ShardComplete(s) => {
                let bar = self.shard_bar(s.shard);
                bar.finish_with_message(format!(
                    "{} {} entries, {}",
                    style("✓").green(),
                    s.entries,
                    HumanBytes(s.bytes_written)
                ));
            }
            ExtractionEvent::Quit => {}
        }
    }

    fn finish(&mut self, _tally: &ExtractionTally) {
        for bar in self.shards.values() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }
}
