//! `snapdown extract`

use std::path::Path;
use std::thread;

use snapdown::{progress, select_extractor, SnapshotExtractor};
use tracing::info;

use super::{shards_in, ExtractArgs, Settings};
use crate::error::CliError;
use crate::ui::extract::{consume, ExtractionTally};
use crate::ui::OutputMode;

pub fn run(settings: &Settings, args: &ExtractArgs) -> Result<(), CliError> {
    let tally = extract(
        settings,
        &args.source,
        &args.dest,
        args.native,
        OutputMode::detect(args.no_tty),
    )?;

    match tally.failure_count() {
        0 => Ok(()),
        failed => Err(CliError::Extraction { failed }),
    }
}

pub(crate) fn extract(
    settings: &Settings,
    source: &Path,
    dest: &Path,
    native: bool,
    mode: OutputMode,
) -> Result<ExtractionTally, CliError> {
    let shards = shards_in(source);
    let extractor = SnapshotExtractor::new(
        select_extractor(settings.prefer_external(native)),
        source,
        dest,
    );
    println!(
        "Extracting {} shard(s) into {} using {}",
        shards.len(),
        dest.display(),
        extractor.strategy()
    );

    let (tx, rx) = progress::channel(settings.channel_capacity());
    let (tally, result) = thread::scope(|s| {
        let producer = s.spawn(move || extractor.run(&shards, &tx));
        let tally = consume(rx, mode);
        (tally, producer.join())
    });

    let completed =
        result.map_err(|_| CliError::Internal("extraction thread panicked".to_string()))?;
    info!(
        completed = completed.len(),
        failed = tally.failure_count(),
        "Extraction finished"
    );
    Ok(tally)
}
