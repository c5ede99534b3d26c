//! `snapdown download`

use std::thread;

use chrono::Utc;
use snapdown::manifest::{format_age, ManifestOrigin};
use snapdown::{prepare_manifests, progress, SnapshotConfig, SnapshotDownloader};
use tracing::info;

use super::{DownloadArgs, Settings};
use crate::error::CliError;
use crate::ui::download::{consume, DownloadTally};
use crate::ui::OutputMode;

/// Download every shard, rendering progress until the stream ends.
///
/// Returns the tally when no chunk failed.
pub fn run(settings: &Settings, args: &DownloadArgs) -> Result<DownloadTally, CliError> {
    let config = settings.snapshot_config(args)?;
    let tally = download(&config, OutputMode::detect(args.no_tty))?;

    match tally.failure_count() {
        0 => Ok(tally),
        failed => Err(CliError::Download { failed }),
    }
}

pub(crate) fn download(
    config: &SnapshotConfig,
    mode: OutputMode,
) -> Result<DownloadTally, CliError> {
    let (manifests, origin) = prepare_manifests(config)?;

    match origin {
        ManifestOrigin::Resumed => println!(
            "Resuming download from {}",
            config.manifest_path().display()
        ),
        ManifestOrigin::Fresh => println!("Fetched latest snapshot metadata ({})", config.network),
    }
    let now = Utc::now();
    for (shard, manifest) in manifests.iter() {
        println!(
            "  shard {}: {} chunks, created {}",
            shard,
            manifest.chunks.len(),
            format_age(manifest.timestamp, now)
        );
    }

    let downloader = SnapshotDownloader::from_config(config)?;
    let (tx, rx) = progress::channel(config.channel_capacity);
    let total_chunks = manifests.total_chunks();

    let (tally, result) = thread::scope(|s| {
        let producer = s.spawn(move || downloader.run(&manifests, &tx));
        let tally = consume(rx, mode, total_chunks);
        (tally, producer.join())
    });

    let reports = result
        .map_err(|_| CliError::Internal("download thread panicked".to_string()))??;
    info!(
        shards = reports.len(),
        chunks = tally.done,
        failed = tally.failure_count(),
        "Download finished"
    );
    Ok(tally)
}
