//! Integration tests for snapshot download and extraction.
//!
//! These tests run the real HTTP fetcher against a local mock server:
//! - Bounded concurrent chunk downloads
//! - Per-chunk failures that do not abort siblings
//! - Whole-chunk resume without re-fetching
//! - Manifest fetch → download → extraction end to end
//!
//! Run with: `cargo test --test snapshot_integration`

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use httpmock::prelude::*;
use httpmock::Method::HEAD;
use tempfile::TempDir;

use snapdown::download::{ChunkFetcher, FetchOutcome, HttpChunkFetcher};
use snapdown::extract::NativeExtractor;
use snapdown::manifest::{ManifestOrigin, ManifestSet};
use snapdown::progress;
use snapdown::{
    prepare_manifests, DownloadEvent, ExtractionEvent, ShardDownloadCoordinator, ShardManifest,
    SnapshotConfig, SnapshotDownloader, SnapshotExtractor, SnapshotResult,
};

// ============================================================================
// Helper Functions
// ============================================================================

/// Deterministic chunk body of the given size.
fn body(size: usize, seed: u8) -> Vec<u8> {
    (0..size).map(|i| (i as u8).wrapping_add(seed)).collect()
}

/// Serve `data` for both HEAD and GET at `path`.
fn serve_chunk<'a>(server: &'a MockServer, path: &str, data: &[u8]) -> httpmock::Mock<'a> {
    server.mock(|when, then| {
        when.method(HEAD).path(path);
        then.status(200).body(data);
    });
    server.mock(|when, then| {
        when.method(GET).path(path);
        then.status(200).body(data);
    })
}

fn config(server: &MockServer, dir: &Path) -> SnapshotConfig {
    SnapshotConfig::new(dir)
        .with_endpoint(server.base_url())
        .with_concurrency(2)
        .with_shards(vec![0])
}

/// Terminal event counts per chunk name.
#[derive(Debug, Default)]
struct Outcomes {
    done: HashMap<String, (u64, u64)>,
    failed: Vec<String>,
    progress: Vec<(String, u64, u64)>,
}

fn collect(rx: std::sync::mpsc::Receiver<DownloadEvent>) -> Outcomes {
    let mut outcomes = Outcomes::default();
    for event in rx.try_iter() {
        match event {
            DownloadEvent::Progress(p) => {
                outcomes
                    .progress
                    .push((p.chunk, p.bytes_downloaded, p.bytes_total))
            }
            DownloadEvent::Done(p) => {
                let previous = outcomes
                    .done
                    .insert(p.chunk, (p.bytes_downloaded, p.bytes_total));
                assert!(previous.is_none(), "chunk finished twice");
            }
            DownloadEvent::Failed(f) => outcomes.failed.push(f.chunk),
            DownloadEvent::ShardComplete(_) | DownloadEvent::Quit => {}
        }
    }
    outcomes
}

/// Sends chunks named `broken*` to a port nothing listens on.
struct UnreachableFor {
    inner: HttpChunkFetcher,
    base: String,
}

impl ChunkFetcher for UnreachableFor {
    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> SnapshotResult<FetchOutcome> {
        if url.contains("/broken") {
            let rerouted = url.replacen(&self.base, "http://127.0.0.1:1", 1);
            return self.inner.fetch(&rerouted, dest, on_progress);
        }
        self.inner.fetch(url, dest, on_progress)
    }
}

fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut dir = tar::Header::new_gnu();
    dir.set_entry_type(tar::EntryType::Directory);
    dir.set_mode(0o755);
    dir.set_size(0);
    builder.append_data(&mut dir, "db/", std::io::empty()).unwrap();
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(data.len() as u64);
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

// ============================================================================
// Download Scenarios
// ============================================================================

#[test]
fn test_three_chunks_with_two_workers() {
    let server = MockServer::start();
    let temp = TempDir::new().unwrap();
    let sizes = [1000usize, 70_000, 3];
    let mut mocks = Vec::new();
    for (i, size) in sizes.iter().enumerate() {
        mocks.push(serve_chunk(
            &server,
            &format!("/snap/0/chunk_{}.bin", i),
            &body(*size, i as u8),
        ));
    }
    let manifest = ShardManifest::new(
        "snap/0",
        (0..3).map(|i| format!("chunk_{}.bin", i)).collect(),
        0,
    );
    let coordinator = ShardDownloadCoordinator::from_config(
        &config(&server, temp.path()).with_progress_threshold(16 * 1024),
    )
    .unwrap();
    let (tx, rx) = progress::channel(1000);

    let report = coordinator.run(0, &manifest, &tx).unwrap();
    drop(tx);

    assert!(report.is_complete());
    for (i, size) in sizes.iter().enumerate() {
        let path = temp.path().join(format!("shard-0/chunk_{}.bin", i));
        assert_eq!(fs::read(&path).unwrap(), body(*size, i as u8));
        mocks[i].assert_hits(1);
    }

    let outcomes = collect(rx);
    assert_eq!(outcomes.done.len(), 3);
    assert!(outcomes.failed.is_empty());
    for (i, size) in sizes.iter().enumerate() {
        let name = format!("chunk_{}.bin", i);
        assert_eq!(outcomes.done[&name], (*size as u64, *size as u64));
    }

    // Per chunk, progress never goes backwards and never passes the total.
    let mut last: HashMap<String, u64> = HashMap::new();
    for (chunk, done, total) in outcomes.progress {
        assert!(done <= total);
        let previous = last.insert(chunk, done).unwrap_or(0);
        assert!(done >= previous);
    }
}

#[test]
fn test_connection_error_fails_only_that_chunk() {
    let server = MockServer::start();
    let temp = TempDir::new().unwrap();
    serve_chunk(&server, "/snap/0/a.bin", &body(100, 1));
    serve_chunk(&server, "/snap/0/c.bin", &body(200, 2));
    let manifest = ShardManifest::new(
        "snap/0",
        vec!["a.bin".into(), "broken.bin".into(), "c.bin".into()],
        0,
    );
    let cfg = config(&server, temp.path());
    let fetcher = UnreachableFor {
        inner: HttpChunkFetcher::from_config(&cfg).unwrap(),
        base: server.base_url(),
    };
    let coordinator =
        ShardDownloadCoordinator::new(fetcher, cfg.endpoint.clone(), temp.path(), 2);
    let (tx, rx) = progress::channel(1000);

    let report = coordinator.run(0, &manifest, &tx).unwrap();
    drop(tx);

    assert_eq!(report.completed, 2);
    assert_eq!(report.failure_count(), 1);

    let outcomes = collect(rx);
    assert_eq!(outcomes.failed, vec!["broken.bin".to_string()]);
    assert_eq!(outcomes.done.len(), 2);
    assert!(outcomes.done.contains_key("a.bin"));
    assert!(outcomes.done.contains_key("c.bin"));
}

#[test]
fn test_matching_local_chunk_is_not_fetched() {
    let server = MockServer::start();
    let temp = TempDir::new().unwrap();
    let data = body(4096, 9);
    let get = serve_chunk(&server, "/snap/0/done.bin", &data);
    let shard_dir = temp.path().join("shard-0");
    fs::create_dir_all(&shard_dir).unwrap();
    fs::File::create(shard_dir.join("done.bin"))
        .unwrap()
        .write_all(&data)
        .unwrap();

    let manifest = ShardManifest::new("snap/0", vec!["done.bin".into()], 0);
    let coordinator =
        ShardDownloadCoordinator::from_config(&config(&server, temp.path())).unwrap();
    let (tx, rx) = progress::channel(100);

    let report = coordinator.run(0, &manifest, &tx).unwrap();
    drop(tx);

    get.assert_hits(0);
    assert_eq!(report.skipped, 1);
    let outcomes = collect(rx);
    assert_eq!(outcomes.done["done.bin"], (4096, 4096));
    assert!(outcomes.progress.is_empty());
}

#[test]
fn test_size_mismatch_is_downloaded_again() {
    let server = MockServer::start();
    let temp = TempDir::new().unwrap();
    let data = body(512, 3);
    let get = serve_chunk(&server, "/snap/0/partial.bin", &data);
    let shard_dir = temp.path().join("shard-0");
    fs::create_dir_all(&shard_dir).unwrap();
    fs::write(shard_dir.join("partial.bin"), &data[..100]).unwrap();

    let manifest = ShardManifest::new("snap/0", vec!["partial.bin".into()], 0);
    let coordinator =
        ShardDownloadCoordinator::from_config(&config(&server, temp.path())).unwrap();
    let (tx, _rx) = progress::channel(100);

    let report = coordinator.run(0, &manifest, &tx).unwrap();

    get.assert_hits(1);
    assert_eq!(report.skipped, 0);
    assert_eq!(fs::read(shard_dir.join("partial.bin")).unwrap(), data);
}

#[test]
fn test_server_error_is_reported_per_chunk() {
    let server = MockServer::start();
    let temp = TempDir::new().unwrap();
    server.mock(|when, then| {
        when.method(GET).path("/snap/0/gone.bin");
        then.status(404);
    });
    let manifest = ShardManifest::new("snap/0", vec!["gone.bin".into()], 0);
    let coordinator =
        ShardDownloadCoordinator::from_config(&config(&server, temp.path())).unwrap();
    let (tx, rx) = progress::channel(100);

    let report = coordinator.run(0, &manifest, &tx).unwrap();
    drop(tx);

    assert!(report.has_failures());
    assert_eq!(collect(rx).failed, vec!["gone.bin".to_string()]);
}

// ============================================================================
// End to End
// ============================================================================

#[test]
fn test_manifest_download_and_extract() {
    let server = MockServer::start();
    let temp = TempDir::new().unwrap();
    let download_dir = temp.path().join("chunks");
    let dest = temp.path().join("db");

    let archive = tar_gz(&[
        ("db/000001.sst", &body(50_000, 4)[..]),
        ("db/CURRENT", &b"MANIFEST-000002\n"[..]),
    ]);
    let split = archive.len() / 3;
    let prefix = "/FARCASTER_NETWORK_MAINNET/0/1700000000000";
    serve_chunk(&server, &format!("{}/snapshot.aa", prefix), &archive[..split]);
    serve_chunk(&server, &format!("{}/snapshot.ab", prefix), &archive[split..]);
    let latest = server.mock(|when, then| {
        when.method(GET).path("/FARCASTER_NETWORK_MAINNET/0/latest.json");
        then.status(200).json_body(serde_json::json!({
            "key_base": "FARCASTER_NETWORK_MAINNET/0/1700000000000",
            "chunks": ["snapshot.aa", "snapshot.ab"],
            "timestamp": 1_700_000_000_000u64
        }));
    });

    let cfg = config(&server, &download_dir);
    let (manifests, origin) = prepare_manifests(&cfg).unwrap();
    assert_eq!(origin, ManifestOrigin::Fresh);
    assert_eq!(manifests.total_chunks(), 2);

    let (tx, rx) = progress::channel(cfg.channel_capacity);
    let reports = SnapshotDownloader::from_config(&cfg)
        .unwrap()
        .run(&manifests, &tx)
        .unwrap();
    assert!(reports.iter().all(|r| r.is_complete()));
    assert!(matches!(rx.try_iter().last(), Some(DownloadEvent::Quit)));

    // A second run resumes from the saved manifests.
    let (again, origin) = prepare_manifests(&cfg).unwrap();
    assert_eq!(origin, ManifestOrigin::Resumed);
    assert_eq!(again, manifests);
    latest.assert_hits(1);
    assert_eq!(ManifestSet::load(&cfg.manifest_path()).unwrap(), manifests);

    let (tx, rx) = progress::channel(cfg.channel_capacity);
    let extractor = SnapshotExtractor::new(Box::new(NativeExtractor::new()), &download_dir, &dest);
    let summaries = extractor.run(&cfg.shards, &tx);

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].parts, 2);
    assert_eq!(summaries[0].bytes_written, 50_000 + 16);
    assert_eq!(fs::read(dest.join("db/000001.sst")).unwrap(), body(50_000, 4));
    assert_eq!(fs::read(dest.join("db/CURRENT")).unwrap(), b"MANIFEST-000002\n");

    let events: Vec<_> = rx.try_iter().collect();
    assert!(events
        .iter()
        .any(|e| matches!(e, ExtractionEvent::ShardComplete(s) if s.entries == 3)));
    assert!(matches!(events.last(), Some(ExtractionEvent::Quit)));
}
