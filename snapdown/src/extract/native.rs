//! In-process gzip + tar extraction.

use std::fs::{self, OpenOptions};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tracing::{debug, trace};

use super::assembler::PartStream;
use super::{ArchiveExtractor, ExtractionEvent, ExtractionSummary};
use crate::error::SnapshotError;
use crate::progress::ProgressSender;

/// Read buffer in front of the decompressor (1MB).
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Scratch buffer for checking what follows the end-of-archive marker.
const TRAILER_BUFFER_SIZE: usize = 64 * 1024;

/// Decodes the shard stream without external tools.
///
/// Directories are created, regular files are truncated and overwritten, and
/// permission bits from the archive are applied. Other entry types (links,
/// devices) are skipped. The first entry that cannot be written stops the
/// shard.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeExtractor;

impl NativeExtractor {
    pub fn new() -> Self {
        Self
    }

    fn unpack(
        &self,
        shard: u32,
        stream: PartStream,
        source_dir: &Path,
        dest_dir: &Path,
        events: &ProgressSender<ExtractionEvent>,
    ) -> Result<ExtractionSummary, SnapshotError> {
        let parts = stream.parts().len();
        let corrupt = |e: io::Error| SnapshotError::ExtractionEntry {
            path: source_dir.to_path_buf(),
            reason: format!("corrupt archive stream: {}", e),
        };

        // Split snapshots may be several gzip members back to back.
        let decoder = MultiGzDecoder::new(BufReader::with_capacity(READ_BUFFER_SIZE, stream));
        let mut archive = tar::Archive::new(decoder);

        let mut summary = ExtractionSummary {
            shard,
            parts,
            ..Default::default()
        };

        for entry in archive.entries().map_err(corrupt)? {
            let mut entry = entry.map_err(corrupt)?;
            let relative = entry.path().map_err(corrupt)?.into_owned();
            let target = safe_join(dest_dir, &relative)?;
            let entry_type = entry.header().entry_type();
            let mode = entry.header().mode().ok();

            if entry_type.is_dir() {
                fs::create_dir_all(&target).map_err(|e| entry_error(&target, e))?;
            } else if entry_type.is_file() {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| entry_error(parent, e))?;
                }
                let mut file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&target)
                    .map_err(|e| entry_error(&target, e))?;
                summary.bytes_written +=
                    io::copy(&mut entry, &mut file).map_err(|e| entry_error(&target, e))?;
            } else {
                debug!(path = %relative.display(), ?entry_type, "Skipping unsupported entry");
                continue;
            }

            if let Some(mode) = mode {
                set_mode(&target, mode)?;
            }

            summary.entries += 1;
            trace!(path = %relative.display(), "Entry written");
            events.send(ExtractionEvent::EntryWritten {
                shard,
                index: summary.entries,
                total_known: None,
                path: target,
                cumulative_bytes: summary.bytes_written,
            });
        }

        drain_trailer(archive.into_inner(), source_dir)?;
        Ok(summary)
    }
}

impl ArchiveExtractor for NativeExtractor {
    fn name(&self) -> &'static str {
        "native"
    }

    fn extract(
        &self,
        shard: u32,
        source_dir: &Path,
        dest_dir: &Path,
        events: &ProgressSender<ExtractionEvent>,
    ) -> Result<ExtractionSummary, SnapshotError> {
        let stream = PartStream::open_dir(source_dir)?;

        // Part ticks carry the same shape as the external path.
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

        self.unpack(shard, stream, source_dir, dest_dir, events)
    }
}

/// Consume everything after the end-of-archive marker so every part is read.
///
/// Only zero padding may follow the marker. Anything else means entries the
/// tar reader never saw, which is reported instead of dropped.
fn drain_trailer<R: Read>(
    mut decoder: MultiGzDecoder<R>,
    source_dir: &Path,
) -> Result<(), SnapshotError> {
    let trailing = |reason: String| SnapshotError::ExtractionEntry {
        path: source_dir.to_path_buf(),
        reason,
    };

    let mut buf = vec![0u8; TRAILER_BUFFER_SIZE];
    let mut padding = 0u64;
    loop {
        let n = decoder
            .read(&mut buf)
            .map_err(|e| trailing(format!("corrupt archive stream: {}", e)))?;
        if n == 0 {
            break;
        }
        if buf[..n].iter().any(|&b| b != 0) {
            return Err(trailing(format!(
                "non-zero data {} bytes past the end-of-archive marker",
                padding
            )));
        }
        padding += n as u64;
    }

    let leftover = io::copy(&mut decoder.into_inner(), &mut io::sink())
        .map_err(|e| trailing(format!("reading parts: {}", e)))?;
    if leftover > 0 {
        return Err(trailing(format!(
            "{} bytes left after the compressed stream",
            leftover
        )));
    }

    trace!(padding, "Archive trailer drained");
    Ok(())
}

fn entry_error(path: &Path, e: io::Error) -> SnapshotError {
    SnapshotError::ExtractionEntry {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Join an archive path onto `dest`, refusing anything that would escape it.
fn safe_join(dest: &Path, relative: &Path) -> Result<PathBuf, SnapshotError> {
    let mut target = dest.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SnapshotError::ExtractionEntry {
                    path: relative.to_path_buf(),
                    reason: "entry path escapes the destination".to_string(),
                });
            }
        }
    }
    Ok(target)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), SnapshotError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
        .map_err(|e| entry_error(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), SnapshotError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{gzip_members, tar_archive, tar_gz, write_split};
    use super::*;
    use crate::progress;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn extract(
        source: &Path,
        dest: &Path,
    ) -> (Result<ExtractionSummary, SnapshotError>, Vec<ExtractionEvent>) {
        let (tx, rx) = progress::channel(1000);
        let result = NativeExtractor::new().extract(0, source, dest, &tx);
        (result, rx.try_iter().collect())
    }

    #[test]
    fn test_extracts_directory_and_file() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("shard-0");
        let dest = temp.path().join("out");
        let archive = tar_gz(&[("db/", None), ("db/000001.sst", Some(&b"rows"[..]))]);
        write_split(&source, &archive, &[archive.len() / 2]);

        let (result, events) = extract(&source, &dest);
        let summary = result.unwrap();

        assert!(dest.join("db").is_dir());
        assert_eq!(fs::read(dest.join("db/000001.sst")).unwrap(), b"rows");
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.bytes_written, 4);
        assert_eq!(summary.parts, 2);

        let written: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                ExtractionEvent::EntryWritten {
                    cumulative_bytes, ..
                } => Some(*cumulative_bytes),
                _ => None,
            })
            .collect();
        assert_eq!(written, vec![0, 4]);
        let parts = events
            .iter()
            .filter(|e| matches!(e, ExtractionEvent::PartConsumed { .. }))
            .count();
        assert_eq!(parts, 2);
    }

    #[test]
    fn test_duplicate_entry_last_wins() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("shard-0");
        let dest = temp.path().join("out");
        let archive = tar_gz(&[
            ("CURRENT", Some(&b"MANIFEST-000001 and more"[..])),
            ("CURRENT", Some(&b"MANIFEST-2"[..])),
        ]);
        write_split(&source, &archive, &[]);

        extract(&source, &dest).0.unwrap();

        assert_eq!(fs::read(dest.join("CURRENT")).unwrap(), b"MANIFEST-2");
    }

    #[test]
    fn test_reextract_overwrites_existing_file() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("shard-0");
        let dest = temp.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("LOG"), vec![b'x'; 100]).unwrap();
        write_split(&source, &tar_gz(&[("LOG", Some(&b"new"[..]))]), &[]);

        extract(&source, &dest).0.unwrap();

        assert_eq!(fs::read(dest.join("LOG")).unwrap(), b"new");
    }

    #[cfg(unix)]
    #[test]
    fn test_preserves_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let source = temp.path().join("shard-0");
        let dest = temp.path().join("out");
        write_split(&source, &tar_gz(&[("f", Some(&b"1"[..]))]), &[]);

        extract(&source, &dest).0.unwrap();

        let mode = fs::metadata(dest.join("f")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn test_corrupt_stream_is_entry_error() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("shard-0");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a"), b"definitely not gzip").unwrap();

        let err = extract(&source, &temp.path().join("out")).0.unwrap_err();

        assert!(matches!(err, SnapshotError::ExtractionEntry { .. }));
    }

    #[test]
    fn test_missing_source_is_setup_error() {
        let temp = TempDir::new().unwrap();
        let err = extract(&temp.path().join("shard-7"), temp.path()).0.unwrap_err();
        assert!(matches!(err, SnapshotError::ExtractionSetup { .. }));
    }

    #[test]
    fn test_safe_join_rejects_escapes() {
        let dest = Path::new("/data");
        assert_eq!(
            safe_join(dest, Path::new("./a/b")).unwrap(),
            PathBuf::from("/data/a/b")
        );
        assert!(safe_join(dest, Path::new("../etc/passwd")).is_err());
        assert!(safe_join(dest, Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_reads_every_gzip_member() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("shard-0");
        let dest = temp.path().join("out");
        // The first member ends exactly after `a.txt`, on a block boundary.
        let raw = tar_archive(&[("a.txt", Some(&b"alpha"[..])), ("b.txt", Some(&b"beta"[..]))]);
        let archive = gzip_members(&raw, &[1024]);
        write_split(&source, &archive, &[archive.len() / 2]);

        let summary = extract(&source, &dest).0.unwrap();

        assert_eq!(summary.entries, 2);
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(dest.join("b.txt")).unwrap(), b"beta");
    }

    #[test]
    fn test_data_after_end_marker_is_entry_error() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("shard-0");
        // Two complete archives back to back: the second sits past the marker.
        let mut archive = tar_gz(&[("first", Some(&b"1"[..]))]);
        archive.extend(tar_gz(&[("second", Some(&b"2"[..]))]));
        write_split(&source, &archive, &[]);

        let err = extract(&source, &temp.path().join("out")).0.unwrap_err();

        assert!(matches!(err, SnapshotError::ExtractionEntry { .. }));
        assert!(err.to_string().contains("end-of-archive"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_split_offset_does_not_matter(split_ratio in 0.0f64..=1.0) {
            let archive = tar_gz(&[
                ("data/", None),
                ("data/blob.bin", Some(&[0xA5u8; 4096][..])),
            ]);
            let split = ((archive.len() as f64) * split_ratio) as usize;
            let temp = TempDir::new().unwrap();
            let source = temp.path().join("shard-0");
            let dest = temp.path().join("out");
            write_split(&source, &archive, &[split.min(archive.len())]);

            let summary = extract(&source, &dest).0.unwrap();

            prop_assert_eq!(summary.entries, 2);
            prop_assert_eq!(fs::read(dest.join("data/blob.bin")).unwrap(), vec![0xA5u8; 4096]);
        }
    }
}
