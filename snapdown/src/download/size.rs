//! Resume check: does a local chunk already match its remote object?
//!
//! Only byte length is compared. Same-length corruption is not detected.

use std::fs;
use std::io;
use std::path::Path;

use reqwest::blocking::Client;

use crate::error::{SnapshotError, SnapshotResult};

/// Source of remote object sizes.
pub trait RemoteSize {
    /// Declared size of the remote object, `None` if the server did not say.
    fn remote_size(&self, url: &str) -> SnapshotResult<Option<u64>>;
}

/// Result of a resume check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeCheck {
    /// The local file can be used as is.
    pub complete: bool,
    /// Size of the local file, 0 if missing.
    pub local_size: u64,
}

impl ResumeCheck {
    fn missing() -> Self {
        Self {
            complete: false,
            local_size: 0,
        }
    }
}

/// Decide whether `local_path` already holds the object at `url`.
///
/// - Missing local file: not complete, no remote query.
/// - `verify_sizes == false`: any existing non-empty file is complete, no
///   remote query.
/// - Otherwise the remote size is queried; an indeterminate remote size is a
///   `SizeCheckFailed` error rather than a guess.
pub fn check_resume(
    local_path: &Path,
    url: &str,
    verify_sizes: bool,
    remote: &dyn RemoteSize,
) -> SnapshotResult<ResumeCheck> {
    let local_size = match fs::metadata(local_path) {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => return Ok(ResumeCheck::missing()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ResumeCheck::missing()),
        Err(e) => {
            return Err(SnapshotError::ReadFailed {
                path: local_path.to_path_buf(),
                source: e,
            })
        }
    };

    if !verify_sizes {
        return Ok(ResumeCheck {
            complete: local_size > 0,
            local_size,
        });
    }

    let remote_size = remote
        .remote_size(url)?
        .ok_or_else(|| SnapshotError::SizeCheckFailed {
            url: url.to_string(),
            reason: "missing Content-Length in response".to_string(),
        })?;

    Ok(ResumeCheck {
        complete: local_size == remote_size,
        local_size,
    })
}

/// Remote size via a HEAD request.
///
/// Any failure to learn the size is reported as `SizeCheckFailed`.
pub(crate) fn head_content_length(client: &Client, url: &str) -> SnapshotResult<Option<u64>> {
    let failed = |reason: String| SnapshotError::SizeCheckFailed {
        url: url.to_string(),
        reason,
    };

    let response = client.head(url).send().map_err(|e| failed(e.to_string()))?;

    if !response.status().is_success() {
        return Err(failed(format!(
            "HEAD request failed with status {}",
            response.status()
        )));
    }

    Ok(response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::TempDir;

    struct FixedSize {
        size: Option<u64>,
        queries: Cell<usize>,
    }

    impl FixedSize {
        fn new(size: Option<u64>) -> Self {
            Self {
                size,
                queries: Cell::new(0),
            }
        }
    }

    impl RemoteSize for FixedSize {
        fn remote_size(&self, _url: &str) -> SnapshotResult<Option<u64>> {
            self.queries.set(self.queries.get() + 1);
            Ok(self.size)
        }
    }

    #[test]
    fn test_missing_file_is_incomplete_without_query() {
        let temp = TempDir::new().unwrap();
        let remote = FixedSize::new(Some(10));

        let check = check_resume(&temp.path().join("nope"), "u", true, &remote).unwrap();

        assert_eq!(check, ResumeCheck::missing());
        assert_eq!(remote.queries.get(), 0);
    }

    #[test]
    fn test_matching_size_is_complete() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("chunk");
        fs::write(&path, b"0123456789").unwrap();
        let remote = FixedSize::new(Some(10));

        let check = check_resume(&path, "u", true, &remote).unwrap();

        assert!(check.complete);
        assert_eq!(check.local_size, 10);
        assert_eq!(remote.queries.get(), 1);
    }

    #[test]
    fn test_size_mismatch_is_incomplete() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("chunk");
        fs::write(&path, b"0123").unwrap();

        let check = check_resume(&path, "u", true, &FixedSize::new(Some(10))).unwrap();

        assert!(!check.complete);
        assert_eq!(check.local_size, 4);
    }

    #[test]
    fn test_indeterminate_remote_size_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("chunk");
        fs::write(&path, b"0123").unwrap();

        let err = check_resume(&path, "u", true, &FixedSize::new(None)).unwrap_err();

        assert!(matches!(err, SnapshotError::SizeCheckFailed { .. }));
    }

    #[test]
    fn test_unverified_trusts_non_empty_file() {
        let temp = TempDir::new().unwrap();
        let full = temp.path().join("full");
        let empty = temp.path().join("empty");
        fs::write(&full, b"abc").unwrap();
        fs::write(&empty, b"").unwrap();
        let remote = FixedSize::new(Some(999));

        assert!(check_resume(&full, "u", false, &remote).unwrap().complete);
        assert!(!check_resume(&empty, "u", false, &remote).unwrap().complete);
        assert_eq!(remote.queries.get(), 0);
    }
}
