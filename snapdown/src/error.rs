//! Error types for snapshot download and extraction.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Errors that can occur while downloading or extracting a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Metadata or network fetch failed.
    #[error("remote unavailable at {url}: {reason}")]
    RemoteUnavailable { url: String, reason: String },

    /// The remote size of a chunk could not be determined during a resume check.
    #[error("size check failed for {url}: {reason}")]
    SizeCheckFailed { url: String, reason: String },

    /// The server did not declare a content length for a chunk.
    #[error("invalid content length for {url}")]
    InvalidLength { url: String },

    /// A chunk transfer failed part way through.
    #[error("transfer of {url} failed: {reason}")]
    Transfer { url: String, reason: String },

    /// Extraction could not start (missing parts, missing tool, bad destination).
    #[error("cannot extract {}: {reason}", path.display())]
    ExtractionSetup { path: PathBuf, reason: String },

    /// An archive entry could not be materialized.
    #[error("failed to extract {}: {reason}", path.display())]
    ExtractionEntry { path: PathBuf, reason: String },

    /// Failed to read a file or directory.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write a file.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// A persisted manifest file could not be decoded.
    #[error("failed to parse manifest {}: {reason}", path.display())]
    ManifestParse { path: PathBuf, reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SnapshotError {
    /// Whether this error belongs to the extraction phase.
    pub fn is_extraction(&self) -> bool {
        matches!(
            self,
            Self::ExtractionSetup { .. } | Self::ExtractionEntry { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_check_display() {
        let err = SnapshotError::SizeCheckFailed {
            url: "http://host/a".to_string(),
            reason: "missing content-length".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "size check failed for http://host/a: missing content-length"
        );
    }

    #[test]
    fn test_io_source_is_exposed() {
        use std::error::Error as _;

        let err = SnapshotError::WriteFailed {
            path: PathBuf::from("/tmp/x"),
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_is_extraction() {
        let setup = SnapshotError::ExtractionSetup {
            path: PathBuf::from("shard-0"),
            reason: "no files to extract".to_string(),
        };
        let transfer = SnapshotError::Transfer {
            url: "u".to_string(),
            reason: "reset".to_string(),
        };
        assert!(setup.is_extraction());
        assert!(!transfer.is_extraction());
    }
}
