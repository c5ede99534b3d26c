//! CLI error type.

use std::fmt;

use snapdown::SnapshotError;

/// Errors surfaced to the user; every variant exits with status 1.
#[derive(Debug)]
pub enum CliError {
    /// Bad flags or config file values.
    Config(String),
    /// The library failed before or outside per-item reporting.
    Snapshot(SnapshotError),
    /// Some chunks were reported as failed.
    Download { failed: usize },
    /// Some shards failed to extract.
    Extraction { failed: usize },
    /// A worker thread panicked.
    Internal(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Snapshot(e) => write!(f, "{}", e),
            CliError::Download { failed } => {
                write!(f, "{} chunk(s) failed to download, rerun to resume", failed)
            }
            CliError::Extraction { failed } => {
                write!(f, "{} shard(s) failed to extract", failed)
            }
            CliError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Snapshot(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SnapshotError> for CliError {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::InvalidConfig(msg) => CliError::Config(msg),
            other => CliError::Snapshot(other),
        }
    }
}
