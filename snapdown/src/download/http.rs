//! HTTP chunk fetcher.
//!
//! Downloads one chunk object to disk:
//! - Whole-chunk resume: a local file whose size matches is not re-fetched
//! - Streaming copy through a fixed buffer
//! - Coalesced progress callbacks

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::debug;

use super::size::{check_resume, head_content_length, RemoteSize};
use crate::config::{SnapshotConfig, DEFAULT_PROGRESS_THRESHOLD};
use crate::error::{SnapshotError, SnapshotResult};

/// Buffer size for reading/writing during downloads (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// What a successful fetch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Final size of the local chunk.
    pub bytes: u64,
    /// The chunk was already complete and the network was not touched.
    pub skipped: bool,
}

/// Downloads one chunk.
///
/// `on_progress(downloaded, total)` receives intermediate, coalesced
/// progress. It is never called for a skipped chunk, and `downloaded` never
/// exceeds `total`. The returned outcome is what the caller turns into the
/// chunk's single terminal event.
pub trait ChunkFetcher: Send + Sync {
    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> SnapshotResult<FetchOutcome>;
}

/// Blocking HTTP implementation of [`ChunkFetcher`].
#[derive(Debug, Clone)]
pub struct HttpChunkFetcher {
    client: Client,
    timeout: Duration,
    verify_sizes: bool,
    progress_threshold: u64,
}

impl HttpChunkFetcher {
    /// Create a fetcher with the given timeout.
    pub fn new(timeout: Duration) -> SnapshotResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SnapshotError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout,
            verify_sizes: true,
            progress_threshold: DEFAULT_PROGRESS_THRESHOLD,
        })
    }

    /// Create a fetcher from a snapshot configuration.
    pub fn from_config(config: &SnapshotConfig) -> SnapshotResult<Self> {
        Ok(Self::new(config.timeout)?
            .with_verify_sizes(config.verify_sizes)
            .with_progress_threshold(config.progress_threshold))
    }

    /// Enable or disable remote size verification of existing files.
    pub fn with_verify_sizes(mut self, verify: bool) -> Self {
        self.verify_sizes = verify;
        self
    }

    /// Bytes written between two progress callbacks.
    pub fn with_progress_threshold(mut self, bytes: u64) -> Self {
        self.progress_threshold = bytes;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Issue the GET and require a declared length.
    fn open_stream(&self, url: &str) -> SnapshotResult<(reqwest::blocking::Response, u64)> {
        let response = self.client.get(url).send().map_err(|e| {
            let reason = if e.is_timeout() {
                format!("timed out after {}s", self.timeout.as_secs())
            } else {
                e.to_string()
            };
            SnapshotError::Transfer {
                url: url.to_string(),
                reason,
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SnapshotError::Transfer {
                url: url.to_string(),
                reason: format!("GET request failed with status {}", status),
            });
        }

        match response.content_length() {
            Some(total) if total > 0 => Ok((response, total)),
            _ => Err(SnapshotError::InvalidLength {
                url: url.to_string(),
            }),
        }
    }

    /// Stream the body to `dest`, truncating any previous content.
    ///
    /// On error the partial file is left in place; the next resume check sees
    /// the size mismatch and downloads it again.
    fn stream_to_file(
        &self,
        url: &str,
        mut body: impl Read,
        dest: &Path,
        total: u64,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> SnapshotResult<u64> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| SnapshotError::CreateDirFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let file = File::create(dest).map_err(|e| SnapshotError::WriteFailed {
            path: dest.to_path_buf(),
            source: e,
        })?;

        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut downloaded = 0u64;
        let mut since_report = 0u64;

        on_progress(0, total);

        loop {
            let bytes_read = body
                .read(&mut buffer)
                .map_err(|e| SnapshotError::Transfer {
                    url: url.to_string(),
                    reason: format!("read error: {}", e),
                })?;

            if bytes_read == 0 {
                break;
            }

            if downloaded + bytes_read as u64 > total {
                return Err(SnapshotError::Transfer {
                    url: url.to_string(),
                    reason: format!("body exceeds declared length of {} bytes", total),
                });
            }

            writer
                .write_all(&buffer[..bytes_read])
                .map_err(|e| SnapshotError::WriteFailed {
                    path: dest.to_path_buf(),
                    source: e,
                })?;

            downloaded += bytes_read as u64;
            since_report += bytes_read as u64;

            if since_report >= self.progress_threshold && downloaded < total {
                on_progress(downloaded, total);
                since_report = 0;
            }
        }

        writer.flush().map_err(|e| SnapshotError::WriteFailed {
            path: dest.to_path_buf(),
            source: e,
        })?;

        if downloaded != total {
            return Err(SnapshotError::Transfer {
                url: url.to_string(),
                reason: format!("body ended after {} of {} bytes", downloaded, total),
            });
        }

        Ok(downloaded)
    }
}

impl RemoteSize for HttpChunkFetcher {
    fn remote_size(&self, url: &str) -> SnapshotResult<Option<u64>> {
        head_content_length(&self.client, url)
    }
}

impl ChunkFetcher for HttpChunkFetcher {
    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> SnapshotResult<FetchOutcome> {
        let check = check_resume(dest, url, self.verify_sizes, self)?;
        if check.complete {
            debug!(url, bytes = check.local_size, "Chunk already complete, skipping");
            return Ok(FetchOutcome {
                bytes: check.local_size,
                skipped: true,
            });
        }

        let (response, total) = self.open_stream(url)?;
        debug!(url, total, "Downloading chunk");

        let bytes = self.stream_to_file(url, response, dest, total, on_progress)?;

        Ok(FetchOutcome {
            bytes,
            skipped: false,
        })
    }
}
