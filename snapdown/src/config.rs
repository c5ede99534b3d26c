//! Configuration for snapshot download and extraction.
//!
//! [`SnapshotConfig`] is the explicit configuration value handed to the
//! downloader, coordinator and extractor. [`ConfigFile`] is the optional
//! `config.ini` a user can keep under `~/.snapdown/`; callers layer command
//! line flags over it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;

use crate::error::{SnapshotError, SnapshotResult};
use crate::manifest::Network;

/// Public snapshot endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://pub-d352dd8819104a778e20d08888c5a661.r2.dev";

/// Default number of concurrent chunk downloads per shard.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default progress coalescing threshold (1 MiB).
///
/// A chunk progress event is emitted once at least this many bytes have
/// been written since the previous event.
pub const DEFAULT_PROGRESS_THRESHOLD: u64 = 1024 * 1024;

/// Default capacity of the event channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Shards a snapshot is split into.
pub const DEFAULT_SHARDS: [u32; 3] = [0, 1, 2];

/// Configuration for a snapshot download.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Base URL of the object store.
    pub endpoint: String,

    /// Network whose snapshot is fetched.
    pub network: Network,

    /// Directory that receives `metadata.json` and the `shard-<N>` folders.
    pub output_dir: PathBuf,

    /// Maximum concurrent chunk downloads within one shard.
    pub concurrency: usize,

    /// Whether existing chunks are compared against the remote size.
    ///
    /// When disabled, any existing non-empty chunk file is trusted.
    pub verify_sizes: bool,

    /// HTTP request timeout.
    pub timeout: Duration,

    /// Bytes written between two progress events for one chunk.
    pub progress_threshold: u64,

    /// Shards to process, in order.
    pub shards: Vec<u32>,

    /// Capacity of the download and extraction event channels.
    pub channel_capacity: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            network: Network::Mainnet,
            output_dir: PathBuf::from("downloaded_chunks"),
            concurrency: DEFAULT_CONCURRENCY,
            verify_sizes: true,
            timeout: Duration::from_secs(300),
            progress_threshold: DEFAULT_PROGRESS_THRESHOLD,
            shards: DEFAULT_SHARDS.to_vec(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl SnapshotConfig {
    /// Create a new configuration writing into the given directory.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    /// Set the object store endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the network.
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Set the per-shard concurrency (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Enable or disable remote size verification of existing chunks.
    pub fn with_verify_sizes(mut self, verify: bool) -> Self {
        self.verify_sizes = verify;
        self
    }

    /// Set the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the progress coalescing threshold in bytes.
    pub fn with_progress_threshold(mut self, bytes: u64) -> Self {
        self.progress_threshold = bytes;
        self
    }

    /// Set the shards to process.
    pub fn with_shards(mut self, shards: Vec<u32>) -> Self {
        self.shards = shards;
        self
    }

    /// Set the event channel capacity (minimum 1).
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Directory holding the chunks of one shard.
    pub fn shard_dir(&self, shard: u32) -> PathBuf {
        shard_dir(&self.output_dir, shard)
    }

    /// Path of the persisted manifest set.
    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(crate::manifest::MANIFEST_FILENAME)
    }

    /// Apply values from a config file. Only keys present in the file change.
    pub fn merge_file(mut self, file: &ConfigFile) -> Self {
        if let Some(endpoint) = &file.endpoint {
            self = self.with_endpoint(endpoint.clone());
        }
        if let Some(network) = file.network {
            self.network = network;
        }
        if let Some(concurrency) = file.concurrency {
            self = self.with_concurrency(concurrency);
        }
        if let Some(verify) = file.size_checks {
            self.verify_sizes = verify;
        }
        if let Some(secs) = file.timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) = file.channel_capacity {
            self = self.with_channel_capacity(capacity);
        }
        self
    }
}

/// `<base>/shard-<N>`.
pub fn shard_dir(base: &Path, shard: u32) -> PathBuf {
    base.join(format!("shard-{}", shard))
}

/// Values read from `config.ini`.
///
/// Every field is optional; absent keys leave the built-in default alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub endpoint: Option<String>,
    pub network: Option<Network>,
    pub concurrency: Option<usize>,
    pub size_checks: Option<bool>,
    pub timeout_secs: Option<u64>,
    /// Capacity of the progress event channels.
    pub channel_capacity: Option<usize>,
    /// Prefer the external `tar` extractor when it is available.
    pub prefer_external: Option<bool>,
}

impl ConfigFile {
    /// Default location: `~/.snapdown/config.ini`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".snapdown").join("config.ini"))
    }

    /// Load the config file from its default location.
    ///
    /// A missing file yields the empty config.
    pub fn load() -> SnapshotResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load a config file from an explicit path.
    pub fn load_from(path: &Path) -> SnapshotResult<Self> {
        let ini = Ini::load_from_file(path).map_err(|e| {
            SnapshotError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        Self::from_ini(&ini)
    }

    /// Parse config values from INI text.
    pub fn parse(text: &str) -> SnapshotResult<Self> {
        let ini = Ini::load_from_str(text)
            .map_err(|e| SnapshotError::InvalidConfig(e.to_string()))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> SnapshotResult<Self> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("snapshot")) {
            config.endpoint = section.get("endpoint").map(str::to_string);
            config.network = section.get("network").map(parse_network).transpose()?;
            config.concurrency = section
                .get("concurrency")
                .map(|v| parse_number("concurrency", v))
                .transpose()?
                .map(|n| n as usize);
            config.size_checks = section
                .get("size_checks")
                .map(|v| parse_bool("size_checks", v))
                .transpose()?;
            config.timeout_secs = section
                .get("timeout_secs")
                .map(|v| parse_number("timeout_secs", v))
                .transpose()?;
            config.channel_capacity = section
                .get("channel_capacity")
                .map(|v| parse_number("channel_capacity", v))
                .transpose()?
                .map(|n| n as usize);
        }

        if let Some(section) = ini.section(Some("extract")) {
            config.prefer_external = section
                .get("prefer_external")
                .map(|v| parse_bool("prefer_external", v))
                .transpose()?;
        }

        Ok(config)
    }
}

fn parse_network(value: &str) -> SnapshotResult<Network> {
    value
        .parse()
        .map_err(|_| SnapshotError::InvalidConfig(format!("unknown network '{}'", value)))
}

fn parse_number(key: &str, value: &str) -> SnapshotResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| SnapshotError::InvalidConfig(format!("{} must be a number, got '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> SnapshotResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        other => Err(SnapshotError::InvalidConfig(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}
