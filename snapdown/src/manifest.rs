//! Shard manifests and their persistence.
//!
//! A snapshot is split into shards; each shard is described by a
//! [`ShardManifest`] listing the chunk objects stored under its base key.
//! Manifests for all shards are fetched once and saved next to the
//! downloaded chunks as `metadata.json`, so an interrupted download can be
//! resumed against the same snapshot by a later process.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{SnapshotError, SnapshotResult};

/// Filename of the persisted manifest set.
pub const MANIFEST_FILENAME: &str = "metadata.json";

/// Network whose snapshot is being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    /// Path segment under the endpoint.
    pub fn path_segment(&self) -> &'static str {
        match self {
            Network::Mainnet => "FARCASTER_NETWORK_MAINNET",
            Network::Testnet => "FARCASTER_NETWORK_TESTNET",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}

/// Metadata describing one shard's chunk set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardManifest {
    /// Object-store prefix the chunks live under.
    pub key_base: String,

    /// Chunk object names, in stream order.
    pub chunks: Vec<String>,

    /// Snapshot creation time in Unix milliseconds.
    #[serde(default)]
    pub timestamp: u64,
}

impl ShardManifest {
    /// Create a manifest.
    pub fn new(key_base: impl Into<String>, chunks: Vec<String>, timestamp: u64) -> Self {
        Self {
            key_base: key_base.into(),
            chunks,
            timestamp,
        }
    }

    /// `<endpoint>/<key_base>/<chunk>`.
    pub fn chunk_url(&self, endpoint: &str, chunk: &str) -> String {
        format!(
            "{}/{}/{}",
            endpoint.trim_end_matches('/'),
            self.key_base.trim_matches('/'),
            chunk
        )
    }

    /// One job per chunk, in manifest order.
    pub fn jobs(&self, shard: u32) -> Vec<ChunkJob> {
        self.chunks
            .iter()
            .enumerate()
            .map(|(index, name)| ChunkJob {
                shard,
                chunk_name: name.clone(),
                index,
            })
            .collect()
    }
}

/// A single chunk to download, consumed by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkJob {
    pub shard: u32,
    pub chunk_name: String,
    pub index: usize,
}

/// Manifests of every shard of a snapshot, keyed by shard id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestSet {
    shards: BTreeMap<u32, ShardManifest>,
}

/// Whether [`ManifestSet::load_or_fetch`] resumed or started fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestOrigin {
    /// Loaded from a previous run's `metadata.json`.
    Resumed,
    /// Fetched from the remote and saved.
    Fresh,
}

impl ManifestSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, shard: u32, manifest: ShardManifest) {
        self.shards.insert(shard, manifest);
    }

    pub fn get(&self, shard: u32) -> Option<&ShardManifest> {
        self.shards.get(&shard)
    }

    /// Shards in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &ShardManifest)> {
        self.shards.iter().map(|(id, m)| (*id, m))
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Total number of chunks across all shards.
    pub fn total_chunks(&self) -> usize {
        self.shards.values().map(|m| m.chunks.len()).sum()
    }

    /// Load a manifest set from a JSON file.
    pub fn load(path: &Path) -> SnapshotResult<Self> {
        let data = fs::read(path).map_err(|e| SnapshotError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_slice(&data).map_err(|e| SnapshotError::ManifestParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save the manifest set as pretty JSON.
    pub fn save(&self, path: &Path) -> SnapshotResult<()> {
        let data = serde_json::to_vec_pretty(self).map_err(|e| SnapshotError::ManifestParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        fs::write(path, data).map_err(|e| SnapshotError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load `metadata.json` from `dir` if present, otherwise fetch every
    /// requested shard from `source` and persist the result.
    pub fn load_or_fetch(
        dir: &Path,
        source: &dyn ManifestSource,
        shards: &[u32],
    ) -> SnapshotResult<(Self, ManifestOrigin)> {
        let path = dir.join(MANIFEST_FILENAME);

        if path.exists() {
            let set = Self::load(&path)?;
            info!(path = %path.display(), shards = set.len(), "Resuming from saved manifests");
            return Ok((set, ManifestOrigin::Resumed));
        }

        fs::create_dir_all(dir).map_err(|e| SnapshotError::CreateDirFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let mut set = Self::new();
        for &shard in shards {
            let manifest = source.fetch(shard)?;
            debug!(shard, chunks = manifest.chunks.len(), "Fetched shard manifest");
            set.insert(shard, manifest);
        }
        set.save(&path)?;
        info!(path = %path.display(), shards = set.len(), "Saved fresh manifests");

        Ok((set, ManifestOrigin::Fresh))
    }
}

/// Where shard manifests come from.
pub trait ManifestSource {
    fn fetch(&self, shard: u32) -> SnapshotResult<ShardManifest>;
}

/// Fetches `latest.json` manifests from the object store.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    client: Client,
    endpoint: String,
    network: Network,
}

impl MetadataClient {
    /// Create a metadata client.
    pub fn new(endpoint: &str, network: Network, timeout: Duration) -> SnapshotResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SnapshotError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            network,
        })
    }

    /// URL of a shard's latest manifest.
    pub fn manifest_url(&self, shard: u32) -> String {
        format!(
            "{}/{}/{}/latest.json",
            self.endpoint,
            self.network.path_segment(),
            shard
        )
    }
}

impl ManifestSource for MetadataClient {
    fn fetch(&self, shard: u32) -> SnapshotResult<ShardManifest> {
        let url = self.manifest_url(shard);
        let unavailable = |reason: String| SnapshotError::RemoteUnavailable {
            url: url.clone(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unavailable(format!("status {}", response.status())));
        }

        let body = response.bytes().map_err(|e| unavailable(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| unavailable(format!("invalid manifest: {}", e)))
    }
}

/// Human-readable age of a snapshot timestamp (Unix milliseconds).
pub fn format_age(timestamp_ms: u64, now: DateTime<Utc>) -> String {
    let then = (timestamp_ms / 1000) as i64;
    let diff = (now.timestamp() - then).max(0);

    match diff {
        d if d < 60 => format!("{}s ago", d),
        d if d < 3600 => format!("{}m ago", d / 60),
        d if d < 86400 => format!("{}h ago", d / 3600),
        d => format!("{}d ago", d / 86400),
    }
}

/// Path of the manifest file inside an output directory.
pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILENAME)
}
