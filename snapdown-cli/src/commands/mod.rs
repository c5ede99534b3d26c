//! Subcommand implementations and the arguments they share.

pub mod download;
pub mod dx;
pub mod extract;

use std::path::{Path, PathBuf};

use clap::Args;
use snapdown::config::DEFAULT_SHARDS;
use snapdown::manifest::manifest_path;
use snapdown::{ConfigFile, ManifestSet, Network, SnapshotConfig};
use tracing::debug;

use crate::error::CliError;

/// Arguments for downloading a snapshot.
#[derive(Debug, Clone, Args)]
pub struct DownloadArgs {
    /// Directory receiving the chunks and metadata.json
    pub dir: PathBuf,

    /// Concurrent chunk downloads per shard
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Object store base URL
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Fetch the testnet snapshot instead of mainnet
    #[arg(long)]
    pub testnet: bool,

    /// Trust any existing non-empty chunk without comparing sizes
    #[arg(long)]
    pub no_size_checks: bool,

    /// Print plain log lines instead of progress bars
    #[arg(long)]
    pub no_tty: bool,
}

/// Arguments for extracting a downloaded snapshot.
#[derive(Debug, Clone, Args)]
pub struct ExtractArgs {
    /// Download directory holding shard-<N>/ folders
    pub source: PathBuf,

    /// Destination directory for extracted files
    pub dest: PathBuf,

    /// Use the built-in extractor instead of the system tar
    #[arg(long)]
    pub native: bool,

    /// Print plain log lines instead of progress bars
    #[arg(long)]
    pub no_tty: bool,
}

/// Config file values, layered under command line flags.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    file: ConfigFile,
}

impl Settings {
    /// Load from an explicit path, or from `~/.snapdown/config.ini` if present.
    pub fn load(path: Option<&Path>) -> Result<Self, CliError> {
        let file = match path {
            Some(path) => ConfigFile::load_from(path)?,
            None => ConfigFile::load()?,
        };
        debug!(?file, "Loaded settings");
        Ok(Self { file })
    }

    pub fn from_file(file: ConfigFile) -> Self {
        Self { file }
    }

    /// Build the download configuration: defaults, then file, then flags.
    pub fn snapshot_config(&self, args: &DownloadArgs) -> Result<SnapshotConfig, CliError> {
        let mut config = SnapshotConfig::new(&args.dir).merge_file(&self.file);

        if let Some(jobs) = args.jobs {
            if jobs == 0 {
                return Err(CliError::Config("--jobs must be at least 1".to_string()));
            }
            config = config.with_concurrency(jobs);
        }
        if let Some(endpoint) = &args.endpoint {
            config = config.with_endpoint(endpoint.clone());
        }
        if args.testnet {
            config = config.with_network(Network::Testnet);
        }
        if args.no_size_checks {
            config = config.with_verify_sizes(false);
        }

        Ok(config)
    }

    /// Capacity of the extraction event channel; same setting as downloads.
    pub fn channel_capacity(&self) -> usize {
        SnapshotConfig::default()
            .merge_file(&self.file)
            .channel_capacity
    }

    /// Whether to try the system `tar` first.
    pub fn prefer_external(&self, native: bool) -> bool {
        !native && self.file.prefer_external.unwrap_or(true)
    }
}

/// Shards to extract from a download directory.
///
/// Uses the saved manifest when there is one, otherwise the default shards.
pub fn shards_in(source: &Path) -> Vec<u32> {
    match ManifestSet::load(&manifest_path(source)) {
        Ok(set) if !set.is_empty() => set.iter().map(|(shard, _)| shard).collect(),
        _ => DEFAULT_SHARDS.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapdown::ShardManifest;

    fn args(dir: &str) -> DownloadArgs {
        DownloadArgs {
            dir: PathBuf::from(dir),
            jobs: None,
            endpoint: None,
            testnet: false,
            no_size_checks: false,
            no_tty: true,
        }
    }

    #[test]
    fn test_flags_override_file() {
        let file = ConfigFile::parse(
            "[snapshot]\nconcurrency = 3\nnetwork = testnet\nsize_checks = false\n",
        )
        .unwrap();
        let settings = Settings::from_file(file);

        let mut a = args("chunks");
        a.jobs = Some(7);
        a.endpoint = Some("http://localhost:9000/".to_string());
        let config = settings.snapshot_config(&a).unwrap();

        assert_eq!(config.concurrency, 7);
        assert_eq!(config.network, Network::Testnet);
        assert!(!config.verify_sizes);
        assert_eq!(config.endpoint, "http://localhost:9000");
        assert_eq!(config.output_dir, PathBuf::from("chunks"));
    }

    #[test]
    fn test_zero_jobs_rejected() {
        let mut a = args("chunks");
        a.jobs = Some(0);
        let err = Settings::default().snapshot_config(&a).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_prefer_external() {
        let settings = Settings::default();
        assert!(settings.prefer_external(false));
        assert!(!settings.prefer_external(true));

        let file = ConfigFile::parse("[extract]\nprefer_external = false\n").unwrap();
        assert!(!Settings::from_file(file).prefer_external(false));
    }

    #[test]
    fn test_channel_capacity_shared_by_both_pipelines() {
        assert_eq!(
            Settings::default().channel_capacity(),
            snapdown::config::DEFAULT_CHANNEL_CAPACITY
        );

        let file = ConfigFile::parse("[snapshot]\nchannel_capacity = 64\n").unwrap();
        let settings = Settings::from_file(file);
        assert_eq!(settings.channel_capacity(), 64);
        assert_eq!(
            settings.snapshot_config(&args("chunks")).unwrap().channel_capacity,
            64
        );
    }

    #[test]
    fn test_shards_in_uses_saved_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(shards_in(dir.path()), DEFAULT_SHARDS.to_vec());

        let mut set = ManifestSet::new();
        set.insert(2, ShardManifest::new("k", vec!["c1".to_string()], 0));
        set.save(&manifest_path(dir.path())).unwrap();
        assert_eq!(shards_in(dir.path()), vec![2]);
    }
}
