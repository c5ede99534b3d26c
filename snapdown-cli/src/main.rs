//! Snapdown CLI - Command-line interface
//!
//! Downloads a sharded snapshot, extracts it, or does both in one go.

mod commands;
mod error;
mod ui;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{DownloadArgs, ExtractArgs};
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "snapdown")]
#[command(version, about = "Download and extract chunked database snapshots", long_about = None)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.snapdown/config.ini)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download the latest snapshot into a directory
    Download(DownloadArgs),

    /// Extract a downloaded snapshot
    Extract(ExtractArgs),

    /// Download, then extract the snapshot
    #[command(name = "dx")]
    DownloadExtract {
        #[command(flatten)]
        download: DownloadArgs,

        /// Destination directory for extracted files
        dest: PathBuf,

        /// Use the built-in extractor instead of the system tar
        #[arg(long)]
        native: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "snapdown=debug" } else { "snapdown=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr so progress output on stdout stays clean.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    let settings = commands::Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Download(args) => commands::download::run(&settings, &args).map(|_| ()),
        Commands::Extract(args) => commands::extract::run(&settings, &args),
        Commands::DownloadExtract {
            download,
            dest,
            native,
        } => commands::dx::run(&settings, &download, dest, native),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
