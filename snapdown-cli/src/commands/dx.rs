//! `snapdown dx`: download, then extract.

use std::path::PathBuf;

use super::{extract, DownloadArgs, Settings};
use crate::error::CliError;
use crate::ui::OutputMode;

/// Extraction only starts once every chunk is on disk.
pub fn run(
    settings: &Settings,
    args: &DownloadArgs,
    dest: PathBuf,
    native: bool,
) -> Result<(), CliError> {
    super::download::run(settings, args)?;

    let tally = extract::extract(
        settings,
        &args.dir,
        &dest,
        native,
        OutputMode::detect(args.no_tty),
    )?;
    match tally.failure_count() {
        0 => Ok(()),
        failed => Err(CliError::Extraction { failed }),
    }
}
