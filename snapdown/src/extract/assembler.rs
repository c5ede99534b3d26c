//! Part files read back as one byte stream.
//!
//! A shard's compressed archive is stored as a sequence of part files whose
//! name order is their stream order. [`PartStream`] reads them back to back
//! without assuming anything about where compressed frames fall. At most one
//! part is open at a time; each is closed as soon as it is exhausted.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::error::{SnapshotError, SnapshotResult};

/// Called with `(parts_consumed, total_parts)` each time a part is exhausted.
pub type PartCallback = Box<dyn FnMut(usize, usize) + Send>;

/// Sequential reader over an ordered list of part files.
pub struct PartStream {
    parts: Vec<PathBuf>,
    next: usize,
    current: Option<File>,
    on_part_done: Option<PartCallback>,
}

impl fmt::Debug for PartStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartStream")
            .field("parts", &self.parts.len())
            .field("next", &self.next)
            .field("open", &self.current.is_some())
            .finish()
    }
}

impl PartStream {
    /// Stream the given parts in the given order.
    pub fn new(parts: Vec<PathBuf>) -> Self {
        Self {
            parts,
            next: 0,
            current: None,
            on_part_done: None,
        }
    }

    /// Stream every regular file in `dir`, sorted by file name.
    ///
    /// An unreadable or empty directory is an `ExtractionSetup` error.
    pub fn open_dir(dir: &Path) -> SnapshotResult<Self> {
        let parts = list_parts(dir)?;
        if parts.is_empty() {
            return Err(SnapshotError::ExtractionSetup {
                path: dir.to_path_buf(),
                reason: "no files to extract".to_string(),
            });
        }
        Ok(Self::new(parts))
    }

    /// Invoke `callback` after each part is fully read.
    pub fn with_part_callback(mut self, callback: PartCallback) -> Self {
        self.on_part_done = Some(callback);
        self
    }

    pub fn parts(&self) -> &[PathBuf] {
        &self.parts
    }

    /// Number of parts read to the end.
    pub fn parts_consumed(&self) -> usize {
        self.next
    }

    /// Whether a part file is currently held open.
    pub fn has_open_part(&self) -> bool {
        self.current.is_some()
    }

    /// Every part has been read to the end.
    pub fn is_exhausted(&self) -> bool {
        self.next >= self.parts.len()
    }

    fn finish_current(&mut self) {
        self.current = None;
        self.next += 1;
        if let Some(callback) = self.on_part_done.as_mut() {
            callback(self.next, self.parts.len());
        }
    }
}

impl Read for PartStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            match self.current.as_mut() {
                Some(file) => {
                    let n = file.read(buf)?;
                    if n > 0 {
                        return Ok(n);
                    }
                    self.finish_current();
                }
                None => {
                    let Some(path) = self.parts.get(self.next) else {
                        return Ok(0);
                    };
                    let file = File::open(path).map_err(|e| {
                        io::Error::new(e.kind(), format!("{}: {}", path.display(), e))
                    })?;
                    self.current = Some(file);
                }
            }
        }
    }
}

/// Regular files in `dir`, sorted by name.
pub fn list_parts(dir: &Path) -> SnapshotResult<Vec<PathBuf>> {
    let setup_error = |e: io::Error| SnapshotError::ExtractionSetup {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    };

    let mut parts = Vec::new();
    for entry in fs::read_dir(dir).map_err(setup_error)? {
        let entry = entry.map_err(setup_error)?;
        if entry.file_type().map_err(setup_error)?.is_file() {
            parts.push(entry.path());
        }
    }
    parts.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    Ok(parts)
}
