// src/engine/scratch.rs
//
// Scratch storage for worker-pool argument passing.
//
// Each batch gets its own temporary directory; each payload is written to a file
// in it before dispatch and handed to the worker by path. Files are deleted when
// their `ScratchFile` guard drops; the directory is removed when the batch ends.

use crate::error::{BulkMediaError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempDir, TempPath};
use tracing::warn;

const DIR_PREFIX: &str = "bulk-media-";

/// Per-batch scratch directory.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Create a fresh directory under `root` (or the system temp dir).
    pub fn create(root: Option<&Path>) -> Result<Self> {
        let mut builder = Builder::new();
        builder.prefix(DIR_PREFIX);
        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| {
            let location = root
                .map(Path::to_path_buf)
                .unwrap_or_else(std::env::temp_dir);
            BulkMediaError::scratch_unavailable(location.display().to_string(), e)
        })?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write one payload to its own file.
    pub fn write_payload(&self, index: usize, payload: &[u8]) -> Result<ScratchFile> {
        let write_failed =
            |e: std::io::Error| BulkMediaError::file_write_failed(self.describe(index), e);

        let mut file = Builder::new()
            .prefix(&format!("item-{index}-"))
            .tempfile_in(self.dir.path())
            .map_err(write_failed)?;
        file.write_all(payload).map_err(write_failed)?;
        file.flush().map_err(write_failed)?;

        Ok(ScratchFile {
            path: file.into_temp_path(),
        })
    }

    /// Remove the directory and anything still in it.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(path = %path.display(), error = %e, "failed to remove scratch directory");
        }
    }

    fn describe(&self, index: usize) -> String {
        format!("{}/item-{index}", self.dir.path().display())
    }
}

/// A payload on disk; deleted on drop.
#[derive(Debug)]
pub struct ScratchFile {
    path: TempPath,
}

impl ScratchFile {
    pub fn to_path_buf(&self) -> PathBuf {
        self.path.to_path_buf()
    }
}

/// Read-only view of a scratch file.
#[derive(Debug)]
pub enum ScratchPayload {
    Mapped(Mmap),
    /// Zero-length files cannot be mapped.
    Empty,
}

impl AsRef<[u8]> for ScratchPayload {
    fn as_ref(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => &map[..],
            Self::Empty => &[],
        }
    }
}

/// Memory-map a scratch file written by `ScratchDir::write_payload`.
pub fn map_payload(path: &Path) -> Result<ScratchPayload> {
    let describe = || path.display().to_string();
    let file = File::open(path).map_err(|e| BulkMediaError::file_read_failed(describe(), e))?;
    let len = file
        .metadata()
        .map_err(|e| BulkMediaError::file_read_failed(describe(), e))?
        .len();
    if len == 0 {
        return Ok(ScratchPayload::Empty);
    }
    // SAFETY: scratch files are private to this batch and never written after
    // dispatch; the pool deletes a file only after the worker has reported back.
    let map = unsafe { Mmap::map(&file) }.map_err(|e| BulkMediaError::mmap_failed(describe(), e))?;
    Ok(ScratchPayload::Mapped(map))
}
