//! Scoped ownership of temporary files in the working directory.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// A file the pipeline created and is responsible for removing.
///
/// Dropping an armed guard deletes the file. Failures are logged, never
/// propagated; a missing file is not a failure. Call [`ScratchFile::keep`]
/// to hand the file over to the caller instead.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    armed: bool,
}

impl ScratchFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    /// Creates an empty file at `path` and guards it.
    ///
    /// Fails with `AlreadyExists` when anything is already there, so a path
    /// returned here belongs to this caller alone.
    pub fn claim(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        OpenOptions::new().write(true).create_new(true).open(&path)?;
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Moves the file and keeps guarding it at its new location.
    ///
    /// Never replaces an existing file: the target is claimed first and the
    /// call fails with `AlreadyExists` if it is taken.
    pub fn rename_to(&mut self, new_path: impl Into<PathBuf>) -> io::Result<()> {
        let target = Self::claim(new_path)?;
        fs::rename(&self.path, target.path())?;
        self.path = target.keep();
        Ok(())
    }

    /// Disarms the guard and returns the path; the file stays on disk.
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }

    /// Deletes the file now instead of at drop.
    pub fn remove(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed scratch file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove scratch file"
            ),
        }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        self.release();
    }
}
