//! The record one pipeline run builds up for its media file.

use crate::metadata::SidecarMetadata;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Length of the id prefix used to disambiguate colliding names.
const SHORT_ID_LEN: usize = 8;

/// Error type for operations on the delivered file
#[derive(Debug, Error)]
pub enum FilesystemError {
    #[error("error deleting file '{}': {source}", .path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error getting file info '{}': {source}", .path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Media file produced for one request.
///
/// Created when the download lands, filled from the sidecar, then moved by
/// the rename and (optionally) the transcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaRecord {
    /// Opaque per-request id; names temporary files until a title is known.
    pub id: String,
    pub path: PathBuf,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    pub duration_secs: u64,
    pub vcodec: String,
    pub acodec: String,
    pub title: Option<String>,
    pub audio_only: bool,
}

impl MediaRecord {
    pub fn new(id: impl Into<String>, path: PathBuf, audio_only: bool) -> Self {
        let file_name = file_name_of(&path);
        Self {
            id: id.into(),
            path,
            file_name,
            width: 0,
            height: 0,
            duration_secs: 0,
            vcodec: String::new(),
            acodec: String::new(),
            title: None,
            audio_only,
        }
    }

    /// First eight characters of the id.
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(SHORT_ID_LEN) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }

    /// Copies the sidecar fields into the record. Absent fields leave the
    /// current values alone.
    pub fn apply_sidecar(&mut self, meta: SidecarMetadata) {
        if let Some(width) = meta.width {
            self.width = width;
        }
        if let Some(height) = meta.height {
            self.height = height;
        }
        if let Some(duration) = meta.duration {
            self.duration_secs = duration.0;
        }
        if let Some(vcodec) = meta.vcodec {
            self.vcodec = vcodec;
        }
        if let Some(acodec) = meta.acodec {
            self.acodec = acodec;
        }
        if meta.title.is_some() {
            self.title = meta.title;
        }
    }

    /// Points the record at a new file.
    pub fn set_path(&mut self, path: PathBuf) {
        self.file_name = file_name_of(&path);
        self.path = path;
    }

    /// Current size of the file in bytes.
    pub fn size(&self) -> Result<u64, FilesystemError> {
        fs::metadata(&self.path)
            .map(|m| m.len())
            .map_err(|source| FilesystemError::Stat {
                path: self.path.clone(),
                source,
            })
    }

    /// Removes the file. Fails if it is already gone.
    pub fn delete(&self) -> Result<(), FilesystemError> {
        fs::remove_file(&self.path).map_err(|source| FilesystemError::Delete {
            path: self.path.clone(),
            source,
        })
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
