//! Sidecar metadata written by yt-dlp (`--write-info-json`).

use crate::duration::DurationSecs;
use crate::scratch::ScratchFile;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for sidecar ingestion
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("error reading sidecar '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error decoding sidecar '{}': {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The fields of the info JSON the pipeline uses. Everything else in the
/// (large) document is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SidecarMetadata {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default, rename = "duration_string")]
    pub duration: Option<DurationSecs>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// `{workdir}/{id}.info.json`
pub fn sidecar_path(workdir: &Path, id: &str) -> PathBuf {
    workdir.join(format!("{}.info.json", id))
}

/// Decodes a sidecar document.
pub fn parse_sidecar(path: &Path, json: &[u8]) -> Result<SidecarMetadata, MetadataError> {
    serde_json::from_slice(json).map_err(|source| MetadataError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads and decodes the sidecar for `id`, then deletes it.
///
/// The file is removed whether or not decoding succeeds; a failed removal
/// is logged only.
pub fn ingest_sidecar(workdir: &Path, id: &str) -> Result<SidecarMetadata, MetadataError> {
    let path = sidecar_path(workdir, id);
    let buf = fs::read(&path).map_err(|source| MetadataError::Read {
        path: path.clone(),
        source,
    })?;

    let sidecar = ScratchFile::new(&path);
    let meta = parse_sidecar(&path, &buf)?;
    sidecar.remove();

    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const INFO_JSON: &str = r#"{
        "id": "dQw4w9WgXcQ",
        "title": "Never: Gonna / Give",
        "width": 1280,
        "height": 720,
        "duration": 212,
        "duration_string": "3:32",
        "vcodec": "vp09.00.31.08",
        "acodec": "opus",
        "formats": [{"format_id": "18"}]
    }"#;

    #[test]
    fn test_decodes_known_fields() {
        let meta = parse_sidecar(Path::new("x.info.json"), INFO_JSON.as_bytes()).unwrap();
        assert_eq!(meta.width, Some(1280));
        assert_eq!(meta.height, Some(720));
        assert_eq!(meta.duration, Some(DurationSecs(212)));
        assert_eq!(meta.vcodec.as_deref(), Some("vp09.00.31.08"));
        assert_eq!(meta.acodec.as_deref(), Some("opus"));
        assert_eq!(meta.title.as_deref(), Some("Never: Gonna / Give"));
    }

    #[test]
    fn test_audio_sidecar_with_nulls() {
        let json = r#"{"title": "Song", "width": null, "height": null, "duration_string": null, "vcodec": "none", "acodec": "mp3"}"#;
        let meta = parse_sidecar(Path::new("x.info.json"), json.as_bytes()).unwrap();
        assert_eq!(meta.width, None);
        assert_eq!(meta.duration, None);
        assert_eq!(meta.vcodec.as_deref(), Some("none"));
    }

    #[test]
    fn test_bad_duration_is_decode_error() {
        let json = r#"{"duration_string": "1:2:3:4"}"#;
        assert!(matches!(
            parse_sidecar(Path::new("x.info.json"), json.as_bytes()),
            Err(MetadataError::Decode { .. })
        ));
    }

    #[test]
    fn test_wrong_shape_is_decode_error() {
        let json = r#"{"width": "wide"}"#;
        assert!(matches!(
            parse_sidecar(Path::new("x.info.json"), json.as_bytes()),
            Err(MetadataError::Decode { .. })
        ));
    }

    #[test]
    fn test_ingest_deletes_sidecar() {
        let dir = TempDir::new().unwrap();
        let path = sidecar_path(dir.path(), "abc");
        fs::write(&path, INFO_JSON).unwrap();

        let meta = ingest_sidecar(dir.path(), "abc").unwrap();
        assert_eq!(meta.duration, Some(DurationSecs(212)));
        assert!(!path.exists());
    }

    #[test]
    fn test_ingest_missing_sidecar() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ingest_sidecar(dir.path(), "missing"),
            Err(MetadataError::Read { .. })
        ));
    }
}
