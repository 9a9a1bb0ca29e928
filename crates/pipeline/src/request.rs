//! Validated pipeline input.

use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Error type for request validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("input should be a single line")]
    MultiLine,
    #[error("invalid URL '{0}'")]
    InvalidUrl(String),
}

/// Cleans up user-supplied text and checks that it is a usable URL.
///
/// Surrounding whitespace and double quotes are removed; the result must
/// parse with a non-empty scheme and host.
pub fn normalize_url_input(input: &str) -> Result<(String, Url), InputError> {
    if input.trim_end_matches(['\r', '\n']).contains('\n') {
        return Err(InputError::MultiLine);
    }

    let cleaned = input.trim().trim_matches('"');
    let url = Url::parse(cleaned).map_err(|_| InputError::InvalidUrl(cleaned.to_string()))?;

    if url.scheme().is_empty() || url.host_str().map_or(true, str::is_empty) {
        return Err(InputError::InvalidUrl(cleaned.to_string()));
    }

    Ok((cleaned.to_string(), url))
}

/// One media request. Immutable once built.
#[derive(Debug, Clone)]
pub struct MediaRequest {
    raw_url: String,
    url: Url,
    user: String,
    workdir: PathBuf,
    cookies_file: Option<PathBuf>,
    audio_only: bool,
}

impl MediaRequest {
    /// Validates `url` and builds a video request.
    pub fn new(
        url: &str,
        user: impl Into<String>,
        workdir: impl Into<PathBuf>,
    ) -> Result<Self, InputError> {
        let (raw_url, url) = normalize_url_input(url)?;
        Ok(Self {
            raw_url,
            url,
            user: user.into(),
            workdir: workdir.into(),
            cookies_file: None,
            audio_only: false,
        })
    }

    pub fn with_cookies_file(mut self, cookies_file: Option<PathBuf>) -> Self {
        self.cookies_file = cookies_file;
        self
    }

    pub fn with_audio_only(mut self, audio_only: bool) -> Self {
        self.audio_only = audio_only;
        self
    }

    /// URL as the user sent it (cleaned), passed to the fetch tool verbatim.
    pub fn raw_url(&self) -> &str {
        &self.raw_url
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn cookies_file(&self) -> Option<&Path> {
        self.cookies_file.as_deref()
    }

    pub fn audio_only(&self) -> bool {
        self.audio_only
    }

    /// Container extension the fetch tool produces for this request.
    pub fn extension(&self) -> &'static str {
        if self.audio_only {
            "mp3"
        } else {
            "mp4"
        }
    }
}
