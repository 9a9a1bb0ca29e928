//! Fetching media with yt-dlp.
//!
//! Builds the yt-dlp invocation for a request and runs it with a two-tier
//! policy: full site-specific arguments first, then once more with the
//! format/sort selection dropped.

use crate::process::{run_tool, tool_command, RunControl, ToolError};
use crate::request::MediaRequest;
use media_normalizer_config::{DownloadConfig, ToolConfig};
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;
use url::Url;

const YOUTUBE_HOSTS: &[&str] = &["youtube.com", "www.youtube.com", "m.youtube.com", "youtu.be"];

/// Error type for downloads
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Both tiers failed
    #[error("both download attempts failed: first: {first}; second: {second}")]
    BothAttemptsFailed { first: ToolError, second: ToolError },

    /// The request was cancelled; no further attempt was made
    #[error("download cancelled")]
    Cancelled,
}

/// Site families that get special treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    YouTube,
    TikTok,
    Generic,
}

/// Classifies a URL by host.
pub fn classify_site(url: &Url) -> Site {
    let host = url.host_str().unwrap_or("").to_ascii_lowercase();
    if YOUTUBE_HOSTS.contains(&host.as_str()) {
        Site::YouTube
    } else if host.contains("tiktok.com") {
        Site::TikTok
    } else {
        Site::Generic
    }
}

/// `{workdir}/{id}.%(ext)s`
pub fn output_template(workdir: &Path, id: &str) -> String {
    format!("{}/{}.%(ext)s", workdir.display(), id)
}

/// Build a yt-dlp command for one attempt
///
/// Creates a Command configured with:
/// - mp3 extraction for audio-only requests, mp4 recoding otherwise
/// - an info JSON sidecar next to the media
/// - format/sort selection for full-length YouTube videos (tier 1 only)
/// - the TikTok CDN filter
/// - the output template keyed by `id`
/// - the cookie jar, if any
pub fn build_download_command(
    tool: &ToolConfig,
    cfg: &DownloadConfig,
    request: &MediaRequest,
    id: &str,
    simplified: bool,
) -> Command {
    let mut cmd = tool_command(tool);

    if request.audio_only() {
        cmd.args(["-x", "--audio-format", "mp3"]);
    } else {
        cmd.args(["--recode-video", "mp4"]);
    }

    cmd.arg("--write-info-json");

    match classify_site(request.url()) {
        Site::YouTube => {
            let is_short = request.url().path().contains("shorts");
            if !request.audio_only() && !is_short && !simplified {
                cmd.arg("-f").arg(&cfg.youtube_format);
                cmd.arg("-S").arg(&cfg.youtube_sort);
            }
        }
        Site::TikTok => {
            cmd.arg("-f").arg(&cfg.tiktok_format);
        }
        Site::Generic => {}
    }

    cmd.arg("-o").arg(output_template(request.workdir(), id));
    cmd.arg(request.raw_url());

    if let Some(cookies) = request.cookies_file().or(cfg.cookies_file.as_deref()) {
        cmd.arg("--cookies").arg(cookies);
    }

    cmd
}

/// Downloads the media for `request` into `{workdir}/{id}.{ext}`.
///
/// Tries once with full arguments and, on any failure, once more with
/// `simplified = true`. There is no third attempt.
pub async fn download_with_retry(
    tool: &ToolConfig,
    cfg: &DownloadConfig,
    request: &MediaRequest,
    id: &str,
    ctl: &RunControl,
) -> Result<(), DownloadError> {
    let first = match run_attempt(tool, cfg, request, id, false, ctl).await {
        Ok(()) => return Ok(()),
        Err(e) if e.is_cancelled() => return Err(DownloadError::Cancelled),
        Err(e) => e,
    };

    tracing::warn!(user = request.user(), error = %first, "first download attempt failed");
    tracing::info!(user = request.user(), "retrying with simplified arguments");

    match run_attempt(tool, cfg, request, id, true, ctl).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_cancelled() => Err(DownloadError::Cancelled),
        Err(second) => Err(DownloadError::BothAttemptsFailed { first, second }),
    }
}

async fn run_attempt(
    tool: &ToolConfig,
    cfg: &DownloadConfig,
    request: &MediaRequest,
    id: &str,
    simplified: bool,
    ctl: &RunControl,
) -> Result<(), ToolError> {
    let cmd = build_download_command(tool, cfg, request, id, simplified);
    tracing::info!(
        user = request.user(),
        simplified,
        command = %crate::process::command_line(&cmd),
        "executing download"
    );
    run_tool("yt-dlp", cmd, ctl).await.map(|_| ())
}
