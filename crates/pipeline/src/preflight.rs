//! Preflight checks
//!
//! Verifies that the external tools are runnable before any request is
//! accepted:
//! - yt-dlp (`--version`)
//! - ffprobe and ffmpeg (`-version`)

use crate::process::{run_tool, tool_command, RunControl, ToolError};
use media_normalizer_config::{Config, ToolConfig};
use serde::Serialize;
use thiserror::Error;

/// Error types for preflight checks
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("{tool} not available: {source}")]
    ToolUnavailable {
        tool: &'static str,
        #[source]
        source: ToolError,
    },

    #[error("{tool} printed no version information")]
    NoVersion { tool: &'static str },
}

/// A tool that answered its version query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolInfo {
    pub tool: &'static str,
    /// First non-empty line of the version output
    pub version: String,
}

/// Parse an FFmpeg-suite version banner and extract the major version
///
/// Handles `"ffmpeg version 6.1.1 ..."`, `"ffprobe version n7.0-..."` and
/// the like. Returns `None` for git snapshot builds (`N-1234-g...`).
pub fn parse_ffmpeg_version(tool: &str, version_output: &str) -> Option<u32> {
    let marker = format!("{} version", tool.to_lowercase());
    let line = version_output
        .lines()
        .map(str::to_lowercase)
        .find(|line| line.contains(&marker))?;

    let version = line.split(&marker).nth(1)?.split_whitespace().next()?;
    let version = version.strip_prefix('n').unwrap_or(version);

    version.split(['.', '-']).next()?.parse().ok()
}

/// Runs `tool` with `version_flag` and captures the first line it prints.
pub async fn check_tool(
    name: &'static str,
    tool: &ToolConfig,
    version_flag: &str,
    ctl: &RunControl,
) -> Result<ToolInfo, PreflightError> {
    let mut cmd = tool_command(tool);
    cmd.arg(version_flag);

    let output = run_tool(name, cmd, ctl)
        .await
        .map_err(|source| PreflightError::ToolUnavailable { tool: name, source })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let version = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or(PreflightError::NoVersion { tool: name })?
        .to_string();

    Ok(ToolInfo {
        tool: name,
        version,
    })
}

/// Checks all three tools, in pipeline order. One result per tool.
pub async fn run_preflight(
    cfg: &Config,
    ctl: &RunControl,
) -> Vec<Result<ToolInfo, PreflightError>> {
    let checks = [
        ("yt-dlp", &cfg.tools.yt_dlp, "--version"),
        ("ffprobe", &cfg.tools.ffprobe, "-version"),
        ("ffmpeg", &cfg.tools.ffmpeg, "-version"),
    ];

    let mut results = Vec::with_capacity(checks.len());
    for (name, tool, flag) in checks {
        let result = check_tool(name, tool, flag, ctl).await;
        match &result {
            Ok(info) => tracing::info!(tool = name, version = %info.version, "tool available"),
            Err(e) => tracing::error!(tool = name, error = %e, "tool check failed"),
        }
        results.push(result);
    }
    results
}
