//! Stream probing with ffprobe.
//!
//! Runs `ffprobe` over a downloaded file and turns its JSON report into a
//! list of [`StreamDescriptor`]s plus the container bitrate.

use crate::process::{run_tool, tool_command, RunControl, ToolError};
use media_normalizer_config::ToolConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe could not run or exited unsuccessfully.
    #[error("ffprobe unavailable: {0}")]
    ProbeUnavailable(#[source] ToolError),

    /// ffprobe output did not match the expected schema.
    #[error("failed to parse ffprobe output: {0}")]
    ProbeOutputMalformed(#[from] serde_json::Error),

    /// The request was cancelled while probing.
    #[error("probe cancelled")]
    Cancelled,
}

impl From<ToolError> for ProbeError {
    fn from(e: ToolError) -> Self {
        if e.is_cancelled() {
            ProbeError::Cancelled
        } else {
            ProbeError::ProbeUnavailable(e)
        }
    }
}

/// Kind of elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    /// Subtitles, data, attachments.
    Other,
}

impl StreamKind {
    fn from_codec_type(codec_type: &str) -> Self {
        match codec_type {
            "video" => StreamKind::Video,
            "audio" => StreamKind::Audio,
            _ => StreamKind::Other,
        }
    }
}

/// One stream entry from an ffprobe report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub index: u32,
    pub kind: StreamKind,
    /// Codec name (e.g., "h264", "vp9", "opus").
    pub codec_name: String,
    /// Bits per second; 0 when ffprobe reports nothing usable.
    pub bit_rate: u64,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// The source marks this stream as the preferred one of its kind.
    pub is_default: bool,
}

impl StreamDescriptor {
    /// Pixel count used to rank video streams.
    pub fn pixel_area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Result of probing a media file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Container bitrate, if ffprobe reported one.
    pub format_bit_rate: Option<u64>,
    /// Streams in the order ffprobe listed them.
    pub streams: Vec<StreamDescriptor>,
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        #[serde(default)]
        pub streams: Vec<Stream>,
        #[serde(default)]
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub index: u32,
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub bit_rate: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub channels: Option<u32>,
        #[serde(default)]
        pub disposition: Disposition,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct Disposition {
        #[serde(default)]
        pub default: u8,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub bit_rate: Option<String>,
    }
}

/// Parses a bitrate field; empty or non-numeric values count as 0.
pub fn parse_bitrate(raw: &str) -> u64 {
    raw.trim().parse().unwrap_or(0)
}

/// Probes a media file using ffprobe to collect stream and format metadata.
///
/// Runs `ffprobe -v quiet -print_format json -show_format -show_streams <path>`
/// and parses the JSON output.
pub async fn probe_file(
    tool: &ToolConfig,
    path: &Path,
    ctl: &RunControl,
) -> Result<ProbeReport, ProbeError> {
    let mut cmd = tool_command(tool);
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ])
    .arg(path);

    let output = run_tool("ffprobe", cmd, ctl).await?;
    parse_ffprobe_output(&output.stdout)
}

/// Parses ffprobe JSON output into a [`ProbeReport`].
pub fn parse_ffprobe_output(json: &[u8]) -> Result<ProbeReport, ProbeError> {
    let raw: ffprobe_json::FfprobeOutput = serde_json::from_slice(json)?;

    let streams = raw
        .streams
        .into_iter()
        .map(|s| StreamDescriptor {
            index: s.index,
            kind: StreamKind::from_codec_type(s.codec_type.as_deref().unwrap_or("")),
            codec_name: s.codec_name.unwrap_or_default(),
            bit_rate: s.bit_rate.as_deref().map(parse_bitrate).unwrap_or(0),
            width: s.width.unwrap_or(0),
            height: s.height.unwrap_or(0),
            channels: s.channels.unwrap_or(0),
            is_default: s.disposition.default == 1,
        })
        .collect();

    let format_bit_rate = raw
        .format
        .and_then(|f| f.bit_rate)
        .map(|br| parse_bitrate(&br));

    Ok(ProbeReport {
        format_bit_rate,
        streams,
    })
}
