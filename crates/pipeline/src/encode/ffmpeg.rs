//! ffmpeg transcoder
//!
//! Builds the ffmpeg command for a [`ConversionPlan`] and runs it with the
//! configured failure policy.

use crate::planner::{AudioTarget, ConversionPlan, VideoTarget};
use crate::process::{command_line, run_tool, tool_command, RunControl, ToolError};
use crate::record::MediaRecord;
use crate::scratch::ScratchFile;
use media_normalizer_config::{ToolConfig, TranscodeConfig, TranscodeFailurePolicy};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

/// Suffix appended to the file stem of a transcoded file.
const CONVERTED_SUFFIX: &str = "_converted";

/// VBV buffer under constant quality.
const CONSTANT_QUALITY_BUFSIZE: &str = "9M";

/// Error type for transcoding
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// ffmpeg failed and the policy allowed no retry
    #[error("ffmpeg failed encoding to {target}: {source}")]
    Failed {
        target: VideoTarget,
        #[source]
        source: ToolError,
    },

    /// ffmpeg failed, and so did the retry with a demoted video target
    #[error("ffmpeg failed encoding to {first_target} ({first}) and to {second_target} ({second})")]
    RetryFailed {
        first_target: VideoTarget,
        first: ToolError,
        second_target: VideoTarget,
        second: ToolError,
    },

    /// No output name could be reserved next to the input
    #[error("cannot reserve transcode output {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The request was cancelled while encoding
    #[error("transcode cancelled")]
    Cancelled,
}

/// `{dir}/{stem}_converted.mp4` next to `input`.
pub fn converted_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{}{}.mp4", stem, CONVERTED_SUFFIX))
}

/// Claims the output file for this request: `{stem}_converted.mp4`, or
/// `{stem}_{tag}_converted.mp4` when that belongs to someone else.
///
/// The returned guard only ever covers a file this call created, so a
/// failed encode never deletes another request's delivered file.
fn claim_output(input: &Path, tag: &str) -> Result<ScratchFile, TranscodeError> {
    let preferred = converted_path(input);
    match ScratchFile::claim(&preferred) {
        Ok(output) => return Ok(output),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            tracing::debug!(path = %preferred.display(), "output name taken");
        }
        Err(source) => return Err(TranscodeError::Output { path: preferred, source }),
    }

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tagged = input.with_file_name(format!("{}_{}{}.mp4", stem, tag, CONVERTED_SUFFIX));
    ScratchFile::claim(&tagged).map_err(|source| TranscodeError::Output { path: tagged, source })
}

/// Build an ffmpeg command for a conversion plan
///
/// Creates a Command configured with:
/// - overwrite and input path
/// - the video encoder, rate control and downscale filter, or stream copy
/// - AAC stereo audio, or stream copy
/// - faststart for progressive playback
pub fn build_transcode_command(
    tool: &ToolConfig,
    cfg: &TranscodeConfig,
    input: &Path,
    output: &Path,
    plan: &ConversionPlan,
) -> Command {
    let mut cmd = tool_command(tool);

    cmd.arg("-y").arg("-i").arg(input);

    match plan.video_target {
        VideoTarget::Copy => {
            cmd.args(["-c:v", "copy"]);
        }
        target => {
            match target {
                VideoTarget::Hevc => cmd.args(["-c:v", "libx265", "-tag:v", "hvc1"]),
                _ => cmd.args(["-c:v", "libx264", "-profile:v", "baseline"]),
            };
            cmd.args(["-pix_fmt", "yuv420p"]);

            match plan.target_video_bitrate {
                Some(bps) => {
                    let bps = bps.to_string();
                    cmd.arg("-b:v").arg(&bps);
                    cmd.arg("-maxrate").arg(&bps);
                    cmd.arg("-bufsize").arg(bps_doubled(&bps));
                }
                None => {
                    cmd.arg("-crf").arg(cfg.crf.to_string());
                    cmd.arg("-maxrate").arg(&cfg.max_rate);
                    cmd.arg("-bufsize").arg(CONSTANT_QUALITY_BUFSIZE);
                }
            }

            cmd.arg("-vf")
                .arg(format!("scale='min({},iw)':-2", cfg.max_width));
        }
    }

    match plan.audio_target {
        AudioTarget::Aac => {
            cmd.args(["-c:a", "aac", "-b:a"])
                .arg(&cfg.audio_bitrate)
                .args(["-ac", "2"]);
        }
        AudioTarget::Copy => {
            cmd.args(["-c:a", "copy"]);
        }
    }

    cmd.args(["-movflags", "+faststart"]);
    cmd.arg(output);

    cmd
}

fn bps_doubled(bps: &str) -> String {
    bps.parse::<u64>()
        .map(|n| n.saturating_mul(2).to_string())
        .unwrap_or_else(|_| bps.to_string())
}

/// Transcodes the record's file according to `plan`.
///
/// On success the record points at `{stem}_converted.mp4` and the
/// pre-transcode file is removed (failures logged). On failure the partial
/// output is removed and the record is left untouched.
pub async fn transcode(
    tool: &ToolConfig,
    cfg: &TranscodeConfig,
    record: &mut MediaRecord,
    plan: &mut ConversionPlan,
    ctl: &RunControl,
) -> Result<(), TranscodeError> {
    let input = record.path.clone();
    // ffmpeg's -y only ever overwrites this claimed placeholder.
    let output = claim_output(&input, record.short_id())?;

    let first_target = plan.video_target;
    if let Err(first) = run_encode(tool, cfg, &input, output.path(), plan, ctl).await {
        if first.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }
        if cfg.failure_policy != TranscodeFailurePolicy::DemoteOnce {
            return Err(TranscodeError::Failed {
                target: first_target,
                source: first,
            });
        }
        let Some(second_target) = plan.demote_video_target() else {
            return Err(TranscodeError::Failed {
                target: first_target,
                source: first,
            });
        };

        tracing::warn!(
            from = %first_target,
            to = %second_target,
            error = %first,
            "encode failed, retrying with demoted video target"
        );

        if let Err(second) = run_encode(tool, cfg, &input, output.path(), plan, ctl).await {
            if second.is_cancelled() {
                return Err(TranscodeError::Cancelled);
            }
            return Err(TranscodeError::RetryFailed {
                first_target,
                first,
                second_target,
                second,
            });
        }
    }

    let output = output.keep();
    record.set_path(output);
    ScratchFile::new(&input).remove();

    match record.size() {
        Ok(new_size) if plan.original_file_size > 0 => {
            let ratio = new_size as f64 / plan.original_file_size as f64 * 100.0;
            tracing::info!(
                path = %record.path.display(),
                original_size = plan.original_file_size,
                new_size,
                "transcode finished, output is {:.1}% of original",
                ratio
            );
        }
        Ok(new_size) => {
            tracing::info!(path = %record.path.display(), new_size, "transcode finished");
        }
        Err(e) => {
            tracing::warn!(error = %e, "transcode finished but output size is unavailable");
        }
    }

    Ok(())
}

async fn run_encode(
    tool: &ToolConfig,
    cfg: &TranscodeConfig,
    input: &Path,
    output: &Path,
    plan: &ConversionPlan,
    ctl: &RunControl,
) -> Result<(), ToolError> {
    let cmd = build_transcode_command(tool, cfg, input, output, plan);
    tracing::info!(
        video = %plan.video_target,
        audio = %plan.audio_target,
        command = %command_line(&cmd),
        "executing transcode"
    );
    run_tool("ffmpeg", cmd, ctl).await.map(|_| ())
}
