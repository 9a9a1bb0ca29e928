//! Media Normalizer
//!
//! Fetches media with yt-dlp, inspects it with ffprobe and re-encodes it with
//! ffmpeg when its codecs are unfit for mobile and web playback.

pub mod download;
pub mod duration;
pub mod encode;
pub mod lifecycle;
pub mod metadata;
pub mod planner;
pub mod preflight;
pub mod probe;
pub mod process;
pub mod record;
pub mod request;
pub mod sanitize;
pub mod scratch;
pub mod select;

#[cfg(test)]
mod testutil;

pub use media_normalizer_config as config;
pub use media_normalizer_config::Config;
pub use download::{build_download_command, classify_site, download_with_retry, DownloadError, Site};
pub use duration::{parse_duration, DurationError, DurationSecs};
pub use encode::{build_transcode_command, transcode, TranscodeError};
pub use lifecycle::{process, PipelineContext, PipelineError, Stage};
pub use metadata::{ingest_sidecar, MetadataError, SidecarMetadata};
pub use planner::{plan_conversion, AudioTarget, ConversionPlan, PlanInputs, VideoTarget};
pub use preflight::{check_tool, parse_ffmpeg_version, run_preflight, PreflightError, ToolInfo};
pub use probe::{probe_file, ProbeError, ProbeReport, StreamDescriptor, StreamKind};
pub use process::{run_tool, RunControl, ToolError};
pub use record::{FilesystemError, MediaRecord};
pub use request::{normalize_url_input, InputError, MediaRequest};
pub use sanitize::{sanitize_file_name, SanitizeError};
pub use scratch::ScratchFile;
pub use select::{select_audio_stream, select_video_stream};
