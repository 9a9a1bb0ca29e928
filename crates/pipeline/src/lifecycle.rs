//! Request lifecycle
//!
//! Drives one request from URL to delivered file: download, sidecar
//! ingestion, rename, probe, plan and (when needed) transcode. Every stage
//! runs inside a `media_request` span carrying the user and the request id.

use crate::download::{download_with_retry, DownloadError};
use crate::encode::{transcode, TranscodeError};
use crate::metadata::{ingest_sidecar, sidecar_path, MetadataError};
use crate::planner::{plan_conversion, PlanInputs};
use crate::probe::{probe_file, ProbeError};
use crate::process::{timeout_from_secs, RunControl};
use crate::record::MediaRecord;
use crate::request::{InputError, MediaRequest};
use crate::sanitize::sanitize_file_name;
use crate::scratch::ScratchFile;
use crate::select::{select_audio_stream, select_video_stream};
use media_normalizer_config::Config;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Error type for a pipeline run. Every fatal variant names the request.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InputError),

    #[error("could not prepare working directory '{}': {source}", .path.display())]
    Workdir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("download of {url} for {user} failed: {source}")]
    DownloadFailed {
        url: String,
        user: String,
        #[source]
        source: DownloadError,
    },

    #[error("download of {url} for {user} reported success but '{}' is missing", .path.display())]
    MissingArtifact {
        url: String,
        user: String,
        path: PathBuf,
    },

    #[error("metadata for {url} ({user}) could not be ingested: {source}")]
    MetadataIngestFailed {
        url: String,
        user: String,
        #[source]
        source: MetadataError,
    },

    #[error("transcode of {url} for {user} failed: {source}")]
    TranscodeFailed {
        url: String,
        user: String,
        #[source]
        source: TranscodeError,
    },

    #[error("request for {url} ({user}) was cancelled")]
    Cancelled { url: String, user: String },
}

/// Stage a request is in, recorded on its span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Downloading,
    IngestingMetadata,
    Renaming,
    Probing,
    Transcoding,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Downloading => "downloading",
            Stage::IngestingMetadata => "ingesting_metadata",
            Stage::Renaming => "renaming",
            Stage::Probing => "probing",
            Stage::Transcoding => "transcoding",
            Stage::Done => "done",
        }
    }
}

fn enter_stage(stage: Stage) {
    tracing::Span::current().record("stage", stage.as_str());
    tracing::debug!(stage = stage.as_str(), "entering stage");
}

/// What every request shares: the configuration and the token that
/// cancels all of them.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub config: Arc<Config>,
    pub cancel: CancellationToken,
}

impl PipelineContext {
    pub fn new(config: Config) -> Self {
        Self::with_cancel(config, CancellationToken::new())
    }

    pub fn with_cancel(config: Config, cancel: CancellationToken) -> Self {
        Self {
            config: Arc::new(config),
            cancel,
        }
    }

    /// Validates raw user input into a request rooted at the configured
    /// working directory.
    pub fn request(&self, raw_url: &str, user: &str) -> Result<MediaRequest, PipelineError> {
        Ok(MediaRequest::new(
            raw_url,
            user,
            self.config.paths.workdir.clone(),
        )?)
    }

    fn control(&self, timeout_secs: u64) -> RunControl {
        RunControl::new(self.cancel.clone()).with_timeout(timeout_from_secs(timeout_secs))
    }
}

/// Runs the whole pipeline for one request.
///
/// On success the returned record names the delivered file, which the
/// caller owns from then on (see [`MediaRecord::delete`]). On failure every
/// file the run created has been removed.
pub async fn process(
    request: MediaRequest,
    ctx: &PipelineContext,
) -> Result<MediaRecord, PipelineError> {
    let id = Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "media_request",
        user = request.user(),
        id = %id,
        stage = tracing::field::Empty
    );

    async move {
        tracing::info!(url = request.raw_url(), audio_only = request.audio_only(), "processing request");
        let result = run(&request, id, ctx).await;
        match &result {
            Ok(record) => {
                enter_stage(Stage::Done);
                tracing::info!(path = %record.path.display(), "request finished");
            }
            Err(e) => tracing::error!(error = %e, "request failed"),
        }
        result
    }
    .instrument(span)
    .await
}

async fn run(
    request: &MediaRequest,
    id: String,
    ctx: &PipelineContext,
) -> Result<MediaRecord, PipelineError> {
    let config = &ctx.config;
    let url = || request.raw_url().to_string();
    let user = || request.user().to_string();
    let workdir = request.workdir();

    tokio::fs::create_dir_all(workdir)
        .await
        .map_err(|source| PipelineError::Workdir {
            path: workdir.to_path_buf(),
            source,
        })?;

    enter_stage(Stage::Downloading);
    let fetch = ctx.control(config.limits.fetch_timeout_secs);
    // Anything the fetch tool leaves behind goes if a later stage fails.
    let sidecar = ScratchFile::new(sidecar_path(workdir, &id));
    if let Err(e) =
        download_with_retry(&config.tools.yt_dlp, &config.download, request, &id, &fetch).await
    {
        remove_request_files(workdir, &id);
        return Err(match e {
            DownloadError::Cancelled => PipelineError::Cancelled { url: url(), user: user() },
            source => PipelineError::DownloadFailed { url: url(), user: user(), source },
        });
    }

    let expected = workdir.join(format!("{}.{}", id, request.extension()));
    if !expected.exists() {
        remove_request_files(workdir, &id);
        return Err(PipelineError::MissingArtifact {
            url: url(),
            user: user(),
            path: expected,
        });
    }
    let mut artifact = ScratchFile::new(&expected);
    let mut record = MediaRecord::new(id, expected, request.audio_only());

    enter_stage(Stage::IngestingMetadata);
    let meta = ingest_sidecar(workdir, &record.id).map_err(|source| {
        PipelineError::MetadataIngestFailed { url: url(), user: user(), source }
    })?;
    // Already removed by ingestion.
    sidecar.keep();
    record.apply_sidecar(meta);

    enter_stage(Stage::Renaming);
    rename_to_title(&mut artifact, &mut record, workdir, request.extension());

    if request.audio_only() {
        artifact.keep();
        return Ok(record);
    }

    enter_stage(Stage::Probing);
    let probe = ctx.control(config.limits.probe_timeout_secs);
    let report = match probe_file(&config.tools.ffprobe, &record.path, &probe).await {
        Ok(report) => report,
        Err(ProbeError::Cancelled) => {
            return Err(PipelineError::Cancelled { url: url(), user: user() });
        }
        Err(e) => {
            tracing::warn!(error = %e, "probe failed, serving the download unchanged");
            artifact.keep();
            return Ok(record);
        }
    };

    let original_file_size = match record.size() {
        Ok(size) => size,
        Err(e) => {
            tracing::warn!(error = %e, "could not stat download, serving it unchanged");
            artifact.keep();
            return Ok(record);
        }
    };

    let video_codec = select_video_stream(&report.streams)
        .map(|s| s.codec_name.clone())
        .unwrap_or_else(|| record.vcodec.clone());
    let audio_codec = select_audio_stream(&report.streams)
        .map(|s| s.codec_name.clone())
        .unwrap_or_else(|| record.acodec.clone());

    let mut plan = plan_conversion(
        &PlanInputs {
            video_codec,
            audio_codec,
            original_file_size,
            original_bitrate: report.format_bit_rate.unwrap_or(0),
            duration_secs: record.duration_secs,
        },
        config.transcode.bitrate_strategy,
        config.transcode.video_codec,
    );

    tracing::info!(
        video_codec = %plan.original_video_codec,
        audio_codec = %plan.original_audio_codec,
        size = plan.original_file_size,
        bitrate = plan.original_bitrate,
        video = %plan.video_target,
        audio = %plan.audio_target,
        target_video_bitrate = ?plan.target_video_bitrate,
        "conversion plan"
    );

    if plan.is_already_compatible() {
        tracing::info!("already compatible, no conversion needed");
        artifact.keep();
        return Ok(record);
    }

    enter_stage(Stage::Transcoding);
    let encode = ctx.control(config.limits.encode_timeout_secs);
    transcode(&config.tools.ffmpeg, &config.transcode, &mut record, &mut plan, &encode)
        .await
        .map_err(|e| match e {
            TranscodeError::Cancelled => PipelineError::Cancelled { url: url(), user: user() },
            source => PipelineError::TranscodeFailed { url: url(), user: user(), source },
        })?;
    // The transcoder removed the pre-transcode file itself.
    artifact.keep();

    Ok(record)
}

/// Renames the download after its title. Failures only cost the nicer
/// name, so they are logged and the id-based name stays.
fn rename_to_title(
    artifact: &mut ScratchFile,
    record: &mut MediaRecord,
    workdir: &Path,
    extension: &str,
) {
    let Some(title) = record.title.as_deref() else {
        tracing::debug!("no title in metadata, keeping id-based name");
        return;
    };

    let name = match sanitize_file_name(title) {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(error = %e, "title unusable as file name, keeping id-based name");
            return;
        }
    };

    let targets = [
        workdir.join(format!("{}.{}", name, extension)),
        workdir.join(format!("{}_{}.{}", name, record.short_id(), extension)),
    ];
    for target in targets {
        match artifact.rename_to(&target) {
            Ok(()) => {
                record.set_path(target);
                return;
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!(target = %target.display(), "name taken");
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    target = %target.display(),
                    "rename failed, keeping id-based name"
                );
                return;
            }
        }
    }
    tracing::warn!(title = %name, "every title-based name is taken, keeping id-based name");
}

/// Removes whatever the fetch tool left under this request's id
/// (`{id}.part`, `{id}.f137.webm`, ...). Other requests' files never
/// share the prefix.
fn remove_request_files(workdir: &Path, id: &str) {
    let prefix = format!("{}.", id);
    let entries = match std::fs::read_dir(workdir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(error = %e, workdir = %workdir.display(), "cannot list leftovers");
            return;
        }
    };
    for entry in entries.filter_map(|e| e.ok()) {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            ScratchFile::new(entry.path()).remove();
        }
    }
}
