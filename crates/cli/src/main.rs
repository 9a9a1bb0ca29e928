//! CLI entry point for Media Normalizer
//!
//! `fetch` runs the pipeline for one or more URLs and prints the delivered
//! records as JSON on stdout; `check-tools` verifies the external tools.
//! Logs go to stderr.

use clap::{Parser, Subcommand};
use media_normalizer::{
    parse_ffmpeg_version, process, run_preflight, Config, MediaRecord, PipelineContext,
    RunControl,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Deadline for each `--version` query during `check-tools`.
const TOOL_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Media Normalizer - fetch media and make it playable on mobile and web
#[derive(Parser, Debug)]
#[command(name = "media-normalizer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (a missing file means defaults)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download, inspect and (if needed) re-encode media
    Fetch {
        /// Media URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Requesting user, recorded in logs and errors
        #[arg(long, default_value = "cli")]
        user: String,

        /// Working directory (overrides paths.workdir)
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Cookie jar handed to yt-dlp
        #[arg(long)]
        cookies: Option<PathBuf>,

        /// Extract audio as mp3 instead of fetching video
        #[arg(long)]
        audio_only: bool,
    },

    /// Check that yt-dlp, ffprobe and ffmpeg can be run
    CheckTools,
}

fn init_logging(verbose: bool) {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if verbose {
            "media_normalizer=debug,media_normalizer_cli=debug".to_string()
        } else {
            "media_normalizer=info,media_normalizer_cli=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Requests run at once: the configured limit, or the logical core count.
fn request_limit(configured: u32) -> usize {
    if configured > 0 {
        configured as usize
    } else {
        num_cpus::get().max(1)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match Config::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config '{}': {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Fetch {
            urls,
            user,
            workdir,
            cookies,
            audio_only,
        } => fetch(config, urls, user, workdir, cookies, audio_only).await,
        Commands::CheckTools => check_tools(config).await,
    }
}

async fn fetch(
    mut config: Config,
    urls: Vec<String>,
    user: String,
    workdir: Option<PathBuf>,
    cookies: Option<PathBuf>,
    audio_only: bool,
) -> ExitCode {
    if let Some(workdir) = workdir {
        config.paths.workdir = workdir;
    }
    let limit = request_limit(config.limits.max_concurrent_requests);

    let cancel = CancellationToken::new();
    let ctx = PipelineContext::with_cancel(config, cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling in-flight requests");
            cancel.cancel();
        }
    });

    tracing::info!(
        requests = urls.len(),
        limit,
        workdir = %ctx.config.paths.workdir.display(),
        "starting"
    );

    let semaphore = Arc::new(Semaphore::new(limit));
    let mut tasks = JoinSet::new();
    let mut failed = 0usize;

    for (idx, url) in urls.iter().enumerate() {
        let request = match ctx.request(url, &user) {
            Ok(request) => request
                .with_cookies_file(cookies.clone())
                .with_audio_only(audio_only),
            Err(e) => {
                eprintln!("{}: {}", url, e);
                failed += 1;
                continue;
            }
        };

        let ctx = ctx.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            // The semaphore is never closed.
            let _permit = semaphore.acquire_owned().await.ok();
            (idx, process(request, &ctx).await)
        });
    }

    let mut records: Vec<(usize, MediaRecord)> = Vec::with_capacity(urls.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, Ok(record))) => records.push((idx, record)),
            Ok((idx, Err(e))) => {
                eprintln!("{}: {}", urls[idx], e);
                failed += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, "request task panicked");
                failed += 1;
            }
        }
    }

    records.sort_by_key(|(idx, _)| *idx);
    let records: Vec<MediaRecord> = records.into_iter().map(|(_, r)| r).collect();
    match serde_json::to_string_pretty(&records) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to serialize results: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if failed > 0 {
        tracing::warn!(failed, succeeded = records.len(), "some requests failed");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn check_tools(config: Config) -> ExitCode {
    let ctl = RunControl::default().with_timeout(Some(TOOL_CHECK_TIMEOUT));
    let mut ok = true;

    for result in run_preflight(&config, &ctl).await {
        match result {
            Ok(info) => match parse_ffmpeg_version(info.tool, &info.version) {
                Some(major) => println!("{:<8} ok  {} (major {})", info.tool, info.version, major),
                None => println!("{:<8} ok  {}", info.tool, info.version),
            },
            Err(e) => {
                println!("{}", e);
                ok = false;
            }
        }
    }

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
