//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// How the target video quality is chosen when a re-encode is required
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BitrateStrategy {
    /// Constant rate factor with a hard bitrate ceiling, no size target
    #[default]
    ConstantQuality,
    /// Derive a target bitrate from the original file size and duration
    SizeBudget,
}

/// What the transcoder does when the encode tool exits non-zero
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TranscodeFailurePolicy {
    /// Surface the failure immediately
    #[default]
    FailFast,
    /// Demote the target video codec once and retry before failing
    DemoteOnce,
}

/// Codec used when the video track has to be re-encoded
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodecPreference {
    #[default]
    H264,
    Hevc,
}

impl FromStr for BitrateStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "constant_quality" | "crf" => Ok(Self::ConstantQuality),
            "size_budget" => Ok(Self::SizeBudget),
            _ => Err(()),
        }
    }
}

impl FromStr for TranscodeFailurePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail_fast" => Ok(Self::FailFast),
            "demote_once" => Ok(Self::DemoteOnce),
            _ => Err(()),
        }
    }
}

impl FromStr for VideoCodecPreference {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "h264" | "avc" => Ok(Self::H264),
            "hevc" | "h265" => Ok(Self::Hevc),
            _ => Err(()),
        }
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Working directory shared by all in-flight requests
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
}

fn default_workdir() -> PathBuf {
    PathBuf::from("/tmp/media-normalizer")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
        }
    }
}

/// One external tool: the program to run plus arguments placed before
/// the ones the pipeline generates (e.g. `python3 -m yt_dlp`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolConfig {
    pub program: String,
    #[serde(default)]
    pub prefix_args: Vec<String>,
}

impl ToolConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }
}

fn default_yt_dlp() -> ToolConfig {
    ToolConfig::new("yt-dlp")
}

fn default_ffprobe() -> ToolConfig {
    ToolConfig::new("ffprobe")
}

fn default_ffmpeg() -> ToolConfig {
    ToolConfig::new("ffmpeg")
}

/// External tool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default = "default_yt_dlp")]
    pub yt_dlp: ToolConfig,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: ToolConfig,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: ToolConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp: default_yt_dlp(),
            ffprobe: default_ffprobe(),
            ffmpeg: default_ffmpeg(),
        }
    }
}

/// Fetch tool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadConfig {
    /// Cookie jar passed to every fetch unless a request carries its own
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,
    /// Format selector for full-length YouTube videos
    #[serde(default = "default_youtube_format")]
    pub youtube_format: String,
    /// Sort order for full-length YouTube videos
    #[serde(default = "default_youtube_sort")]
    pub youtube_sort: String,
    /// Format filter for TikTok
    #[serde(default = "default_tiktok_format")]
    pub tiktok_format: String,
}

fn default_youtube_format() -> String {
    "bv[filesize<=1700M]+ba[filesize<=300M]".to_string()
}

fn default_youtube_sort() -> String {
    "ext,res:720".to_string()
}

fn default_tiktok_format() -> String {
    "b[url!^=\"https://www.tiktok.com/\"]".to_string()
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            cookies_file: None,
            youtube_format: default_youtube_format(),
            youtube_sort: default_youtube_sort(),
            tiktok_format: default_tiktok_format(),
        }
    }
}

/// Encode configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscodeConfig {
    #[serde(default)]
    pub bitrate_strategy: BitrateStrategy,
    #[serde(default)]
    pub failure_policy: TranscodeFailurePolicy,
    #[serde(default)]
    pub video_codec: VideoCodecPreference,
    /// Output width cap in pixels (never upscales)
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    /// CRF used by the constant-quality strategy
    #[serde(default = "default_crf")]
    pub crf: u8,
    /// Bitrate ceiling used by the constant-quality strategy, ffmpeg notation
    #[serde(default = "default_max_rate")]
    pub max_rate: String,
    /// Audio bitrate when audio has to be re-encoded, ffmpeg notation
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

fn default_max_width() -> u32 {
    1280
}

fn default_crf() -> u8 {
    23
}

fn default_max_rate() -> String {
    "4.5M".to_string()
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            bitrate_strategy: BitrateStrategy::default(),
            failure_policy: TranscodeFailurePolicy::default(),
            video_codec: VideoCodecPreference::default(),
            max_width: default_max_width(),
            crf: default_crf(),
            max_rate: default_max_rate(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

/// Deadlines and concurrency limits (0 = unlimited / auto)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitsConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_encode_timeout_secs")]
    pub encode_timeout_secs: u64,
    /// Requests processed at once by the CLI (0 = logical core count)
    #[serde(default)]
    pub max_concurrent_requests: u32,
}

fn default_fetch_timeout_secs() -> u64 {
    1800
}

fn default_probe_timeout_secs() -> u64 {
    30
}

fn default_encode_timeout_secs() -> u64 {
    3600
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            encode_timeout_secs: default_encode_timeout_secs(),
            max_concurrent_requests: 0,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - MEDIA_WORKDIR -> paths.workdir
    /// - MEDIA_COOKIES_FILE -> download.cookies_file (empty clears it)
    /// - MEDIA_BITRATE_STRATEGY -> transcode.bitrate_strategy
    /// - MEDIA_TRANSCODE_FAILURE_POLICY -> transcode.failure_policy
    /// - MEDIA_VIDEO_CODEC -> transcode.video_codec
    /// - MEDIA_MAX_CONCURRENT_REQUESTS -> limits.max_concurrent_requests
    /// - YT_DLP_PATH / FFPROBE_PATH / FFMPEG_PATH -> tools.*.program
    ///
    /// Values that fail to parse leave the existing setting untouched.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("MEDIA_WORKDIR") {
            if !val.is_empty() {
                self.paths.workdir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("MEDIA_COOKIES_FILE") {
            self.download.cookies_file = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        if let Ok(val) = env::var("MEDIA_BITRATE_STRATEGY") {
            if let Ok(strategy) = val.parse() {
                self.transcode.bitrate_strategy = strategy;
            }
        }

        if let Ok(val) = env::var("MEDIA_TRANSCODE_FAILURE_POLICY") {
            if let Ok(policy) = val.parse() {
                self.transcode.failure_policy = policy;
            }
        }

        if let Ok(val) = env::var("MEDIA_VIDEO_CODEC") {
            if let Ok(codec) = val.parse() {
                self.transcode.video_codec = codec;
            }
        }

        if let Ok(val) = env::var("MEDIA_MAX_CONCURRENT_REQUESTS") {
            if let Ok(n) = val.parse::<u32>() {
                self.limits.max_concurrent_requests = n;
            }
        }

        for (var, tool) in [
            ("YT_DLP_PATH", &mut self.tools.yt_dlp),
            ("FFPROBE_PATH", &mut self.tools.ffprobe),
            ("FFMPEG_PATH", &mut self.tools.ffmpeg),
        ] {
            if let Ok(val) = env::var(var) {
                if !val.is_empty() {
                    tool.program = val;
                }
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    /// (with environment overrides still applied)
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load_from_file(path) {
            Ok(mut config) => {
                config.apply_env_overrides();
                Ok(config)
            }
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut config = Self::default();
                config.apply_env_overrides();
                Ok(config)
            }
            Err(e) => Err(e),
        }
    }
}
