//! Encoding modules for the media pipeline

pub mod ffmpeg;

pub use ffmpeg::{build_transcode_command, converted_path, transcode, TranscodeError};
