//! Conversion planning
//!
//! Decides, from the selected codecs and the size of the downloaded file,
//! whether each track has to be re-encoded for mobile/web playback and
//! with what parameters.

use media_normalizer_config::{BitrateStrategy, VideoCodecPreference};
use serde::{Deserialize, Serialize};

/// Target container size relative to the original under the size budget.
const SIZE_BUDGET_GROWTH: f64 = 1.15;

/// Bits per second set aside for the audio track under the size budget.
const AUDIO_ALLOWANCE_BPS: f64 = 128_000.0;

/// Floor for a size-budget video bitrate, bits per second.
pub const MIN_VIDEO_BITRATE: u64 = 200_000;

/// Cap for a size-budget video bitrate, bits per second.
pub const MAX_VIDEO_BITRATE: u64 = 2_000_000;

/// Video codecs with poor hardware decode support on phones and older
/// Safari (AV1, VP9). Matched as case-insensitive prefixes.
const INCOMPATIBLE_VIDEO_PREFIXES: &[&str] = &["av01", "vp9", "vp09"];

/// Audio codecs Safari/iOS cannot play or that bloat mobile downloads.
const INCOMPATIBLE_AUDIO_CODECS: &[&str] = &["opus", "vorbis", "flac"];

/// What happens to the video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoTarget {
    /// Stream passed through unchanged
    Copy,
    H264,
    Hevc,
}

impl VideoTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoTarget::Copy => "copy",
            VideoTarget::H264 => "h264",
            VideoTarget::Hevc => "hevc",
        }
    }

    /// The next more widely playable target, if there is one.
    pub fn demoted(self) -> Option<Self> {
        match self {
            VideoTarget::Hevc => Some(VideoTarget::H264),
            VideoTarget::H264 | VideoTarget::Copy => None,
        }
    }
}

impl From<VideoCodecPreference> for VideoTarget {
    fn from(pref: VideoCodecPreference) -> Self {
        match pref {
            VideoCodecPreference::H264 => VideoTarget::H264,
            VideoCodecPreference::Hevc => VideoTarget::Hevc,
        }
    }
}

impl std::fmt::Display for VideoTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to the audio track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioTarget {
    Copy,
    Aac,
}

impl AudioTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioTarget::Copy => "copy",
            AudioTarget::Aac => "aac",
        }
    }
}

impl std::fmt::Display for AudioTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facts the planner decides from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanInputs {
    pub video_codec: String,
    pub audio_codec: String,
    pub original_file_size: u64,
    /// Container bitrate from the probe (0 if unknown).
    pub original_bitrate: u64,
    pub duration_secs: u64,
}

/// Per-track actions and encode parameters for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionPlan {
    pub original_bitrate: u64,
    pub original_file_size: u64,
    pub original_video_codec: String,
    pub original_audio_codec: String,
    pub needs_video_conversion: bool,
    pub needs_audio_conversion: bool,
    pub video_target: VideoTarget,
    pub audio_target: AudioTarget,
    /// Only set under [`BitrateStrategy::SizeBudget`] when video is re-encoded.
    pub target_video_bitrate: Option<u64>,
}

impl ConversionPlan {
    /// Both tracks can be served as they are.
    pub fn is_already_compatible(&self) -> bool {
        !self.needs_video_conversion && !self.needs_audio_conversion
    }

    /// Swaps the video target for a more compatible one. Returns the new
    /// target, or `None` when nothing can be demoted.
    pub fn demote_video_target(&mut self) -> Option<VideoTarget> {
        let demoted = self.video_target.demoted()?;
        self.video_target = demoted;
        Some(demoted)
    }
}

/// Whether a video codec tag needs re-encoding.
pub fn needs_video_conversion(codec: &str) -> bool {
    let codec = codec.to_ascii_lowercase();
    INCOMPATIBLE_VIDEO_PREFIXES
        .iter()
        .any(|prefix| codec.starts_with(prefix))
}

/// Whether an audio codec tag needs re-encoding. Exact match; anything
/// unknown (mp3 included) is served as is.
pub fn needs_audio_conversion(codec: &str) -> bool {
    INCOMPATIBLE_AUDIO_CODECS.contains(&codec)
}

/// Video bitrate that keeps the output near 1.15x the original size.
///
/// `size * 8 * 1.15 / duration - 128 kbit/s`, with a zero duration treated
/// as one second, clamped to [`MIN_VIDEO_BITRATE`, `MAX_VIDEO_BITRATE`].
pub fn size_budget_bitrate(original_file_size: u64, duration_secs: u64) -> u64 {
    let duration = duration_secs.max(1) as f64;
    let budget_bits = original_file_size as f64 * 8.0 * SIZE_BUDGET_GROWTH;
    let video_bps = budget_bits / duration - AUDIO_ALLOWANCE_BPS;

    video_bps
        .clamp(MIN_VIDEO_BITRATE as f64, MAX_VIDEO_BITRATE as f64)
        .round() as u64
}

/// Builds the conversion plan.
pub fn plan_conversion(
    inputs: &PlanInputs,
    strategy: BitrateStrategy,
    video_codec: VideoCodecPreference,
) -> ConversionPlan {
    let needs_video = needs_video_conversion(&inputs.video_codec);
    let needs_audio = needs_audio_conversion(&inputs.audio_codec);

    let target_video_bitrate = match (needs_video, strategy) {
        (true, BitrateStrategy::SizeBudget) => Some(size_budget_bitrate(
            inputs.original_file_size,
            inputs.duration_secs,
        )),
        _ => None,
    };

    ConversionPlan {
        original_bitrate: inputs.original_bitrate,
        original_file_size: inputs.original_file_size,
        original_video_codec: inputs.video_codec.clone(),
        original_audio_codec: inputs.audio_codec.clone(),
        needs_video_conversion: needs_video,
        needs_audio_conversion: needs_audio,
        video_target: if needs_video {
            video_codec.into()
        } else {
            VideoTarget::Copy
        },
        audio_target: if needs_audio {
            AudioTarget::Aac
        } else {
            AudioTarget::Copy
        },
        target_video_bitrate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MIB: u64 = 1024 * 1024;

    fn inputs(video: &str, audio: &str) -> PlanInputs {
        PlanInputs {
            video_codec: video.to_string(),
            audio_codec: audio.to_string(),
            original_file_size: 10 * MIB,
            original_bitrate: 1_400_000,
            duration_secs: 60,
        }
    }

    #[test]
    fn test_video_table() {
        for codec in ["av01", "av01.0.08M.08", "vp9", "vp09.00.40.08", "VP9", "AV01"] {
            assert!(needs_video_conversion(codec), "{} should convert", codec);
        }
        for codec in ["hevc", "h264", "avc1.64001F", "h263", "unknown", "", "av1"] {
            assert!(!needs_video_conversion(codec), "{} should not convert", codec);
        }
    }

    #[test]
    fn test_audio_table() {
        for codec in ["opus", "vorbis", "flac"] {
            assert!(needs_audio_conversion(codec), "{} should convert", codec);
        }
        for codec in ["aac", "mp3", "unknown", "", "mp4a.40.2"] {
            assert!(!needs_audio_conversion(codec), "{} should not convert", codec);
        }
    }

    #[test]
    fn test_vp9_with_aac_needs_video_only() {
        let plan = plan_conversion(
            &inputs("vp9", "aac"),
            BitrateStrategy::ConstantQuality,
            VideoCodecPreference::H264,
        );
        assert!(plan.needs_video_conversion);
        assert!(!plan.needs_audio_conversion);
        assert!(!plan.is_already_compatible());
        assert_eq!(plan.video_target, VideoTarget::H264);
        assert_eq!(plan.audio_target, AudioTarget::Copy);
        assert_eq!(plan.target_video_bitrate, None);
    }

    #[test]
    fn test_h264_with_aac_is_compatible() {
        let plan = plan_conversion(
            &inputs("h264", "aac"),
            BitrateStrategy::SizeBudget,
            VideoCodecPreference::H264,
        );
        assert!(plan.is_already_compatible());
        assert_eq!(plan.video_target, VideoTarget::Copy);
        assert_eq!(plan.target_video_bitrate, None);
    }

    #[test]
    fn test_size_budget_sets_bitrate_only_for_video_conversion() {
        let plan = plan_conversion(
            &inputs("av01", "opus"),
            BitrateStrategy::SizeBudget,
            VideoCodecPreference::Hevc,
        );
        assert_eq!(plan.video_target, VideoTarget::Hevc);
        assert_eq!(plan.audio_target, AudioTarget::Aac);
        assert_eq!(
            plan.target_video_bitrate,
            Some(size_budget_bitrate(10 * MIB, 60))
        );

        let audio_only = plan_conversion(
            &inputs("h264", "opus"),
            BitrateStrategy::SizeBudget,
            VideoCodecPreference::H264,
        );
        assert_eq!(audio_only.target_video_bitrate, None);
    }

    #[test]
    fn test_size_budget_bounds() {
        let mid = size_budget_bitrate(10 * MIB, 60);
        assert!((MIN_VIDEO_BITRATE..=MAX_VIDEO_BITRATE).contains(&mid));
        // 10 MiB * 8 * 1.15 / 60 - 128k
        assert_eq!(mid, 1_479_817);

        assert_eq!(size_budget_bitrate(10 * 1024 * MIB, 60), MAX_VIDEO_BITRATE);
        assert_eq!(size_budget_bitrate(10 * 1024, 600), MIN_VIDEO_BITRATE);
        assert_eq!(size_budget_bitrate(0, 60), MIN_VIDEO_BITRATE);
    }

    #[test]
    fn test_zero_duration_counts_as_one_second() {
        assert_eq!(size_budget_bitrate(100_000, 0), size_budget_bitrate(100_000, 1));
    }

    #[test]
    fn test_demotion_chain() {
        let mut plan = plan_conversion(
            &inputs("vp9", "aac"),
            BitrateStrategy::ConstantQuality,
            VideoCodecPreference::Hevc,
        );
        assert_eq!(plan.demote_video_target(), Some(VideoTarget::H264));
        assert_eq!(plan.video_target, VideoTarget::H264);
        assert_eq!(plan.demote_video_target(), None);
        assert_eq!(plan.video_target, VideoTarget::H264);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_size_budget_always_clamped(size in 0u64..=u64::MAX / 16, duration in 0u64..1_000_000) {
            let bps = size_budget_bitrate(size, duration);
            prop_assert!((MIN_VIDEO_BITRATE..=MAX_VIDEO_BITRATE).contains(&bps));
        }

        #[test]
        fn prop_compatibility_matches_flags(
            video in "[a-z0-9.]{0,12}",
            audio in prop::sample::select(vec!["aac", "opus", "vorbis", "flac", "mp3", "ac3", ""]),
            size_budget in proptest::bool::ANY,
        ) {
            let strategy = if size_budget { BitrateStrategy::SizeBudget } else { BitrateStrategy::ConstantQuality };
            let plan = plan_conversion(&inputs(&video, audio), strategy, VideoCodecPreference::H264);

            prop_assert_eq!(
                plan.is_already_compatible(),
                !plan.needs_video_conversion && !plan.needs_audio_conversion
            );
            prop_assert_eq!(plan.needs_video_conversion, plan.video_target != VideoTarget::Copy);
            prop_assert_eq!(plan.needs_audio_conversion, plan.audio_target != AudioTarget::Copy);
            prop_assert_eq!(plan.needs_video_conversion, needs_video_conversion(&video));
        }
    }
}
