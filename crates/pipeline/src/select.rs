//! Picks the canonical video and audio stream out of a probe report.

use crate::probe::{StreamDescriptor, StreamKind};
use std::cmp::Ordering;

/// Best video stream: default disposition first, then pixel area, then bitrate.
pub fn select_video_stream(streams: &[StreamDescriptor]) -> Option<&StreamDescriptor> {
    select_stream(streams, StreamKind::Video, |a, b| {
        a.pixel_area()
            .cmp(&b.pixel_area())
            .then(a.bit_rate.cmp(&b.bit_rate))
    })
}

/// Best audio stream: default disposition first, then channel count, then bitrate.
pub fn select_audio_stream(streams: &[StreamDescriptor]) -> Option<&StreamDescriptor> {
    select_stream(streams, StreamKind::Audio, |a, b| {
        a.channels
            .cmp(&b.channels)
            .then(a.bit_rate.cmp(&b.bit_rate))
    })
}

/// The first default-flagged stream of `kind` wins outright. Otherwise the
/// streams are folded left to right and a candidate replaces the current
/// best only when it ranks strictly higher, so ties keep the earlier stream.
fn select_stream<F>(
    streams: &[StreamDescriptor],
    kind: StreamKind,
    rank: F,
) -> Option<&StreamDescriptor>
where
    F: Fn(&StreamDescriptor, &StreamDescriptor) -> Ordering,
{
    let mut candidates = streams.iter().filter(|s| s.kind == kind).peekable();
    candidates.peek()?;

    if let Some(default) = streams.iter().find(|s| s.kind == kind && s.is_default) {
        return Some(default);
    }

    candidates.reduce(|best, candidate| {
        if rank(candidate, best) == Ordering::Greater {
            candidate
        } else {
            best
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn video(index: u32, width: u32, height: u32, bit_rate: u64, is_default: bool) -> StreamDescriptor {
        StreamDescriptor {
            index,
            kind: StreamKind::Video,
            codec_name: "h264".to_string(),
            bit_rate,
            width,
            height,
            channels: 0,
            is_default,
        }
    }

    fn audio(index: u32, channels: u32, bit_rate: u64, is_default: bool) -> StreamDescriptor {
        StreamDescriptor {
            index,
            kind: StreamKind::Audio,
            codec_name: "aac".to_string(),
            bit_rate,
            width: 0,
            height: 0,
            channels,
            is_default,
        }
    }

    #[test]
    fn test_default_beats_resolution() {
        let streams = vec![
            video(0, 1920, 1080, 4_000_000, false),
            video(1, 1280, 720, 2_000_000, true),
        ];
        assert_eq!(select_video_stream(&streams).map(|s| s.index), Some(1));
    }

    #[test]
    fn test_resolution_beats_bitrate() {
        let streams = vec![
            video(0, 1920, 1080, 4_000_000, false),
            video(1, 1280, 720, 6_000_000, false),
        ];
        assert_eq!(select_video_stream(&streams).map(|s| s.index), Some(0));
    }

    #[test]
    fn test_bitrate_breaks_resolution_tie() {
        let streams = vec![
            video(0, 1280, 720, 1_000_000, false),
            video(1, 1280, 720, 3_000_000, false),
        ];
        assert_eq!(select_video_stream(&streams).map(|s| s.index), Some(1));
    }

    #[test]
    fn test_full_tie_keeps_earlier() {
        let streams = vec![
            video(0, 1280, 720, 1_000_000, false),
            video(1, 1280, 720, 1_000_000, false),
        ];
        assert_eq!(select_video_stream(&streams).map(|s| s.index), Some(0));
    }

    #[test]
    fn test_first_default_wins_among_defaults() {
        let streams = vec![
            audio(0, 2, 128_000, false),
            audio(1, 2, 96_000, true),
            audio(2, 6, 384_000, true),
        ];
        assert_eq!(select_audio_stream(&streams).map(|s| s.index), Some(1));
    }

    #[test]
    fn test_audio_channels_then_bitrate() {
        let streams = vec![
            audio(0, 2, 320_000, false),
            audio(1, 6, 128_000, false),
            audio(2, 6, 256_000, false),
        ];
        assert_eq!(select_audio_stream(&streams).map(|s| s.index), Some(2));
    }

    #[test]
    fn test_kinds_do_not_mix() {
        let streams = vec![audio(0, 2, 128_000, true), video(1, 640, 360, 0, false)];
        assert_eq!(select_video_stream(&streams).map(|s| s.index), Some(1));
        assert_eq!(select_audio_stream(&streams).map(|s| s.index), Some(0));
    }

    #[test]
    fn test_absent_kind_is_none() {
        let streams = vec![audio(0, 2, 128_000, false)];
        assert!(select_video_stream(&streams).is_none());
        assert!(select_audio_stream(&[]).is_none());
    }

    fn video_strategy() -> impl Strategy<Value = StreamDescriptor> {
        (0u32..4000, 0u32..2200, 0u64..10_000_000).prop_map(|(w, h, br)| video(0, w, h, br, false))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Without defaults, nothing outranks the selected stream.
        #[test]
        fn prop_selected_video_is_maximal(mut streams in prop::collection::vec(video_strategy(), 1..8)) {
            for (i, s) in streams.iter_mut().enumerate() {
                s.index = i as u32;
            }
            let best = select_video_stream(&streams).unwrap();
            for s in &streams {
                prop_assert!(
                    (s.pixel_area(), s.bit_rate) <= (best.pixel_area(), best.bit_rate)
                );
            }
            // The earliest of the maximal streams is chosen.
            let first_max = streams
                .iter()
                .find(|s| (s.pixel_area(), s.bit_rate) == (best.pixel_area(), best.bit_rate))
                .unwrap();
            prop_assert_eq!(first_max.index, best.index);
        }
    }
}
