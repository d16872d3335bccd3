//! Encoder parameter auto-selection.
//!
//! When an encoder restricts its accepted layouts, rates or formats, the
//! closest match to the source is chosen here.

use muxpipe_codecs::AudioParams;
use muxpipe_core::{ChannelLayout, SampleFormat};

/// Pick the encoder channel layout.
///
/// With a supported list, the first layout matching the source channel
/// count wins, falling back to the list head. Without a list, the standard
/// ladder for the source channel count is used.
pub fn select_channel_layout(
    supported: Option<&[ChannelLayout]>,
    src: &AudioParams,
) -> ChannelLayout {
    let src_channels = src.channels();
    match supported {
        None => ChannelLayout::default_for(src_channels),
        Some([]) => ChannelLayout::default_for(src_channels),
        Some(list) => list
            .iter()
            .copied()
            .find(|l| l.channels() == src_channels)
            .unwrap_or(list[0]),
    }
}

/// Pick the encoder sample rate.
///
/// An exact match wins; otherwise the listed rate minimizing the relative
/// error `|1 - rate / src_rate|` is chosen.
pub fn select_sample_rate(supported: Option<&[u32]>, src_rate: u32) -> u32 {
    let Some(list) = supported else {
        return src_rate;
    };
    if list.is_empty() {
        return src_rate;
    }
    if list.contains(&src_rate) {
        return src_rate;
    }
    *list
        .iter()
        .min_by(|&&a, &&b| {
            let diff = |r: u32| (1.0 - r as f64 / src_rate as f64).abs();
            diff(a).total_cmp(&diff(b))
        })
        .expect("list is non-empty")
}

/// Pick the encoder sample format.
///
/// The source format wins when listed. Otherwise formats are scanned by
/// quality tier starting from the source's tier, and the first listed
/// format of an equal-or-lower tier wins; the list head is the last resort.
pub fn select_sample_format(
    supported: Option<&[SampleFormat]>,
    src_format: SampleFormat,
) -> SampleFormat {
    let Some(list) = supported else {
        return src_format;
    };
    if list.is_empty() {
        return src_format;
    }
    if list.contains(&src_format) {
        return src_format;
    }
    // scan downward through tiers; planar and packed variants share a tier
    const LADDER: [SampleFormat; 10] = [
        SampleFormat::F64p,
        SampleFormat::F64,
        SampleFormat::F32p,
        SampleFormat::F32,
        SampleFormat::S32p,
        SampleFormat::S32,
        SampleFormat::S16p,
        SampleFormat::S16,
        SampleFormat::U8p,
        SampleFormat::U8,
    ];
    let src_tier = src_format.quality_tier();
    for candidate in LADDER.iter().filter(|f| f.quality_tier() <= src_tier) {
        if list.contains(candidate) {
            return *candidate;
        }
    }
    list[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxpipe_core::{AudioCodec, TimeBase};

    fn src(layout: ChannelLayout, rate: u32, format: SampleFormat) -> AudioParams {
        AudioParams {
            codec: AudioCodec::Aac,
            sample_rate: rate,
            layout,
            format,
            bits_per_raw_sample: 0,
            frame_size: 0,
            time_base: TimeBase::per_sample(rate),
        }
    }

    #[test]
    fn test_layout_ladder_without_list() {
        let params = src(ChannelLayout::SURROUND_5_1, 48000, SampleFormat::F32p);
        assert_eq!(select_channel_layout(None, &params), ChannelLayout::SURROUND_5_1);
    }

    #[test]
    fn test_layout_list_match_by_count() {
        let params = src(ChannelLayout::SURROUND_5_1, 48000, SampleFormat::F32p);
        let list = [ChannelLayout::STEREO, ChannelLayout::SURROUND_5_1];
        assert_eq!(select_channel_layout(Some(&list), &params), ChannelLayout::SURROUND_5_1);
        let stereo_only = [ChannelLayout::STEREO];
        assert_eq!(select_channel_layout(Some(&stereo_only), &params), ChannelLayout::STEREO);
    }

    #[test]
    fn test_rate_exact_match() {
        assert_eq!(select_sample_rate(Some(&[44100, 48000]), 48000), 48000);
        assert_eq!(select_sample_rate(None, 32000), 32000);
    }

    #[test]
    fn test_rate_minimizes_relative_error() {
        // 44056 is closer to 44100 than to 48000
        assert_eq!(select_sample_rate(Some(&[48000, 44100]), 44056), 44100);
        // 64000 is closer to 48000
        assert_eq!(select_sample_rate(Some(&[44100, 48000]), 64000), 48000);
    }

    #[test]
    fn test_format_kept_when_listed() {
        let list = [SampleFormat::S16, SampleFormat::F32p];
        assert_eq!(select_sample_format(Some(&list), SampleFormat::F32p), SampleFormat::F32p);
    }

    #[test]
    fn test_format_equal_tier_preferred() {
        // source fltp, list has flt: same tier
        let list = [SampleFormat::S16, SampleFormat::F32];
        assert_eq!(select_sample_format(Some(&list), SampleFormat::F32p), SampleFormat::F32);
        // source s32, list only has s16 and u8: next tier down wins
        let list = [SampleFormat::U8, SampleFormat::S16];
        assert_eq!(select_sample_format(Some(&list), SampleFormat::S32), SampleFormat::S16);
    }

    #[test]
    fn test_format_falls_back_to_head() {
        // nothing at or below the source tier
        let list = [SampleFormat::F64];
        assert_eq!(select_sample_format(Some(&list), SampleFormat::U8), SampleFormat::F64);
    }
}
