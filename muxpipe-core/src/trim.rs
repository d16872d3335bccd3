//! Trim-aware timestamp adjustment.
//!
//! Input frame ranges can be trimmed out of the output. Every timestamp that
//! reaches the container is first mapped through the trim list so that kept
//! ranges become contiguous on the output timeline.

use crate::error::{Error, Result};
use crate::rational::Rational;
use crate::timestamp::TimeBase;
use serde::{Deserialize, Serialize};

/// An inclusive `[start, end]` range of input frame indices to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimRange {
    /// First kept frame index.
    pub start: i64,
    /// Last kept frame index (inclusive). `i64::MAX` means "to the end".
    pub end: i64,
}

impl TrimRange {
    /// Create a new trim range.
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// A range that keeps everything from `start` to the end of the input.
    pub fn from_frame(start: i64) -> Self {
        Self {
            start,
            end: i64::MAX,
        }
    }
}

/// An ordered list of non-overlapping, strictly increasing trim ranges.
#[derive(Debug, Clone, Default)]
pub struct TrimList {
    ranges: Vec<TrimRange>,
}

impl TrimList {
    /// Build a trim list, validating ordering and non-overlap.
    pub fn new(ranges: Vec<TrimRange>) -> Result<Self> {
        let mut prev_end = -1i64;
        for range in &ranges {
            if range.start > range.end {
                return Err(Error::invalid_param(format!(
                    "trim range start {} past end {}",
                    range.start, range.end
                )));
            }
            if range.start <= prev_end {
                return Err(Error::invalid_param(format!(
                    "trim ranges must be strictly increasing at frame {}",
                    range.start
                )));
            }
            prev_end = range.end;
        }
        Ok(Self { ranges })
    }

    /// An empty trim list (keep everything).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether no trimming is configured.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The configured ranges.
    pub fn ranges(&self) -> &[TrimRange] {
        &self.ranges
    }
}

/// Maps input timestamps through the trim list onto the output timeline.
///
/// The mapping works in frame units of the video frame rate: a timestamp is
/// converted to a frame index, the number of frames cut before that index is
/// accumulated, and the cut duration is subtracted from the rescaled
/// timestamp.
#[derive(Debug, Clone)]
pub struct TimestampAdjuster {
    fps: Rational,
    trims: TrimList,
}

impl TimestampAdjuster {
    /// Create an adjuster for a stream at `fps` with the given trim list.
    pub fn new(fps: Rational, trims: TrimList) -> Self {
        Self { fps, trims }
    }

    /// The frame duration time base (1/fps).
    pub fn frame_base(&self) -> TimeBase {
        TimeBase(self.fps.recip())
    }

    /// Whether any trimming is configured.
    pub fn is_noop(&self) -> bool {
        self.trims.is_empty()
    }

    /// Map `time_in` (in `tb_in`) onto the output timeline in `tb_out`.
    ///
    /// Returns `None` when the timestamp falls inside a trimmed-out region
    /// and `last_valid_frame` is false (the packet is to be discarded).
    /// With `last_valid_frame` set, the timestamp snaps to the end of the
    /// preceding kept region instead; chapter ends use this.
    pub fn adjust(
        &self,
        time_in: i64,
        tb_in: TimeBase,
        tb_out: TimeBase,
        last_valid_frame: bool,
    ) -> Option<i64> {
        let frame_base = self.frame_base();
        let frame_idx = tb_in.convert(time_in, frame_base);
        let mut cut_frames = 0i64;
        if !self.trims.is_empty() {
            let mut last_fin_frame = 0i64;
            for trim in self.trims.ranges() {
                if frame_idx < trim.start {
                    if !last_valid_frame {
                        return None;
                    }
                    cut_frames += frame_idx - last_fin_frame;
                    last_fin_frame = frame_idx;
                    break;
                }
                cut_frames += trim.start - last_fin_frame;
                if frame_idx <= trim.end {
                    last_fin_frame = frame_idx;
                    break;
                }
                last_fin_frame = trim.end;
            }
            cut_frames += frame_idx - last_fin_frame;
        }
        let ts_out = tb_in.convert(time_in, tb_out);
        let ts_trim = frame_base.convert(cut_frames, tb_out);
        Some(ts_out - ts_trim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn adjuster(fps: (i64, i64), ranges: &[(i64, i64)]) -> TimestampAdjuster {
        let trims = TrimList::new(
            ranges
                .iter()
                .map(|&(s, e)| TrimRange::new(s, e))
                .collect(),
        )
        .unwrap();
        TimestampAdjuster::new(Rational::new(fps.0, fps.1), trims)
    }

    #[test]
    fn test_trim_list_rejects_overlap() {
        assert!(TrimList::new(vec![TrimRange::new(0, 10), TrimRange::new(5, 20)]).is_err());
        assert!(TrimList::new(vec![TrimRange::new(10, 5)]).is_err());
        assert!(TrimList::new(vec![TrimRange::new(0, 10), TrimRange::new(11, 20)]).is_ok());
    }

    #[test]
    fn test_noop_without_trims() {
        let adj = adjuster((30, 1), &[]);
        let tb = TimeBase::new(1, 90000);
        assert_eq!(adj.adjust(123456, tb, tb, false), Some(123456));
    }

    #[test]
    fn test_kept_range_passes_through() {
        // keep frames [0, 99] at 30fps; frame base 1/30
        let adj = adjuster((30, 1), &[(0, 99)]);
        let fb = adj.frame_base();
        assert_eq!(adj.adjust(50, fb, fb, false), Some(50));
    }

    #[test]
    fn test_leading_cut_shifts_timeline() {
        // keep [150, end) at 30fps: frame 150 maps to 0
        let adj = adjuster((30, 1), &[(150, i64::MAX)]);
        let fb = adj.frame_base();
        assert_eq!(adj.adjust(150, fb, fb, false), Some(0));
        assert_eq!(adj.adjust(180, fb, fb, false), Some(30));
    }

    #[test]
    fn test_gap_drops_packet() {
        let adj = adjuster((30, 1), &[(0, 99), (200, 299)]);
        let fb = adj.frame_base();
        assert_eq!(adj.adjust(150, fb, fb, false), None);
        // last_valid_frame snaps into the preceding kept region
        assert_eq!(adj.adjust(150, fb, fb, true), Some(100));
    }

    #[test]
    fn test_second_range_contiguous() {
        let adj = adjuster((30, 1), &[(0, 99), (200, 299)]);
        let fb = adj.frame_base();
        // frame 200 lands right after frame 99 on the output timeline
        assert_eq!(adj.adjust(200, fb, fb, false), Some(100));
        assert_eq!(adj.adjust(299, fb, fb, false), Some(199));
    }

    #[test]
    fn test_cross_timebase() {
        // 48kHz audio against a 30fps trim of the first 100 frames
        let adj = adjuster((30, 1), &[(100, i64::MAX)]);
        let audio = TimeBase::new(1, 48000);
        // 100 frames = 160000 audio ticks; that instant maps to 0
        assert_eq!(adj.adjust(160_000, audio, audio, false), Some(0));
        // earlier audio is dropped
        assert_eq!(adj.adjust(80_000, audio, audio, false), None);
    }

    proptest! {
        /// Kept timestamps map monotonically.
        #[test]
        fn prop_monotonic_on_kept_frames(a in 150i64..5000, b in 150i64..5000) {
            let adj = adjuster((30, 1), &[(150, i64::MAX)]);
            let fb = adj.frame_base();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let out_lo = adj.adjust(lo, fb, fb, false).unwrap();
            let out_hi = adj.adjust(hi, fb, fb, false).unwrap();
            prop_assert!(out_lo <= out_hi);
        }

        /// With no trim list the mapping is the identity (same time base).
        #[test]
        fn prop_identity_without_trims(t in -100_000i64..100_000) {
            let adj = adjuster((30, 1), &[]);
            let tb = TimeBase::new(1, 90000);
            prop_assert_eq!(adj.adjust(t, tb, tb, false), Some(t));
        }
    }
}
