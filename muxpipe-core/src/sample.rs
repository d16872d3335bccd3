//! Audio sample buffer abstractions.
//!
//! Provides types for representing decoded audio between the pipeline
//! stages: decode output, filter frames, resampler output and the encoder
//! carry buffer all use [`SampleBuf`].

use crate::timestamp::{Duration, TimeBase, Timestamp};
use bitflags::bitflags;
use std::fmt;

/// Sample format for audio data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Unsigned 8-bit.
    U8,
    /// Signed 16-bit, native endian.
    S16,
    /// Signed 32-bit, native endian.
    S32,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// Unsigned 8-bit planar.
    U8p,
    /// Signed 16-bit planar.
    S16p,
    /// Signed 32-bit planar.
    S32p,
    /// 32-bit float planar.
    F32p,
    /// 64-bit float planar.
    F64p,
}

impl SampleFormat {
    /// Get the number of bytes per sample.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::U8 | Self::U8p => 1,
            Self::S16 | Self::S16p => 2,
            Self::S32 | Self::S32p | Self::F32 | Self::F32p => 4,
            Self::F64 | Self::F64p => 8,
        }
    }

    /// Check if this is a planar format.
    pub fn is_planar(&self) -> bool {
        matches!(
            self,
            Self::U8p | Self::S16p | Self::S32p | Self::F32p | Self::F64p
        )
    }

    /// Check if this is a floating-point format.
    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64 | Self::F32p | Self::F64p)
    }

    /// Get the packed equivalent of this format.
    pub fn to_packed(&self) -> Self {
        match self {
            Self::U8p => Self::U8,
            Self::S16p => Self::S16,
            Self::S32p => Self::S32,
            Self::F32p => Self::F32,
            Self::F64p => Self::F64,
            other => *other,
        }
    }

    /// Get the planar equivalent of this format.
    pub fn to_planar(&self) -> Self {
        match self {
            Self::U8 => Self::U8p,
            Self::S16 => Self::S16p,
            Self::S32 => Self::S32p,
            Self::F32 => Self::F32p,
            Self::F64 => Self::F64p,
            other => *other,
        }
    }

    /// Quality tier used when an encoder cannot take the source format
    /// as-is: dbl > flt > s32 > s16 > u8, planar and packed equal.
    pub fn quality_tier(&self) -> u8 {
        match self.to_packed() {
            Self::F64 => 8,
            Self::F32 => 6,
            Self::S32 => 4,
            Self::S16 => 2,
            _ => 1,
        }
    }

    /// The neutral ("silent") sample value, as raw bytes of one sample.
    fn silence_byte(&self) -> u8 {
        match self.to_packed() {
            Self::U8 => 0x80,
            _ => 0,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8 => write!(f, "u8"),
            Self::S16 => write!(f, "s16"),
            Self::S32 => write!(f, "s32"),
            Self::F32 => write!(f, "flt"),
            Self::F64 => write!(f, "dbl"),
            Self::U8p => write!(f, "u8p"),
            Self::S16p => write!(f, "s16p"),
            Self::S32p => write!(f, "s32p"),
            Self::F32p => write!(f, "fltp"),
            Self::F64p => write!(f, "dblp"),
        }
    }
}

bitflags! {
    /// Audio channel layout as a bitmask, one bit per speaker position.
    ///
    /// Sub-stream channel selectors and output layouts are expressed with
    /// this mask; the resampler turns a selector into a channel-index remap.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChannelLayout: u64 {
        /// Front left.
        const FRONT_LEFT = 0x1;
        /// Front right.
        const FRONT_RIGHT = 0x2;
        /// Front center.
        const FRONT_CENTER = 0x4;
        /// Low-frequency effects.
        const LOW_FREQUENCY = 0x8;
        /// Back left.
        const BACK_LEFT = 0x10;
        /// Back right.
        const BACK_RIGHT = 0x20;
        /// Front left of center.
        const FRONT_LEFT_OF_CENTER = 0x40;
        /// Front right of center.
        const FRONT_RIGHT_OF_CENTER = 0x80;
        /// Back center.
        const BACK_CENTER = 0x100;
        /// Side left.
        const SIDE_LEFT = 0x200;
        /// Side right.
        const SIDE_RIGHT = 0x400;
    }
}

impl ChannelLayout {
    /// Mono (front center).
    pub const MONO: Self = Self::FRONT_CENTER;
    /// Stereo (front left + right).
    pub const STEREO: Self =
        Self::from_bits_retain(Self::FRONT_LEFT.bits() | Self::FRONT_RIGHT.bits());
    /// 2.1 (stereo + LFE).
    pub const SURROUND_2_1: Self =
        Self::from_bits_retain(Self::STEREO.bits() | Self::LOW_FREQUENCY.bits());
    /// Quad (FL, FR, BL, BR).
    pub const QUAD: Self = Self::from_bits_retain(
        Self::STEREO.bits() | Self::BACK_LEFT.bits() | Self::BACK_RIGHT.bits(),
    );
    /// 5.0 (FL, FR, FC, BL, BR).
    pub const SURROUND_5_0: Self =
        Self::from_bits_retain(Self::QUAD.bits() | Self::FRONT_CENTER.bits());
    /// 5.1 (5.0 + LFE).
    pub const SURROUND_5_1: Self =
        Self::from_bits_retain(Self::SURROUND_5_0.bits() | Self::LOW_FREQUENCY.bits());
    /// 6.1 (5.1 + back center).
    pub const SURROUND_6_1: Self =
        Self::from_bits_retain(Self::SURROUND_5_1.bits() | Self::BACK_CENTER.bits());
    /// 7.1 (5.1 + side left/right).
    pub const SURROUND_7_1: Self = Self::from_bits_retain(
        Self::SURROUND_5_1.bits() | Self::SIDE_LEFT.bits() | Self::SIDE_RIGHT.bits(),
    );

    /// Number of channels in this layout.
    pub fn channels(&self) -> usize {
        self.bits().count_ones() as usize
    }

    /// The default layout for a channel count (mono/stereo/2.1/quad/5.0/
    /// 5.1/6.1/7.1 ladder; other counts get the first `n` positions).
    pub fn default_for(channels: usize) -> Self {
        match channels {
            1 => Self::MONO,
            2 => Self::STEREO,
            3 => Self::SURROUND_2_1,
            4 => Self::QUAD,
            5 => Self::SURROUND_5_0,
            6 => Self::SURROUND_5_1,
            7 => Self::SURROUND_6_1,
            8 => Self::SURROUND_7_1,
            n => {
                let mut layout = Self::empty();
                let mut bit = 1u64;
                let mut remaining = n;
                while remaining > 0 && bit <= Self::all().bits() {
                    layout |= Self::from_bits_retain(bit);
                    bit <<= 1;
                    remaining -= 1;
                }
                layout
            }
        }
    }

    /// The `index`-th channel of this layout in bit order, if present.
    pub fn extract_channel(&self, index: usize) -> Option<Self> {
        let mut seen = 0;
        let mut bit = 1u64;
        while bit <= self.bits() {
            if self.bits() & bit != 0 {
                if seen == index {
                    return Some(Self::from_bits_retain(bit));
                }
                seen += 1;
            }
            bit <<= 1;
        }
        None
    }

    /// The position of a single channel inside this layout, if present.
    pub fn index_of(&self, channel: Self) -> Option<usize> {
        if channel.bits().count_ones() != 1 || !self.contains(channel) {
            return None;
        }
        Some((self.bits() & (channel.bits() - 1)).count_ones() as usize)
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if *self == Self::MONO {
            "mono"
        } else if *self == Self::STEREO {
            "stereo"
        } else if *self == Self::SURROUND_2_1 {
            "2.1"
        } else if *self == Self::QUAD {
            "quad"
        } else if *self == Self::SURROUND_5_0 {
            "5.0"
        } else if *self == Self::SURROUND_5_1 {
            "5.1"
        } else if *self == Self::SURROUND_6_1 {
            "6.1"
        } else if *self == Self::SURROUND_7_1 {
            "7.1"
        } else {
            return write!(f, "{}ch", self.channels());
        };
        write!(f, "{name}")
    }
}

/// A decoded audio buffer.
///
/// Planar formats keep one plane per channel; packed formats keep a single
/// interleaved plane. The buffer knows how to append another buffer of the
/// same parameters and how to split off an exact sample count, which is what
/// the encoder frame-cutting stage is built on.
#[derive(Clone)]
pub struct SampleBuf {
    format: SampleFormat,
    layout: ChannelLayout,
    sample_rate: u32,
    num_samples: usize,
    planes: Vec<Vec<u8>>,
    /// Presentation timestamp of the first sample, if known.
    pub pts: Timestamp,
}

impl SampleBuf {
    /// Allocate a zero-filled buffer.
    pub fn new(
        format: SampleFormat,
        layout: ChannelLayout,
        sample_rate: u32,
        num_samples: usize,
    ) -> Self {
        let planes = Self::alloc_planes(format, layout, num_samples);
        Self {
            format,
            layout,
            sample_rate,
            num_samples,
            planes,
            pts: Timestamp::none(),
        }
    }

    /// Allocate a buffer filled with silence.
    pub fn silence(
        format: SampleFormat,
        layout: ChannelLayout,
        sample_rate: u32,
        num_samples: usize,
    ) -> Self {
        let mut buf = Self::new(format, layout, sample_rate, num_samples);
        let silence = format.silence_byte();
        if silence != 0 {
            for plane in &mut buf.planes {
                plane.fill(silence);
            }
        }
        buf
    }

    fn alloc_planes(format: SampleFormat, layout: ChannelLayout, num_samples: usize) -> Vec<Vec<u8>> {
        let bps = format.bytes_per_sample();
        let channels = layout.channels().max(1);
        if format.is_planar() {
            (0..channels).map(|_| vec![0u8; num_samples * bps]).collect()
        } else {
            vec![vec![0u8; num_samples * bps * channels]]
        }
    }

    /// Build a buffer from existing plane data.
    ///
    /// Plane lengths must match the format/layout/sample-count geometry.
    pub fn from_planes(
        format: SampleFormat,
        layout: ChannelLayout,
        sample_rate: u32,
        num_samples: usize,
        planes: Vec<Vec<u8>>,
    ) -> Self {
        debug_assert_eq!(
            planes.len(),
            if format.is_planar() { layout.channels().max(1) } else { 1 }
        );
        Self {
            format,
            layout,
            sample_rate,
            num_samples,
            planes,
            pts: Timestamp::none(),
        }
    }

    /// Sample format.
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Channel layout.
    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.layout.channels().max(1)
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples per channel.
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Whether the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.num_samples == 0
    }

    /// Bytes per sample step in one plane (covers all channels for packed
    /// formats, one channel for planar).
    pub fn plane_stride(&self) -> usize {
        let bps = self.format.bytes_per_sample();
        if self.format.is_planar() {
            bps
        } else {
            bps * self.channels()
        }
    }

    /// Raw plane data.
    pub fn planes(&self) -> &[Vec<u8>] {
        &self.planes
    }

    /// Mutable raw plane data.
    pub fn planes_mut(&mut self) -> &mut [Vec<u8>] {
        &mut self.planes
    }

    /// Duration of the buffer at its sample rate.
    pub fn duration(&self) -> Duration {
        Duration::new(self.num_samples as i64, TimeBase::per_sample(self.sample_rate))
    }

    /// Whether another buffer shares format, layout and rate.
    pub fn params_match(&self, other: &SampleBuf) -> bool {
        self.format == other.format
            && self.layout == other.layout
            && self.sample_rate == other.sample_rate
    }

    /// Append the samples of `other` after this buffer's samples.
    ///
    /// Keeps this buffer's pts. Parameters must match.
    pub fn append(&mut self, other: &SampleBuf) {
        debug_assert!(self.params_match(other));
        let stride = self.plane_stride();
        for (dst, src) in self.planes.iter_mut().zip(other.planes.iter()) {
            dst.extend_from_slice(&src[..other.num_samples * stride]);
        }
        self.num_samples += other.num_samples;
    }

    /// Split off the first `count` samples into a new buffer, leaving the
    /// remainder in place.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds the buffered sample count.
    pub fn split_to(&mut self, count: usize) -> SampleBuf {
        assert!(count <= self.num_samples);
        let stride = self.plane_stride();
        let cut = count * stride;
        let mut planes = Vec::with_capacity(self.planes.len());
        for plane in &mut self.planes {
            let head = plane[..cut].to_vec();
            plane.drain(..cut);
            planes.push(head);
        }
        let mut head = SampleBuf::from_planes(
            self.format,
            self.layout,
            self.sample_rate,
            count,
            planes,
        );
        head.pts = self.pts;
        if self.pts.is_valid() {
            self.pts = self.pts + Duration::new(count as i64, TimeBase::per_sample(self.sample_rate));
        }
        self.num_samples -= count;
        head
    }
}

impl fmt::Debug for SampleBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBuf")
            .field("format", &self.format)
            .field("layout", &format_args!("{}", self.layout))
            .field("sample_rate", &self.sample_rate)
            .field("num_samples", &self.num_samples)
            .field("pts", &self.pts)
            .finish()
    }
}
