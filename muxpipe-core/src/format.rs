//! Container and codec format definitions.

use std::fmt;

/// Container format type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ContainerFormat {
    /// ISO Base Media File Format (MP4, M4V, M4A).
    Mp4,
    /// QuickTime Movie.
    Mov,
    /// Matroska container.
    Mkv,
    /// WebM (Matroska subset for web).
    WebM,
    /// MPEG Transport Stream.
    MpegTs,
    /// Raw bitstream (no container).
    Raw,
}

impl ContainerFormat {
    /// Get the typical file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::Mkv => "mkv",
            Self::WebM => "webm",
            Self::MpegTs => "ts",
            Self::Raw => "raw",
        }
    }

    /// Try to detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp4" | "m4v" | "m4a" | "3gp" | "3g2" | "f4v" => Some(Self::Mp4),
            "mov" => Some(Self::Mov),
            "mkv" => Some(Self::Mkv),
            "webm" => Some(Self::WebM),
            "ts" | "mts" | "m2ts" => Some(Self::MpegTs),
            _ => None,
        }
    }

    /// MP4/MOV family. Text subtitles in these containers must be carried
    /// as `mov_text`.
    pub fn is_mp4_family(&self) -> bool {
        matches!(self, Self::Mp4 | Self::Mov)
    }

    /// Matroska family. Video streams in these containers use a 1/1000
    /// time base.
    pub fn is_matroska(&self) -> bool {
        matches!(self, Self::Mkv | Self::WebM)
    }

    /// Whether the container interleaves on a global timeline (as opposed
    /// to a raw elementary stream).
    pub fn is_interleaved(&self) -> bool {
        !matches!(self, Self::Raw)
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mp4 => write!(f, "MP4"),
            Self::Mov => write!(f, "QuickTime"),
            Self::Mkv => write!(f, "Matroska"),
            Self::WebM => write!(f, "WebM"),
            Self::MpegTs => write!(f, "MPEG-TS"),
            Self::Raw => write!(f, "Raw"),
        }
    }
}

/// Video codec type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    /// H.264 / AVC.
    H264,
    /// H.265 / HEVC.
    H265,
}

impl VideoCodec {
    /// Get the FourCC code for this codec.
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            Self::H264 => *b"avc1",
            Self::H265 => *b"hvc1",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H264 => write!(f, "H.264/AVC"),
            Self::H265 => write!(f, "H.265/HEVC"),
        }
    }
}

/// PCM sample encoding variant as found in source containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PcmFormat {
    /// Unsigned 8-bit.
    U8,
    /// Signed 8-bit.
    S8,
    /// Signed 16-bit little endian.
    S16Le,
    /// Signed 16-bit big endian.
    S16Be,
    /// Signed 24-bit little endian.
    S24Le,
    /// Signed 24-bit big endian.
    S24Be,
    /// Signed 32-bit little endian.
    S32Le,
    /// Signed 32-bit big endian.
    S32Be,
    /// 32-bit float little endian.
    F32Le,
    /// 32-bit float big endian.
    F32Be,
    /// 64-bit float little endian.
    F64Le,
    /// 64-bit float big endian.
    F64Be,
    /// Signed 8-bit planar.
    S8Planar,
    /// Signed 16-bit little endian planar.
    S16LePlanar,
    /// Signed 16-bit big endian planar.
    S16BePlanar,
    /// Signed 24-bit little endian planar.
    S24LePlanar,
    /// Signed 32-bit little endian planar.
    S32LePlanar,
    /// DVD PCM (big endian, grouped 16/20/24-bit).
    Dvd,
    /// Blu-ray PCM (big endian, grouped).
    BluRay,
}

impl PcmFormat {
    /// Bits per sample of the unpacked value.
    pub fn bits_per_sample(&self) -> u8 {
        match self {
            Self::U8 | Self::S8 | Self::S8Planar => 8,
            Self::S16Le | Self::S16Be | Self::S16LePlanar | Self::S16BePlanar => 16,
            Self::S24Le | Self::S24Be | Self::S24LePlanar | Self::Dvd | Self::BluRay => 24,
            Self::S32Le | Self::S32Be | Self::S32LePlanar | Self::F32Le | Self::F32Be => 32,
            Self::F64Le | Self::F64Be => 64,
        }
    }

    /// Whether samples are stored big endian.
    pub fn is_big_endian(&self) -> bool {
        matches!(
            self,
            Self::S16Be
                | Self::S24Be
                | Self::S32Be
                | Self::F32Be
                | Self::F64Be
                | Self::S16BePlanar
                | Self::Dvd
                | Self::BluRay
        )
    }

    /// Whether samples are floating point.
    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32Le | Self::F32Be | Self::F64Le | Self::F64Be)
    }

    /// Whether channels are stored in separate planes.
    pub fn is_planar(&self) -> bool {
        matches!(
            self,
            Self::S8Planar | Self::S16LePlanar | Self::S16BePlanar | Self::S24LePlanar | Self::S32LePlanar
        )
    }

    /// Whether a container can take this variant directly, without the
    /// pipeline converting it first.
    pub fn is_directly_muxable(&self) -> bool {
        matches!(
            self,
            Self::U8 | Self::S8 | Self::S16Le | Self::S24Le | Self::S32Le | Self::F32Le | Self::F64Le
        )
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8 => write!(f, "pcm_u8"),
            Self::S8 => write!(f, "pcm_s8"),
            Self::S16Le => write!(f, "pcm_s16le"),
            Self::S16Be => write!(f, "pcm_s16be"),
            Self::S24Le => write!(f, "pcm_s24le"),
            Self::S24Be => write!(f, "pcm_s24be"),
            Self::S32Le => write!(f, "pcm_s32le"),
            Self::S32Be => write!(f, "pcm_s32be"),
            Self::F32Le => write!(f, "pcm_f32le"),
            Self::F32Be => write!(f, "pcm_f32be"),
            Self::F64Le => write!(f, "pcm_f64le"),
            Self::F64Be => write!(f, "pcm_f64be"),
            Self::S8Planar => write!(f, "pcm_s8_planar"),
            Self::S16LePlanar => write!(f, "pcm_s16le_planar"),
            Self::S16BePlanar => write!(f, "pcm_s16be_planar"),
            Self::S24LePlanar => write!(f, "pcm_s24le_planar"),
            Self::S32LePlanar => write!(f, "pcm_s32le_planar"),
            Self::Dvd => write!(f, "pcm_dvd"),
            Self::BluRay => write!(f, "pcm_bluray"),
        }
    }
}

/// Audio codec type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum AudioCodec {
    /// AAC (Advanced Audio Coding).
    Aac,
    /// AC-3 (Dolby Digital).
    Ac3,
    /// E-AC-3 (Enhanced AC-3).
    Eac3,
    /// MP3 (MPEG Layer 3).
    Mp3,
    /// Opus.
    Opus,
    /// Vorbis.
    Vorbis,
    /// FLAC.
    Flac,
    /// PCM variant.
    Pcm(PcmFormat),
}

impl AudioCodec {
    /// Whether this is a PCM codec.
    pub fn is_pcm(&self) -> bool {
        matches!(self, Self::Pcm(_))
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aac => write!(f, "aac"),
            Self::Ac3 => write!(f, "ac3"),
            Self::Eac3 => write!(f, "eac3"),
            Self::Mp3 => write!(f, "mp3"),
            Self::Opus => write!(f, "opus"),
            Self::Vorbis => write!(f, "vorbis"),
            Self::Flac => write!(f, "flac"),
            Self::Pcm(fmt) => write!(f, "{}", fmt),
        }
    }
}

/// Subtitle codec type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SubtitleCodec {
    /// MP4 timed text (tx3g).
    MovText,
    /// Advanced SubStation Alpha.
    Ass,
    /// SubRip text.
    Srt,
    /// WebVTT.
    WebVtt,
    /// DVB bitmap subtitles.
    DvbSub,
    /// PGS (Blu-ray) bitmap subtitles.
    PgsSub,
}

impl SubtitleCodec {
    /// Whether this codec carries text (as opposed to bitmaps).
    pub fn is_text(&self) -> bool {
        matches!(self, Self::MovText | Self::Ass | Self::Srt | Self::WebVtt)
    }
}

impl fmt::Display for SubtitleCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MovText => write!(f, "mov_text"),
            Self::Ass => write!(f, "ass"),
            Self::Srt => write!(f, "subrip"),
            Self::WebVtt => write!(f, "webvtt"),
            Self::DvbSub => write!(f, "dvb_subtitle"),
            Self::PgsSub => write!(f, "hdmv_pgs_subtitle"),
        }
    }
}

/// Stream type (video, audio, subtitle, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum StreamType {
    /// Video stream.
    Video,
    /// Audio stream.
    Audio,
    /// Subtitle stream.
    Subtitle,
    /// Data stream.
    Data,
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "Video"),
            Self::Audio => write!(f, "Audio"),
            Self::Subtitle => write!(f, "Subtitle"),
            Self::Data => write!(f, "Data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mp4_family() {
        assert!(ContainerFormat::Mp4.is_mp4_family());
        assert!(ContainerFormat::Mov.is_mp4_family());
        assert!(!ContainerFormat::Mkv.is_mp4_family());
    }

    #[test]
    fn test_from_extension() {
        assert_eq!(ContainerFormat::from_extension("3gp"), Some(ContainerFormat::Mp4));
        assert_eq!(ContainerFormat::from_extension("MKV"), Some(ContainerFormat::Mkv));
        assert_eq!(ContainerFormat::from_extension("xyz"), None);
    }

    #[test]
    fn test_pcm_predicates() {
        assert!(PcmFormat::S16Be.is_big_endian());
        assert!(!PcmFormat::S16Be.is_directly_muxable());
        assert!(PcmFormat::S24Le.is_directly_muxable());
        assert!(PcmFormat::S16LePlanar.is_planar());
        assert!(AudioCodec::Pcm(PcmFormat::S16Le).is_pcm());
        assert!(!AudioCodec::Aac.is_pcm());
    }

    #[test]
    fn test_subtitle_text_predicate() {
        assert!(SubtitleCodec::Srt.is_text());
        assert!(SubtitleCodec::MovText.is_text());
        assert!(!SubtitleCodec::DvbSub.is_text());
    }
}
