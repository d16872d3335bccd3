//! Frame classification for encoder output.
//!
//! A per-stream classifier inspects each delivered access unit and exposes
//! keyframe status, picture type and picture structure. State persists
//! across calls so a stream keeps its last classification when an access
//! unit carries no readable slice header.

use crate::{h264, hevc};
use muxpipe_core::VideoCodec;
use tracing::warn;

/// Picture type of a classified access unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PictureType {
    /// Intra picture.
    I,
    /// Forward-predicted picture.
    P,
    /// Bi-predicted picture.
    B,
    /// Not yet determined.
    #[default]
    Unknown,
}

/// Picture structure of a classified access unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PictureStructure {
    /// Progressive frame.
    #[default]
    Frame,
    /// Two fields coded in one delivered buffer (PAFF).
    FieldPair,
}

/// Classification result for one access unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct PictureInfo {
    /// Whether the unit starts with a random access point.
    pub key_frame: bool,
    /// Picture type.
    pub pict_type: PictureType,
    /// Picture structure.
    pub structure: PictureStructure,
    /// Number of extra field repeats to display (soft telecine); always 0
    /// for the progressive/PAFF output this pipeline carries.
    pub repeat_pict: u8,
}

/// Lightweight per-stream frame classifier.
#[derive(Debug)]
pub struct StreamClassifier {
    codec: VideoCodec,
    interlaced: bool,
    last: PictureInfo,
}

impl StreamClassifier {
    /// Create a classifier for one video stream.
    pub fn new(codec: VideoCodec, interlaced: bool) -> Self {
        Self {
            codec,
            interlaced,
            last: PictureInfo::default(),
        }
    }

    /// The last classification produced.
    pub fn last(&self) -> PictureInfo {
        self.last
    }

    /// Classify one access unit.
    pub fn classify(&mut self, au: &[u8]) -> PictureInfo {
        let mut info = PictureInfo {
            structure: if self.interlaced {
                PictureStructure::FieldPair
            } else {
                PictureStructure::Frame
            },
            ..PictureInfo::default()
        };

        match self.codec {
            VideoCodec::H264 => {
                for unit in h264::parse_nal_units(au) {
                    match unit.unit_type {
                        h264::NaluType::IdrSlice => {
                            info.key_frame = true;
                            info.pict_type = PictureType::I;
                            break;
                        }
                        h264::NaluType::Slice => {
                            match h264::slice_type(unit.nal.payload(au)) {
                                Ok(h264::SliceType::I) => info.pict_type = PictureType::I,
                                Ok(h264::SliceType::P) => info.pict_type = PictureType::P,
                                Ok(h264::SliceType::B) => info.pict_type = PictureType::B,
                                Err(err) => {
                                    warn!("failed to parse H.264 slice header: {err}");
                                    info.pict_type = self.last.pict_type;
                                }
                            }
                            break;
                        }
                        _ => {}
                    }
                }
            }
            VideoCodec::H265 => {
                for unit in hevc::parse_nal_units(au) {
                    if !unit.unit_type.is_vcl() {
                        continue;
                    }
                    if unit.unit_type.is_irap() {
                        info.key_frame = true;
                        info.pict_type = PictureType::I;
                    } else {
                        match hevc::slice_type(unit.nal.payload(au), unit.unit_type) {
                            Ok(hevc::SliceType::I) => info.pict_type = PictureType::I,
                            Ok(hevc::SliceType::P) => info.pict_type = PictureType::P,
                            Ok(hevc::SliceType::B) => info.pict_type = PictureType::B,
                            Err(err) => {
                                warn!("failed to parse HEVC slice header: {err}");
                                info.pict_type = self.last.pict_type;
                            }
                        }
                    }
                    break;
                }
            }
        }

        self.last = info;
        info
    }
}

/// Find the byte length of the first field of a PAFF-coded access unit.
///
/// Scans for the start code of the second field-coded slice and returns the
/// boundary offset; returns `size` when no second slice exists in the
/// buffer.
pub fn paff_field_length(data: &[u8]) -> usize {
    let size = data.len();
    if size < 4 {
        return size;
    }
    let mut slice_nalus = 0;
    let (mut a, mut b, mut c) = (data[0], data[1], data[2]);
    for i in 3..size {
        let d = data[i];
        if (a | b) == 0 && c == 1 {
            if slice_nalus > 0 {
                // step back over the start code, including a 4-byte prefix
                return i - 3 - usize::from(i >= 4 && data[i - 4] == 0);
            }
            let nal_type = d & 0x1F;
            slice_nalus += usize::from(nal_type == 1 || nal_type == 5);
        }
        a = b;
        b = c;
        c = d;
    }
    size
}
