//! HEVC NAL unit types and slice-header inspection.

use crate::annexb::{split_units, NalRef};
use muxpipe_core::bitstream::{remove_emulation_prevention, BitReader};
use muxpipe_core::error::Result;
use std::fmt;

/// HEVC NAL unit types (the subset the mux pipeline inspects).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NaluType {
    /// Trailing picture, non-reference.
    TrailN,
    /// Trailing picture, reference.
    TrailR,
    /// Random access skipped leading, non-reference.
    RaslN,
    /// Random access skipped leading, reference.
    RaslR,
    /// Broken link access, W leading picture.
    BlaWLp,
    /// Broken link access, W RADL.
    BlaWRadl,
    /// Broken link access, N leading picture.
    BlaNLp,
    /// Instantaneous decoder refresh, W RADL.
    IdrWRadl,
    /// Instantaneous decoder refresh, N leading picture.
    IdrNLp,
    /// Clean random access.
    CraNut,
    /// Video parameter set.
    Vps,
    /// Sequence parameter set.
    Sps,
    /// Picture parameter set.
    Pps,
    /// Access unit delimiter.
    Aud,
    /// Prefix SEI.
    PrefixSei,
    /// Suffix SEI.
    SuffixSei,
    /// Any other type.
    Other(u8),
}

impl NaluType {
    /// Create from the raw `nal_unit_type` field.
    pub fn from_raw(value: u8) -> Self {
        match value {
            0 => Self::TrailN,
            1 => Self::TrailR,
            8 => Self::RaslN,
            9 => Self::RaslR,
            16 => Self::BlaWLp,
            17 => Self::BlaWRadl,
            18 => Self::BlaNLp,
            19 => Self::IdrWRadl,
            20 => Self::IdrNLp,
            21 => Self::CraNut,
            32 => Self::Vps,
            33 => Self::Sps,
            34 => Self::Pps,
            35 => Self::Aud,
            39 => Self::PrefixSei,
            40 => Self::SuffixSei,
            v => Self::Other(v),
        }
    }

    /// Get the raw value.
    pub fn to_raw(&self) -> u8 {
        match self {
            Self::TrailN => 0,
            Self::TrailR => 1,
            Self::RaslN => 8,
            Self::RaslR => 9,
            Self::BlaWLp => 16,
            Self::BlaWRadl => 17,
            Self::BlaNLp => 18,
            Self::IdrWRadl => 19,
            Self::IdrNLp => 20,
            Self::CraNut => 21,
            Self::Vps => 32,
            Self::Sps => 33,
            Self::Pps => 34,
            Self::Aud => 35,
            Self::PrefixSei => 39,
            Self::SuffixSei => 40,
            Self::Other(v) => *v,
        }
    }

    /// Whether this is a VCL (coded slice) unit.
    pub fn is_vcl(&self) -> bool {
        self.to_raw() < 32
    }

    /// Whether this is an intra random access point picture.
    pub fn is_irap(&self) -> bool {
        let raw = self.to_raw();
        (16..=23).contains(&raw)
    }

    /// Whether this is an IDR picture.
    pub fn is_idr(&self) -> bool {
        matches!(self, Self::IdrWRadl | Self::IdrNLp)
    }
}

impl fmt::Display for NaluType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vps => write!(f, "VPS"),
            Self::Sps => write!(f, "SPS"),
            Self::Pps => write!(f, "PPS"),
            Self::Aud => write!(f, "AUD"),
            Self::IdrWRadl => write!(f, "IDR_W_RADL"),
            Self::IdrNLp => write!(f, "IDR_N_LP"),
            Self::CraNut => write!(f, "CRA"),
            other => write!(f, "NAL({})", other.to_raw()),
        }
    }
}

/// A typed HEVC NAL unit reference.
#[derive(Debug, Clone, Copy)]
pub struct Nal {
    /// Location within the access unit.
    pub nal: NalRef,
    /// Unit type.
    pub unit_type: NaluType,
}

/// Parse an Annex-B access unit into typed HEVC NAL units.
///
/// A trailing start code with no header bytes is ignored.
pub fn parse_nal_units(data: &[u8]) -> Vec<Nal> {
    split_units(data)
        .into_iter()
        .filter(|nal| nal.header_offset < data.len())
        .map(|nal| {
            let header = data[nal.header_offset];
            Nal {
                nal,
                unit_type: NaluType::from_raw((header >> 1) & 0x3F),
            }
        })
        .collect()
}

/// Slice types carried in an HEVC slice segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    /// Bi-predicted slice.
    B,
    /// Forward-predicted slice.
    P,
    /// Intra slice.
    I,
}

/// Read the slice type from a VCL NAL payload (2-byte header included).
///
/// Assumes independent slice segments without extra header bits, which is
/// what hardware encoder output carries.
pub fn slice_type(payload: &[u8], unit_type: NaluType) -> Result<SliceType> {
    if payload.len() < 3 {
        return Err(muxpipe_core::error::ParseError::UnexpectedEnd.into());
    }
    let rbsp = remove_emulation_prevention(&payload[2..payload.len().min(18)]);
    let mut reader = BitReader::new(&rbsp);
    let _first_slice_segment_in_pic = reader.read_bit()?;
    if unit_type.is_irap() {
        let _no_output_of_prior_pics = reader.read_bit()?;
    }
    let _slice_pic_parameter_set_id = reader.read_ue()?;
    Ok(match reader.read_ue()? {
        0 => SliceType::B,
        1 => SliceType::P,
        _ => SliceType::I,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nalu_type_predicates() {
        assert!(NaluType::IdrWRadl.is_idr());
        assert!(NaluType::IdrWRadl.is_irap());
        assert!(NaluType::CraNut.is_irap());
        assert!(!NaluType::CraNut.is_idr());
        assert!(NaluType::TrailR.is_vcl());
        assert!(!NaluType::Sps.is_vcl());
    }

    #[test]
    fn test_parse_typed_units() {
        // header byte encodes type in bits 6..1: VPS=32 -> 0x40, SPS=33 -> 0x42, PPS=34 -> 0x44
        let data = [
            0, 0, 0, 1, 0x40, 0x01, 0xAA, //
            0, 0, 0, 1, 0x42, 0x01, 0xBB, //
            0, 0, 0, 1, 0x44, 0x01, 0xCC, //
            0, 0, 1, 0x26, 0x01, 0x88, // IDR_W_RADL = 19 -> 0x26
        ];
        let units = parse_nal_units(&data);
        assert_eq!(units.len(), 4);
        assert_eq!(units[0].unit_type, NaluType::Vps);
        assert_eq!(units[1].unit_type, NaluType::Sps);
        assert_eq!(units[2].unit_type, NaluType::Pps);
        assert_eq!(units[3].unit_type, NaluType::IdrWRadl);
    }

    #[test]
    fn test_slice_type_parse() {
        // TrailR: first_slice=1, pps_id ue(0)=1, slice_type ue(1)=010 -> P
        let payload = [0x02, 0x01, 0b11_010_000];
        assert_eq!(slice_type(&payload, NaluType::TrailR).unwrap(), SliceType::P);
        // IDR: first_slice=1, no_output=0, pps_id ue(0)=1, slice_type ue(2)=011 -> I
        let payload = [0x26, 0x01, 0b10_1_011_00];
        assert_eq!(slice_type(&payload, NaluType::IdrWRadl).unwrap(), SliceType::I);
    }
}
