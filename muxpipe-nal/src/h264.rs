//! H.264 NAL unit types and slice-header inspection.

use crate::annexb::{split_units, NalRef};
use muxpipe_core::bitstream::{remove_emulation_prevention, BitReader};
use muxpipe_core::error::Result;
use std::fmt;

/// H.264 NAL unit types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NaluType {
    /// Coded slice of a non-IDR picture.
    Slice,
    /// Coded slice data partition A.
    PartitionA,
    /// Coded slice data partition B.
    PartitionB,
    /// Coded slice data partition C.
    PartitionC,
    /// Coded slice of an IDR picture.
    IdrSlice,
    /// Supplemental enhancement information.
    Sei,
    /// Sequence parameter set.
    Sps,
    /// Picture parameter set.
    Pps,
    /// Access unit delimiter.
    Aud,
    /// End of sequence.
    EndSequence,
    /// End of stream.
    EndStream,
    /// Filler data.
    Filler,
    /// SPS extension.
    SpsExt,
    /// Unspecified or reserved.
    Other(u8),
}

impl NaluType {
    /// Create from the raw `nal_unit_type` field.
    pub fn from_raw(value: u8) -> Self {
        match value {
            1 => Self::Slice,
            2 => Self::PartitionA,
            3 => Self::PartitionB,
            4 => Self::PartitionC,
            5 => Self::IdrSlice,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            10 => Self::EndSequence,
            11 => Self::EndStream,
            12 => Self::Filler,
            13 => Self::SpsExt,
            v => Self::Other(v),
        }
    }

    /// Get the raw value.
    pub fn to_raw(&self) -> u8 {
        match self {
            Self::Slice => 1,
            Self::PartitionA => 2,
            Self::PartitionB => 3,
            Self::PartitionC => 4,
            Self::IdrSlice => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::Aud => 9,
            Self::EndSequence => 10,
            Self::EndStream => 11,
            Self::Filler => 12,
            Self::SpsExt => 13,
            Self::Other(v) => *v,
        }
    }

    /// Whether this unit carries coded picture data.
    pub fn is_slice(&self) -> bool {
        matches!(self, Self::Slice | Self::IdrSlice)
    }
}

impl fmt::Display for NaluType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slice => write!(f, "SLICE"),
            Self::IdrSlice => write!(f, "IDR"),
            Self::Sei => write!(f, "SEI"),
            Self::Sps => write!(f, "SPS"),
            Self::Pps => write!(f, "PPS"),
            Self::Aud => write!(f, "AUD"),
            other => write!(f, "NAL({})", other.to_raw()),
        }
    }
}

/// A typed H.264 NAL unit reference.
#[derive(Debug, Clone, Copy)]
pub struct Nal {
    /// Location within the access unit.
    pub nal: NalRef,
    /// Unit type.
    pub unit_type: NaluType,
}

/// Parse an Annex-B access unit into typed H.264 NAL units.
///
/// A trailing start code with no header byte is ignored.
pub fn parse_nal_units(data: &[u8]) -> Vec<Nal> {
    split_units(data)
        .into_iter()
        .filter(|nal| nal.header_offset < data.len())
        .map(|nal| {
            let header = data[nal.header_offset];
            Nal {
                nal,
                unit_type: NaluType::from_raw(header & 0x1F),
            }
        })
        .collect()
}

/// Slice types carried in an H.264 slice header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    /// Forward-predicted slice.
    P,
    /// Bi-predicted slice.
    B,
    /// Intra slice.
    I,
}

/// Read the slice type from a slice NAL payload (header byte included).
pub fn slice_type(payload: &[u8]) -> Result<SliceType> {
    let rbsp = remove_emulation_prevention(&payload[1..payload.len().min(16)]);
    let mut reader = BitReader::new(&rbsp);
    let _first_mb_in_slice = reader.read_ue()?;
    let slice_type = reader.read_ue()?;
    Ok(match slice_type % 5 {
        0 => SliceType::P,
        1 => SliceType::B,
        2 => SliceType::I,
        3 => SliceType::P,
        _ => SliceType::I,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nalu_type_roundtrip() {
        for raw in 0u8..=31 {
            assert_eq!(NaluType::from_raw(raw).to_raw(), raw);
        }
    }

    #[test]
    fn test_parse_typed_units() {
        let data = [0, 0, 0, 1, 0x67, 0xAA, 0, 0, 0, 1, 0x68, 0xBB, 0, 0, 1, 0x65, 0x88, 0x80];
        let units = parse_nal_units(&data);
        assert_eq!(units.len(), 3);
        assert_eq!(units[0].unit_type, NaluType::Sps);
        assert_eq!(units[1].unit_type, NaluType::Pps);
        assert_eq!(units[2].unit_type, NaluType::IdrSlice);
        assert!(units[2].unit_type.is_slice());
    }

    #[test]
    fn test_slice_type_parse() {
        // first_mb ue(0)=1, slice_type ue(7)=0001000 -> I (7 % 5 == 2)
        let payload = [0x65, 0b1_0001000];
        assert_eq!(slice_type(&payload).unwrap(), SliceType::I);
        // first_mb ue(0)=1, slice_type ue(0)=1 -> P
        let payload = [0x41, 0b11_000000];
        assert_eq!(slice_type(&payload).unwrap(), SliceType::P);
        // first_mb ue(0)=1, slice_type ue(1)=010 -> B
        let payload = [0x41, 0b1010_0000];
        assert_eq!(slice_type(&payload).unwrap(), SliceType::B);
    }
}
