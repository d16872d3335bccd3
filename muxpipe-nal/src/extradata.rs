//! Container extradata built from in-band parameter sets.

use crate::{h264, hevc};
use muxpipe_core::error::{ParseError, Result};
use muxpipe_core::VideoCodec;

/// Trailing zero padding appended after the extradata payload.
///
/// Container libraries over-read extradata during probing; the padding
/// guarantees those reads stay in bounds.
pub const EXTRADATA_PADDING: usize = 64;

/// Codec configuration bytes for a video stream.
///
/// For H.264 this is `[SPS][PPS]`, for HEVC `[VPS][SPS][PPS]`, each NAL with
/// its start-code prefix, concatenated in that order. The backing buffer
/// always carries [`EXTRADATA_PADDING`] zeroed bytes past the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extradata {
    buf: Vec<u8>,
    len: usize,
}

impl Extradata {
    /// Wrap raw configuration bytes, adding the trailing padding.
    pub fn from_bytes(payload: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(payload.len() + EXTRADATA_PADDING);
        buf.extend_from_slice(payload);
        buf.resize(payload.len() + EXTRADATA_PADDING, 0);
        Self {
            buf,
            len: payload.len(),
        }
    }

    /// Extract parameter-set NAL units from the first encoder access unit.
    ///
    /// Fails when a required header NAL unit is absent; the caller keeps
    /// waiting for an access unit that carries them.
    pub fn from_access_unit(codec: VideoCodec, au: &[u8]) -> Result<Self> {
        let payload = match codec {
            VideoCodec::H264 => {
                let units = h264::parse_nal_units(au);
                let sps = units
                    .iter()
                    .find(|n| n.unit_type == h264::NaluType::Sps)
                    .ok_or(ParseError::MissingHeaderNal("SPS"))?;
                let pps = units
                    .iter()
                    .find(|n| n.unit_type == h264::NaluType::Pps)
                    .ok_or(ParseError::MissingHeaderNal("PPS"))?;
                let mut payload = Vec::with_capacity(sps.nal.size + pps.nal.size);
                payload.extend_from_slice(sps.nal.bytes(au));
                payload.extend_from_slice(pps.nal.bytes(au));
                payload
            }
            VideoCodec::H265 => {
                let units = hevc::parse_nal_units(au);
                let vps = units
                    .iter()
                    .find(|n| n.unit_type == hevc::NaluType::Vps)
                    .ok_or(ParseError::MissingHeaderNal("VPS"))?;
                let sps = units
                    .iter()
                    .find(|n| n.unit_type == hevc::NaluType::Sps)
                    .ok_or(ParseError::MissingHeaderNal("SPS"))?;
                let pps = units
                    .iter()
                    .find(|n| n.unit_type == hevc::NaluType::Pps)
                    .ok_or(ParseError::MissingHeaderNal("PPS"))?;
                let mut payload =
                    Vec::with_capacity(vps.nal.size + sps.nal.size + pps.nal.size);
                payload.extend_from_slice(vps.nal.bytes(au));
                payload.extend_from_slice(sps.nal.bytes(au));
                payload.extend_from_slice(pps.nal.bytes(au));
                payload
            }
        };
        Ok(Self::from_bytes(&payload))
    }

    /// The configuration payload, padding excluded.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
