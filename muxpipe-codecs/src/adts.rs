//! AAC ADTS-to-ASC bitstream filter.
//!
//! AAC inside transport streams carries a 7- or 9-byte ADTS header on every
//! packet. MP4/Matroska instead store one AudioSpecificConfig in the stream
//! extradata and raw AAC frames in packets. This filter strips the ADTS
//! header and synthesizes the ASC from the first packet.

use crate::traits::{BitstreamFilter, BsfOutcome};
use muxpipe_core::error::{CodecError, Error, Result};
use muxpipe_core::Packet;
use tracing::debug;

/// Minimum ADTS header length (protection_absent = 1).
const ADTS_HEADER_LEN: usize = 7;

/// AAC ADTS to AudioSpecificConfig bitstream filter.
#[derive(Debug, Default)]
pub struct AdtsToAsc {
    track: i32,
    extra_data: Option<Vec<u8>>,
}

impl AdtsToAsc {
    /// Create a filter for the given track (used in error reporting).
    pub fn new(track: i32) -> Self {
        Self {
            track,
            extra_data: None,
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Codec(CodecError::BitstreamFilter {
            track: self.track,
            message: message.into(),
        })
    }
}

impl BitstreamFilter for AdtsToAsc {
    fn name(&self) -> &str {
        "aac_adtstoasc"
    }

    fn filter(&mut self, mut packet: Packet) -> Result<BsfOutcome> {
        if packet.is_empty() {
            return Ok(BsfOutcome::Again);
        }
        let data = &packet.data;
        if data.len() < ADTS_HEADER_LEN {
            return Err(self.error("packet shorter than ADTS header"));
        }
        // syncword: 12 set bits
        if data[0] != 0xFF || (data[1] & 0xF0) != 0xF0 {
            return Err(self.error("missing ADTS syncword"));
        }
        let protection_absent = data[1] & 0x01 != 0;
        let header_len = if protection_absent {
            ADTS_HEADER_LEN
        } else {
            ADTS_HEADER_LEN + 2
        };
        if data.len() <= header_len {
            return Err(self.error("ADTS frame carries no payload"));
        }

        let profile = (data[2] >> 6) & 0x03; // audio_object_type - 1
        let sampling_index = (data[2] >> 2) & 0x0F;
        let channel_config = ((data[2] & 0x01) << 2) | ((data[3] >> 6) & 0x03);
        if sampling_index == 0x0F {
            return Err(self.error("explicit sample rate in ADTS header is unsupported"));
        }

        if self.extra_data.is_none() {
            // AudioSpecificConfig: 5 bits object type, 4 bits frequency
            // index, 4 bits channel configuration, 3 bits zero
            let object_type = profile + 1;
            let asc = [
                (object_type << 3) | (sampling_index >> 1),
                ((sampling_index & 0x01) << 7) | (channel_config << 3),
            ];
            debug!(
                track = self.track,
                object_type, sampling_index, channel_config, "recovered AudioSpecificConfig"
            );
            self.extra_data = Some(asc.to_vec());
        }

        packet.data.drain(..header_len);
        Ok(BsfOutcome::Packet(packet))
    }

    fn extra_data(&self) -> Option<&[u8]> {
        self.extra_data.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 48kHz (index 3), AAC-LC (profile 1), stereo, protection absent.
    fn adts_packet(payload: &[u8]) -> Packet {
        let frame_len = ADTS_HEADER_LEN + payload.len();
        let mut data = vec![
            0xFF,
            0xF1,
            (1 << 6) | (3 << 2), // profile=1 (LC), sampling index=3
            2 << 6,              // channel config 2
            0,
            0,
            0xFC,
        ];
        data[3] |= ((frame_len >> 11) & 0x03) as u8;
        data[4] = ((frame_len >> 3) & 0xFF) as u8;
        data[5] = (((frame_len & 0x07) << 5) | 0x1F) as u8;
        data.extend_from_slice(payload);
        Packet::new(data)
    }

    #[test]
    fn test_strips_header_and_builds_asc() {
        let mut bsf = AdtsToAsc::new(1);
        let out = bsf.filter(adts_packet(&[0xDE, 0xAD, 0xBE])).unwrap();
        let BsfOutcome::Packet(pkt) = out else {
            panic!("expected a packet");
        };
        assert_eq!(pkt.data, vec![0xDE, 0xAD, 0xBE]);
        // object type 2 (LC), freq index 3, channels 2 -> 0x11 0x90
        assert_eq!(bsf.extra_data(), Some(&[0x11, 0x90][..]));
        // no syncword survives in the payload
        assert!(!pkt.data.windows(2).any(|w| w[0] == 0xFF && w[1] & 0xF0 == 0xF0));
    }

    #[test]
    fn test_empty_packet_is_again() {
        let mut bsf = AdtsToAsc::new(1);
        assert!(matches!(bsf.filter(Packet::empty()).unwrap(), BsfOutcome::Again));
        assert!(bsf.extra_data().is_none());
    }

    #[test]
    fn test_garbage_fails() {
        let mut bsf = AdtsToAsc::new(1);
        let err = bsf.filter(Packet::new(vec![0x12; 32])).unwrap_err();
        assert!(matches!(
            err,
            Error::Codec(CodecError::BitstreamFilter { track: 1, .. })
        ));
    }

    #[test]
    fn test_truncated_frame_fails() {
        let mut bsf = AdtsToAsc::new(2);
        assert!(bsf.filter(Packet::new(vec![0xFF, 0xF1, 0x4C])).is_err());
    }
}
