//! Encoded media packets.
//!
//! A packet owns its payload: queue hops between scheduler stages hand the
//! whole record over, so exactly one stage holds a packet at any time.

use crate::timestamp::{Duration, TimeBase, Timestamp};
use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Packet property flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u32 {
        /// This packet contains a keyframe.
        const KEYFRAME = 0x0001;
        /// Packet data is corrupted.
        const CORRUPT = 0x0002;
        /// Packet contains a disposable frame (can be dropped).
        const DISPOSABLE = 0x0004;
    }
}

/// One encoded audio, video or subtitle packet.
#[derive(Clone, Default)]
pub struct Packet {
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Presentation timestamp.
    pub pts: Timestamp,
    /// Decode timestamp.
    pub dts: Timestamp,
    /// Presentation span of the payload.
    pub duration: Duration,
    /// Output container stream this packet belongs to.
    pub stream_index: u32,
    /// Property flags.
    pub flags: PacketFlags,
}

impl Packet {
    /// Wrap a payload with undefined timestamps.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pts: Timestamp::none(),
            dts: Timestamp::none(),
            duration: Duration::zero(),
            stream_index: 0,
            flags: PacketFlags::empty(),
        }
    }

    /// A packet with no payload.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Payload length in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the keyframe flag is set.
    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(PacketFlags::KEYFRAME)
    }

    /// Set or clear the keyframe flag.
    pub fn set_keyframe(&mut self, keyframe: bool) {
        if keyframe {
            self.flags.insert(PacketFlags::KEYFRAME);
        } else {
            self.flags.remove(PacketFlags::KEYFRAME);
        }
    }

    /// Re-express pts, dts and duration in `target`.
    pub fn rescale(&mut self, target: TimeBase) {
        self.pts = self.pts.rescale(target);
        self.dts = self.dts.rescale(target);
        self.duration = self.duration.rescale(target);
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("size", &self.size())
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("stream_index", &self.stream_index)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_has_undefined_timestamps() {
        let packet = Packet::new(vec![0u8; 100]);
        assert_eq!(packet.size(), 100);
        assert!(!packet.pts.is_valid());
        assert!(!packet.dts.is_valid());
        assert!(packet.duration.is_zero());
    }

    #[test]
    fn test_keyframe_flag() {
        let mut packet = Packet::empty();
        assert!(!packet.is_keyframe());
        packet.set_keyframe(true);
        assert!(packet.is_keyframe());
        packet.set_keyframe(false);
        assert!(!packet.is_keyframe());
    }

    #[test]
    fn test_rescale_all_fields() {
        let mut packet = Packet::empty();
        packet.pts = Timestamp::new(1000, TimeBase::MILLISECONDS);
        packet.dts = Timestamp::new(500, TimeBase::MILLISECONDS);
        packet.duration = Duration::new(20, TimeBase::MILLISECONDS);
        packet.rescale(TimeBase::MPEG);
        assert_eq!(packet.pts.value, 90000);
        assert_eq!(packet.dts.value, 45000);
        assert_eq!(packet.duration.value, 1800);
    }
}
