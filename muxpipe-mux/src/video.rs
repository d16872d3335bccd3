//! Video track state and output buffers.
//!
//! The hardware encoder delivers one access unit per buffer. Buffers are
//! recycled through two size-classed free lists so I-frame sized and
//! P/B-frame sized allocations never ping-pong.

use bitflags::bitflags;
use muxpipe_core::{
    ContainerFormat, Duration, Packet, PacketFlags, Rational, TimeBase, Timestamp, VideoCodec,
};
use muxpipe_nal::classify::{paff_field_length, PictureStructure, PictureType};
use muxpipe_nal::{Extradata, StreamClassifier};

/// Payload size above which a buffer belongs to the I-frame free list.
pub const LARGE_FRAME_BYTES: usize = 10 * 1024;

bitflags! {
    /// Frame type tags attached to an access unit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameType: u32 {
        /// Instantaneous decoder refresh.
        const IDR = 0x01;
        /// Intra frame.
        const I = 0x02;
        /// Predicted frame.
        const P = 0x04;
        /// Bi-predicted frame.
        const B = 0x08;
    }
}

/// A reusable encoded-video buffer travelling through the video queue.
#[derive(Debug, Default)]
pub struct VideoBitstream {
    data: Vec<u8>,
    /// Payload start within `data`.
    pub offset: usize,
    /// Payload length.
    pub len: usize,
    /// Presentation timestamp in the track's input time base.
    pub pts: i64,
    /// Decode timestamp in microseconds, when the encoder provides one.
    pub dts: Option<i64>,
    /// Frame type tags.
    pub frame_type: FrameType,
    /// Picture structure.
    pub structure: PictureStructure,
    /// Field repeats for display.
    pub repeat_pict: u8,
}

impl VideoBitstream {
    /// Allocate a buffer of the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            ..Self::default()
        }
    }

    /// Backing capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Load an access unit into the buffer, growing the backing store when
    /// it is too small. Growth over-allocates four-fold so one I-frame
    /// sizes the buffer for its successors.
    pub fn fill(&mut self, payload: &[u8], pts: i64, dts: Option<i64>) {
        if self.data.len() < payload.len() {
            self.data = vec![0u8; payload.len() * 4];
        }
        self.data[..payload.len()].copy_from_slice(payload);
        self.offset = 0;
        self.len = payload.len();
        self.pts = pts;
        self.dts = dts;
        self.frame_type = FrameType::empty();
        self.repeat_pict = 0;
    }

    /// The current payload.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.len]
    }

    /// Drop `n` leading payload bytes.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        self.offset += n;
        self.len -= n;
    }

    /// Reset to an empty payload, keeping the allocation.
    pub fn clear(&mut self) {
        self.offset = 0;
        self.len = 0;
    }
}

/// Configuration of the output video track.
#[derive(Debug, Clone)]
pub struct VideoTrackConfig {
    /// Codec of the encoder output.
    pub codec: VideoCodec,
    /// Coded width.
    pub width: u32,
    /// Coded height.
    pub height: u32,
    /// Output frame rate.
    pub fps: Rational,
    /// Whether the input is constant frame rate.
    pub cfr: bool,
    /// Whether the encoder emits PAFF field pairs.
    pub interlaced: bool,
    /// Number of B frames between references.
    pub b_frames: u32,
    /// Whether B frames are used as references.
    pub b_pyramid: bool,
    /// Time base of encoder output pts (the source time base for VFR
    /// input); `None` falls back to microseconds.
    pub input_time_base: Option<TimeBase>,
    /// pts of the first keyframe of the input.
    pub input_first_key_pts: i64,
}

/// Per-stream video state.
pub struct VideoTrack {
    /// Codec.
    pub codec: VideoCodec,
    /// Frame rate.
    pub fps: Rational,
    /// Whether output is PAFF field pairs.
    pub is_paff: bool,
    /// dts lead of pts introduced by frame reordering, in frames.
    pub b_frame_delay: i64,
    /// Whether the encoder provides no usable dts.
    pub dts_unavailable: bool,
    /// Monotonic dts counter in field units, used when the encoder gives
    /// no dts.
    pub next_fps_base_dts: i64,
    /// pts of the first keyframe of the input.
    pub input_first_key_pts: i64,
    /// Whether input is constant frame rate.
    pub cfr: bool,
    /// Input time base of delivered pts.
    pub input_time_base: TimeBase,
    /// Output stream index.
    pub out_stream_index: u32,
    /// Output stream time base.
    pub stream_time_base: TimeBase,
    /// Frame classifier, kept alive across access units.
    pub classifier: StreamClassifier,
    /// Container extradata, installed from the first access unit.
    pub extradata: Option<Extradata>,
}

impl VideoTrack {
    /// Build the track state for a container.
    ///
    /// Matroska video uses a 1/1000 time base; otherwise the stream ticks
    /// once per frame, twice per frame when interlaced.
    pub fn new(config: &VideoTrackConfig, container: ContainerFormat) -> Self {
        let mut b_frame_delay = i64::from(config.b_frames > 0);
        if b_frame_delay > 0 && config.codec == VideoCodec::H264 && config.b_pyramid {
            b_frame_delay += 1;
        }
        let mut stream_tb = if container.is_matroska() {
            Rational::new(1, 1000)
        } else {
            config.fps.recip()
        };
        if config.interlaced {
            stream_tb = stream_tb.div_int(2);
        }
        let stream_time_base = TimeBase(stream_tb);
        Self {
            codec: config.codec,
            fps: config.fps,
            is_paff: config.interlaced,
            b_frame_delay,
            dts_unavailable: false,
            next_fps_base_dts: 0,
            input_first_key_pts: config.input_first_key_pts,
            cfr: config.cfr,
            input_time_base: config.input_time_base.unwrap_or(TimeBase::MICROSECONDS),
            out_stream_index: 0,
            stream_time_base,
            classifier: StreamClassifier::new(config.codec, config.interlaced),
            extradata: None,
        }
    }

    /// Seed the synthesized-dts counter, in field units.
    pub fn init_dts_counter(&mut self) {
        self.next_fps_base_dts = -self.b_frame_delay * (1 + i64::from(self.is_paff));
    }

    /// Field time base: 1/fps, or 1/(2·fps) for PAFF.
    pub fn field_time_base(&self) -> TimeBase {
        TimeBase(self.fps.mul_int(1 + i64::from(self.is_paff)).recip())
    }

    /// Build the container packets of one access unit: one per frame, or
    /// one per field for PAFF input.
    pub fn packetize(&mut self, bs: &VideoBitstream) -> Vec<Packet> {
        let fps_tb = self.field_time_base();
        let input_tb = if self.cfr { fps_tb } else { self.input_time_base };
        let stream_tb = self.stream_time_base;
        let duration = fps_tb.convert(1, stream_tb);
        let first_key = if self.cfr { 0 } else { self.input_first_key_pts };
        let frame_pos = input_tb.convert(bs.pts - first_key, fps_tb);
        let base_pts = fps_tb.convert(frame_pos, stream_tb);

        let payload = bs.payload();
        let mut packets = Vec::with_capacity(1 + usize::from(self.is_paff));
        let mut consumed = 0usize;
        let mut field = 0i64;
        while consumed < payload.len() {
            let remaining = &payload[consumed..];
            let bytes = if self.is_paff {
                paff_field_length(remaining)
            } else {
                remaining.len()
            };
            let mut pkt = Packet::new(remaining[..bytes].to_vec());
            pkt.stream_index = self.out_stream_index;
            pkt.duration = Duration::new(duration, stream_tb);
            pkt.pts = Timestamp::new(
                base_pts + i64::from(self.is_paff) * field * duration,
                stream_tb,
            );
            let dts_value = match (self.dts_unavailable, bs.dts) {
                (false, Some(dts)) => {
                    let in_fields = TimeBase::MICROSECONDS.convert(dts, fps_tb);
                    fps_tb.convert(in_fields, stream_tb)
                        + i64::from(self.is_paff) * field * duration
                }
                _ => {
                    let dts = fps_tb.convert(self.next_fps_base_dts, stream_tb);
                    self.next_fps_base_dts += 1;
                    dts
                }
            };
            pkt.dts = Timestamp::new(dts_value, stream_tb);
            if field == 0 && bs.frame_type.contains(FrameType::IDR) {
                pkt.flags = PacketFlags::KEYFRAME;
            }
            packets.push(pkt);
            consumed += bytes;
            field += 1;
        }
        packets
    }

    /// Tag the frame type of a classified access unit.
    pub fn frame_type_of(&self, key_frame: bool, pict_type: PictureType) -> FrameType {
        let mut frame_type = FrameType::empty();
        if key_frame {
            frame_type |= FrameType::IDR | FrameType::I;
        }
        match pict_type {
            PictureType::I => frame_type |= FrameType::I,
            PictureType::P => frame_type |= FrameType::P,
            PictureType::B => frame_type |= FrameType::B,
            PictureType::Unknown => {}
        }
        frame_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(interlaced: bool) -> VideoTrackConfig {
        VideoTrackConfig {
            codec: VideoCodec::H264,
            width: 1920,
            height: 1080,
            fps: Rational::new(30, 1),
            cfr: true,
            interlaced,
            b_frames: 2,
            b_pyramid: false,
            input_time_base: None,
            input_first_key_pts: 0,
        }
    }

    #[test]
    fn test_bitstream_fill_grows_fourfold() {
        let mut bs = VideoBitstream::with_capacity(8);
        bs.fill(&[1u8; 100], 0, None);
        assert_eq!(bs.capacity(), 400);
        assert_eq!(bs.payload().len(), 100);
        // refill with a smaller payload keeps the allocation
        bs.fill(&[2u8; 10], 1, None);
        assert_eq!(bs.capacity(), 400);
        assert_eq!(bs.payload(), &[2u8; 10]);
    }

    #[test]
    fn test_bitstream_advance_elides_prefix() {
        let mut bs = VideoBitstream::with_capacity(16);
        bs.fill(&[9, 9, 9, 1, 2, 3], 0, None);
        bs.advance(3);
        assert_eq!(bs.payload(), &[1, 2, 3]);
    }

    #[test]
    fn test_matroska_timebase() {
        let track = VideoTrack::new(&config(false), ContainerFormat::Mkv);
        assert_eq!(track.stream_time_base, TimeBase::MILLISECONDS);
        let track = VideoTrack::new(&config(false), ContainerFormat::Mp4);
        assert_eq!(track.stream_time_base, TimeBase::new(1, 30));
        let track = VideoTrack::new(&config(true), ContainerFormat::Mp4);
        assert_eq!(track.stream_time_base, TimeBase::new(1, 60));
    }

    #[test]
    fn test_b_frame_delay() {
        let track = VideoTrack::new(&config(false), ContainerFormat::Mp4);
        assert_eq!(track.b_frame_delay, 1);
        let mut cfg = config(false);
        cfg.b_pyramid = true;
        let track = VideoTrack::new(&cfg, ContainerFormat::Mp4);
        assert_eq!(track.b_frame_delay, 2);
        cfg.b_frames = 0;
        cfg.b_pyramid = false;
        let track = VideoTrack::new(&cfg, ContainerFormat::Mp4);
        assert_eq!(track.b_frame_delay, 0);
    }

    #[test]
    fn test_dts_counter_seed() {
        let mut track = VideoTrack::new(&config(true), ContainerFormat::Mp4);
        track.init_dts_counter();
        assert_eq!(track.next_fps_base_dts, -2);
        let mut track = VideoTrack::new(&config(false), ContainerFormat::Mp4);
        track.init_dts_counter();
        assert_eq!(track.next_fps_base_dts, -1);
    }

    #[test]
    fn test_packetize_progressive() {
        let mut track = VideoTrack::new(&config(false), ContainerFormat::Mp4);
        track.dts_unavailable = true;
        track.init_dts_counter();
        let mut bs = VideoBitstream::with_capacity(64);
        bs.fill(&[0, 0, 1, 0x65, 0xAA], 0, None);
        bs.frame_type = FrameType::IDR | FrameType::I;
        let pkts = track.packetize(&bs);
        assert_eq!(pkts.len(), 1);
        assert_eq!(pkts[0].pts.value, 0);
        assert_eq!(pkts[0].dts.value, -1);
        assert!(pkts[0].is_keyframe());
        assert_eq!(pkts[0].duration.value, 1);

        // next frame advances the synthesized dts
        bs.fill(&[0, 0, 1, 0x41, 0xBB], 1, None);
        let pkts = track.packetize(&bs);
        assert_eq!(pkts[0].pts.value, 1);
        assert_eq!(pkts[0].dts.value, 0);
        assert!(!pkts[0].is_keyframe());
    }

    #[test]
    fn test_packetize_paff_two_fields() {
        let mut track = VideoTrack::new(&config(true), ContainerFormat::Mp4);
        track.dts_unavailable = true;
        track.init_dts_counter();
        let mut au = Vec::new();
        au.extend_from_slice(&[0, 0, 1, 0x65, 0xAA, 0xBB]);
        au.extend_from_slice(&[0, 0, 1, 0x65, 0xCC, 0xDD]);
        let mut bs = VideoBitstream::with_capacity(64);
        // pts in field units: frame T = 2 fields
        bs.fill(&au, 4, None);
        bs.frame_type = FrameType::IDR | FrameType::I;
        let pkts = track.packetize(&bs);
        assert_eq!(pkts.len(), 2);
        // stream tb is 1/60; each field lasts one tick
        assert_eq!(pkts[0].duration.value, 1);
        assert_eq!(pkts[1].duration.value, 1);
        assert_eq!(pkts[1].pts.value, pkts[0].pts.value + 1);
        // disjoint [pts, pts+duration) windows
        assert!(pkts[1].pts.value >= pkts[0].pts.value + pkts[0].duration.value);
        // only the first field is tagged as a keyframe
        assert!(pkts[0].is_keyframe());
        assert!(!pkts[1].is_keyframe());
        // dts advanced once per field
        assert_eq!(pkts[1].dts.value, pkts[0].dts.value + 1);
    }
}
