//! Input source contract.
//!
//! The reader side the muxer consumes: an encoded-video header for
//! parser-fed decoder setup, stream geometry, trim parameters and raw
//! packets.

use muxpipe_core::error::Result;
use muxpipe_core::{Packet, Rational, TrimList, VideoCodec};

/// Geometry and timing of the input video.
#[derive(Debug, Clone, Copy)]
pub struct InputInfo {
    /// Coded width.
    pub width: u32,
    /// Coded height.
    pub height: u32,
    /// Frame rate.
    pub fps: Rational,
    /// Total frame count, when known (0 = unknown).
    pub frames: u64,
}

/// A packet-producing input the mux pipeline reads from.
pub trait InputSource: Send {
    /// The input video codec, when the source carries encoded video.
    fn input_codec(&self) -> Option<VideoCodec>;

    /// The codec header bytes (parameter sets) for decoder initialization.
    fn header(&mut self) -> Result<Vec<u8>>;

    /// The active trim parameters.
    fn trim(&self) -> &TrimList;

    /// Replace the trim parameters; `offset` shifts every range by a frame
    /// count.
    fn set_trim(&mut self, trim: TrimList, offset: i64);

    /// Input stream geometry.
    fn input_info(&self) -> InputInfo;

    /// Read the next packet; `None` at end of stream.
    fn read_packet(&mut self) -> Result<Option<Packet>>;
}
