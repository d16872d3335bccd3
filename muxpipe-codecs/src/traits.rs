//! Common codec component traits.
//!
//! The mux pipeline drives decoders, encoders, filters and bitstream
//! filters through these traits. Components are stateful: `decode`/`encode`
//! may buffer internally and release data on later calls or on `flush`.

use muxpipe_core::{
    AudioCodec, ChannelLayout, Packet, Result, SampleBuf, SampleFormat, SubtitleCodec, TimeBase,
    Timestamp,
};

/// Information about a codec component.
#[derive(Debug, Clone)]
pub struct CodecInfo {
    /// Codec name.
    pub name: &'static str,
    /// Long name/description.
    pub long_name: &'static str,
}

/// Audio stream parameters as seen at one point of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    /// Codec identifier.
    pub codec: AudioCodec,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel layout.
    pub layout: ChannelLayout,
    /// Sample format.
    pub format: SampleFormat,
    /// Bits per raw sample as declared by the source (0 = unknown).
    pub bits_per_raw_sample: u8,
    /// Samples per packet when the codec has a fixed frame size (0 = none).
    pub frame_size: usize,
    /// Time base of packets on this stream.
    pub time_base: TimeBase,
}

impl AudioParams {
    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.layout.channels().max(1)
    }
}

/// Common trait for audio decoders.
pub trait AudioDecoder: Send {
    /// Get codec information.
    fn codec_info(&self) -> CodecInfo;

    /// Output parameters of decoded buffers.
    fn output_params(&self) -> AudioParams;

    /// Set codec-specific configuration (e.g. AudioSpecificConfig for AAC).
    fn set_extra_data(&mut self, data: &[u8]) -> Result<()>;

    /// Decode a packet into zero or more sample buffers.
    fn decode(&mut self, packet: &Packet) -> Result<Vec<SampleBuf>>;

    /// Flush the decoder, returning any buffered samples.
    fn flush(&mut self) -> Result<Vec<SampleBuf>>;
}

/// Common trait for audio encoders.
pub trait AudioEncoder: Send {
    /// Get codec information.
    fn codec_info(&self) -> CodecInfo;

    /// Input parameters the encoder was opened with.
    fn input_params(&self) -> AudioParams;

    /// Samples the encoder requires per submitted buffer (0 = any count).
    fn frame_size(&self) -> usize;

    /// Sample rates the encoder supports, if restricted.
    fn supported_sample_rates(&self) -> Option<&[u32]> {
        None
    }

    /// Channel layouts the encoder supports, if restricted.
    fn supported_layouts(&self) -> Option<&[ChannelLayout]> {
        None
    }

    /// Sample formats the encoder supports, if restricted.
    fn supported_formats(&self) -> Option<&[SampleFormat]> {
        None
    }

    /// Encode one sample buffer into zero or more packets.
    ///
    /// Returned packets carry their duration in samples of the encoder's
    /// rate; the mux stage stamps pts/dts.
    fn encode(&mut self, frame: &SampleBuf) -> Result<Vec<Packet>>;

    /// Flush the encoder, returning any buffered packets.
    fn flush(&mut self) -> Result<Vec<Packet>>;

    /// Codec-specific configuration bytes, once known.
    fn extra_data(&self) -> Option<&[u8]>;
}

/// Common trait for audio filters.
///
/// Filters run between decode and resample, one frame in, zero or more
/// frames out.
pub trait AudioFilter: Send {
    /// Filter name for diagnostics.
    fn name(&self) -> &str;

    /// Process one frame.
    fn process(&mut self, frame: SampleBuf) -> Result<Vec<SampleBuf>>;

    /// Flush any buffered frames.
    fn flush(&mut self) -> Result<Vec<SampleBuf>>;
}

/// One rendered region of a decoded subtitle event.
#[derive(Debug, Clone)]
pub enum SubtitleRect {
    /// Plain text.
    Text(String),
    /// An ASS dialogue event line.
    Ass(String),
    /// An opaque bitmap region (e.g. DVB, PGS).
    Bitmap(Vec<u8>),
}

/// A decoded subtitle event.
#[derive(Debug, Clone)]
pub struct SubtitleEvent {
    /// Presentation time of the event.
    pub pts: Timestamp,
    /// Display start offset in milliseconds relative to `pts`.
    pub start_display_ms: u32,
    /// Display end offset in milliseconds relative to `pts`.
    pub end_display_ms: u32,
    /// Rendered regions. An empty list clears the display.
    pub rects: Vec<SubtitleRect>,
}

/// Common trait for subtitle decoders.
pub trait SubtitleDecoder: Send {
    /// Get codec information.
    fn codec_info(&self) -> CodecInfo;

    /// Decode one packet into an event, if the packet completes one.
    fn decode(&mut self, packet: &Packet) -> Result<Option<SubtitleEvent>>;
}

/// Common trait for subtitle encoders.
pub trait SubtitleEncoder: Send {
    /// Get codec information.
    fn codec_info(&self) -> CodecInfo;

    /// The codec this encoder produces.
    fn codec(&self) -> SubtitleCodec;

    /// Encode an event into a packet payload.
    fn encode(&mut self, event: &SubtitleEvent) -> Result<Vec<u8>>;
}

/// Outcome of feeding a packet through a bitstream filter.
#[derive(Debug)]
pub enum BsfOutcome {
    /// A transformed packet is ready.
    Packet(Packet),
    /// The filter needs more input; nothing to emit for this packet.
    Again,
}

/// A stream-level bitstream filter (e.g. AAC ADTS to ASC).
pub trait BitstreamFilter: Send {
    /// Filter name for diagnostics.
    fn name(&self) -> &str;

    /// Run the filter on one packet.
    fn filter(&mut self, packet: Packet) -> Result<BsfOutcome>;

    /// Extradata recovered by the filter, once known.
    fn extra_data(&self) -> Option<&[u8]>;
}
