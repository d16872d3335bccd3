//! Container writer contract and bundled writers.
//!
//! The mux scheduler drives a [`ContainerWriter`]; concrete containers plug
//! in behind it. An Annex-B elementary-stream writer is bundled for raw
//! video output, and [`CaptureWriter`] records everything in memory for
//! inspection.

use crate::chapters::Chapter;
use crate::sink::ByteSink;
use muxpipe_core::error::{MuxError, Result};
use muxpipe_core::{
    AudioCodec, ContainerFormat, Packet, Rational, StreamType, SubtitleCodec, TimeBase, VideoCodec,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Video stream properties.
#[derive(Debug, Clone)]
pub struct VideoStreamDesc {
    /// Codec.
    pub codec: VideoCodec,
    /// Coded width.
    pub width: u32,
    /// Coded height.
    pub height: u32,
    /// Frame rate.
    pub frame_rate: Rational,
}

/// Audio stream properties.
#[derive(Debug, Clone)]
pub struct AudioStreamDesc {
    /// Codec.
    pub codec: AudioCodec,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u32,
    /// Fixed samples per packet (0 = variable).
    pub frame_size: usize,
}

/// Subtitle stream properties.
#[derive(Debug, Clone)]
pub struct SubtitleStreamDesc {
    /// Codec.
    pub codec: SubtitleCodec,
}

/// Stream-kind specific properties.
#[derive(Debug, Clone)]
pub enum StreamKind {
    /// A video stream.
    Video(VideoStreamDesc),
    /// An audio stream.
    Audio(AudioStreamDesc),
    /// A subtitle stream.
    Subtitle(SubtitleStreamDesc),
}

impl StreamKind {
    /// The coarse stream type.
    pub fn stream_type(&self) -> StreamType {
        match self {
            Self::Video(_) => StreamType::Video,
            Self::Audio(_) => StreamType::Audio,
            Self::Subtitle(_) => StreamType::Subtitle,
        }
    }
}

/// A stream registered with the container writer.
#[derive(Debug, Clone)]
pub struct StreamDesc {
    /// Kind-specific properties.
    pub kind: StreamKind,
    /// Packet time base of the stream.
    pub time_base: TimeBase,
    /// Codec configuration bytes, when already known at registration.
    pub extradata: Option<Vec<u8>>,
    /// Stream metadata key/value pairs.
    pub metadata: BTreeMap<String, String>,
    /// Whether the stream carries the default disposition.
    pub default_disposition: bool,
    /// Stream start time in `time_base` units.
    pub start_time: i64,
}

impl StreamDesc {
    /// A bare stream of the given kind and time base.
    pub fn new(kind: StreamKind, time_base: TimeBase) -> Self {
        Self {
            kind,
            time_base,
            extradata: None,
            metadata: BTreeMap::new(),
            default_disposition: false,
            start_time: 0,
        }
    }
}

/// The container writer the scheduler drives.
///
/// Header emission happens-before the first packet write; the scheduler
/// guarantees the ordering, the writer may assert it.
pub trait ContainerWriter: Send {
    /// The container format being written.
    fn format(&self) -> ContainerFormat;

    /// Register a stream, returning its index.
    fn add_stream(&mut self, desc: StreamDesc) -> Result<u32>;

    /// Attach the chapter list.
    fn set_chapters(&mut self, chapters: Vec<Chapter>);

    /// Attach container-level metadata.
    fn set_metadata(&mut self, metadata: BTreeMap<String, String>);

    /// Replace a stream's codec configuration before the header is written.
    fn update_extradata(&mut self, stream: u32, extradata: &[u8]) -> Result<()>;

    /// Write the container header.
    ///
    /// Every option key must be consumed; an unrecognized key fails with
    /// [`MuxError::UnknownOption`].
    fn write_header(&mut self, options: &[(String, String)]) -> Result<()>;

    /// Write one packet.
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Finalize the container.
    fn write_trailer(&mut self) -> Result<()>;
}

/// Elementary-stream writer: extradata followed by raw video payloads.
///
/// Produces `.h264`/`.hevc` style output; audio and subtitle streams are
/// rejected at registration.
pub struct AnnexBWriter<S: ByteSink> {
    sink: S,
    video_stream: Option<u32>,
    next_index: u32,
    extradata: Vec<u8>,
    header_written: bool,
}

impl<S: ByteSink> AnnexBWriter<S> {
    /// Create a writer over a sink.
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            video_stream: None,
            next_index: 0,
            extradata: Vec::new(),
            header_written: false,
        }
    }

    /// Take the sink back.
    pub fn into_sink(self) -> S {
        self.sink
    }
}

impl<S: ByteSink> ContainerWriter for AnnexBWriter<S> {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Raw
    }

    fn add_stream(&mut self, desc: StreamDesc) -> Result<u32> {
        match desc.kind {
            StreamKind::Video(_) => {
                if self.video_stream.is_some() {
                    return Err(MuxError::StreamConfig(
                        "elementary stream output takes a single video stream".into(),
                    )
                    .into());
                }
                if let Some(extra) = desc.extradata {
                    self.extradata = extra;
                }
                let index = self.next_index;
                self.video_stream = Some(index);
                self.next_index += 1;
                Ok(index)
            }
            _ => Err(MuxError::StreamConfig(
                "elementary stream output carries video only".into(),
            )
            .into()),
        }
    }

    fn set_chapters(&mut self, _chapters: Vec<Chapter>) {}

    fn set_metadata(&mut self, _metadata: BTreeMap<String, String>) {}

    fn update_extradata(&mut self, _stream: u32, extradata: &[u8]) -> Result<()> {
        self.extradata = extradata.to_vec();
        Ok(())
    }

    fn write_header(&mut self, options: &[(String, String)]) -> Result<()> {
        if let Some((key, _)) = options.first() {
            return Err(MuxError::UnknownOption(key.clone()).into());
        }
        self.sink
            .write(&self.extradata)
            .map_err(|e| MuxError::HeaderWrite(e.to_string()))?;
        self.header_written = true;
        Ok(())
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        debug_assert!(self.header_written);
        if Some(packet.stream_index) != self.video_stream {
            return Ok(());
        }
        self.sink
            .write(&packet.data)
            .map_err(|e| MuxError::PacketWrite(e.to_string()))?;
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.sink
            .flush()
            .map_err(|e| MuxError::TrailerWrite(e.to_string()))?;
        Ok(())
    }
}

/// Everything a [`CaptureWriter`] has recorded.
#[derive(Default)]
pub struct CaptureLog {
    /// Registered streams.
    pub streams: Vec<StreamDesc>,
    /// Written packets, in write order.
    pub packets: Vec<Packet>,
    /// Options passed at header time.
    pub header_options: Vec<(String, String)>,
    /// Attached chapters.
    pub chapters: Vec<Chapter>,
    /// Container metadata.
    pub metadata: BTreeMap<String, String>,
    /// Whether the header has been written.
    pub header_written: bool,
    /// Whether the trailer has been written.
    pub trailer_written: bool,
}

impl CaptureLog {
    /// The packets of one stream.
    pub fn packets_for(&self, stream: u32) -> Vec<&Packet> {
        self.packets
            .iter()
            .filter(|p| p.stream_index == stream)
            .collect()
    }
}

/// In-memory writer recording streams, packets and header state.
///
/// The log lives behind a shared handle so it stays inspectable after the
/// writer moved into the muxer.
pub struct CaptureWriter {
    format: ContainerFormat,
    accepted_options: Vec<&'static str>,
    log: Arc<Mutex<CaptureLog>>,
}

impl CaptureWriter {
    /// Create a capture writer for a format.
    pub fn new(format: ContainerFormat) -> Self {
        Self {
            format,
            accepted_options: vec!["brand", "movflags"],
            log: Arc::new(Mutex::new(CaptureLog::default())),
        }
    }

    /// A handle onto the recording.
    pub fn log(&self) -> Arc<Mutex<CaptureLog>> {
        Arc::clone(&self.log)
    }
}

impl ContainerWriter for CaptureWriter {
    fn format(&self) -> ContainerFormat {
        self.format
    }

    fn add_stream(&mut self, desc: StreamDesc) -> Result<u32> {
        let mut log = self.log.lock();
        log.streams.push(desc);
        Ok(log.streams.len() as u32 - 1)
    }

    fn set_chapters(&mut self, chapters: Vec<Chapter>) {
        self.log.lock().chapters = chapters;
    }

    fn set_metadata(&mut self, metadata: BTreeMap<String, String>) {
        self.log.lock().metadata = metadata;
    }

    fn update_extradata(&mut self, stream: u32, extradata: &[u8]) -> Result<()> {
        let mut log = self.log.lock();
        let desc = log
            .streams
            .get_mut(stream as usize)
            .ok_or(MuxError::UnknownTrack {
                track: stream as i32,
            })?;
        desc.extradata = Some(extradata.to_vec());
        Ok(())
    }

    fn write_header(&mut self, options: &[(String, String)]) -> Result<()> {
        for (key, _) in options {
            if !self.accepted_options.contains(&key.as_str()) {
                return Err(MuxError::UnknownOption(key.clone()).into());
            }
        }
        let mut log = self.log.lock();
        log.header_options = options.to_vec();
        log.header_written = true;
        Ok(())
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let mut log = self.log.lock();
        debug_assert!(log.header_written, "packet before header");
        log.packets.push(packet.clone());
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.log.lock().trailer_written = true;
        Ok(())
    }
}
