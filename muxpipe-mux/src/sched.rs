//! The mux scheduler.
//!
//! Up to three worker threads drain typed queues: audio process, audio
//! encode and output. The output thread interleaves the audio-out and video
//! queues under a dts window, with forced-progress rules so a track that
//! ends early or starts late cannot stall the pipeline. A payload-less
//! `Flush` sentinel propagates through the stages at end of stream; each
//! stage drains its caches before forwarding it.

use crate::header::HeaderCoordinator;
use crate::queue::{Event, PktQueue, QueueStats};
use crate::video::{VideoBitstream, VideoTrack, LARGE_FRAME_BYTES};
use crate::writer::ContainerWriter;
use muxpipe_audio::{AudioProcessor, StageOut};
use muxpipe_codecs::AudioEncoder;
use muxpipe_core::error::{Error, Result};
use muxpipe_core::{
    Duration, Packet, PacketFlags, Rational, SampleBuf, TimeBase, Timestamp, TimestampAdjuster,
};
use muxpipe_nal::Extradata;
use muxpipe_subtitle::SubtitleProcessor;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Iterations one queue may poll empty before the other side stops waiting
/// for it.
const FORCE_PROGRESS_ITERATIONS: u32 = 32;

/// Floor of the inter-track dts window.
const DTS_WINDOW_MIN_US: i64 = 250_000;

/// Timed wait while both queues sit under half capacity.
const EVENT_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(16);

/// Which worker threads to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadPolicy {
    /// Run the output thread.
    pub output: bool,
    /// Run the audio process thread (requires `output`).
    pub audio_process: bool,
    /// Run the audio encode thread (requires `audio_process`).
    pub audio_encode: bool,
}

impl Default for ThreadPolicy {
    fn default() -> Self {
        Self {
            output: true,
            audio_process: false,
            audio_encode: false,
        }
    }
}

impl ThreadPolicy {
    /// Run everything on the caller's thread.
    pub fn synchronous() -> Self {
        Self {
            output: false,
            audio_process: false,
            audio_encode: false,
        }
    }

    /// Drop dependent threads whose prerequisites are disabled.
    pub fn normalized(mut self) -> Self {
        if !self.output {
            self.audio_process = false;
        }
        if !self.audio_process {
            self.audio_encode = false;
        }
        self
    }
}

/// A record travelling between scheduler stages.
///
/// The packet/frame tag is preserved across queue hops; stages convert
/// between the variants.
pub enum MuxData {
    /// A raw audio packet headed for the process stage.
    Audio {
        /// Track slot.
        track: usize,
        /// The packet.
        pkt: Packet,
    },
    /// A raw subtitle packet; rides the audio queues to keep ordering.
    Subtitle {
        /// Subtitle track slot.
        track: usize,
        /// The packet.
        pkt: Packet,
    },
    /// A staged frame headed for the encode stage.
    AudioFrame {
        /// Track slot.
        track: usize,
        /// Chain ordinal.
        chain: usize,
        /// The frame.
        frame: SampleBuf,
    },
    /// An encoded (or pass-through) packet headed for output stamping.
    AudioOut {
        /// Track slot.
        track: usize,
        /// Chain ordinal.
        chain: usize,
        /// The packet.
        pkt: Packet,
        /// Sample count at the chain's stamping rate.
        samples: i64,
    },
    /// Delay discovered mid-stream, applied at the output stage.
    Delay {
        /// Track slot.
        track: usize,
        /// Chain ordinal.
        chain: usize,
        /// Samples to add.
        samples: i64,
    },
    /// End-of-stream sentinel.
    Flush,
}

/// State shared between the scheduler's threads.
pub struct MuxShared {
    /// Raw packets toward the process stage.
    pub q_process: PktQueue<MuxData>,
    /// Frames toward the encode stage.
    pub q_encode: PktQueue<MuxData>,
    /// Stamped/ready records toward the output stage.
    pub q_audio_out: PktQueue<MuxData>,
    /// Encoded video buffers toward the output stage.
    pub q_video: PktQueue<VideoBitstream>,
    /// Free-list for I-frame sized buffers.
    pub free_i: PktQueue<VideoBitstream>,
    /// Free-list for P/B-frame sized buffers.
    pub free_pb: PktQueue<VideoBitstream>,
    /// Packet-added events per stage.
    pub ev_proc_added: Event,
    /// Packet-added event of the encode stage.
    pub ev_enc_added: Event,
    /// Packet-added event of the output stage.
    pub ev_out_added: Event,
    /// Closing-acknowledged events per stage.
    pub ev_proc_closing: Event,
    /// Closing event of the encode stage.
    pub ev_enc_closing: Event,
    /// Closing event of the output stage.
    pub ev_out_closing: Event,
    /// Abort flags per stage.
    pub abort_proc: AtomicBool,
    /// Abort flag of the encode stage.
    pub abort_enc: AtomicBool,
    /// Abort flag of the output stage.
    pub abort_out: AtomicBool,
    /// Whether the container header has been written.
    pub header_written: Arc<AtomicBool>,
    /// Monotonic fatal-error latch; once set every stage drains.
    pub stream_error: AtomicBool,
    /// The container writer handed back after the output worker exits.
    pub writer_return: Mutex<Option<Box<dyn ContainerWriter>>>,
}

impl MuxShared {
    /// Allocate shared state sized for the stream mix.
    pub fn new(audio_streams: usize, fps: Option<Rational>) -> Self {
        let video_capacity = fps
            .map(|f| (f.to_f64() * 4.0) as usize)
            .unwrap_or(0)
            .max(64);
        let audio_capacity = 256 * audio_streams.max(1);
        Self {
            q_process: PktQueue::new(512),
            q_encode: PktQueue::new(512),
            q_audio_out: PktQueue::new(audio_capacity),
            q_video: PktQueue::new(video_capacity),
            free_i: PktQueue::new(256),
            free_pb: PktQueue::new(3840),
            ev_proc_added: Event::new(),
            ev_enc_added: Event::new(),
            ev_out_added: Event::new(),
            ev_proc_closing: Event::new(),
            ev_enc_closing: Event::new(),
            ev_out_closing: Event::new(),
            abort_proc: AtomicBool::new(false),
            abort_enc: AtomicBool::new(false),
            abort_out: AtomicBool::new(false),
            header_written: Arc::new(AtomicBool::new(false)),
            stream_error: AtomicBool::new(false),
            writer_return: Mutex::new(None),
        }
    }

    /// Whether the header has been written.
    pub fn header_written(&self) -> bool {
        self.header_written.load(Ordering::Acquire)
    }

    /// Whether the fatal latch is set.
    pub fn stream_error(&self) -> bool {
        self.stream_error.load(Ordering::Acquire)
    }

    /// Set the fatal latch.
    pub fn latch_stream_error(&self) {
        self.stream_error.store(true, Ordering::Release);
    }

    /// Grab a recycled video buffer fitting `payload_len`, or allocate one.
    pub fn take_video_buffer(&self, payload_len: usize) -> VideoBitstream {
        let pool = if payload_len > LARGE_FRAME_BYTES {
            &self.free_i
        } else {
            &self.free_pb
        };
        match pool.pop() {
            Some(buf) if buf.capacity() >= payload_len => buf,
            _ => VideoBitstream::with_capacity(payload_len * 4),
        }
    }

    /// Return a drained video buffer to its size-classed free list.
    pub fn recycle_video_buffer(&self, mut buf: VideoBitstream) {
        let pool = if buf.len > LARGE_FRAME_BYTES {
            &self.free_i
        } else {
            &self.free_pb
        };
        buf.clear();
        pool.push(buf);
    }
}

/// Per-output-stream stamping state of one audio chain.
pub struct AudioOutState {
    /// Output stream index.
    pub stream_index: u32,
    /// Output stream time base.
    pub time_base: TimeBase,
    /// Stamping sample rate.
    pub sample_rate: u32,
    /// Samples written so far.
    pub samples_out: i64,
    /// Leading delay in samples.
    pub delay_samples: i64,
    /// pts of the previous written packet, in stream time base units.
    pub last_pts_out: i64,
}

/// Encoder bank of the encode stage: one optional encoder per chain.
pub struct EncodeBank {
    encoders: Vec<Vec<Option<Box<dyn AudioEncoder>>>>,
    rates: Vec<Vec<u32>>,
    encode_error: Vec<bool>,
}

impl EncodeBank {
    /// Build the bank from per-track encoder lists.
    pub fn new(encoders: Vec<Vec<Option<Box<dyn AudioEncoder>>>>) -> Self {
        let rates = encoders
            .iter()
            .map(|track| {
                track
                    .iter()
                    .map(|e| e.as_ref().map_or(0, |e| e.input_params().sample_rate))
                    .collect()
            })
            .collect();
        let encode_error = vec![false; encoders.len()];
        Self {
            encoders,
            rates,
            encode_error,
        }
    }

    /// Encode one frame; an encoder failure latches only its track.
    pub fn encode(&mut self, track: usize, chain: usize, frame: &SampleBuf) -> Vec<(Packet, i64)> {
        if self.encode_error[track] {
            return Vec::new();
        }
        let Some(encoder) = self.encoders[track][chain].as_mut() else {
            // chain without an encoder: the frame is already payload
            let mut pkt = Packet::new(frame_bytes(frame));
            pkt.duration = frame.duration();
            let samples = frame.num_samples() as i64;
            return vec![(pkt, samples)];
        };
        match encoder.encode(frame) {
            Ok(packets) => self.stamp_samples(track, chain, packets),
            Err(err) => {
                warn!(track, "audio encode failed: {err}");
                self.encode_error[track] = true;
                Vec::new()
            }
        }
    }

    /// Drain every encoder.
    pub fn flush(&mut self) -> Vec<(usize, usize, Packet, i64)> {
        let mut out = Vec::new();
        for track in 0..self.encoders.len() {
            if self.encode_error[track] {
                continue;
            }
            for chain in 0..self.encoders[track].len() {
                let Some(encoder) = self.encoders[track][chain].as_mut() else {
                    continue;
                };
                match encoder.flush() {
                    Ok(packets) => {
                        for (pkt, samples) in self.stamp_samples(track, chain, packets) {
                            out.push((track, chain, pkt, samples));
                        }
                    }
                    Err(err) => {
                        warn!(track, "audio encoder flush failed: {err}");
                        self.encode_error[track] = true;
                    }
                }
            }
        }
        out
    }

    fn stamp_samples(
        &self,
        track: usize,
        chain: usize,
        packets: Vec<Packet>,
    ) -> Vec<(Packet, i64)> {
        let rate = self.rates[track][chain].max(1);
        packets
            .into_iter()
            .map(|pkt| {
                let samples = pkt.duration.rescale(TimeBase::per_sample(rate)).value;
                (pkt, samples)
            })
            .collect()
    }
}

/// Serialize a frame's planes into one contiguous payload.
fn frame_bytes(frame: &SampleBuf) -> Vec<u8> {
    let mut out = Vec::new();
    for plane in frame.planes() {
        out.extend_from_slice(plane);
    }
    out
}

/// The audio front half: processors plus the pre-header head buffer.
pub struct AudioFront {
    /// One processor per audio track.
    pub processors: Vec<AudioProcessor>,
    head: Vec<MuxData>,
    header_written: Arc<AtomicBool>,
}

impl AudioFront {
    /// Wrap the processors.
    pub fn new(processors: Vec<AudioProcessor>, header_written: Arc<AtomicBool>) -> Self {
        Self {
            processors,
            head: Vec::new(),
            header_written,
        }
    }

    /// Run one record through the front half.
    ///
    /// Before the header is written, packets park in the head buffer; once
    /// the flag flips they are released in arrival order ahead of the
    /// current record.
    pub fn handle(&mut self, item: MuxData) -> Result<Vec<MuxData>> {
        let header_written = self.header_written.load(Ordering::Acquire);
        if !header_written {
            match item {
                item @ (MuxData::Audio { .. } | MuxData::Subtitle { .. }) => {
                    self.head.push(item);
                    return Ok(Vec::new());
                }
                other => return self.handle_now(other),
            }
        }
        let mut out = Vec::new();
        if !self.head.is_empty() {
            for buffered in std::mem::take(&mut self.head) {
                out.extend(self.handle_now(buffered)?);
            }
        }
        out.extend(self.handle_now(item)?);
        Ok(out)
    }

    fn handle_now(&mut self, item: MuxData) -> Result<Vec<MuxData>> {
        match item {
            MuxData::Audio { track, pkt } => {
                let outs = self.processors[track].process_packet(pkt)?;
                Ok(outs.into_iter().map(|o| lift_stage_out(track, o)).collect())
            }
            MuxData::Flush => {
                let mut out = Vec::new();
                for track in 0..self.processors.len() {
                    let outs = self.processors[track].flush()?;
                    out.extend(outs.into_iter().map(|o| lift_stage_out(track, o)));
                }
                out.push(MuxData::Flush);
                Ok(out)
            }
            other => Ok(vec![other]),
        }
    }
}

fn lift_stage_out(track: usize, out: StageOut) -> MuxData {
    match out {
        StageOut::Frame { chain, frame } => MuxData::AudioFrame {
            track,
            chain,
            frame,
        },
        StageOut::Packet { chain, pkt, samples } => MuxData::AudioOut {
            track,
            chain,
            pkt,
            samples,
        },
        StageOut::Delay { chain, samples } => MuxData::Delay {
            track,
            chain,
            samples,
        },
    }
}

/// Apply the encode bank to a batch of records, turning frames into
/// ready-to-stamp packets and draining the bank on `Flush`.
pub fn apply_bank(bank: &mut EncodeBank, items: Vec<MuxData>) -> Vec<MuxData> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            MuxData::AudioFrame { track, chain, frame } => {
                for (pkt, samples) in bank.encode(track, chain, &frame) {
                    if samples > 0 {
                        out.push(MuxData::AudioOut {
                            track,
                            chain,
                            pkt,
                            samples,
                        });
                    }
                }
            }
            MuxData::Flush => {
                for (track, chain, pkt, samples) in bank.flush() {
                    if samples > 0 {
                        out.push(MuxData::AudioOut {
                            track,
                            chain,
                            pkt,
                            samples,
                        });
                    }
                }
                out.push(MuxData::Flush);
            }
            other => out.push(other),
        }
    }
    out
}

/// The output stage: the only owner of the container writer after header
/// time.
pub struct OutputStage {
    /// The container writer.
    pub writer: Box<dyn ContainerWriter>,
    /// Video track state.
    pub video: Option<VideoTrack>,
    /// Subtitle processors.
    pub subtitles: Vec<SubtitleProcessor>,
    /// Per-subtitle first-keyframe pts adjustment, in the subtitle input
    /// time base.
    pub subtitle_pts_adjust: Vec<i64>,
    /// Stamping state per audio track and chain.
    pub audio_out: Vec<Vec<AudioOutState>>,
    /// Trim mapping shared by every stage.
    pub adjuster: TimestampAdjuster,
    /// Header coordination.
    pub header: HeaderCoordinator,
    shared: Arc<MuxShared>,
}

impl OutputStage {
    /// Assemble the output stage.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        writer: Box<dyn ContainerWriter>,
        video: Option<VideoTrack>,
        subtitles: Vec<SubtitleProcessor>,
        subtitle_pts_adjust: Vec<i64>,
        audio_out: Vec<Vec<AudioOutState>>,
        adjuster: TimestampAdjuster,
        header: HeaderCoordinator,
        shared: Arc<MuxShared>,
    ) -> Self {
        Self {
            writer,
            video,
            subtitles,
            subtitle_pts_adjust,
            audio_out,
            adjuster,
            header,
            shared,
        }
    }

    /// Write one encoded video access unit; returns the last written dts in
    /// microseconds.
    ///
    /// The first access unit installs extradata and triggers the deferred
    /// header write.
    pub fn write_video(&mut self, bs: &mut VideoBitstream) -> Result<i64> {
        let video = self
            .video
            .as_mut()
            .ok_or_else(|| Error::Config("video packet without a video track".into()))?;

        let info = video.classifier.classify(bs.payload());
        bs.frame_type = video.frame_type_of(info.key_frame, info.pict_type);
        bs.structure = info.structure;
        bs.repeat_pict = info.repeat_pict;

        let aud_len = leading_aud_len(video.codec, bs.payload());
        if aud_len > 0 {
            bs.advance(aud_len);
        }

        if !self.header.is_written() {
            if bs.dts.is_none() {
                video.dts_unavailable = true;
            }
            let extradata = Extradata::from_access_unit(video.codec, bs.payload())
                .map_err(|err| {
                    self.shared.latch_stream_error();
                    err
                })?;
            video.extradata = Some(extradata);
            if video.dts_unavailable {
                video.init_dts_counter();
            }
            let result = self
                .header
                .write_header(self.writer.as_mut(), video.extradata.as_ref());
            if let Err(err) = result {
                self.shared.latch_stream_error();
                return Err(err);
            }
        }

        let mut dts_us = i64::MIN;
        for pkt in video.packetize(bs) {
            dts_us = pkt.dts.rescale(TimeBase::MICROSECONDS).value;
            self.write_packet_checked(&pkt)?;
        }
        Ok(dts_us)
    }

    /// Stamp and write one processed audio packet; returns its dts in
    /// microseconds.
    pub fn write_audio(
        &mut self,
        track: usize,
        chain: usize,
        mut pkt: Packet,
        samples: i64,
    ) -> Result<i64> {
        if samples <= 0 {
            return Ok(i64::MIN);
        }
        if !self.header.is_written() {
            warn!(track, "dropping audio packet: no header was ever written");
            return Ok(i64::MIN);
        }
        let state = &mut self.audio_out[track][chain];
        let rate_tb = TimeBase::per_sample(state.sample_rate);
        pkt.stream_index = state.stream_index;
        pkt.flags = PacketFlags::KEYFRAME;
        let dts = rate_tb.convert(state.samples_out + state.delay_samples, state.time_base);
        pkt.dts = Timestamp::new(dts, state.time_base);
        pkt.pts = pkt.dts;
        let mut duration = rate_tb.convert(samples, state.time_base);
        if duration == 0 {
            duration = dts - state.last_pts_out;
        }
        pkt.duration = Duration::new(duration, state.time_base);
        state.last_pts_out = dts;
        let dts_us = state.time_base.convert(dts, TimeBase::MICROSECONDS);
        state.samples_out += samples;
        self.write_packet_checked(&pkt)?;
        Ok(dts_us)
    }

    /// Run one subtitle packet through its track and write the results.
    pub fn write_subtitle(&mut self, track: usize, pkt: Packet) -> Result<()> {
        if !self.header.is_written() {
            warn!(track, "dropping subtitle packet: no header was ever written");
            return Ok(());
        }
        let adjust = self.subtitle_pts_adjust[track];
        let packets = self.subtitles[track].process(pkt, &self.adjuster, adjust)?;
        for pkt in packets {
            self.write_packet_checked(&pkt)?;
        }
        Ok(())
    }

    /// Grow a chain's leading delay.
    pub fn apply_delay(&mut self, track: usize, chain: usize, samples: i64) {
        self.audio_out[track][chain].delay_samples += samples;
    }

    /// Write the trailer unless the fatal latch is set.
    pub fn finalize(&mut self) -> Result<()> {
        if self.shared.stream_error() {
            warn!("stream error latched; leaving partial file without trailer");
            return Ok(());
        }
        self.writer.write_trailer()
    }

    fn write_packet_checked(&mut self, pkt: &Packet) -> Result<()> {
        if let Err(err) = self.writer.write_packet(pkt) {
            self.shared.latch_stream_error();
            return Err(err);
        }
        Ok(())
    }
}

/// Byte length of a leading access-unit delimiter, 0 when absent.
fn leading_aud_len(codec: muxpipe_core::VideoCodec, payload: &[u8]) -> usize {
    match codec {
        muxpipe_core::VideoCodec::H264 => muxpipe_nal::h264::parse_nal_units(payload)
            .first()
            .filter(|n| n.unit_type == muxpipe_nal::h264::NaluType::Aud)
            .map_or(0, |n| n.nal.size),
        muxpipe_core::VideoCodec::H265 => muxpipe_nal::hevc::parse_nal_units(payload)
            .first()
            .filter(|n| n.unit_type == muxpipe_nal::hevc::NaluType::Aud)
            .map_or(0, |n| n.nal.size),
    }
}

/// Interleaving state of the output loop.
pub struct InterleaveState {
    /// Last written audio dts in microseconds; -1 means "don't wait for
    /// audio", `i64::MAX` means no audio exists.
    pub audio_dts: i64,
    /// Last written video dts, same conventions.
    pub video_dts: i64,
    wait_audio: u32,
    wait_video: u32,
    aud_packets_per_sec: i64,
    dts_window_us: i64,
    video_watermark: usize,
    audio_watermark: usize,
}

impl InterleaveState {
    /// Initialize for the stream mix.
    pub fn new(
        has_audio: bool,
        has_video: bool,
        fps: Option<Rational>,
        video_capacity: usize,
        audio_capacity: usize,
    ) -> Self {
        let four_frames_us = fps
            .map(|f| TimeBase(f.recip()).convert(4, TimeBase::MICROSECONDS))
            .unwrap_or(0);
        Self {
            audio_dts: if has_audio { -1 } else { i64::MAX },
            video_dts: if has_video { -1 } else { i64::MAX },
            wait_audio: 0,
            wait_video: 0,
            aud_packets_per_sec: 64,
            dts_window_us: four_frames_us.max(DTS_WINDOW_MIN_US),
            video_watermark: video_capacity.min(3072).saturating_sub(32),
            audio_watermark: audio_capacity.min(6144).saturating_sub(32),
        }
    }

    /// Whether audio may be written given the current video progress.
    fn audio_in_window(&self) -> bool {
        self.video_dts < 0 || self.audio_dts <= self.video_dts.saturating_add(self.dts_window_us)
    }

    /// Whether video may be written given the current audio progress.
    fn video_in_window(&self) -> bool {
        self.audio_dts < 0 || self.video_dts <= self.audio_dts.saturating_add(self.dts_window_us)
    }
}

/// The output worker: interleaves the audio-out and video queues into the
/// container writer.
///
/// When no audio process thread runs, the worker also owns the audio front
/// and encode bank and processes raw packets inline.
pub struct OutputWorker {
    /// Shared scheduler state.
    pub shared: Arc<MuxShared>,
    /// The output stage.
    pub out: OutputStage,
    /// Inline audio processing, present when no process thread runs.
    pub inline_front: Option<AudioFront>,
    /// Inline encode bank, present when no encode thread runs upstream.
    pub inline_bank: Option<EncodeBank>,
    /// Interleaving state.
    pub state: InterleaveState,
}

impl OutputWorker {
    /// Handle one record popped from the audio-out queue.
    pub fn write_item(&mut self, item: MuxData) {
        // inline mode runs the front half and encoder right here
        let items = match (&mut self.inline_front, item) {
            (
                Some(front),
                item @ (MuxData::Audio { .. } | MuxData::Subtitle { .. } | MuxData::Flush),
            ) => {
                match front.handle(item) {
                    Ok(items) => match &mut self.inline_bank {
                        Some(bank) => apply_bank(bank, items),
                        None => items,
                    },
                    Err(err) => {
                        warn!("audio stage failed: {err}");
                        self.shared.latch_stream_error();
                        Vec::new()
                    }
                }
            }
            (_, item) => vec![item],
        };

        for item in items {
            match item {
                MuxData::AudioOut {
                    track,
                    chain,
                    pkt,
                    samples,
                } => {
                    self.adapt_audio_capacity(track, chain, samples);
                    match self.out.write_audio(track, chain, pkt, samples) {
                        Ok(dts) if dts != i64::MIN => {
                            self.state.audio_dts = self.state.audio_dts.max(dts);
                        }
                        Ok(_) => {}
                        Err(err) => warn!("audio write failed: {err}"),
                    }
                }
                MuxData::Subtitle { track, pkt } => {
                    if let Err(err) = self.out.write_subtitle(track, pkt) {
                        warn!("subtitle write failed: {err}");
                        self.shared.latch_stream_error();
                    }
                }
                MuxData::Delay {
                    track,
                    chain,
                    samples,
                } => self.out.apply_delay(track, chain, samples),
                MuxData::Flush => {
                    debug!("audio drained");
                    self.state.audio_dts = i64::MAX;
                }
                MuxData::AudioFrame { .. } | MuxData::Audio { .. } => {
                    // unreachable by construction: frames stop at the
                    // encode stage and raw audio was handled above
                    debug_assert!(false, "unrouted record reached the output stage");
                }
            }
        }
    }

    /// Write one video buffer and recycle it.
    pub fn handle_video(&mut self, mut bs: VideoBitstream) {
        match self.out.write_video(&mut bs) {
            Ok(dts) if dts != i64::MIN => self.state.video_dts = dts,
            Ok(_) => {}
            Err(err) => {
                warn!("video write failed: {err}");
                self.shared.latch_stream_error();
            }
        }
        self.shared.recycle_video_buffer(bs);
    }

    /// One iteration of the interleaving loop.
    ///
    /// Returns `true` to keep iterating, `false` to wait for more input.
    pub fn pump_once(&mut self) -> bool {
        if !self.shared.header_written() {
            // the first video access unit writes the header
            if let Some(bs) = self.shared.q_video.pop() {
                self.handle_video(bs);
                return true;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
            // encoding can outpace header availability; give the feeding
            // queue room so it never starves the encoder
            let feed = if self.inline_front.is_some() {
                &self.shared.q_audio_out
            } else {
                &self.shared.q_process
            };
            if feed.len() >= feed.capacity() {
                feed.set_capacity(feed.capacity() * 3 / 2);
            }
            return false;
        }

        let mut drained = false;
        while self.state.audio_in_window() {
            let Some(item) = self.shared.q_audio_out.pop() else {
                break;
            };
            self.write_item(item);
            self.state.wait_audio = 0;
            drained = true;
        }
        while self.state.video_in_window() {
            let Some(bs) = self.shared.q_video.pop() else {
                break;
            };
            self.handle_video(bs);
            self.state.wait_video = 0;
            drained = true;
        }

        // forced progress: when one side has been dry for a while and the
        // other is piling up, stop waiting for the dry side
        if self.shared.q_audio_out.is_empty()
            && self.shared.q_video.len() > self.state.video_watermark
        {
            self.state.wait_audio += 1;
            if self.state.wait_audio > FORCE_PROGRESS_ITERATIONS {
                trace!("audio starved; advancing video alone");
                self.state.audio_dts = -1;
                return true;
            }
            return false;
        }
        if self.shared.q_video.is_empty()
            && self.shared.q_audio_out.len() > self.state.audio_watermark
        {
            self.state.wait_video += 1;
            if self.state.wait_video > FORCE_PROGRESS_ITERATIONS {
                trace!("video starved; advancing audio alone");
                self.state.video_dts = -1;
                return true;
            }
            return false;
        }
        drained
    }

    /// The output thread body: pump until aborted, then drain and
    /// finalize.
    pub fn run(mut self) {
        self.shared.ev_out_added.wait();
        while !self.shared.abort_out.load(Ordering::Acquire) {
            while self.pump_once() {}
            let video_stats = self.shared.q_video.stats();
            let audio_stats = self.shared.q_audio_out.stats();
            let video_half = video_stats.len * 2 < video_stats.capacity;
            let audio_half = audio_stats.len * 2 < audio_stats.capacity;
            if video_half && audio_half {
                self.shared.ev_out_added.reset();
                self.shared.ev_out_added.wait_timeout(EVENT_TIMEOUT);
            } else {
                std::thread::yield_now();
            }
        }
        self.shared.ev_out_closing.set();
        self.drain_remaining();
        if let Err(err) = self.out.finalize() {
            warn!("finalize failed: {err}");
        }
        *self.shared.writer_return.lock() = Some(self.out.writer);
    }

    /// Final synchronized drain of both queues, then per-queue drains.
    pub fn drain_remaining(&mut self) {
        let mut audio_exists = !self.shared.q_audio_out.is_empty();
        let mut video_exists = !self.shared.q_video.is_empty();
        while audio_exists && video_exists {
            while self.state.audio_dts
                <= self.state.video_dts.saturating_add(self.state.dts_window_us)
            {
                match self.shared.q_audio_out.pop() {
                    Some(item) => self.write_item(item),
                    None => break,
                }
            }
            while self.state.video_dts
                <= self.state.audio_dts.saturating_add(self.state.dts_window_us)
            {
                match self.shared.q_video.pop() {
                    Some(bs) => self.handle_video(bs),
                    None => break,
                }
            }
            audio_exists = !self.shared.q_audio_out.is_empty();
            video_exists = !self.shared.q_video.is_empty();
        }
        while let Some(item) = self.shared.q_audio_out.pop() {
            self.write_item(item);
        }
        while let Some(bs) = self.shared.q_video.pop() {
            self.handle_video(bs);
        }
    }

    /// Grow the audio-out queue once the real packet rate is known.
    fn adapt_audio_capacity(&mut self, track: usize, chain: usize, samples: i64) {
        if samples <= 0 {
            return;
        }
        let rate = self.out.audio_out[track][chain].sample_rate as i64;
        let pps = (rate + samples - 1) / samples;
        self.state.aud_packets_per_sec = self.state.aud_packets_per_sec.max(pps);
        let wanted = (self.state.aud_packets_per_sec * 4) as usize;
        if self.shared.q_audio_out.capacity() < wanted {
            self.shared.q_audio_out.set_capacity(wanted);
        }
    }
}

/// The audio process worker thread body.
pub struct ProcessWorker {
    /// Shared scheduler state.
    pub shared: Arc<MuxShared>,
    /// The audio front half.
    pub front: AudioFront,
    /// The encode bank, present when no dedicated encode thread runs.
    pub bank: Option<EncodeBank>,
}

impl ProcessWorker {
    fn route(&mut self, item: MuxData) {
        let items = match self.front.handle(item) {
            Ok(items) => items,
            Err(err) => {
                warn!("audio stage failed: {err}");
                self.shared.latch_stream_error();
                return;
            }
        };
        match &mut self.bank {
            Some(bank) => {
                for item in apply_bank(bank, items) {
                    self.shared.q_audio_out.push(item);
                    self.shared.ev_out_added.set();
                }
            }
            None => {
                for item in items {
                    self.shared.q_encode.push(item);
                    self.shared.ev_enc_added.set();
                }
            }
        }
    }

    /// Thread body.
    pub fn run(mut self) {
        self.shared.ev_proc_added.wait();
        while !self.shared.abort_proc.load(Ordering::Acquire) {
            if !self.shared.header_written() {
                std::thread::sleep(std::time::Duration::from_millis(1));
            } else {
                while let Some(item) = self.shared.q_process.pop() {
                    self.route(item);
                }
            }
            self.shared.ev_proc_added.reset();
            self.shared.ev_proc_added.wait_timeout(EVENT_TIMEOUT);
        }
        while let Some(item) = self.shared.q_process.pop() {
            self.route(item);
        }
        self.shared.ev_proc_closing.set();
    }
}

/// The audio encode worker thread body.
pub struct EncodeWorker {
    /// Shared scheduler state.
    pub shared: Arc<MuxShared>,
    /// The encoder bank.
    pub bank: EncodeBank,
}

impl EncodeWorker {
    fn route(&mut self, item: MuxData) {
        for item in apply_bank(&mut self.bank, vec![item]) {
            self.shared.q_audio_out.push(item);
            self.shared.ev_out_added.set();
        }
    }

    /// Thread body.
    pub fn run(mut self) {
        self.shared.ev_enc_added.wait();
        while !self.shared.abort_enc.load(Ordering::Acquire) {
            if self.shared.header_written() {
                while let Some(item) = self.shared.q_encode.pop() {
                    self.route(item);
                }
            } else {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            self.shared.ev_enc_added.reset();
            self.shared.ev_enc_added.wait_timeout(EVENT_TIMEOUT);
        }
        while let Some(item) = self.shared.q_encode.pop() {
            self.route(item);
        }
        self.shared.ev_enc_closing.set();
    }
}
