//! The top-level muxer.
//!
//! Owns stream registration, chapter binding, the scheduler threads and the
//! entry points the encoder loop calls: [`Muxer::write_video_frame`] for
//! encoder output and [`Muxer::write_packet`] for demuxed audio/subtitle
//! packets.

use crate::chapters::{bind_chapters, Chapter};
use crate::header::HeaderCoordinator;
use crate::queue::QueueStats;
use crate::sched::{
    AudioFront, AudioOutState, EncodeBank, EncodeWorker, InterleaveState, MuxData, MuxShared,
    OutputStage, OutputWorker, ProcessWorker, ThreadPolicy,
};
use crate::video::{VideoTrack, VideoTrackConfig};
use crate::writer::{
    AudioStreamDesc, ContainerWriter, StreamDesc, StreamKind, SubtitleStreamDesc, VideoStreamDesc,
};
use muxpipe_audio::AudioProcessor;
use muxpipe_codecs::AudioEncoder;
use muxpipe_core::error::{Error, MuxError, Result};
use muxpipe_core::{Packet, Rational, SubtitleCodec, TimeBase, TimestampAdjuster, TrimList};
use muxpipe_subtitle::SubtitleProcessor;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info};

/// Muxer configuration.
#[derive(Default)]
pub struct MuxConfig {
    /// Key/value options forwarded to the container writer at header time.
    /// Unknown keys are fatal.
    pub options: Vec<(String, String)>,
    /// Container metadata copied from the source. `duration` and
    /// `creation_time` are dropped; `encoding_tool` is always set.
    pub metadata: BTreeMap<String, String>,
    /// Frame ranges to keep.
    pub trim: TrimList,
    /// Worker thread selection.
    pub threads: ThreadPolicy,
}

/// One audio track with its encoder bank entries.
pub struct AudioTrackSetup {
    /// The staged track.
    pub processor: AudioProcessor,
    /// One encoder per chain (`None` = pass-through chain).
    pub encoders: Vec<Option<Box<dyn AudioEncoder>>>,
    /// Stream metadata copied to the output.
    pub metadata: BTreeMap<String, String>,
    /// Leading stream delay in input time base units.
    pub delay: i64,
    /// A representative packet used to prime the bitstream filter so its
    /// extradata is available at header time.
    pub sample_packet: Option<Packet>,
}

/// One subtitle track.
pub struct SubtitleTrackSetup {
    /// The staged track.
    pub processor: SubtitleProcessor,
}

/// One encoded video access unit delivered by the hardware encoder.
#[derive(Debug, Clone, Copy)]
pub struct EncodedFrame<'a> {
    /// Access unit bytes (Annex-B).
    pub data: &'a [u8],
    /// Presentation timestamp in the track's input time base (field ticks
    /// for CFR output).
    pub pts: i64,
    /// Decode timestamp in microseconds, when the encoder provides one.
    pub dts: Option<i64>,
}

/// Snapshot of the scheduler queues.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    /// Process queue.
    pub process: QueueStats,
    /// Encode queue.
    pub encode: QueueStats,
    /// Audio output queue.
    pub audio_out: QueueStats,
    /// Video output queue.
    pub video: QueueStats,
}

enum Runtime {
    Sync(Box<OutputWorker>),
    Threaded { handles: Vec<JoinHandle<()>> },
}

/// The streaming muxer.
pub struct Muxer {
    shared: Arc<MuxShared>,
    runtime: Runtime,
    policy: ThreadPolicy,
    audio_index: HashMap<i32, usize>,
    subtitle_index: HashMap<i32, usize>,
    summary: String,
}

impl Muxer {
    /// Assemble the muxer: register every stream, bind chapters, write the
    /// header when no video defers it, and start the worker threads.
    pub fn new(
        mut writer: Box<dyn ContainerWriter>,
        config: MuxConfig,
        video_config: Option<VideoTrackConfig>,
        audio: Vec<AudioTrackSetup>,
        subtitles: Vec<SubtitleTrackSetup>,
        chapters: Vec<Chapter>,
    ) -> Result<Self> {
        let policy = config.threads.normalized();
        let fps = video_config.as_ref().map(|v| v.fps);
        let adjuster =
            TimestampAdjuster::new(fps.unwrap_or(Rational::new(30, 1)), config.trim.clone());
        let audio_stream_count: usize = audio.iter().map(|a| a.processor.track.chains.len()).sum();
        let shared = Arc::new(MuxShared::new(audio_stream_count, fps));

        let mut video_track = None;
        if let Some(cfg) = &video_config {
            let mut track = VideoTrack::new(cfg, writer.format());
            let desc = StreamDesc::new(
                StreamKind::Video(VideoStreamDesc {
                    codec: cfg.codec,
                    width: cfg.width,
                    height: cfg.height,
                    frame_rate: cfg.fps,
                }),
                track.stream_time_base,
            );
            track.out_stream_index = writer.add_stream(desc)?;
            debug!(
                stream = track.out_stream_index,
                timebase = %track.stream_time_base.as_rational(),
                "registered video stream"
            );
            video_track = Some(track);
        }

        let mut processors = Vec::with_capacity(audio.len());
        let mut bank_entries = Vec::with_capacity(audio.len());
        let mut audio_out_states = Vec::with_capacity(audio.len());
        let mut audio_index = HashMap::new();
        for (slot, setup) in audio.into_iter().enumerate() {
            let AudioTrackSetup {
                mut processor,
                encoders,
                metadata,
                delay,
                sample_packet,
            } = setup;
            if processor.track.chains.len() != encoders.len() {
                return Err(Error::Config(format!(
                    "track {} has {} chains but {} encoder slots",
                    processor.track.track_id,
                    processor.track.chains.len(),
                    encoders.len()
                )));
            }
            // prime the bitstream filter so stream extradata exists at
            // header time
            if let (Some(bsf), Some(sample)) = (processor.track.bsf.as_mut(), sample_packet) {
                let _ = bsf.filter(sample);
            }

            let mut states = Vec::with_capacity(processor.track.chains.len());
            for (chain_idx, _) in processor.track.chains.iter().enumerate() {
                let (codec, rate, layout, frame_size, extradata) =
                    match encoders[chain_idx].as_ref() {
                        Some(enc) => {
                            let p = enc.input_params();
                            (
                                p.codec,
                                p.sample_rate,
                                p.layout,
                                enc.frame_size(),
                                enc.extra_data().map(<[u8]>::to_vec),
                            )
                        }
                        None => {
                            let p = processor.track.input;
                            let extradata = processor
                                .track
                                .bsf
                                .as_ref()
                                .and_then(|b| b.extra_data())
                                .map(<[u8]>::to_vec);
                            (p.codec, p.sample_rate, p.layout, p.frame_size, extradata)
                        }
                    };
                let time_base = TimeBase::per_sample(rate);
                let start_time = processor.track.input.time_base.convert(delay, time_base);
                let mut desc = StreamDesc::new(
                    StreamKind::Audio(AudioStreamDesc {
                        codec,
                        sample_rate: rate,
                        channels: layout.channels() as u32,
                        frame_size,
                    }),
                    time_base,
                );
                desc.extradata = extradata;
                desc.metadata = metadata.clone();
                desc.start_time = start_time;
                let stream_index = writer.add_stream(desc)?;
                states.push(AudioOutState {
                    stream_index,
                    time_base,
                    sample_rate: rate,
                    samples_out: 0,
                    delay_samples: start_time,
                    last_pts_out: start_time,
                });
            }
            audio_index.insert(processor.track.track_id, slot);
            audio_out_states.push(states);
            bank_entries.push(encoders);
            processors.push(processor);
        }

        let video_input_tb = video_config
            .as_ref()
            .map(|cfg| cfg.input_time_base.unwrap_or(TimeBase(cfg.fps.recip())));
        let mut subtitle_procs = Vec::with_capacity(subtitles.len());
        let mut subtitle_adjust = Vec::with_capacity(subtitles.len());
        let mut subtitle_index = HashMap::new();
        for (slot, setup) in subtitles.into_iter().enumerate() {
            let mut proc = setup.processor;
            let out_codec = proc.output_codec();
            // mov_text aligns to the video time base; everything else keeps
            // the source's
            proc.track.out_time_base = if out_codec == SubtitleCodec::MovText {
                video_input_tb.unwrap_or(proc.track.input_time_base)
            } else {
                proc.track.input_time_base
            };
            let mut desc = StreamDesc::new(
                StreamKind::Subtitle(SubtitleStreamDesc { codec: out_codec }),
                proc.track.out_time_base,
            );
            desc.metadata = proc.track.metadata.clone();
            desc.default_disposition = proc.track.default_disposition;
            proc.track.out_stream_index = writer.add_stream(desc)?;

            let adjust = match (&video_config, video_input_tb) {
                (Some(cfg), Some(vtb)) => {
                    vtb.convert(cfg.input_first_key_pts, proc.track.input_time_base)
                }
                _ => 0,
            };
            subtitle_index.insert(proc.track.track_id, slot);
            subtitle_adjust.push(adjust);
            subtitle_procs.push(proc);
        }

        let bound = bind_chapters(&chapters, &adjuster);
        let has_chapters = !bound.is_empty();
        if has_chapters {
            writer.set_chapters(bound);
        }

        let mut metadata = config.metadata;
        metadata.remove("duration");
        metadata.remove("creation_time");
        metadata.insert(
            "encoding_tool".to_string(),
            format!("muxpipe {}", env!("CARGO_PKG_VERSION")),
        );
        writer.set_metadata(metadata);

        let summary = build_summary(
            writer.as_ref(),
            video_config.as_ref(),
            &processors,
            &bank_entries,
            &subtitle_procs,
            has_chapters,
        );
        info!("{summary}");

        let mut header = HeaderCoordinator::new(
            config.options,
            Arc::clone(&shared.header_written),
            video_track.as_ref().map(|v| v.out_stream_index),
        );
        if video_track.is_none() {
            // nothing defers the header without video extradata to wait for
            header.write_header(writer.as_mut(), None)?;
        }

        let has_audio = !processors.is_empty() || !subtitle_procs.is_empty();
        let has_video = video_track.is_some();
        let out_stage = OutputStage::new(
            writer,
            video_track,
            subtitle_procs,
            subtitle_adjust,
            audio_out_states,
            adjuster,
            header,
            Arc::clone(&shared),
        );
        let state = InterleaveState::new(
            has_audio,
            has_video,
            fps,
            shared.q_video.capacity(),
            shared.q_audio_out.capacity(),
        );
        let front = AudioFront::new(processors, Arc::clone(&shared.header_written));
        let bank = EncodeBank::new(bank_entries);

        let runtime = if policy.output {
            let mut handles = Vec::new();
            let (inline_front, inline_bank) = if policy.audio_process {
                if policy.audio_encode {
                    let worker = ProcessWorker {
                        shared: Arc::clone(&shared),
                        front,
                        bank: None,
                    };
                    handles.push(spawn_worker("mux-aud-process", move || worker.run())?);
                    let worker = EncodeWorker {
                        shared: Arc::clone(&shared),
                        bank,
                    };
                    handles.push(spawn_worker("mux-aud-encode", move || worker.run())?);
                } else {
                    let worker = ProcessWorker {
                        shared: Arc::clone(&shared),
                        front,
                        bank: Some(bank),
                    };
                    handles.push(spawn_worker("mux-aud-process", move || worker.run())?);
                }
                (None, None)
            } else {
                (Some(front), Some(bank))
            };
            let worker = OutputWorker {
                shared: Arc::clone(&shared),
                out: out_stage,
                inline_front,
                inline_bank,
                state,
            };
            handles.push(spawn_worker("mux-output", move || worker.run())?);
            Runtime::Threaded { handles }
        } else {
            Runtime::Sync(Box::new(OutputWorker {
                shared: Arc::clone(&shared),
                out: out_stage,
                inline_front: Some(front),
                inline_bank: Some(bank),
                state,
            }))
        };

        Ok(Self {
            shared,
            runtime,
            policy,
            audio_index,
            subtitle_index,
            summary,
        })
    }

    /// Submit one encoded video access unit.
    pub fn write_video_frame(&mut self, frame: EncodedFrame<'_>) -> Result<()> {
        if self.shared.stream_error() {
            return Err(MuxError::StreamError.into());
        }
        let mut bs = self.shared.take_video_buffer(frame.data.len());
        bs.fill(frame.data, frame.pts, frame.dts);
        match &mut self.runtime {
            Runtime::Sync(worker) => {
                worker.handle_video(bs);
                if self.shared.stream_error() {
                    return Err(MuxError::StreamError.into());
                }
            }
            Runtime::Threaded { .. } => {
                self.shared.q_video.push(bs);
                self.shared.ev_out_added.set();
            }
        }
        Ok(())
    }

    /// Submit one demuxed audio or subtitle packet, routed by track id
    /// (positive = audio, negative = subtitle).
    pub fn write_packet(&mut self, track_id: i32, pkt: Packet) -> Result<()> {
        if self.shared.stream_error() {
            return Err(MuxError::StreamError.into());
        }
        let item = if let Some(&slot) = self.audio_index.get(&track_id) {
            MuxData::Audio { track: slot, pkt }
        } else if let Some(&slot) = self.subtitle_index.get(&track_id) {
            MuxData::Subtitle { track: slot, pkt }
        } else {
            return Err(MuxError::UnknownTrack { track: track_id }.into());
        };
        self.dispatch(item);
        Ok(())
    }

    /// Flush every stage, drain the queues, write the trailer (unless a
    /// fatal error was latched) and hand the container writer back.
    pub fn finish(mut self) -> Result<Box<dyn ContainerWriter>> {
        self.dispatch(MuxData::Flush);
        match self.runtime {
            Runtime::Sync(mut worker) => {
                worker.drain_remaining();
                worker.out.finalize()?;
                Ok(worker.out.writer)
            }
            Runtime::Threaded { handles } => {
                if self.policy.audio_process {
                    self.shared.abort_proc.store(true, Ordering::Release);
                    while !self
                        .shared
                        .ev_proc_closing
                        .wait_timeout(std::time::Duration::from_millis(100))
                    {
                        self.shared.ev_proc_added.set();
                    }
                }
                if self.policy.audio_encode {
                    self.shared.abort_enc.store(true, Ordering::Release);
                    while !self
                        .shared
                        .ev_enc_closing
                        .wait_timeout(std::time::Duration::from_millis(100))
                    {
                        self.shared.ev_enc_added.set();
                    }
                }
                self.shared.abort_out.store(true, Ordering::Release);
                while !self
                    .shared
                    .ev_out_closing
                    .wait_timeout(std::time::Duration::from_millis(100))
                {
                    self.shared.ev_out_added.set();
                }
                for handle in handles {
                    let _ = handle.join();
                }
                self.shared
                    .writer_return
                    .lock()
                    .take()
                    .ok_or_else(|| Error::Config("output worker did not return the writer".into()))
            }
        }
    }

    /// Whether the fatal latch is set.
    pub fn stream_error(&self) -> bool {
        self.shared.stream_error()
    }

    /// One-line description of the output configuration.
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Queue usage snapshot.
    pub fn queue_stats(&self) -> SchedulerStats {
        SchedulerStats {
            process: self.shared.q_process.stats(),
            encode: self.shared.q_encode.stats(),
            audio_out: self.shared.q_audio_out.stats(),
            video: self.shared.q_video.stats(),
        }
    }

    fn dispatch(&mut self, item: MuxData) {
        match &mut self.runtime {
            Runtime::Sync(worker) => worker.write_item(item),
            Runtime::Threaded { .. } => {
                if self.policy.audio_process {
                    self.shared.q_process.push(item);
                    self.shared.ev_proc_added.set();
                } else {
                    self.shared.q_audio_out.push(item);
                    self.shared.ev_out_added.set();
                }
            }
        }
    }
}

fn spawn_worker(
    name: &str,
    body: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(Error::Io)
}

/// One-line writer summary, wrapped at 65 columns.
fn build_summary(
    writer: &dyn ContainerWriter,
    video: Option<&VideoTrackConfig>,
    audio: &[AudioProcessor],
    encoders: &[Vec<Option<Box<dyn AudioEncoder>>>],
    subtitles: &[SubtitleProcessor],
    has_chapters: bool,
) -> String {
    let mut mes = String::from("avwriter: ");
    let mut add = |mes: &mut String, segment: String| {
        let line_len = mes.len() - mes.rfind('\n').map_or(0, |p| p + 1);
        if line_len + segment.len() >= 65 {
            if let Some(rest) = segment.strip_prefix(", ") {
                mes.push_str(",\n");
                mes.push_str(rest);
                return;
            }
            mes.push('\n');
        }
        mes.push_str(&segment);
    };

    let mut streams = 0usize;
    if let Some(cfg) = video {
        add(
            &mut mes,
            format!(
                "{} {}x{}",
                match cfg.codec {
                    muxpipe_core::VideoCodec::H264 => "h264",
                    muxpipe_core::VideoCodec::H265 => "hevc",
                },
                cfg.width,
                cfg.height
            ),
        );
        streams += 1;
    }
    for (proc, encs) in audio.iter().zip(encoders) {
        let lead = if streams > 0 { ", " } else { "" };
        let segment = match encs.first().and_then(Option::as_ref) {
            Some(enc) => {
                let p = enc.input_params();
                format!(
                    "{}#{}:{}/{} -> {}/{}",
                    lead,
                    proc.track.track_id,
                    proc.track.input.codec,
                    proc.track.input.layout,
                    p.codec,
                    p.layout
                )
            }
            None => format!("{}#{}:{}", lead, proc.track.track_id, proc.track.input.codec),
        };
        add(&mut mes, segment);
        streams += 1;
    }
    for proc in subtitles {
        let lead = if streams > 0 { ", " } else { "" };
        add(
            &mut mes,
            format!("{}sub#{}", lead, proc.track.track_id.abs()),
        );
        streams += 1;
    }
    if has_chapters {
        let lead = if streams > 0 { ", " } else { "" };
        add(&mut mes, format!("{}chap", lead));
    }
    add(&mut mes, format!(" => {}", writer.format().extension()));
    mes
}
