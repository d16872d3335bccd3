//! The audio staging engine.
//!
//! Each incoming packet runs through: bitstream filter, decode (with the
//! bounded error budget), filter chain, sub-stream fan-out, resample and
//! encoder frame cutting. The stage emits ready-to-encode frames and
//! ready-to-stamp packets; the scheduler routes them onward.

use crate::track::AudioTrack;
use muxpipe_codecs::{BsfOutcome, ResampleParams, Resampler};
use muxpipe_core::error::{CodecError, Error, Result};
use muxpipe_core::{Packet, SampleBuf, TimeBase};
use tracing::{debug, warn};

/// Consecutive bitstream-filter failures tolerated from stream start.
const BSF_ERROR_THRESHOLD: u32 = 30;

/// Output of one staging step.
#[derive(Debug)]
pub enum StageOut {
    /// A frame ready for this chain's encoder.
    Frame {
        /// Chain ordinal within the track.
        chain: usize,
        /// The frame; exactly `frame_size` samples unless it is the final
        /// partial frame or the encoder takes any count.
        frame: SampleBuf,
    },
    /// A packet ready for output stamping (pass-through path).
    Packet {
        /// Chain ordinal within the track.
        chain: usize,
        /// The packet.
        pkt: Packet,
        /// Sample count of the packet at the chain's stamping rate.
        samples: i64,
    },
    /// Additional output delay discovered mid-stream, in samples at the
    /// chain's stamping rate.
    ///
    /// Derived from the packet duration in the input packet time base;
    /// approximate when that time base is 1/1000 and the codec declares no
    /// frame size.
    Delay {
        /// Chain ordinal within the track.
        chain: usize,
        /// Samples to add to the chain's delay.
        samples: i64,
    },
}

/// Drives one track's front half and output chains.
pub struct AudioProcessor {
    /// The owned track state.
    pub track: AudioTrack,
}

impl AudioProcessor {
    /// Wrap a built track.
    pub fn new(track: AudioTrack) -> Self {
        Self { track }
    }

    /// Run one input packet through the stage.
    pub fn process_packet(&mut self, pkt: Packet) -> Result<Vec<StageOut>> {
        let in_rate_tb = TimeBase::per_sample(self.track.input.sample_rate);
        let samples_in = pkt.duration.rescale(in_rate_tb).value;

        let mut pkt = pkt;
        let mut silence_due_to_bsf = false;
        if let Some(bsf) = self.track.bsf.as_mut() {
            match bsf.filter(pkt) {
                Ok(BsfOutcome::Packet(filtered)) => {
                    self.track.bsf_error_streak = 0;
                    pkt = filtered;
                }
                Ok(BsfOutcome::Again) => return Ok(Vec::new()),
                Err(err) => {
                    if self.track.packets_written == 0 {
                        self.track.bsf_error_streak += 1;
                        if self.track.bsf_error_streak > BSF_ERROR_THRESHOLD {
                            return Err(Error::Codec(CodecError::BitstreamFilterStreak {
                                track: self.track.track_id,
                                streak: self.track.bsf_error_streak,
                            }));
                        }
                        warn!(
                            track = self.track.track_id,
                            streak = self.track.bsf_error_streak,
                            "bitstream filter failed at stream start, compensating delay: {err}"
                        );
                        // keep A/V sync by growing the output delay instead
                        return Ok(vec![StageOut::Delay {
                            chain: 0,
                            samples: samples_in,
                        }]);
                    }
                    warn!(track = self.track.track_id, "bitstream filter failed: {err}");
                    if self.track.decoder.is_none() {
                        return Ok(Vec::new());
                    }
                    silence_due_to_bsf = true;
                    pkt = Packet::empty();
                }
            }
        }
        self.track.packets_written += 1;

        if self.track.decoder.is_none() {
            let samples = self.passthrough_samples(&pkt);
            self.track.last_pts_in = pkt.pts;
            return Ok(vec![StageOut::Packet {
                chain: 0,
                pkt,
                samples,
            }]);
        }

        if self.track.decode_error_count > self.track.ignore_decode_error {
            // the track already went fatal; drain quietly
            return Ok(Vec::new());
        }

        let frame = if silence_due_to_bsf {
            Some(self.synth_silence(samples_in)?)
        } else {
            self.decode_concat(&pkt)?
        };
        let Some(frame) = frame else {
            return Ok(Vec::new());
        };

        let Some(frame) = self.track.filters.process(frame)? else {
            return Ok(Vec::new());
        };

        let mut outs = Vec::new();
        self.distribute(frame, &mut outs)?;
        Ok(outs)
    }

    /// Drain decoder, filters, resamplers and carry buffers at EOF.
    ///
    /// Encoder draining happens downstream in the encode stage.
    pub fn flush(&mut self) -> Result<Vec<StageOut>> {
        let mut outs = Vec::new();

        let mut frames: Vec<SampleBuf> = Vec::new();
        if let Some(decoder) = self.track.decoder.as_mut() {
            let mut flushed: Option<SampleBuf> = None;
            for buf in decoder.flush()? {
                match &mut flushed {
                    Some(acc) if acc.params_match(&buf) => acc.append(&buf),
                    _ => flushed = Some(buf),
                }
            }
            if let Some(frame) = flushed {
                if let Some(frame) = self.track.filters.process(frame)? {
                    frames.push(frame);
                }
            }
        }
        if let Some(frame) = self.track.filters.flush()? {
            frames.push(frame);
        }
        for frame in frames {
            self.distribute(frame, &mut outs)?;
        }

        for idx in 0..self.track.chains.len() {
            let chain = &mut self.track.chains[idx];
            let drained = match chain.resampler.as_mut() {
                Some(rs) => rs.convert(None)?,
                None => None,
            };
            if let Some(frame) = drained {
                for cut in chain.cut_frames(frame) {
                    outs.push(StageOut::Frame { chain: idx, frame: cut });
                }
            }
            if let Some(carry) = chain.carry.take() {
                outs.push(StageOut::Frame {
                    chain: idx,
                    frame: carry,
                });
            }
        }
        Ok(outs)
    }

    /// Fan one decoded/filtered frame out to every chain.
    fn distribute(&mut self, frame: SampleBuf, outs: &mut Vec<StageOut>) -> Result<()> {
        for idx in 1..self.track.chains.len() {
            self.chain_process(idx, frame.clone(), outs)?;
        }
        self.chain_process(0, frame, outs)
    }

    /// Resample and cut one frame for one chain.
    fn chain_process(
        &mut self,
        idx: usize,
        frame: SampleBuf,
        outs: &mut Vec<StageOut>,
    ) -> Result<()> {
        let chain = &mut self.track.chains[idx];

        let needs_rebuild = chain
            .resampler
            .as_ref()
            .is_some_and(|rs| !rs.matches_input(&frame));
        if needs_rebuild {
            let (drained, out_params) = {
                let rs = chain.resampler.as_mut().expect("checked above");
                (rs.convert(None)?, rs.output_params())
            };
            if let Some(drained) = drained {
                for cut in chain.cut_frames(drained) {
                    outs.push(StageOut::Frame { chain: idx, frame: cut });
                }
            }
            debug!(
                track = self.track.track_id,
                chain = idx,
                "resampler input drift, reinitializing"
            );
            chain.resampler = Some(Resampler::new(
                ResampleParams::of(&frame),
                out_params,
                chain.channel_select,
            )?);
        }

        let mut frame = frame;
        if let Some(rs) = chain.resampler.as_mut() {
            match rs.convert(Some(&frame))? {
                Some(converted) => frame = converted,
                None => return Ok(()),
            }
        }
        for cut in chain.cut_frames(frame) {
            outs.push(StageOut::Frame { chain: idx, frame: cut });
        }
        Ok(())
    }

    /// Decode one packet, concatenating everything the decoder releases.
    ///
    /// Under the error budget, a failed decode yields silence matching the
    /// packet's duration; over budget the track turns fatal.
    fn decode_concat(&mut self, pkt: &Packet) -> Result<Option<SampleBuf>> {
        let decoder = self.track.decoder.as_mut().expect("decode path");
        match decoder.decode(pkt) {
            Ok(bufs) => {
                self.track.decode_error_count = 0;
                let mut combined: Option<SampleBuf> = None;
                for buf in bufs {
                    match &mut combined {
                        Some(acc) if acc.params_match(&buf) => acc.append(&buf),
                        _ => combined = Some(buf),
                    }
                }
                Ok(combined.filter(|f| !f.is_empty()))
            }
            Err(err) => {
                self.track.decode_error_count += 1;
                if self.track.decode_error_count > self.track.ignore_decode_error {
                    warn!(
                        track = self.track.track_id,
                        errors = self.track.decode_error_count,
                        "decode error budget exhausted"
                    );
                    return Err(Error::Codec(CodecError::DecodeBudgetExceeded {
                        track: self.track.track_id,
                        errors: self.track.decode_error_count,
                    }));
                }
                warn!(
                    track = self.track.track_id,
                    errors = self.track.decode_error_count,
                    "decode failed, inserting silence: {err}"
                );
                let in_rate_tb = TimeBase::per_sample(self.track.input.sample_rate);
                let samples_in = pkt.duration.rescale(in_rate_tb).value;
                Ok(Some(self.synth_silence(samples_in)?))
            }
        }
    }

    /// Synthesize silence of `samples_in` input-rate samples at the
    /// resolved resampler-input parameters.
    fn synth_silence(&self, samples_in: i64) -> Result<SampleBuf> {
        let params = self.track.decoded_params.ok_or_else(|| {
            Error::Codec(CodecError::Decode {
                track: self.track.track_id,
                message: "cannot synthesize silence before track parameters are resolved".into(),
            })
        })?;
        let samples = TimeBase::per_sample(self.track.input.sample_rate)
            .convert(samples_in, TimeBase::per_sample(params.sample_rate))
            .max(0) as usize;
        Ok(SampleBuf::silence(
            params.format,
            params.layout,
            params.sample_rate,
            samples,
        ))
    }

    /// Sample count of a pass-through packet.
    ///
    /// A 1/1000 time base is not trusted: a declared codec frame size wins.
    /// Otherwise the pts delta overrides a drifting declared duration, but
    /// only when the delta stays below one video frame (larger gaps are cut
    /// points, not drift).
    fn passthrough_samples(&self, pkt: &Packet) -> i64 {
        let input = &self.track.input;
        let rate_tb = TimeBase::per_sample(input.sample_rate);
        let mut samples = pkt.duration.rescale(rate_tb).value;
        if input.time_base == TimeBase::MILLISECONDS && input.frame_size > 0 {
            return input.frame_size as i64;
        }
        if let (Some(fps), true, true) = (
            self.track.video_fps,
            self.track.last_pts_in.is_valid(),
            pkt.pts.is_valid(),
        ) {
            let last = self.track.last_pts_in.rescale(input.time_base).value;
            let pts_diff = pkt.pts.rescale(input.time_base).value - last;
            let one_frame = TimeBase(fps.recip()).convert(1, input.time_base);
            let duration = pkt.duration.rescale(input.time_base).value;
            if pts_diff > 0 && pts_diff < one_frame && (pts_diff - duration).abs() > 1 {
                samples = input.time_base.convert(pts_diff, rate_tb);
            }
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{AudioTrack, SubStreamSpec};
    use muxpipe_codecs::{
        AudioDecoder, AudioEncoder, AudioParams, BitstreamFilter, CodecInfo,
    };
    use muxpipe_core::{
        AudioCodec, ChannelLayout, Duration, Rational, SampleFormat, Timestamp,
    };

    fn params(rate: u32, frame_size: usize, time_base: TimeBase) -> AudioParams {
        AudioParams {
            codec: AudioCodec::Aac,
            sample_rate: rate,
            layout: ChannelLayout::STEREO,
            format: SampleFormat::F32,
            bits_per_raw_sample: 0,
            frame_size,
            time_base,
        }
    }

    /// Decoder producing one f32 stereo frame per packet, sized from the
    /// packet duration; fails when told to.
    struct StubDecoder {
        rate: u32,
        fail_next: u32,
    }

    impl AudioDecoder for StubDecoder {
        fn codec_info(&self) -> CodecInfo {
            CodecInfo { name: "stub", long_name: "stub decoder" }
        }

        fn output_params(&self) -> AudioParams {
            params(self.rate, 0, TimeBase::per_sample(self.rate))
        }

        fn set_extra_data(&mut self, _data: &[u8]) -> Result<()> {
            Ok(())
        }

        fn decode(&mut self, packet: &Packet) -> Result<Vec<SampleBuf>> {
            if self.fail_next > 0 {
                self.fail_next -= 1;
                return Err(Error::Codec(CodecError::Decode {
                    track: 2,
                    message: "forced".into(),
                }));
            }
            let samples = packet
                .duration
                .rescale(TimeBase::per_sample(self.rate))
                .value as usize;
            Ok(vec![SampleBuf::new(
                SampleFormat::F32,
                ChannelLayout::STEREO,
                self.rate,
                samples,
            )])
        }

        fn flush(&mut self) -> Result<Vec<SampleBuf>> {
            Ok(Vec::new())
        }
    }

    /// Encoder demanding 1024-sample frames.
    struct FixedFrameEncoder;

    impl AudioEncoder for FixedFrameEncoder {
        fn codec_info(&self) -> CodecInfo {
            CodecInfo { name: "stub", long_name: "stub encoder" }
        }

        fn input_params(&self) -> AudioParams {
            params(48000, 1024, TimeBase::per_sample(48000))
        }

        fn frame_size(&self) -> usize {
            1024
        }

        fn encode(&mut self, frame: &SampleBuf) -> Result<Vec<Packet>> {
            let mut pkt = Packet::new(vec![0u8; 8]);
            pkt.duration = Duration::new(frame.num_samples() as i64, TimeBase::per_sample(48000));
            Ok(vec![pkt])
        }

        fn flush(&mut self) -> Result<Vec<Packet>> {
            Ok(Vec::new())
        }

        fn extra_data(&self) -> Option<&[u8]> {
            None
        }
    }

    struct AlwaysFailBsf;

    impl BitstreamFilter for AlwaysFailBsf {
        fn name(&self) -> &str {
            "fail"
        }

        fn filter(&mut self, _packet: Packet) -> Result<BsfOutcome> {
            Err(Error::Codec(CodecError::BitstreamFilter {
                track: 1,
                message: "forced".into(),
            }))
        }

        fn extra_data(&self) -> Option<&[u8]> {
            None
        }
    }

    fn transcode_processor(fail_next: u32, budget: u32) -> AudioProcessor {
        let decoder = StubDecoder { rate: 48000, fail_next };
        let (track, _encoders) = AudioTrack::new_transcode(
            0,
            2,
            params(48000, 0, TimeBase::per_sample(48000)),
            Box::new(decoder),
            Vec::new(),
            vec![SubStreamSpec {
                channel_select: None,
                channel_out: None,
                encoder: Some(Box::new(FixedFrameEncoder)),
            }],
            budget,
            None,
        )
        .unwrap();
        AudioProcessor::new(track)
    }

    fn packet_of(samples: i64, pts: i64) -> Packet {
        let tb = TimeBase::per_sample(48000);
        let mut pkt = Packet::new(vec![0u8; 16]);
        pkt.pts = Timestamp::new(pts, tb);
        pkt.duration = Duration::new(samples, tb);
        pkt
    }

    #[test]
    fn test_frame_cutting_emits_exact_sizes() {
        let mut proc = transcode_processor(0, 0);
        // 2500 samples -> two 1024-frames, 452 carried
        let outs = proc.process_packet(packet_of(2500, 0)).unwrap();
        let frames: Vec<_> = outs
            .iter()
            .filter_map(|o| match o {
                StageOut::Frame { frame, .. } => Some(frame.num_samples()),
                _ => None,
            })
            .collect();
        assert_eq!(frames, vec![1024, 1024]);
        assert_eq!(
            proc.track.chains[0].carry.as_ref().unwrap().num_samples(),
            452
        );

        // 600 more samples: 452 + 600 = 1052 -> one frame, 28 carried
        let outs = proc.process_packet(packet_of(600, 2500)).unwrap();
        let frames: Vec<_> = outs
            .iter()
            .filter_map(|o| match o {
                StageOut::Frame { frame, .. } => Some(frame.num_samples()),
                _ => None,
            })
            .collect();
        assert_eq!(frames, vec![1024]);

        // flush releases the final partial frame
        let outs = proc.flush().unwrap();
        let frames: Vec<_> = outs
            .iter()
            .filter_map(|o| match o {
                StageOut::Frame { frame, .. } => Some(frame.num_samples()),
                _ => None,
            })
            .collect();
        assert_eq!(frames, vec![28]);
    }

    #[test]
    fn test_decode_errors_inside_budget_become_silence() {
        let mut proc = transcode_processor(2, 5);
        let outs = proc.process_packet(packet_of(1024, 0)).unwrap();
        // one exact-size silent frame comes out
        assert_eq!(outs.len(), 1);
        assert!(matches!(&outs[0], StageOut::Frame { frame, .. } if frame.num_samples() == 1024));
        assert_eq!(proc.track.decode_error_count, 1);

        proc.process_packet(packet_of(1024, 1024)).unwrap();
        assert_eq!(proc.track.decode_error_count, 2);

        // a successful decode resets the counter
        proc.process_packet(packet_of(1024, 2048)).unwrap();
        assert_eq!(proc.track.decode_error_count, 0);
    }

    #[test]
    fn test_decode_error_budget_exhaustion_is_fatal() {
        let mut proc = transcode_processor(10, 2);
        proc.process_packet(packet_of(1024, 0)).unwrap();
        proc.process_packet(packet_of(1024, 1024)).unwrap();
        let err = proc.process_packet(packet_of(1024, 2048)).unwrap_err();
        assert!(matches!(
            err,
            Error::Codec(CodecError::DecodeBudgetExceeded { track: 2, errors: 3 })
        ));
        // after the fatal report the stage drains quietly
        assert!(proc.process_packet(packet_of(1024, 3072)).unwrap().is_empty());
    }

    #[test]
    fn test_bsf_early_failure_grows_delay() {
        let mut proc = transcode_processor(0, 0);
        proc.track.bsf = Some(Box::new(AlwaysFailBsf));
        let outs = proc.process_packet(packet_of(1024, 0)).unwrap();
        assert_eq!(outs.len(), 1);
        assert!(matches!(
            outs[0],
            StageOut::Delay { chain: 0, samples: 1024 }
        ));
        assert_eq!(proc.track.packets_written, 0);
        assert_eq!(proc.track.bsf_error_streak, 1);
    }

    #[test]
    fn test_bsf_streak_turns_fatal() {
        let mut proc = transcode_processor(0, 0);
        proc.track.bsf = Some(Box::new(AlwaysFailBsf));
        for _ in 0..30 {
            proc.process_packet(packet_of(1024, 0)).unwrap();
        }
        let err = proc.process_packet(packet_of(1024, 0)).unwrap_err();
        assert!(matches!(
            err,
            Error::Codec(CodecError::BitstreamFilterStreak { streak: 31, .. })
        ));
    }

    #[test]
    fn test_bsf_late_failure_synthesizes_silence() {
        let mut proc = transcode_processor(0, 0);
        // one good packet first
        proc.process_packet(packet_of(1024, 0)).unwrap();
        proc.track.bsf = Some(Box::new(AlwaysFailBsf));
        let outs = proc.process_packet(packet_of(1024, 1024)).unwrap();
        assert!(matches!(&outs[0], StageOut::Frame { frame, .. } if frame.num_samples() == 1024));
    }

    #[test]
    fn test_passthrough_frame_size_beats_millisecond_timebase() {
        let mut input = params(48000, 1536, TimeBase::MILLISECONDS);
        input.codec = AudioCodec::Ac3;
        let track = AudioTrack::new_copy(0, 1, input, None, Some(Rational::new(30, 1)));
        let mut proc = AudioProcessor::new(track);
        let mut pkt = Packet::new(vec![0u8; 16]);
        pkt.pts = Timestamp::new(0, TimeBase::MILLISECONDS);
        pkt.duration = Duration::new(32, TimeBase::MILLISECONDS);
        let outs = proc.process_packet(pkt).unwrap();
        assert!(matches!(outs[0], StageOut::Packet { samples: 1536, .. }));
    }

    #[test]
    fn test_passthrough_pts_delta_overrides_duration() {
        let tb = TimeBase::per_sample(48000);
        let input = params(48000, 0, tb);
        let track = AudioTrack::new_copy(0, 1, input, None, Some(Rational::new(30, 1)));
        let mut proc = AudioProcessor::new(track);

        let mut first = Packet::new(vec![0u8; 16]);
        first.pts = Timestamp::new(0, tb);
        first.duration = Duration::new(1024, tb);
        let outs = proc.process_packet(first).unwrap();
        assert!(matches!(outs[0], StageOut::Packet { samples: 1024, .. }));

        // declared duration 1024 but the pts only advanced 960
        let mut second = Packet::new(vec![0u8; 16]);
        second.pts = Timestamp::new(960, tb);
        second.duration = Duration::new(1024, tb);
        let outs = proc.process_packet(second).unwrap();
        assert!(matches!(outs[0], StageOut::Packet { samples: 960, .. }));

        // a gap of a video frame or more keeps the declared duration
        let mut third = Packet::new(vec![0u8; 16]);
        third.pts = Timestamp::new(960 + 4800, tb);
        third.duration = Duration::new(1024, tb);
        let outs = proc.process_packet(third).unwrap();
        assert!(matches!(outs[0], StageOut::Packet { samples: 1024, .. }));
    }
}
