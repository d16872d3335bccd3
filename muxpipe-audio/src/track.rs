//! Per-track audio state.
//!
//! A track owns the shared front half of the chain (bitstream filter,
//! decoder, filter chain) and one output chain per sub-stream. Sub-streams
//! never own a decoder; they receive clones of the primary's decoded frames
//! and run their own resampler and carry buffer.

use muxpipe_codecs::{
    pcm_conversion_target, AudioDecoder, AudioEncoder, AudioFilter, BitstreamFilter, PcmDecoder,
    PcmEncoder, ResampleParams, Resampler,
};
use muxpipe_core::error::{CodecError, Error, Result};
use muxpipe_core::{AudioCodec, ChannelLayout, Rational, SampleBuf, Timestamp};
use tracing::debug;

use muxpipe_codecs::AudioParams;

/// Stable identity of an input audio (sub-)stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioTrackId {
    /// Input container stream index.
    pub in_index: u32,
    /// Input track id (positive for audio).
    pub track_id: i32,
    /// Sub-stream ordinal, 0 for the primary.
    pub sub_stream: u32,
}

/// A filter chain with cached input parameters and a pending partial frame.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn AudioFilter>>,
    cached_input: Option<ResampleParams>,
    pending: Option<SampleBuf>,
}

impl FilterChain {
    /// Create a chain from filter instances; an empty list is a no-op chain.
    pub fn new(filters: Vec<Box<dyn AudioFilter>>) -> Self {
        Self {
            filters,
            cached_input: None,
            pending: None,
        }
    }

    /// Whether any filters are configured.
    pub fn is_active(&self) -> bool {
        !self.filters.is_empty()
    }

    /// Push one frame through the chain, coalescing the outputs with any
    /// pending partial frame.
    ///
    /// On input-parameter drift the chain is flushed first; flushed output
    /// is prepended to the result.
    pub fn process(&mut self, frame: SampleBuf) -> Result<Option<SampleBuf>> {
        if !self.is_active() {
            return Ok(Some(frame));
        }
        let params = ResampleParams::of(&frame);
        let mut flushed = None;
        if let Some(cached) = self.cached_input {
            if cached != params {
                debug!(?cached, ?params, "audio filter input drift, reinitializing");
                flushed = self.flush()?;
            }
        }
        self.cached_input = Some(params);

        let mut combined = flushed;
        let mut queue = vec![frame];
        for filter in &mut self.filters {
            let mut next = Vec::new();
            for f in queue.drain(..) {
                next.extend(filter.process(f)?);
            }
            queue = next;
        }
        for out in queue {
            match &mut combined {
                Some(acc) if acc.params_match(&out) => acc.append(&out),
                Some(_) | None => {
                    if let Some(prev) = combined.take() {
                        // parameter change mid-drain: hand back the earlier
                        // frame via pending and start over
                        self.pending = Some(prev);
                    }
                    combined = Some(out);
                }
            }
        }
        if let Some(pending) = self.pending.take() {
            match &mut combined {
                Some(acc) if pending.params_match(acc) => {
                    let mut merged = pending;
                    merged.append(acc);
                    combined = Some(merged);
                }
                Some(_) => self.pending = Some(pending),
                None => combined = Some(pending),
            }
        }
        Ok(combined)
    }

    /// Drain the chain.
    pub fn flush(&mut self) -> Result<Option<SampleBuf>> {
        let mut combined: Option<SampleBuf> = self.pending.take();
        for filter in &mut self.filters {
            for out in filter.flush()? {
                match &mut combined {
                    Some(acc) if acc.params_match(&out) => acc.append(&out),
                    Some(_) | None => combined = Some(out),
                }
            }
        }
        self.cached_input = None;
        Ok(combined)
    }
}

/// Requested configuration of one output chain.
pub struct SubStreamSpec {
    /// Channel selector applied inside the resampler, as a layout mask.
    pub channel_select: Option<ChannelLayout>,
    /// Output layout override.
    pub channel_out: Option<ChannelLayout>,
    /// The encoder for this chain, if re-encoding.
    pub encoder: Option<Box<dyn AudioEncoder>>,
}

/// One output chain of a track (the primary or a sub-stream).
pub struct OutputChain {
    /// Sub-stream ordinal.
    pub sub_stream: u32,
    /// Channel selector, as a layout mask.
    pub channel_select: Option<ChannelLayout>,
    /// Resampler feeding the encoder, when conversion is needed.
    pub resampler: Option<Resampler>,
    /// Parameters the encoder consumes (resampler output side).
    pub encoder_input: Option<ResampleParams>,
    /// Samples the encoder requires per call (0 = any).
    pub encoder_frame_size: usize,
    /// Encoder output sample rate (stamping rate for this chain).
    pub encoder_rate: u32,
    /// Leftover samples below `encoder_frame_size` carried to the next
    /// frame.
    pub carry: Option<SampleBuf>,
}

impl OutputChain {
    /// A chain that passes decoded frames straight through (no encoder).
    pub fn passthrough(sub_stream: u32, rate: u32) -> Self {
        Self {
            sub_stream,
            channel_select: None,
            resampler: None,
            encoder_input: None,
            encoder_frame_size: 0,
            encoder_rate: rate,
            carry: None,
        }
    }

    /// Concatenate `frame` with the carry buffer and cut exact
    /// `encoder_frame_size` slices; the remainder becomes the new carry.
    ///
    /// With no fixed frame size the frame passes through whole.
    pub fn cut_frames(&mut self, frame: SampleBuf) -> Vec<SampleBuf> {
        if self.encoder_frame_size == 0 {
            return vec![frame];
        }
        let mut out = Vec::new();
        let mut acc = match self.carry.take() {
            Some(mut carry) if carry.params_match(&frame) => {
                carry.append(&frame);
                carry
            }
            Some(carry) => {
                // parameter change: release the stale carry as a short frame
                out.push(carry);
                frame
            }
            None => frame,
        };
        while acc.num_samples() >= self.encoder_frame_size {
            out.push(acc.split_to(self.encoder_frame_size));
        }
        if !acc.is_empty() {
            self.carry = Some(acc);
        }
        out
    }
}

/// Per-track audio state.
///
/// The decoder and filter chain live on the track (sub-streams borrow the
/// primary's decode output); resamplers and carry buffers live on the
/// chains. Encoders are handed to the scheduler's encode stage at
/// construction.
pub struct AudioTrack {
    /// Input stream index.
    pub in_index: u32,
    /// Input track id.
    pub track_id: i32,
    /// Input stream parameters.
    pub input: AudioParams,
    /// Stream-level bitstream filter, e.g. AAC ADTS to ASC.
    pub bsf: Option<Box<dyn BitstreamFilter>>,
    /// Decoder; absent for copy mode.
    pub decoder: Option<Box<dyn AudioDecoder>>,
    /// Filter chain between decode and resample.
    pub filters: FilterChain,
    /// Output chains, primary first.
    pub chains: Vec<OutputChain>,
    /// Parameters of frames entering the resamplers, resolved at build
    /// time. Silence synthesized on decode errors uses these.
    pub decoded_params: Option<ResampleParams>,
    /// Video frame rate, for pass-through duration sanity checks.
    pub video_fps: Option<Rational>,

    /// Packets accepted so far (after bitstream filtering).
    pub packets_written: u64,
    /// pts of the previous input packet, in the input time base.
    pub last_pts_in: Timestamp,
    /// Consecutive bitstream-filter failures from the start of the stream.
    pub bsf_error_streak: u32,
    /// Decode failures so far.
    pub decode_error_count: u32,
    /// Decode failures tolerated before the track turns fatal.
    pub ignore_decode_error: u32,
}

impl AudioTrack {
    /// Build a copy-mode track (no decode/encode).
    pub fn new_copy(
        in_index: u32,
        track_id: i32,
        input: AudioParams,
        bsf: Option<Box<dyn BitstreamFilter>>,
        video_fps: Option<Rational>,
    ) -> Self {
        Self {
            in_index,
            track_id,
            input,
            bsf,
            decoder: None,
            filters: FilterChain::default(),
            chains: vec![OutputChain::passthrough(0, input.sample_rate)],
            decoded_params: None,
            video_fps,
            packets_written: 0,
            last_pts_in: Timestamp::none(),
            bsf_error_streak: 0,
            decode_error_count: 0,
            ignore_decode_error: 0,
        }
    }

    /// Build a transcoding track.
    ///
    /// Returns the track plus the encoder bank (one entry per chain, in
    /// chain order) for the scheduler's encode stage.
    #[allow(clippy::too_many_arguments)]
    pub fn new_transcode(
        in_index: u32,
        track_id: i32,
        input: AudioParams,
        decoder: Box<dyn AudioDecoder>,
        filters: Vec<Box<dyn AudioFilter>>,
        substreams: Vec<SubStreamSpec>,
        ignore_decode_error: u32,
        video_fps: Option<Rational>,
    ) -> Result<(Self, Vec<Option<Box<dyn AudioEncoder>>>)> {
        if substreams.is_empty() {
            return Err(Error::Config("a track needs at least one chain".into()));
        }
        let decoded = decoder.output_params();
        if decoded.sample_rate == 0 {
            return Err(Error::Codec(CodecError::Resample(
                "decoder output parameters unresolved".into(),
            )));
        }
        let decoded_params = ResampleParams {
            layout: decoded.layout,
            sample_rate: decoded.sample_rate,
            format: decoded.format,
        };

        let mut chains = Vec::with_capacity(substreams.len());
        let mut encoders = Vec::with_capacity(substreams.len());
        for (sub_stream, spec) in substreams.into_iter().enumerate() {
            let chain = match &spec.encoder {
                Some(encoder) => {
                    let enc_in = encoder.input_params();
                    let target = ResampleParams {
                        layout: spec.channel_out.unwrap_or(enc_in.layout),
                        sample_rate: enc_in.sample_rate,
                        format: enc_in.format,
                    };
                    let needs_resample = (!enc_in.codec.is_pcm()
                        && target.format != decoded_params.format)
                        || target.sample_rate != decoded_params.sample_rate
                        || target.layout.channels() != decoded_params.layout.channels()
                        || spec.channel_select.is_some()
                        || spec.channel_out.is_some();
                    let resampler = if needs_resample {
                        Some(Resampler::new(
                            decoded_params,
                            target,
                            spec.channel_select,
                        )?)
                    } else {
                        None
                    };
                    OutputChain {
                        sub_stream: sub_stream as u32,
                        channel_select: spec.channel_select,
                        resampler,
                        encoder_input: Some(target),
                        encoder_frame_size: encoder.frame_size(),
                        encoder_rate: enc_in.sample_rate,
                        carry: None,
                    }
                }
                None => OutputChain::passthrough(sub_stream as u32, decoded.sample_rate),
            };
            chains.push(chain);
            encoders.push(spec.encoder);
        }

        Ok((
            Self {
                in_index,
                track_id,
                input,
                bsf: None,
                decoder: Some(decoder),
                filters: FilterChain::new(filters),
                chains,
                decoded_params: Some(decoded_params),
                video_fps,
                packets_written: 0,
                last_pts_in: Timestamp::none(),
                bsf_error_streak: 0,
                decode_error_count: 0,
                ignore_decode_error,
            },
            encoders,
        ))
    }

    /// Build a PCM conversion track when the source variant cannot be
    /// muxed directly, per the conversion table.
    ///
    /// Returns `None` when the source needs no conversion.
    #[allow(clippy::type_complexity)]
    pub fn new_pcm_conversion(
        in_index: u32,
        track_id: i32,
        input: AudioParams,
        ignore_decode_error: u32,
        video_fps: Option<Rational>,
    ) -> Result<Option<(Self, Vec<Option<Box<dyn AudioEncoder>>>)>> {
        let Some(target) = pcm_conversion_target(input.codec, input.bits_per_raw_sample) else {
            return Ok(None);
        };
        let AudioCodec::Pcm(source) = input.codec else {
            return Ok(None);
        };
        let decoder = PcmDecoder::new(source, input.sample_rate, input.layout)?;
        let encoder = PcmEncoder::new(target, input.sample_rate, input.layout)?;
        debug!(track_id, %source, %target, "PCM requires conversion");
        Self::new_transcode(
            in_index,
            track_id,
            input,
            Box::new(decoder),
            Vec::new(),
            vec![SubStreamSpec {
                channel_select: None,
                channel_out: None,
                encoder: Some(Box::new(encoder)),
            }],
            ignore_decode_error,
            video_fps,
        )
        .map(Some)
    }

    /// Identity of a chain of this track.
    pub fn chain_id(&self, chain: usize) -> AudioTrackId {
        AudioTrackId {
            in_index: self.in_index,
            track_id: self.track_id,
            sub_stream: chain as u32,
        }
    }
}

/// Whether an audio stream needs the ADTS-to-ASC bitstream filter: AAC
/// without extradata, muxed next to a video stream (MP4/Matroska output).
pub fn wants_adts_to_asc(input: &AudioParams, has_extradata: bool, has_video: bool) -> bool {
    input.codec == AudioCodec::Aac && !has_extradata && has_video
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxpipe_codecs::{PcmDecoder, PcmEncoder};
    use muxpipe_core::{AudioCodec, PcmFormat, SampleFormat, TimeBase};

    fn input_params() -> AudioParams {
        AudioParams {
            codec: AudioCodec::Pcm(PcmFormat::S16Be),
            sample_rate: 48000,
            layout: ChannelLayout::STEREO,
            format: SampleFormat::S16,
            bits_per_raw_sample: 16,
            frame_size: 0,
            time_base: TimeBase::per_sample(48000),
        }
    }

    #[test]
    fn test_copy_track_has_single_chain() {
        let track = AudioTrack::new_copy(0, 1, input_params(), None, None);
        assert_eq!(track.chains.len(), 1);
        assert!(track.decoder.is_none());
        assert_eq!(track.chain_id(0).sub_stream, 0);
    }

    #[test]
    fn test_transcode_track_builds_resampler_on_mismatch() {
        let decoder =
            PcmDecoder::new(PcmFormat::S16Be, 48000, ChannelLayout::STEREO).unwrap();
        // mono target forces a resampler
        let encoder = PcmEncoder::new(PcmFormat::S16Le, 48000, ChannelLayout::MONO).unwrap();
        let (track, encoders) = AudioTrack::new_transcode(
            0,
            1,
            input_params(),
            Box::new(decoder),
            Vec::new(),
            vec![SubStreamSpec {
                channel_select: None,
                channel_out: None,
                encoder: Some(Box::new(encoder)),
            }],
            0,
            None,
        )
        .unwrap();
        assert_eq!(track.chains.len(), 1);
        assert!(track.chains[0].resampler.is_some());
        assert_eq!(encoders.len(), 1);
        assert!(encoders[0].is_some());
    }

    #[test]
    fn test_transcode_track_skips_resampler_when_matched() {
        let decoder =
            PcmDecoder::new(PcmFormat::S16Be, 48000, ChannelLayout::STEREO).unwrap();
        let encoder = PcmEncoder::new(PcmFormat::S16Le, 48000, ChannelLayout::STEREO).unwrap();
        let (track, _) = AudioTrack::new_transcode(
            0,
            1,
            input_params(),
            Box::new(decoder),
            Vec::new(),
            vec![SubStreamSpec {
                channel_select: None,
                channel_out: None,
                encoder: Some(Box::new(encoder)),
            }],
            0,
            None,
        )
        .unwrap();
        // PCM target with equal rate/channels: no resampler
        assert!(track.chains[0].resampler.is_none());
    }

    #[test]
    fn test_pcm_conversion_auto() {
        // big-endian source converts
        let mut input = input_params();
        input.bits_per_raw_sample = 16;
        let converted = AudioTrack::new_pcm_conversion(0, 1, input, 0, None).unwrap();
        let (track, encoders) = converted.expect("s16be needs conversion");
        assert!(track.decoder.is_some());
        assert!(encoders[0].is_some());

        // wrapped DVD LPCM converts, with the target picked from the raw
        // sample depth
        let mut input = input_params();
        input.codec = AudioCodec::Pcm(PcmFormat::Dvd);
        input.bits_per_raw_sample = 24;
        let converted = AudioTrack::new_pcm_conversion(0, 1, input, 0, None).unwrap();
        let (track, encoders) = converted.expect("dvd lpcm needs conversion");
        assert!(track.decoder.is_some());
        assert!(encoders[0].is_some());

        // little-endian source passes through untouched
        let mut input = input_params();
        input.codec = AudioCodec::Pcm(PcmFormat::S16Le);
        assert!(AudioTrack::new_pcm_conversion(0, 1, input, 0, None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_wants_adts_to_asc() {
        let mut input = input_params();
        input.codec = AudioCodec::Aac;
        assert!(wants_adts_to_asc(&input, false, true));
        assert!(!wants_adts_to_asc(&input, true, true));
        assert!(!wants_adts_to_asc(&input, false, false));
        input.codec = AudioCodec::Ac3;
        assert!(!wants_adts_to_asc(&input, false, true));
    }
}
