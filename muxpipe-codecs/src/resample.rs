//! Audio resampling and channel remapping.
//!
//! One resampler instance sits between the filter stage and each encoder
//! chain. Its input parameters are cached; when an arriving frame no longer
//! matches them the owning stage drains and rebuilds the instance before
//! admitting the frame.

use muxpipe_core::error::{CodecError, Error, Result};
use muxpipe_core::{ChannelLayout, SampleBuf, SampleFormat, TimeBase, Timestamp};
use tracing::debug;

/// Parameters on one side of a resampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResampleParams {
    /// Channel layout.
    pub layout: ChannelLayout,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Sample format.
    pub format: SampleFormat,
}

impl ResampleParams {
    /// Parameters of a sample buffer.
    pub fn of(buf: &SampleBuf) -> Self {
        Self {
            layout: buf.layout(),
            sample_rate: buf.sample_rate(),
            format: buf.format(),
        }
    }
}

/// Format, layout and rate converter with optional channel selection.
pub struct Resampler {
    input: ResampleParams,
    output: ResampleParams,
    /// For each output channel, the input channel index it is fed from.
    channel_map: Option<Vec<usize>>,
    /// Fractional read position for rate conversion.
    position: f64,
    /// Last input sample of the previous call, per output channel.
    prev: Vec<f32>,
    /// Next output pts, tracked at the output rate.
    next_pts: Timestamp,
}

impl Resampler {
    /// Create a resampler.
    ///
    /// `channel_select` restricts the input to a sub-layout before the
    /// output layout is filled; the selection becomes a channel-index remap.
    pub fn new(
        input: ResampleParams,
        output: ResampleParams,
        channel_select: Option<ChannelLayout>,
    ) -> Result<Self> {
        if input.sample_rate == 0 || output.sample_rate == 0 {
            return Err(Error::Codec(CodecError::Resample(
                "sample rate must be non-zero".into(),
            )));
        }
        let channel_map = build_channel_map(input.layout, output.layout, channel_select)?;
        if channel_map.is_some() {
            debug!(?channel_map, "channel mapping configured");
        }
        let out_channels = output.layout.channels().max(1);
        Ok(Self {
            input,
            output,
            channel_map,
            position: 0.0,
            prev: vec![0.0; out_channels],
            next_pts: Timestamp::none(),
        })
    }

    /// The cached input parameters.
    pub fn input_params(&self) -> ResampleParams {
        self.input
    }

    /// The output parameters.
    pub fn output_params(&self) -> ResampleParams {
        self.output
    }

    /// Whether a frame matches the cached input parameters.
    pub fn matches_input(&self, buf: &SampleBuf) -> bool {
        ResampleParams::of(buf) == self.input
    }

    /// Convert one frame; `None` drains the converter.
    ///
    /// Returns `None` when the conversion yields no samples.
    pub fn convert(&mut self, frame: Option<&SampleBuf>) -> Result<Option<SampleBuf>> {
        let Some(frame) = frame else {
            // linear interpolation holds no whole pending samples
            return Ok(None);
        };
        if frame.is_empty() {
            return Ok(None);
        }
        if !self.matches_input(frame) {
            return Err(Error::Codec(CodecError::Resample(format!(
                "frame parameters {:?} do not match resampler input {:?}",
                ResampleParams::of(frame),
                self.input
            ))));
        }
        if !frame.pts.is_valid() || !self.next_pts.is_valid() {
            self.next_pts = frame
                .pts
                .rescale(TimeBase::per_sample(self.output.sample_rate));
        }

        let in_channels = self.input.layout.channels().max(1);
        let out_channels = self.output.layout.channels().max(1);
        let mut mapped: Vec<Vec<f32>> = Vec::with_capacity(out_channels);
        for out_ch in 0..out_channels {
            let src_ch = match &self.channel_map {
                Some(map) => map[out_ch],
                None => out_ch.min(in_channels - 1),
            };
            mapped.push(read_channel_f32(frame, src_ch));
        }

        let converted: Vec<Vec<f32>> = if self.input.sample_rate == self.output.sample_rate {
            mapped
        } else {
            self.rate_convert(&mapped)
        };

        let num_samples = converted.first().map_or(0, Vec::len);
        if num_samples == 0 {
            return Ok(None);
        }

        let mut out = write_format(
            &converted,
            self.output.format,
            self.output.layout,
            self.output.sample_rate,
            num_samples,
        );
        out.pts = self.next_pts;
        if self.next_pts.is_valid() {
            self.next_pts = Timestamp::new(
                self.next_pts.value + num_samples as i64,
                TimeBase::per_sample(self.output.sample_rate),
            );
        }
        Ok(Some(out))
    }

    /// Linear-interpolation rate conversion, keeping fractional position and
    /// the previous edge sample across calls.
    fn rate_convert(&mut self, channels: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let ratio = self.input.sample_rate as f64 / self.output.sample_rate as f64;
        let input_len = channels.first().map_or(0, Vec::len);
        let mut out: Vec<Vec<f32>> = vec![Vec::new(); channels.len()];

        let mut pos = self.position;
        while (pos as usize) < input_len {
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            for (ch, samples) in channels.iter().enumerate() {
                let s0 = if idx > 0 {
                    samples[idx - 1]
                } else {
                    self.prev[ch]
                };
                let s1 = samples[idx];
                out[ch].push(s0 + (s1 - s0) * frac);
            }
            pos += ratio;
        }
        self.position = pos - input_len as f64;
        for (ch, samples) in channels.iter().enumerate() {
            if let Some(&last) = samples.last() {
                self.prev[ch] = last;
            }
        }
        out
    }
}

/// Build the output-to-input channel-index map implied by a selector.
fn build_channel_map(
    input: ChannelLayout,
    output: ChannelLayout,
    select: Option<ChannelLayout>,
) -> Result<Option<Vec<usize>>> {
    let Some(select) = select else {
        return Ok(None);
    };
    let in_channels = input.channels().max(1);
    if select == input || select.channels() >= in_channels {
        return Ok(None);
    }
    let select_count = select.channels();
    if select_count == 0 {
        return Err(Error::Codec(CodecError::Resample(
            "empty channel selection".into(),
        )));
    }
    let out_channels = output.channels().max(1);
    let mut map = Vec::with_capacity(out_channels);
    for out_ch in 0..out_channels {
        let wanted = select
            .extract_channel(out_ch.min(select_count - 1))
            .expect("index bounded by channel count");
        let index = match input.index_of(wanted) {
            Some(index) => index,
            None => {
                // selected speaker absent from the source: fall back to the
                // source channel at the same position
                let fallback = input
                    .extract_channel(out_ch.min(in_channels - 1))
                    .expect("index bounded by channel count");
                input.index_of(fallback).unwrap_or(0)
            }
        };
        map.push(index);
    }
    Ok(Some(map))
}

/// Read one input channel as f32 samples.
fn read_channel_f32(buf: &SampleBuf, channel: usize) -> Vec<f32> {
    let format = buf.format();
    let bps = format.bytes_per_sample();
    let channels = buf.channels();
    let n = buf.num_samples();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let raw = if format.is_planar() {
            &buf.planes()[channel][i * bps..(i + 1) * bps]
        } else {
            let base = (i * channels + channel) * bps;
            &buf.planes()[0][base..base + bps]
        };
        out.push(sample_to_f32(format, raw));
    }
    out
}

fn sample_to_f32(format: SampleFormat, raw: &[u8]) -> f32 {
    match format.to_packed() {
        SampleFormat::U8 => (raw[0] as f32 - 128.0) / 128.0,
        SampleFormat::S16 => i16::from_le_bytes([raw[0], raw[1]]) as f32 / 32768.0,
        SampleFormat::S32 => {
            i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f32 / 2147483648.0
        }
        SampleFormat::F32 => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
        SampleFormat::F64 => f64::from_le_bytes([
            raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
        ]) as f32,
        _ => 0.0,
    }
}

fn f32_to_sample(format: SampleFormat, value: f32, dst: &mut [u8]) {
    match format.to_packed() {
        SampleFormat::U8 => dst[0] = ((value.clamp(-1.0, 1.0) * 127.0) + 128.0) as u8,
        SampleFormat::S16 => {
            let v = (value.clamp(-1.0, 1.0) * 32767.0) as i16;
            dst.copy_from_slice(&v.to_le_bytes());
        }
        SampleFormat::S32 => {
            let v = (value.clamp(-1.0, 1.0) as f64 * 2147483647.0) as i32;
            dst.copy_from_slice(&v.to_le_bytes());
        }
        SampleFormat::F32 => dst.copy_from_slice(&value.to_le_bytes()),
        SampleFormat::F64 => dst.copy_from_slice(&(value as f64).to_le_bytes()),
        _ => {}
    }
}

/// Materialize per-channel f32 data as a sample buffer in `format`.
fn write_format(
    channels: &[Vec<f32>],
    format: SampleFormat,
    layout: ChannelLayout,
    sample_rate: u32,
    num_samples: usize,
) -> SampleBuf {
    let mut out = SampleBuf::new(format, layout, sample_rate, num_samples);
    let bps = format.bytes_per_sample();
    let channel_count = channels.len();
    if format.is_planar() {
        for (ch, samples) in channels.iter().enumerate() {
            let plane = &mut out.planes_mut()[ch];
            for (i, &v) in samples.iter().enumerate() {
                f32_to_sample(format, v, &mut plane[i * bps..(i + 1) * bps]);
            }
        }
    } else {
        let plane = &mut out.planes_mut()[0];
        for i in 0..num_samples {
            for (ch, samples) in channels.iter().enumerate() {
                let base = (i * channel_count + ch) * bps;
                f32_to_sample(format, samples[i], &mut plane[base..base + bps]);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(layout: ChannelLayout, rate: u32, format: SampleFormat) -> ResampleParams {
        ResampleParams {
            layout,
            sample_rate: rate,
            format,
        }
    }

    fn f32_frame(layout: ChannelLayout, rate: u32, samples: &[f32]) -> SampleBuf {
        let channels = layout.channels().max(1);
        assert_eq!(samples.len() % channels, 0);
        let mut buf = SampleBuf::new(SampleFormat::F32, layout, rate, samples.len() / channels);
        for (i, v) in samples.iter().enumerate() {
            buf.planes_mut()[0][i * 4..(i + 1) * 4].copy_from_slice(&v.to_le_bytes());
        }
        buf
    }

    #[test]
    fn test_format_only_conversion() {
        let mut rs = Resampler::new(
            params(ChannelLayout::MONO, 48000, SampleFormat::F32),
            params(ChannelLayout::MONO, 48000, SampleFormat::S16),
            None,
        )
        .unwrap();
        let frame = f32_frame(ChannelLayout::MONO, 48000, &[0.5, -0.5]);
        let out = rs.convert(Some(&frame)).unwrap().unwrap();
        assert_eq!(out.format(), SampleFormat::S16);
        assert_eq!(out.num_samples(), 2);
        let v = i16::from_le_bytes([out.planes()[0][0], out.planes()[0][1]]);
        assert!((v - 16383).abs() <= 1);
    }

    #[test]
    fn test_packed_to_planar() {
        let mut rs = Resampler::new(
            params(ChannelLayout::STEREO, 48000, SampleFormat::F32),
            params(ChannelLayout::STEREO, 48000, SampleFormat::F32p),
            None,
        )
        .unwrap();
        let frame = f32_frame(ChannelLayout::STEREO, 48000, &[0.1, 0.9, 0.2, 0.8]);
        let out = rs.convert(Some(&frame)).unwrap().unwrap();
        assert_eq!(out.planes().len(), 2);
        let left0 = f32::from_le_bytes(out.planes()[0][0..4].try_into().unwrap());
        let right0 = f32::from_le_bytes(out.planes()[1][0..4].try_into().unwrap());
        assert!((left0 - 0.1).abs() < 1e-6);
        assert!((right0 - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_downsample_halves_count() {
        let mut rs = Resampler::new(
            params(ChannelLayout::MONO, 48000, SampleFormat::F32),
            params(ChannelLayout::MONO, 24000, SampleFormat::F32),
            None,
        )
        .unwrap();
        let frame = f32_frame(ChannelLayout::MONO, 48000, &[0.0; 480]);
        let out = rs.convert(Some(&frame)).unwrap().unwrap();
        assert_eq!(out.num_samples(), 240);
    }

    #[test]
    fn test_channel_select_remaps() {
        // extract FC from 5.1 into mono: index 2
        let mut rs = Resampler::new(
            params(ChannelLayout::SURROUND_5_1, 48000, SampleFormat::F32),
            params(ChannelLayout::MONO, 48000, SampleFormat::F32),
            Some(ChannelLayout::FRONT_CENTER),
        )
        .unwrap();
        // one sample: FL FR FC LFE BL BR
        let frame = f32_frame(
            ChannelLayout::SURROUND_5_1,
            48000,
            &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
        );
        let out = rs.convert(Some(&frame)).unwrap().unwrap();
        let v = f32::from_le_bytes(out.planes()[0][0..4].try_into().unwrap());
        assert!((v - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_param_mismatch_rejected() {
        let mut rs = Resampler::new(
            params(ChannelLayout::MONO, 48000, SampleFormat::F32),
            params(ChannelLayout::MONO, 48000, SampleFormat::S16),
            None,
        )
        .unwrap();
        let frame = f32_frame(ChannelLayout::STEREO, 48000, &[0.0, 0.0]);
        assert!(rs.convert(Some(&frame)).is_err());
        assert!(!rs.matches_input(&frame));
    }

    #[test]
    fn test_pts_tracks_output_rate() {
        let mut rs = Resampler::new(
            params(ChannelLayout::MONO, 48000, SampleFormat::F32),
            params(ChannelLayout::MONO, 48000, SampleFormat::F32),
            None,
        )
        .unwrap();
        let mut frame = f32_frame(ChannelLayout::MONO, 48000, &[0.0; 100]);
        frame.pts = Timestamp::new(1000, TimeBase::per_sample(48000));
        let first = rs.convert(Some(&frame)).unwrap().unwrap();
        assert_eq!(first.pts.value, 1000);
        let second = rs.convert(Some(&frame)).unwrap().unwrap();
        assert_eq!(second.pts.value, 1100);
    }

    #[test]
    fn test_drain_is_empty() {
        let mut rs = Resampler::new(
            params(ChannelLayout::MONO, 48000, SampleFormat::F32),
            params(ChannelLayout::MONO, 24000, SampleFormat::F32),
            None,
        )
        .unwrap();
        assert!(rs.convert(None).unwrap().is_none());
    }
}
