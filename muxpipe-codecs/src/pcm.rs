//! PCM conversion.
//!
//! Sources deliver PCM in variants most containers will not take directly:
//! big endian, planar, float, or wrapped (DVD/Blu-ray). The decoder unpacks
//! any variant into native sample buffers; the encoder writes the
//! little-endian target variant selected by [`pcm_conversion_target`].

use crate::traits::{AudioDecoder, AudioEncoder, AudioParams, CodecInfo};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use muxpipe_core::error::{CodecError, Error, Result};
use muxpipe_core::{
    AudioCodec, ChannelLayout, Duration, Packet, PcmFormat, SampleBuf, SampleFormat, TimeBase,
    Timestamp,
};

/// The container-ready target for a source PCM variant, or `None` when the
/// source can be muxed as-is (or is not PCM at all).
///
/// Wrapped variants (DVD/Blu-ray) pick their target from
/// `bits_per_raw_sample`.
pub fn pcm_conversion_target(codec: AudioCodec, bits_per_raw_sample: u8) -> Option<PcmFormat> {
    let AudioCodec::Pcm(format) = codec else {
        return None;
    };
    let by_bits = |bits: u8| match bits {
        32 => PcmFormat::S32Le,
        24 => PcmFormat::S24Le,
        _ => PcmFormat::S16Le,
    };
    match format {
        PcmFormat::Dvd | PcmFormat::BluRay => Some(by_bits(bits_per_raw_sample)),
        PcmFormat::S8Planar => Some(PcmFormat::S8),
        PcmFormat::S16LePlanar | PcmFormat::S16BePlanar | PcmFormat::S16Be => {
            Some(PcmFormat::S16Le)
        }
        PcmFormat::S24LePlanar | PcmFormat::S24Be => Some(PcmFormat::S24Le),
        PcmFormat::S32LePlanar | PcmFormat::S32Be => Some(PcmFormat::S32Le),
        PcmFormat::F32Be | PcmFormat::F64Be => Some(PcmFormat::S32Le),
        _ => None,
    }
}

/// The native sample format a PCM variant unpacks into.
fn unpacked_format(format: PcmFormat) -> SampleFormat {
    match format {
        PcmFormat::U8 => SampleFormat::U8,
        PcmFormat::S8 | PcmFormat::S8Planar => SampleFormat::S16,
        PcmFormat::S16Le | PcmFormat::S16Be | PcmFormat::S16LePlanar | PcmFormat::S16BePlanar => {
            SampleFormat::S16
        }
        PcmFormat::F32Le | PcmFormat::F32Be => SampleFormat::F32,
        PcmFormat::F64Le | PcmFormat::F64Be => SampleFormat::F64,
        _ => SampleFormat::S32,
    }
}

/// Bytes one stored sample occupies in the source stream.
fn stored_bytes(format: PcmFormat) -> usize {
    match format {
        PcmFormat::U8 | PcmFormat::S8 | PcmFormat::S8Planar => 1,
        PcmFormat::S16Le | PcmFormat::S16Be | PcmFormat::S16LePlanar | PcmFormat::S16BePlanar => 2,
        PcmFormat::S24Le | PcmFormat::S24Be | PcmFormat::S24LePlanar => 3,
        PcmFormat::F64Le | PcmFormat::F64Be => 8,
        _ => 4,
    }
}

/// Decoder unpacking PCM variants into native packed sample buffers.
pub struct PcmDecoder {
    source: PcmFormat,
    sample_rate: u32,
    layout: ChannelLayout,
    time_base: TimeBase,
}

/// DVD LPCM per-packet header length (emphasis, quantization, dynamic
/// range).
const DVD_HEADER_LEN: usize = 3;

/// Blu-ray LPCM per-packet header length (frame info, layout, bit depth).
const BLURAY_HEADER_LEN: usize = 4;

impl PcmDecoder {
    /// Create a decoder for one PCM variant.
    pub fn new(source: PcmFormat, sample_rate: u32, layout: ChannelLayout) -> Result<Self> {
        Ok(Self {
            source,
            sample_rate,
            layout,
            time_base: TimeBase::per_sample(sample_rate),
        })
    }

    fn decode_error(&self, message: impl Into<String>) -> Error {
        Error::Codec(CodecError::Decode {
            track: 0,
            message: message.into(),
        })
    }

    /// Unpack one DVD LPCM packet.
    ///
    /// After the 3-byte header, 16-bit audio is plain big-endian words.
    /// 20- and 24-bit audio comes in sample groups of two samples per
    /// channel: the 16-bit most significant words of every sample first
    /// (sample-major), then the low bits — one nibble per sample packed
    /// pairwise for 20-bit, one byte per sample for 24-bit.
    fn decode_dvd(&self, packet: &Packet) -> Result<SampleBuf> {
        let channels = self.layout.channels().max(1);
        let data = &packet.data;
        if data.len() < DVD_HEADER_LEN {
            return Err(self.decode_error("DVD LPCM packet shorter than its header"));
        }
        let quant = data[1] >> 6;
        let header_channels = 1 + (data[1] & 0x07) as usize;
        if header_channels != channels {
            return Err(self.decode_error(format!(
                "DVD LPCM header declares {header_channels} channels, stream has {channels}"
            )));
        }
        let payload = &data[DVD_HEADER_LEN..];
        let mut samples = Vec::new();
        match quant {
            0 => {
                if payload.len() % (2 * channels) != 0 {
                    return Err(self.decode_error("ragged 16-bit DVD LPCM payload"));
                }
                samples.extend(
                    payload
                        .chunks_exact(2)
                        .map(|word| (BigEndian::read_i16(word) as i32) << 16),
                );
            }
            1 => {
                let group = 5 * channels;
                if payload.len() % group != 0 {
                    return Err(self.decode_error("ragged 20-bit DVD LPCM sample group"));
                }
                for block in payload.chunks_exact(group) {
                    let (msb, nibbles) = block.split_at(4 * channels);
                    for sample in 0..2 {
                        for ch in 0..channels {
                            let word = &msb[(sample * channels + ch) * 2..][..2];
                            let high = BigEndian::read_u16(word) as u32;
                            let nibble = if sample == 0 {
                                nibbles[ch] >> 4
                            } else {
                                nibbles[ch] & 0x0F
                            };
                            samples.push((((high << 4) | nibble as u32) << 12) as i32);
                        }
                    }
                }
            }
            2 => {
                let group = 6 * channels;
                if payload.len() % group != 0 {
                    return Err(self.decode_error("ragged 24-bit DVD LPCM sample group"));
                }
                for block in payload.chunks_exact(group) {
                    let (msb, lsb) = block.split_at(4 * channels);
                    for sample in 0..2 {
                        for ch in 0..channels {
                            let index = sample * channels + ch;
                            let high = BigEndian::read_u16(&msb[index * 2..][..2]) as u32;
                            let low = lsb[index] as u32;
                            samples.push((((high << 8) | low) << 8) as i32);
                        }
                    }
                }
            }
            _ => return Err(self.decode_error("invalid DVD LPCM quantization code")),
        }
        Ok(self.packed_s32(samples, packet.pts))
    }

    /// Unpack one Blu-ray LPCM packet.
    ///
    /// After the 4-byte header, 16-bit audio is big-endian words; 20- and
    /// 24-bit audio is one big-endian 3-byte value per sample, 20-bit
    /// left-aligned.
    fn decode_bluray(&self, packet: &Packet) -> Result<SampleBuf> {
        let channels = self.layout.channels().max(1);
        let data = &packet.data;
        if data.len() < BLURAY_HEADER_LEN {
            return Err(self.decode_error("Blu-ray LPCM packet shorter than its header"));
        }
        let bits_code = data[3] >> 6;
        let payload = &data[BLURAY_HEADER_LEN..];
        let samples: Vec<i32> = match bits_code {
            1 => {
                if payload.len() % (2 * channels) != 0 {
                    return Err(self.decode_error("ragged 16-bit Blu-ray LPCM payload"));
                }
                payload
                    .chunks_exact(2)
                    .map(|word| (BigEndian::read_i16(word) as i32) << 16)
                    .collect()
            }
            2 | 3 => {
                if payload.len() % (3 * channels) != 0 {
                    return Err(self.decode_error("ragged Blu-ray LPCM payload"));
                }
                payload
                    .chunks_exact(3)
                    .map(|triple| BigEndian::read_i24(triple) << 8)
                    .collect()
            }
            _ => return Err(self.decode_error("invalid Blu-ray LPCM bit depth code")),
        };
        Ok(self.packed_s32(samples, packet.pts))
    }

    /// Materialize interleaved full-scale values as a packed S32 buffer.
    fn packed_s32(&self, samples: Vec<i32>, pts: Timestamp) -> SampleBuf {
        let channels = self.layout.channels().max(1);
        let num_samples = samples.len() / channels;
        let mut out = SampleBuf::new(SampleFormat::S32, self.layout, self.sample_rate, num_samples);
        {
            let plane = &mut out.planes_mut()[0];
            for (i, value) in samples.iter().enumerate() {
                LittleEndian::write_i32(&mut plane[i * 4..(i + 1) * 4], *value);
            }
        }
        out.pts = pts;
        out
    }
}

impl AudioDecoder for PcmDecoder {
    fn codec_info(&self) -> CodecInfo {
        CodecInfo {
            name: "pcm",
            long_name: "Uncompressed PCM audio",
        }
    }

    fn output_params(&self) -> AudioParams {
        AudioParams {
            codec: AudioCodec::Pcm(self.source),
            sample_rate: self.sample_rate,
            layout: self.layout,
            format: unpacked_format(self.source),
            bits_per_raw_sample: self.source.bits_per_sample(),
            frame_size: 0,
            time_base: self.time_base,
        }
    }

    fn set_extra_data(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<SampleBuf>> {
        match self.source {
            PcmFormat::Dvd => return self.decode_dvd(packet).map(|buf| vec![buf]),
            PcmFormat::BluRay => return self.decode_bluray(packet).map(|buf| vec![buf]),
            _ => {}
        }
        let channels = self.layout.channels().max(1);
        let stored = stored_bytes(self.source);
        let frame_bytes = stored * channels;
        if packet.data.len() % frame_bytes != 0 {
            return Err(Error::Codec(CodecError::Decode {
                track: 0,
                message: format!(
                    "PCM packet of {} bytes is not a whole number of {}-byte frames",
                    packet.data.len(),
                    frame_bytes
                ),
            }));
        }
        let num_samples = packet.data.len() / frame_bytes;
        let format = unpacked_format(self.source);
        let mut out = SampleBuf::new(format, self.layout, self.sample_rate, num_samples);
        out.pts = packet.pts;
        {
            let bps = format.bytes_per_sample();
            let plane = &mut out.planes_mut()[0];
            for i in 0..num_samples * channels {
                // planar sources store plane-major inside the packet
                let src_index = if self.source.is_planar() {
                    let ch = i % channels;
                    let sample = i / channels;
                    ch * num_samples + sample
                } else {
                    i
                };
                let src = &packet.data[src_index * stored..src_index * stored + stored];
                let dst = &mut plane[i * bps..(i + 1) * bps];
                unpack_sample(self.source, src, dst);
            }
        }
        Ok(vec![out])
    }

    fn flush(&mut self) -> Result<Vec<SampleBuf>> {
        Ok(Vec::new())
    }
}

/// Unpack one stored sample into the native format bytes.
fn unpack_sample(source: PcmFormat, src: &[u8], dst: &mut [u8]) {
    match source {
        PcmFormat::U8 => dst[0] = src[0],
        PcmFormat::S8 | PcmFormat::S8Planar => {
            let v = (src[0] as i8 as i16) << 8;
            LittleEndian::write_i16(dst, v);
        }
        PcmFormat::S16Le | PcmFormat::S16LePlanar => dst.copy_from_slice(src),
        PcmFormat::S16Be | PcmFormat::S16BePlanar => {
            LittleEndian::write_i16(dst, BigEndian::read_i16(src));
        }
        PcmFormat::S24Le | PcmFormat::S24LePlanar => {
            let v = LittleEndian::read_i24(src) << 8;
            LittleEndian::write_i32(dst, v);
        }
        PcmFormat::S24Be => {
            let v = BigEndian::read_i24(src) << 8;
            LittleEndian::write_i32(dst, v);
        }
        PcmFormat::S32Le | PcmFormat::S32LePlanar => dst.copy_from_slice(src),
        PcmFormat::S32Be => LittleEndian::write_i32(dst, BigEndian::read_i32(src)),
        PcmFormat::F32Le => dst.copy_from_slice(src),
        PcmFormat::F32Be => LittleEndian::write_f32(dst, BigEndian::read_f32(src)),
        PcmFormat::F64Le => dst.copy_from_slice(src),
        PcmFormat::F64Be => LittleEndian::write_f64(dst, BigEndian::read_f64(src)),
        PcmFormat::Dvd | PcmFormat::BluRay => {
            unreachable!("wrapped variants decode through their group unpackers")
        }
    }
}

/// Encoder writing the little-endian target PCM variant.
pub struct PcmEncoder {
    target: PcmFormat,
    sample_rate: u32,
    layout: ChannelLayout,
}

impl PcmEncoder {
    /// Create an encoder for a container-ready PCM target.
    pub fn new(target: PcmFormat, sample_rate: u32, layout: ChannelLayout) -> Result<Self> {
        if !target.is_directly_muxable() {
            return Err(Error::Codec(CodecError::Unsupported(format!(
                "{target} is not a mux target"
            ))));
        }
        Ok(Self {
            target,
            sample_rate,
            layout,
        })
    }

    /// The target variant.
    pub fn target(&self) -> PcmFormat {
        self.target
    }
}

impl AudioEncoder for PcmEncoder {
    fn codec_info(&self) -> CodecInfo {
        CodecInfo {
            name: "pcm",
            long_name: "Uncompressed PCM audio",
        }
    }

    fn input_params(&self) -> AudioParams {
        AudioParams {
            codec: AudioCodec::Pcm(self.target),
            sample_rate: self.sample_rate,
            layout: self.layout,
            format: unpacked_format(self.target),
            bits_per_raw_sample: self.target.bits_per_sample(),
            frame_size: 0,
            time_base: TimeBase::per_sample(self.sample_rate),
        }
    }

    fn frame_size(&self) -> usize {
        0
    }

    fn encode(&mut self, frame: &SampleBuf) -> Result<Vec<Packet>> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        let channels = frame.channels();
        let count = frame.num_samples() * channels;
        let stored = stored_bytes(self.target);
        let mut data = vec![0u8; count * stored];
        let src_format = frame.format();
        let bps = src_format.bytes_per_sample();

        for i in 0..count {
            let raw = if src_format.is_planar() {
                let ch = i % channels;
                let sample = i / channels;
                &frame.planes()[ch][sample * bps..(sample + 1) * bps]
            } else {
                &frame.planes()[0][i * bps..(i + 1) * bps]
            };
            let value = read_normalized(src_format, raw);
            pack_sample(self.target, value, &mut data[i * stored..(i + 1) * stored]);
        }

        let mut pkt = Packet::new(data);
        pkt.pts = frame.pts;
        pkt.duration = Duration::new(
            frame.num_samples() as i64,
            TimeBase::per_sample(self.sample_rate),
        );
        Ok(vec![pkt])
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        Ok(Vec::new())
    }

    fn extra_data(&self) -> Option<&[u8]> {
        None
    }
}

/// Read one native sample as a full-scale 32-bit integer value.
fn read_normalized(format: SampleFormat, raw: &[u8]) -> i32 {
    match format.to_packed() {
        SampleFormat::U8 => ((raw[0] as i32) - 128) << 24,
        SampleFormat::S16 => (LittleEndian::read_i16(raw) as i32) << 16,
        SampleFormat::S32 => LittleEndian::read_i32(raw),
        SampleFormat::F32 => float_to_i32(LittleEndian::read_f32(raw) as f64),
        SampleFormat::F64 => float_to_i32(LittleEndian::read_f64(raw)),
        _ => 0,
    }
}

fn float_to_i32(v: f64) -> i32 {
    (v.clamp(-1.0, 1.0) * i32::MAX as f64) as i32
}

/// Write a full-scale 32-bit value as the target variant.
fn pack_sample(target: PcmFormat, value: i32, dst: &mut [u8]) {
    match target {
        PcmFormat::U8 => dst[0] = ((value >> 24) + 128) as u8,
        PcmFormat::S8 => dst[0] = (value >> 24) as u8,
        PcmFormat::S16Le => LittleEndian::write_i16(dst, (value >> 16) as i16),
        PcmFormat::S24Le => LittleEndian::write_i24(dst, value >> 8),
        PcmFormat::S32Le => LittleEndian::write_i32(dst, value),
        PcmFormat::F32Le => {
            LittleEndian::write_f32(dst, (value as f64 / i32::MAX as f64) as f32)
        }
        PcmFormat::F64Le => LittleEndian::write_f64(dst, value as f64 / i32::MAX as f64),
        _ => unreachable!("rejected at construction"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_table() {
        assert_eq!(
            pcm_conversion_target(AudioCodec::Pcm(PcmFormat::S16Be), 16),
            Some(PcmFormat::S16Le)
        );
        assert_eq!(
            pcm_conversion_target(AudioCodec::Pcm(PcmFormat::F32Be), 32),
            Some(PcmFormat::S32Le)
        );
        assert_eq!(
            pcm_conversion_target(AudioCodec::Pcm(PcmFormat::BluRay), 24),
            Some(PcmFormat::S24Le)
        );
        assert_eq!(
            pcm_conversion_target(AudioCodec::Pcm(PcmFormat::Dvd), 16),
            Some(PcmFormat::S16Le)
        );
        assert_eq!(pcm_conversion_target(AudioCodec::Pcm(PcmFormat::S16Le), 16), None);
        assert_eq!(pcm_conversion_target(AudioCodec::Aac, 16), None);
    }

    #[test]
    fn test_decode_s16be_to_native() {
        let mut dec =
            PcmDecoder::new(PcmFormat::S16Be, 48000, ChannelLayout::STEREO).unwrap();
        // two stereo frames: 0x0102, 0x0304, 0x0506, 0x0708 big endian
        let pkt = Packet::new(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        let bufs = dec.decode(&pkt).unwrap();
        assert_eq!(bufs.len(), 1);
        let buf = &bufs[0];
        assert_eq!(buf.num_samples(), 2);
        assert_eq!(buf.format(), SampleFormat::S16);
        let plane = &buf.planes()[0];
        assert_eq!(LittleEndian::read_i16(&plane[0..2]), 0x0102);
        assert_eq!(LittleEndian::read_i16(&plane[2..4]), 0x0304);
    }

    #[test]
    fn test_decode_planar_interleaves() {
        let mut dec =
            PcmDecoder::new(PcmFormat::S16LePlanar, 48000, ChannelLayout::STEREO).unwrap();
        // plane-major: L0 L1 | R0 R1
        let pkt = Packet::new(vec![0x01, 0x00, 0x02, 0x00, 0x11, 0x00, 0x12, 0x00]);
        let buf = &dec.decode(&pkt).unwrap()[0];
        let plane = &buf.planes()[0];
        let read = |i: usize| LittleEndian::read_i16(&plane[i * 2..i * 2 + 2]);
        assert_eq!((read(0), read(1), read(2), read(3)), (1, 0x11, 2, 0x12));
    }

    #[test]
    fn test_decode_rejects_ragged_packet() {
        let mut dec = PcmDecoder::new(PcmFormat::S16Le, 48000, ChannelLayout::STEREO).unwrap();
        assert!(dec.decode(&Packet::new(vec![0u8; 5])).is_err());
    }

    /// One stereo DVD LPCM packet holding a single 24-bit sample group
    /// (sample-major values `v`, each 24 bits).
    fn dvd_packet_24(values: &[u32; 4]) -> Packet {
        let mut data = vec![0x00, (2 << 6) | 0x01, 0x00];
        for v in values {
            data.extend_from_slice(&(((v >> 8) as u16).to_be_bytes()));
        }
        for v in values {
            data.push((v & 0xFF) as u8);
        }
        Packet::new(data)
    }

    fn s32_values(buf: &SampleBuf) -> Vec<i32> {
        buf.planes()[0]
            .chunks_exact(4)
            .map(LittleEndian::read_i32)
            .collect()
    }

    #[test]
    fn test_decode_dvd_24bit_groups() {
        let mut dec = PcmDecoder::new(PcmFormat::Dvd, 48000, ChannelLayout::STEREO).unwrap();
        // sample-major: s0c0, s0c1, s1c0, s1c1
        let pkt = dvd_packet_24(&[0x123456, 0xABCDEF, 0x000001, 0x7FFFFF]);
        let buf = dec.decode(&pkt).unwrap().remove(0);
        assert_eq!(buf.num_samples(), 2);
        assert_eq!(buf.format(), SampleFormat::S32);
        assert_eq!(
            s32_values(&buf),
            vec![
                0x12345600,
                0xABCDEF00u32 as i32,
                0x00000100,
                0x7FFFFF00,
            ]
        );
    }

    #[test]
    fn test_decode_dvd_20bit_nibbles() {
        let mut dec = PcmDecoder::new(PcmFormat::Dvd, 48000, ChannelLayout::STEREO).unwrap();
        // values: s0c0=0x12345, s0c1=0xFFFFF, s1c0=0x00001, s1c1=0x80000
        let mut data = vec![0x00, (1 << 6) | 0x01, 0x00];
        for msb in [0x1234u16, 0xFFFF, 0x0000, 0x8000] {
            data.extend_from_slice(&msb.to_be_bytes());
        }
        // per-channel nibble pairs: high = sample 0, low = sample 1
        data.push(0x51);
        data.push(0xF0);
        let buf = dec.decode(&Packet::new(data)).unwrap().remove(0);
        assert_eq!(
            s32_values(&buf),
            vec![0x12345000, 0xFFFFF000u32 as i32, 0x00001000, i32::MIN]
        );
    }

    #[test]
    fn test_decode_bluray_24bit() {
        let mut dec = PcmDecoder::new(PcmFormat::BluRay, 96000, ChannelLayout::STEREO).unwrap();
        let mut data = vec![0x00, 0x00, 0x11, 3 << 6];
        data.extend_from_slice(&[0x12, 0x34, 0x56, 0xFE, 0xDC, 0xBA]);
        let buf = dec.decode(&Packet::new(data)).unwrap().remove(0);
        assert_eq!(buf.num_samples(), 1);
        assert_eq!(
            s32_values(&buf),
            vec![0x12345600, 0xFEDCBA00u32 as i32]
        );
    }

    #[test]
    fn test_decode_bluray_16bit() {
        let mut dec = PcmDecoder::new(PcmFormat::BluRay, 48000, ChannelLayout::MONO).unwrap();
        let mut data = vec![0x00, 0x00, 0x11, 1 << 6];
        data.extend_from_slice(&[0x12, 0x34, 0x80, 0x00]);
        let buf = dec.decode(&Packet::new(data)).unwrap().remove(0);
        assert_eq!(s32_values(&buf), vec![0x12340000, i32::MIN]);
    }

    #[test]
    fn test_dvd_round_trip_through_conversion_target() {
        // the table maps 24-bit DVD LPCM onto s24le; decode then re-encode
        // must reproduce the source samples exactly
        let target = pcm_conversion_target(AudioCodec::Pcm(PcmFormat::Dvd), 24).unwrap();
        assert_eq!(target, PcmFormat::S24Le);

        let mut dec = PcmDecoder::new(PcmFormat::Dvd, 48000, ChannelLayout::STEREO).unwrap();
        let mut enc = PcmEncoder::new(target, 48000, ChannelLayout::STEREO).unwrap();
        let values = [0x123456u32, 0xABCDEF, 0x000001, 0x7FFFFF];
        let buf = dec.decode(&dvd_packet_24(&values)).unwrap().remove(0);
        let out = enc.encode(&buf).unwrap().remove(0);

        let mut expected = Vec::new();
        for v in values {
            expected.extend_from_slice(&v.to_le_bytes()[..3]);
        }
        assert_eq!(out.data, expected);
        assert_eq!(out.duration.value, 2);
    }

    #[test]
    fn test_bluray_round_trip_through_conversion_target() {
        let target = pcm_conversion_target(AudioCodec::Pcm(PcmFormat::BluRay), 24).unwrap();
        assert_eq!(target, PcmFormat::S24Le);

        let mut dec = PcmDecoder::new(PcmFormat::BluRay, 48000, ChannelLayout::MONO).unwrap();
        let mut enc = PcmEncoder::new(target, 48000, ChannelLayout::MONO).unwrap();
        let mut data = vec![0x00, 0x00, 0x01, 3 << 6];
        data.extend_from_slice(&[0x12, 0x34, 0x56, 0xFE, 0xDC, 0xBA]);
        let buf = dec.decode(&Packet::new(data)).unwrap().remove(0);
        let out = enc.encode(&buf).unwrap().remove(0);
        assert_eq!(out.data, vec![0x56, 0x34, 0x12, 0xBA, 0xDC, 0xFE]);
    }

    #[test]
    fn test_dvd_header_validation() {
        let mut dec = PcmDecoder::new(PcmFormat::Dvd, 48000, ChannelLayout::STEREO).unwrap();
        // header declares mono against a stereo stream
        let pkt = Packet::new(vec![0x00, 2 << 6, 0x00]);
        assert!(dec.decode(&pkt).is_err());
        // reserved quantization code
        let pkt = Packet::new(vec![0x00, (3 << 6) | 0x01, 0x00]);
        assert!(dec.decode(&pkt).is_err());
        // ragged 24-bit sample group
        let pkt = Packet::new(vec![0x00, (2 << 6) | 0x01, 0x00, 0xAA, 0xBB]);
        assert!(dec.decode(&pkt).is_err());
    }

    #[test]
    fn test_encode_f32_to_s16le() {
        let mut enc = PcmEncoder::new(PcmFormat::S16Le, 48000, ChannelLayout::MONO).unwrap();
        let mut frame = SampleBuf::new(SampleFormat::F32, ChannelLayout::MONO, 48000, 2);
        LittleEndian::write_f32(&mut frame.planes_mut()[0][0..4], 0.5);
        LittleEndian::write_f32(&mut frame.planes_mut()[0][4..8], -1.0);
        let pkts = enc.encode(&frame).unwrap();
        assert_eq!(pkts.len(), 1);
        let data = &pkts[0].data;
        let first = LittleEndian::read_i16(&data[0..2]);
        assert!((first as i32 - 16384).abs() < 4);
        assert_eq!(LittleEndian::read_i16(&data[2..4]), i16::MIN);
        assert_eq!(pkts[0].duration.value, 2);
    }

    #[test]
    fn test_encode_passthrough_roundtrip() {
        let mut dec = PcmDecoder::new(PcmFormat::S16Be, 44100, ChannelLayout::MONO).unwrap();
        let mut enc = PcmEncoder::new(PcmFormat::S16Le, 44100, ChannelLayout::MONO).unwrap();
        let pkt = Packet::new(vec![0x12, 0x34, 0xAB, 0xCD]);
        let buf = dec.decode(&pkt).unwrap().remove(0);
        let out = enc.encode(&buf).unwrap().remove(0);
        assert_eq!(LittleEndian::read_i16(&out.data[0..2]), 0x1234);
        assert_eq!(
            LittleEndian::read_i16(&out.data[2..4]),
            i16::from_be_bytes([0xAB, 0xCD])
        );
    }
}
