//! Concrete subtitle codecs and the container upconversion rule.

use muxpipe_codecs::{
    CodecInfo, SubtitleDecoder, SubtitleEncoder, SubtitleEvent, SubtitleRect,
};
use muxpipe_core::error::{CodecError, Error, Result};
use muxpipe_core::{ContainerFormat, Packet, SubtitleCodec, TimeBase};

/// The codec a subtitle track must be transcoded to for a container, or
/// `None` when the source codec can be copied.
///
/// MP4-family containers only take text subtitles as `mov_text` (and
/// `mov_text` sources are re-packed as well); outside the MP4 family,
/// `mov_text` upconverts to ASS.
pub fn transcode_target(
    container: ContainerFormat,
    source: SubtitleCodec,
) -> Option<SubtitleCodec> {
    if container.is_mp4_family() && source.is_text() {
        return Some(SubtitleCodec::MovText);
    }
    if source == SubtitleCodec::MovText {
        return Some(SubtitleCodec::Ass);
    }
    None
}

/// Build a decoder/encoder pair for a subtitle transcode.
pub fn new_transcoder(
    source: SubtitleCodec,
    target: SubtitleCodec,
) -> Result<(Box<dyn SubtitleDecoder>, Box<dyn SubtitleEncoder>)> {
    let decoder: Box<dyn SubtitleDecoder> = match source {
        SubtitleCodec::MovText => Box::new(MovTextDecoder),
        SubtitleCodec::Srt | SubtitleCodec::WebVtt => Box::new(PlainTextDecoder),
        SubtitleCodec::Ass => Box::new(AssDecoder),
        SubtitleCodec::DvbSub => Box::new(DvbDecoder),
        other => {
            return Err(Error::Codec(CodecError::Unsupported(format!(
                "no subtitle decoder for {other}"
            ))))
        }
    };
    let encoder: Box<dyn SubtitleEncoder> = match target {
        SubtitleCodec::MovText => Box::new(MovTextEncoder),
        SubtitleCodec::Ass => Box::new(AssEncoder),
        SubtitleCodec::DvbSub => Box::new(DvbEncoder),
        other => {
            return Err(Error::Codec(CodecError::Unsupported(format!(
                "no subtitle encoder for {other}"
            ))))
        }
    };
    Ok((decoder, encoder))
}

fn display_window_ms(packet: &Packet) -> u32 {
    packet
        .duration
        .rescale(TimeBase::MILLISECONDS)
        .value
        .max(0) as u32
}

/// Decoder for MP4 timed text (tx3g) samples.
struct MovTextDecoder;

impl SubtitleDecoder for MovTextDecoder {
    fn codec_info(&self) -> CodecInfo {
        CodecInfo { name: "mov_text", long_name: "MP4 timed text" }
    }

    fn decode(&mut self, packet: &Packet) -> Result<Option<SubtitleEvent>> {
        if packet.data.len() < 2 {
            return Err(Error::Codec(CodecError::Subtitle(
                "tx3g sample shorter than its length field".into(),
            )));
        }
        let len = u16::from_be_bytes([packet.data[0], packet.data[1]]) as usize;
        if packet.data.len() < 2 + len {
            return Err(Error::Codec(CodecError::Subtitle(
                "tx3g sample truncated".into(),
            )));
        }
        let text = String::from_utf8_lossy(&packet.data[2..2 + len]).into_owned();
        let rects = if text.is_empty() {
            Vec::new()
        } else {
            vec![SubtitleRect::Text(text)]
        };
        Ok(Some(SubtitleEvent {
            pts: packet.pts,
            start_display_ms: 0,
            end_display_ms: display_window_ms(packet),
            rects,
        }))
    }
}

/// Decoder treating the payload as plain UTF-8 text (SubRip, WebVTT cues).
struct PlainTextDecoder;

impl SubtitleDecoder for PlainTextDecoder {
    fn codec_info(&self) -> CodecInfo {
        CodecInfo { name: "text", long_name: "Plain text subtitle" }
    }

    fn decode(&mut self, packet: &Packet) -> Result<Option<SubtitleEvent>> {
        let text = String::from_utf8_lossy(&packet.data).into_owned();
        Ok(Some(SubtitleEvent {
            pts: packet.pts,
            start_display_ms: 0,
            end_display_ms: display_window_ms(packet),
            rects: vec![SubtitleRect::Text(text)],
        }))
    }
}

/// Decoder for packetized ASS dialogue events.
struct AssDecoder;

impl SubtitleDecoder for AssDecoder {
    fn codec_info(&self) -> CodecInfo {
        CodecInfo { name: "ass", long_name: "Advanced SubStation Alpha" }
    }

    fn decode(&mut self, packet: &Packet) -> Result<Option<SubtitleEvent>> {
        let line = String::from_utf8_lossy(&packet.data).into_owned();
        Ok(Some(SubtitleEvent {
            pts: packet.pts,
            start_display_ms: 0,
            end_display_ms: display_window_ms(packet),
            rects: vec![SubtitleRect::Ass(line)],
        }))
    }
}

/// Decoder keeping DVB bitmap payloads opaque.
struct DvbDecoder;

impl SubtitleDecoder for DvbDecoder {
    fn codec_info(&self) -> CodecInfo {
        CodecInfo { name: "dvb_subtitle", long_name: "DVB bitmap subtitle" }
    }

    fn decode(&mut self, packet: &Packet) -> Result<Option<SubtitleEvent>> {
        if packet.data.is_empty() {
            return Ok(None);
        }
        Ok(Some(SubtitleEvent {
            pts: packet.pts,
            start_display_ms: 0,
            end_display_ms: display_window_ms(packet),
            rects: vec![SubtitleRect::Bitmap(packet.data.clone())],
        }))
    }
}

/// Encoder producing tx3g samples.
struct MovTextEncoder;

impl SubtitleEncoder for MovTextEncoder {
    fn codec_info(&self) -> CodecInfo {
        CodecInfo { name: "mov_text", long_name: "MP4 timed text" }
    }

    fn codec(&self) -> SubtitleCodec {
        SubtitleCodec::MovText
    }

    fn encode(&mut self, event: &SubtitleEvent) -> Result<Vec<u8>> {
        let text = event_text(event);
        let bytes = text.as_bytes();
        let len = bytes.len().min(u16::MAX as usize);
        let mut out = Vec::with_capacity(2 + len);
        out.extend_from_slice(&(len as u16).to_be_bytes());
        out.extend_from_slice(&bytes[..len]);
        Ok(out)
    }
}

/// Encoder producing packetized ASS dialogue events.
struct AssEncoder;

impl SubtitleEncoder for AssEncoder {
    fn codec_info(&self) -> CodecInfo {
        CodecInfo { name: "ass", long_name: "Advanced SubStation Alpha" }
    }

    fn codec(&self) -> SubtitleCodec {
        SubtitleCodec::Ass
    }

    fn encode(&mut self, event: &SubtitleEvent) -> Result<Vec<u8>> {
        for rect in &event.rects {
            match rect {
                SubtitleRect::Ass(line) => return Ok(line.clone().into_bytes()),
                SubtitleRect::Text(text) => {
                    let line = format!("0,0,Default,,0,0,0,,{}", text.replace('\n', "\\N"));
                    return Ok(line.into_bytes());
                }
                SubtitleRect::Bitmap(_) => {
                    return Err(Error::Codec(CodecError::Subtitle(
                        "cannot render a bitmap region as ASS".into(),
                    )))
                }
            }
        }
        Ok(Vec::new())
    }
}

/// End-of-display-set segment emitted for an empty DVB event.
const DVB_END_OF_DISPLAY: [u8; 2] = [0x0F, 0x80];

/// Encoder re-emitting DVB bitmap payloads.
struct DvbEncoder;

impl SubtitleEncoder for DvbEncoder {
    fn codec_info(&self) -> CodecInfo {
        CodecInfo { name: "dvb_subtitle", long_name: "DVB bitmap subtitle" }
    }

    fn codec(&self) -> SubtitleCodec {
        SubtitleCodec::DvbSub
    }

    fn encode(&mut self, event: &SubtitleEvent) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for rect in &event.rects {
            match rect {
                SubtitleRect::Bitmap(data) => out.extend_from_slice(data),
                _ => {
                    return Err(Error::Codec(CodecError::Subtitle(
                        "DVB output takes bitmap regions only".into(),
                    )))
                }
            }
        }
        if out.is_empty() {
            out.extend_from_slice(&DVB_END_OF_DISPLAY);
        }
        Ok(out)
    }
}

fn event_text(event: &SubtitleEvent) -> String {
    let mut text = String::new();
    for rect in &event.rects {
        match rect {
            SubtitleRect::Text(t) => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(t);
            }
            SubtitleRect::Ass(line) => {
                // the text field is everything after the 8 leading commas
                let payload = line.splitn(10, ',').nth(9).unwrap_or(line);
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(payload);
            }
            SubtitleRect::Bitmap(_) => {}
        }
    }
    text
}
