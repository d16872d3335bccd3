//! The subtitle stage: trim-aware copy or decode/re-encode.

use muxpipe_codecs::{SubtitleDecoder, SubtitleEncoder, SubtitleEvent};
use muxpipe_core::error::Result;
use muxpipe_core::{
    Duration, Packet, PacketFlags, SubtitleCodec, TimeBase, Timestamp, TimestampAdjuster,
};
use std::collections::BTreeMap;
use tracing::trace;

/// Processing mode of a subtitle track.
enum Mode {
    /// Pass packets through with adjusted timestamps.
    Copy,
    /// Decode and re-encode.
    Transcode {
        decoder: Box<dyn SubtitleDecoder>,
        encoder: Box<dyn SubtitleEncoder>,
        target: SubtitleCodec,
    },
}

/// Per-track subtitle state.
pub struct SubtitleTrack {
    /// Input container stream index.
    pub in_index: u32,
    /// Input track id (negative for subtitles).
    pub track_id: i32,
    /// Source codec.
    pub codec: SubtitleCodec,
    /// Input packet time base.
    pub input_time_base: TimeBase,
    /// Output stream index in the container.
    pub out_stream_index: u32,
    /// Output stream time base.
    pub out_time_base: TimeBase,
    /// Stream metadata copied to the output container.
    pub metadata: BTreeMap<String, String>,
    /// Whether the output stream carries the default disposition.
    pub default_disposition: bool,
}

/// Drives one subtitle track.
pub struct SubtitleProcessor {
    /// Track description.
    pub track: SubtitleTrack,
    mode: Mode,
}

impl SubtitleProcessor {
    /// Create a copy-mode processor.
    pub fn new_copy(track: SubtitleTrack) -> Self {
        Self {
            track,
            mode: Mode::Copy,
        }
    }

    /// Create a transcoding processor.
    pub fn new_transcode(
        track: SubtitleTrack,
        decoder: Box<dyn SubtitleDecoder>,
        encoder: Box<dyn SubtitleEncoder>,
    ) -> Self {
        let target = encoder.codec();
        Self {
            track,
            mode: Mode::Transcode {
                decoder,
                encoder,
                target,
            },
        }
    }

    /// The output codec of this track.
    pub fn output_codec(&self) -> SubtitleCodec {
        match &self.mode {
            Mode::Copy => self.track.codec,
            Mode::Transcode { target, .. } => *target,
        }
    }

    /// Process one subtitle packet into container packets.
    ///
    /// `first_key_pts_adjust` is the video stream's first keyframe pts
    /// rescaled into this track's input time base; packets inside trimmed
    /// ranges are discarded.
    pub fn process(
        &mut self,
        mut pkt: Packet,
        adjuster: &TimestampAdjuster,
        first_key_pts_adjust: i64,
    ) -> Result<Vec<Packet>> {
        let in_tb = self.track.input_time_base;
        let out_tb = self.track.out_time_base;
        let pts_orig = pkt.pts.rescale(in_tb).value;
        let shifted = (pts_orig - first_key_pts_adjust).max(0);
        let Some(new_pts) = adjuster.adjust(shifted, in_tb, out_tb, false) else {
            trace!(track = self.track.track_id, pts = pts_orig, "subtitle dropped by trim");
            return Ok(Vec::new());
        };

        match &mut self.mode {
            Mode::Transcode {
                decoder,
                encoder,
                target,
            } => {
                pkt.pts = Timestamp::new(new_pts, out_tb);
                let Some(event) = decoder.decode(&pkt)? else {
                    return Ok(Vec::new());
                };
                Self::emit_transcoded(
                    event,
                    encoder.as_mut(),
                    *target,
                    self.track.out_stream_index,
                    out_tb,
                )
            }
            Mode::Copy => {
                let mut out = pkt;
                // propagate the same shift onto dts, then clamp at zero
                if out.dts.is_valid() {
                    let delta = out_tb.convert(new_pts, in_tb) - pts_orig;
                    let dts_in = out.dts.rescale(in_tb).value + delta;
                    out.dts = Timestamp::new(in_tb.convert(dts_in, out_tb).max(0), out_tb);
                } else {
                    out.dts = Timestamp::new(new_pts.max(0), out_tb);
                }
                out.pts = Timestamp::new(new_pts.max(0), out_tb);
                out.duration = out.duration.rescale(out_tb);
                out.stream_index = self.track.out_stream_index;
                Ok(vec![out])
            }
        }
    }

    /// Encode one decoded event, emitting a display-off companion packet
    /// for DVB bitmap output.
    fn emit_transcoded(
        mut event: SubtitleEvent,
        encoder: &mut dyn SubtitleEncoder,
        target: SubtitleCodec,
        stream_index: u32,
        out_tb: TimeBase,
    ) -> Result<Vec<Packet>> {
        let n_packets = 1 + usize::from(target == SubtitleCodec::DvbSub);
        let mut out = Vec::with_capacity(n_packets);
        for i in 0..n_packets {
            event.pts = event.pts
                + Duration::new(event.start_display_ms as i64, TimeBase::MILLISECONDS);
            event.end_display_ms -= event.start_display_ms;
            event.start_display_ms = 0;
            if i > 0 {
                event.rects.clear();
            }

            let payload = encoder.encode(&event)?;
            let mut pkt = Packet::new(payload);
            pkt.stream_index = stream_index;
            pkt.duration =
                Duration::new(event.end_display_ms as i64, TimeBase::MILLISECONDS)
                    .rescale(out_tb);
            let mut pts = event.pts.rescale(out_tb).clamp_non_negative();
            if target == SubtitleCodec::DvbSub && i > 0 {
                pts = pts
                    + Duration::new(event.end_display_ms as i64, TimeBase::MILLISECONDS);
            }
            pkt.pts = pts;
            pkt.dts = pts;
            pkt.flags = PacketFlags::KEYFRAME;
            out.push(pkt);
        }
        Ok(out)
    }
}
