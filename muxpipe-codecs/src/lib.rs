//! # Muxpipe Codecs
//!
//! Codec component contracts consumed by the mux pipeline:
//!
//! - [`AudioDecoder`] / [`AudioEncoder`] / [`AudioFilter`] — the audio stage
//!   chain
//! - [`SubtitleDecoder`] / [`SubtitleEncoder`] — subtitle transcoding
//! - [`BitstreamFilter`] with the concrete [`AdtsToAsc`] filter
//! - [`Resampler`] — format/layout/rate conversion with channel remapping
//! - PCM conversion for wrapped and non-native PCM variants
//!
//! The hardware video encoder itself is an external collaborator; only its
//! output buffers enter the pipeline.

pub mod adts;
pub mod pcm;
pub mod resample;
pub mod traits;

pub use adts::AdtsToAsc;
pub use pcm::{pcm_conversion_target, PcmDecoder, PcmEncoder};
pub use resample::{ResampleParams, Resampler};
pub use traits::{
    AudioDecoder, AudioEncoder, AudioFilter, AudioParams, BitstreamFilter, BsfOutcome, CodecInfo,
    SubtitleDecoder, SubtitleEncoder, SubtitleEvent, SubtitleRect,
};
