//! # Muxpipe Audio
//!
//! Per-track audio state and the audio staging engine: stream-level
//! bitstream filtering, decoding with a bounded error budget, filtering,
//! sub-stream fan-out, resampling and encoder frame cutting.
//!
//! Encoding itself runs in the scheduler's encode stage; this crate prepares
//! exact-size frames for it and computes pass-through sample counts.

pub mod select;
pub mod stage;
pub mod track;

pub use select::{select_channel_layout, select_sample_format, select_sample_rate};
pub use stage::{AudioProcessor, StageOut};
pub use track::{
    wants_adts_to_asc, AudioTrack, AudioTrackId, FilterChain, OutputChain, SubStreamSpec,
};
