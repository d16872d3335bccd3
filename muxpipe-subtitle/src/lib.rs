//! # Muxpipe Subtitle
//!
//! Subtitle track handling: trim-aware pass-through, and decode/re-encode
//! with the container-driven format upconversion rules (text subtitles
//! become `mov_text` in MP4-family containers; `mov_text` becomes ASS
//! elsewhere).

pub mod codec;
pub mod stage;

pub use codec::{new_transcoder, transcode_target};
pub use stage::{SubtitleProcessor, SubtitleTrack};
