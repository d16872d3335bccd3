//! # Muxpipe Mux
//!
//! The mux-side streaming pipeline: receives encoded video access units
//! from a hardware encoder, stages audio and subtitle tracks, and
//! interleaves everything into a single container under a strict
//! inter-track dts discipline.
//!
//! The scheduler runs up to three worker threads (audio process, audio
//! encode, output) over bounded growable queues. Container-header emission
//! is deferred until the first video access unit supplies parameter sets;
//! packets arriving earlier wait in a head buffer. See [`Muxer`] for the
//! entry points.

pub mod chapters;
pub mod header;
pub mod input;
pub mod muxer;
pub mod queue;
pub mod sched;
pub mod sink;
pub mod video;
pub mod writer;

pub use chapters::{bind_chapters, Chapter};
pub use input::{InputInfo, InputSource};
pub use muxer::{
    AudioTrackSetup, EncodedFrame, MuxConfig, Muxer, SchedulerStats, SubtitleTrackSetup,
};
pub use queue::{Event, PktQueue, QueueStats};
pub use sched::{MuxData, MuxShared, ThreadPolicy};
pub use sink::{ByteSink, FileSink, MemorySink, SinkConfig};
pub use video::{FrameType, VideoBitstream, VideoTrack, VideoTrackConfig};
pub use writer::{
    AnnexBWriter, AudioStreamDesc, CaptureWriter, ContainerWriter, StreamDesc, StreamKind,
    SubtitleStreamDesc, VideoStreamDesc,
};
