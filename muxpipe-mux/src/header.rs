//! Header/extradata coordination.
//!
//! The container header cannot be written until the first video access unit
//! supplies the parameter sets. Until then no packet reaches the writer;
//! stray audio/subtitle packets wait in the process stage's head buffer,
//! released when the written flag flips.

use crate::writer::ContainerWriter;
use muxpipe_core::error::Result;
use muxpipe_nal::Extradata;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Coordinates deferred header emission.
pub struct HeaderCoordinator {
    options: Vec<(String, String)>,
    written: Arc<AtomicBool>,
    video_stream: Option<u32>,
}

impl HeaderCoordinator {
    /// Create a coordinator over the shared written flag.
    pub fn new(
        options: Vec<(String, String)>,
        written: Arc<AtomicBool>,
        video_stream: Option<u32>,
    ) -> Self {
        Self {
            options,
            written,
            video_stream,
        }
    }

    /// Whether the header has been written.
    pub fn is_written(&self) -> bool {
        self.written.load(Ordering::Acquire)
    }

    /// Install video extradata and write the container header.
    ///
    /// MP4 output with video gets a `brand=mp42` option unless the caller
    /// already set one. Unknown option keys fail hard.
    pub fn write_header(
        &mut self,
        writer: &mut dyn ContainerWriter,
        extradata: Option<&Extradata>,
    ) -> Result<()> {
        if let (Some(stream), Some(extra)) = (self.video_stream, extradata) {
            writer.update_extradata(stream, extra.as_bytes())?;
        }
        if writer.format().is_mp4_family()
            && self.video_stream.is_some()
            && !self.options.iter().any(|(k, _)| k == "brand")
        {
            self.options.insert(0, ("brand".into(), "mp42".into()));
        }
        writer.write_header(&self.options)?;
        debug!("container header written");
        self.written.store(true, Ordering::Release);
        Ok(())
    }
}
