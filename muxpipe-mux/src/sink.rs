//! Output byte sinks.
//!
//! The container writer produces bytes; a sink takes them. File output gets
//! a write-back buffer sized by the configured budget and by whether a video
//! stream is present.

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

/// Largest external write-back buffer, in MiB.
const MAX_BUFFER_MB: u32 = 2048;

/// Byte sink the container writer targets.
pub trait ByteSink: Send {
    /// Write bytes, returning the count written.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Reposition the write cursor.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// Flush buffered bytes.
    fn flush(&mut self) -> io::Result<()>;
}

/// Buffer sizing policy for a file sink.
#[derive(Debug, Clone, Copy)]
pub struct SinkConfig {
    /// Requested external buffer in MiB (0 disables it).
    pub buffer_mb: u32,
    /// Whether the output carries a video stream.
    pub has_video: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            buffer_mb: 8,
            has_video: true,
        }
    }
}

impl SinkConfig {
    /// The external and internal buffer sizes in bytes.
    ///
    /// The external buffer is the user-requested write-back buffer, clamped
    /// to 2048 MiB and shrunk for audio-only output. The internal buffer
    /// scales up when a video stream is present, and down when no external
    /// buffer is requested.
    pub fn buffer_sizes(&self) -> (usize, usize) {
        let mut external = self.buffer_mb.min(MAX_BUFFER_MB) as usize * 1024 * 1024;
        let internal = if external == 0 {
            128 * 1024 * if self.has_video { 4 } else { 1 }
        } else {
            if !self.has_video {
                external /= 4;
            }
            1024 * 1024 * if self.has_video { 8 } else { 1 }
        };
        (external, internal)
    }
}

/// A buffered file sink.
pub struct FileSink {
    writer: BufWriter<File>,
    buffer_capacity: usize,
}

impl FileSink {
    /// Create (truncate) the output file with the configured buffering.
    pub fn create(path: impl AsRef<Path>, config: SinkConfig) -> io::Result<Self> {
        let (external, internal) = config.buffer_sizes();
        let capacity = external.max(internal);
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::with_capacity(capacity, file),
            buffer_capacity: capacity,
        })
    }

    /// The write-back buffer capacity in bytes.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }
}

impl ByteSink for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.writer.seek(pos)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// An in-memory sink.
#[derive(Default)]
pub struct MemorySink {
    data: Vec<u8>,
    pos: usize,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// The bytes written so far.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take the written bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl ByteSink for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let end = self.pos + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(buf.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.data.len() as i64 + offset,
            SeekFrom::Current(offset) => self.pos as i64 + offset,
        };
        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.pos = new_pos as usize;
        Ok(self.pos as u64)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_policy_with_video() {
        let cfg = SinkConfig {
            buffer_mb: 64,
            has_video: true,
        };
        let (external, internal) = cfg.buffer_sizes();
        assert_eq!(external, 64 * 1024 * 1024);
        assert_eq!(internal, 8 * 1024 * 1024);
    }

    #[test]
    fn test_buffer_policy_no_external() {
        let cfg = SinkConfig {
            buffer_mb: 0,
            has_video: true,
        };
        let (external, internal) = cfg.buffer_sizes();
        assert_eq!(external, 0);
        assert_eq!(internal, 512 * 1024);

        let cfg = SinkConfig {
            buffer_mb: 0,
            has_video: false,
        };
        assert_eq!(cfg.buffer_sizes(), (0, 128 * 1024));
    }

    #[test]
    fn test_buffer_policy_audio_only_shrinks() {
        let cfg = SinkConfig {
            buffer_mb: 64,
            has_video: false,
        };
        let (external, internal) = cfg.buffer_sizes();
        assert_eq!(external, 16 * 1024 * 1024);
        assert_eq!(internal, 1024 * 1024);
    }

    #[test]
    fn test_buffer_policy_clamps_request() {
        let cfg = SinkConfig {
            buffer_mb: 100_000,
            has_video: true,
        };
        assert_eq!(cfg.buffer_sizes().0, 2048 * 1024 * 1024);
    }

    #[test]
    fn test_memory_sink_write_and_seek() {
        let mut sink = MemorySink::new();
        sink.write(b"hello world").unwrap();
        sink.seek(SeekFrom::Start(0)).unwrap();
        sink.write(b"H").unwrap();
        sink.seek(SeekFrom::End(0)).unwrap();
        sink.write(b"!").unwrap();
        assert_eq!(sink.data(), b"Hello world!");
    }
}
