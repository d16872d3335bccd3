//! Error types for the muxpipe library.
//!
//! This module provides the error hierarchy shared by every muxpipe crate.

use thiserror::Error;

/// Main error type for the muxpipe library.
#[derive(Error, Debug)]
pub enum Error {
    /// Container/muxing errors.
    #[error("Mux error: {0}")]
    Mux(#[from] MuxError),

    /// Codec errors (audio decode/encode, filters, resampling).
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Bitstream parsing errors.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// I/O errors from the byte sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid parameter provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration error at pipeline construction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// End of stream reached.
    #[error("End of stream")]
    EndOfStream,
}

/// Muxing and container errors.
#[derive(Error, Debug)]
pub enum MuxError {
    /// Writing the container header failed. The trailer will not be written.
    #[error("Failed to write container header: {0}")]
    HeaderWrite(String),

    /// An option key the container writer does not recognize was passed at
    /// header time.
    #[error("Unknown option to muxer: {0}")]
    UnknownOption(String),

    /// Writing a packet to the container failed.
    #[error("Failed to write packet: {0}")]
    PacketWrite(String),

    /// Writing the container trailer failed.
    #[error("Failed to write trailer: {0}")]
    TrailerWrite(String),

    /// Stream configuration error.
    #[error("Stream configuration error: {0}")]
    StreamConfig(String),

    /// No stream matches an incoming packet's track reference.
    #[error("No output stream for track {track}")]
    UnknownTrack { track: i32 },

    /// The scheduler latched a fatal stream error; output is draining.
    #[error("Stream error latched, output aborted")]
    StreamError,

    /// Generic mux error message.
    #[error("{0}")]
    Other(String),
}

impl From<String> for MuxError {
    fn from(s: String) -> Self {
        MuxError::Other(s)
    }
}

impl From<&str> for MuxError {
    fn from(s: &str) -> Self {
        MuxError::Other(s.to_string())
    }
}

/// Codec errors.
#[derive(Error, Debug)]
pub enum CodecError {
    /// A single decode call failed. Bounded per track; silence is
    /// synthesized while the track stays under its error budget.
    #[error("Failed to decode audio track {track}: {message}")]
    Decode { track: i32, message: String },

    /// A track exceeded its decode-error budget and is now fatal.
    #[error("Audio track {track} failed to decode {errors} times")]
    DecodeBudgetExceeded { track: i32, errors: u32 },

    /// A stream-level bitstream filter failed.
    #[error("Bitstream filter failed on track {track}: {message}")]
    BitstreamFilter { track: i32, message: String },

    /// A bitstream filter failed too many consecutive times from the start
    /// of the stream.
    #[error("Bitstream filter failed {streak} consecutive times on track {track}")]
    BitstreamFilterStreak { track: i32, streak: u32 },

    /// Audio encoding failed. Fatal for the track.
    #[error("Failed to encode audio track {track}: {message}")]
    Encode { track: i32, message: String },

    /// Resampling failed. Always fatal.
    #[error("Resample error: {0}")]
    Resample(String),

    /// Audio filtering failed. Always fatal.
    #[error("Filter error: {0}")]
    Filter(String),

    /// Subtitle decode/encode failed.
    #[error("Subtitle codec error: {0}")]
    Subtitle(String),

    /// Unsupported codec or parameter combination.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Generic codec error message.
    #[error("{0}")]
    Other(String),
}

impl From<String> for CodecError {
    fn from(s: String) -> Self {
        CodecError::Other(s)
    }
}

impl From<&str> for CodecError {
    fn from(s: &str) -> Self {
        CodecError::Other(s.to_string())
    }
}

/// Bitstream parsing errors.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Unexpected end of bitstream.
    #[error("Unexpected end of bitstream")]
    UnexpectedEnd,

    /// No start code where one was required.
    #[error("Invalid start code at offset {offset}")]
    InvalidStartCode { offset: usize },

    /// Exp-Golomb value too large to decode.
    #[error("Exp-Golomb decoding error: value too large")]
    ExpGolombOverflow,

    /// A required header NAL unit was not found in the access unit.
    #[error("Missing header NAL unit: {0}")]
    MissingHeaderNal(&'static str),

    /// Invalid syntax element value.
    #[error("Invalid syntax element: {element} = {value}")]
    InvalidSyntax { element: &'static str, value: i64 },

    /// Generic parse error message.
    #[error("{0}")]
    Other(String),
}

impl From<String> for ParseError {
    fn from(s: String) -> Self {
        ParseError::Other(s)
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid parameter error.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    /// Check if this is an end-of-stream error.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }

    /// Check if this error is recoverable for the owning track.
    ///
    /// Recoverable errors are handled locally by the audio stage (silence
    /// synthesis under the per-track budgets); everything else latches the
    /// scheduler's stream error and triggers a drain.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Codec(CodecError::Decode { .. })
                | Error::Codec(CodecError::BitstreamFilter { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidParameter("bad fps".into());
        assert_eq!(err.to_string(), "Invalid parameter: bad fps");
    }

    #[test]
    fn test_mux_error_conversion() {
        let err: Error = MuxError::UnknownOption("brand".into()).into();
        assert!(matches!(err, Error::Mux(MuxError::UnknownOption(_))));
        assert_eq!(err.to_string(), "Mux error: Unknown option to muxer: brand");
    }

    #[test]
    fn test_is_eof() {
        assert!(Error::EndOfStream.is_eof());
        assert!(!Error::Config("x".into()).is_eof());
    }

    #[test]
    fn test_is_recoverable() {
        let recoverable = Error::Codec(CodecError::Decode {
            track: 1,
            message: "truncated".into(),
        });
        assert!(recoverable.is_recoverable());

        let fatal = Error::Codec(CodecError::Resample("bad layout".into()));
        assert!(!fatal.is_recoverable());
    }
}
