//! # Muxpipe Core
//!
//! Core types and utilities for the muxpipe streaming muxer.
//!
//! This crate provides the building blocks shared by every muxpipe component:
//! - Error handling types
//! - Rational arithmetic and timestamp/timebase conversion
//! - Trim-aware timestamp adjustment
//! - Packet and audio sample buffer abstractions
//! - Bitstream reading utilities

pub mod error;
pub mod rational;
pub mod timestamp;
pub mod trim;
pub mod packet;
pub mod sample;
pub mod format;
pub mod bitstream;

pub use error::{CodecError, Error, MuxError, ParseError, Result};
pub use format::{AudioCodec, ContainerFormat, PcmFormat, StreamType, SubtitleCodec, VideoCodec};
pub use packet::{Packet, PacketFlags};
pub use rational::Rational;
pub use sample::{ChannelLayout, SampleBuf, SampleFormat};
pub use timestamp::{Duration, TimeBase, Timestamp};
pub use trim::{TimestampAdjuster, TrimList, TrimRange};
