//! # Muxpipe NAL
//!
//! Annex-B bitstream parsing for encoder output:
//! - NAL unit boundary scanning (start-code prefixes)
//! - Parameter-set extraction into container extradata
//! - Access-unit-delimiter elision
//! - PAFF field boundary detection
//! - Frame type classification (IDR/I/P/B, picture structure)

pub mod annexb;
pub mod classify;
pub mod extradata;
pub mod h264;
pub mod hevc;

pub use annexb::{split_units, NalRef};
pub use classify::{PictureInfo, PictureStructure, PictureType, StreamClassifier};
pub use extradata::{Extradata, EXTRADATA_PADDING};
