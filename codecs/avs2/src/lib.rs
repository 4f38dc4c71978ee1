//! Pure-Rust decoder for the AVS2 / IEEE 1857.4 video coding standard.
//!
//! The decoder consumes an AVS2 elementary byte stream (start-code delimited
//! units) and produces display-ordered YUV pictures. Decoding is
//! multi-threaded: coded pictures are parsed in input order, reconstructed
//! concurrently, and re-serialized by picture order count on output.

mod decoder;
mod error;
mod framer;
pub mod parser;
mod types;

pub use decoder::{DecodedFrame, Decoder, DecoderEvent, DecoderOptions, Packet};
pub use error::{Error, Result};
pub use types::{
    AlfPictureParams, ChromaFormat, MotionVector, PictureHeader, PictureType, Profile,
    ReferencePictureSet, RefIndices, SequenceHeader, SequenceInfo, SequenceTools,
    WeightedQuantParams,
};
