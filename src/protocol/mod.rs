//! Protocol module - framing for both halves of the event channel.
//!
//! - Inbound: 4-byte big-endian length prefix + payload ([`FrameReader`])
//! - Outbound: tagged JSON lines ([`encode_tagged`])
//!
//! The control channel uses length-prefixed frames in both directions.

mod frame_reader;
mod tagged;
mod wire_format;

pub use frame_reader::FrameReader;
pub use tagged::{decode_tagged, encode_bare, encode_tagged, Tag};
pub use wire_format::{
    decode_length, encode_length_prefixed, validate_length, DEFAULT_MAX_FRAME_SIZE,
    LENGTH_PREFIX_SIZE,
};
