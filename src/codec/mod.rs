//! Codec module - msgpack encoding and event decoding.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`, struct-as-map)
//! - [`EventDecoder`] - one [`Event`](crate::Event) per frame body, strict or lossy text
//!
//! # Example
//!
//! ```
//! use funcwire::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;

pub use msgpack::{EventDecoder, MsgPackCodec};
pub(crate) use msgpack::WireEventRef;
