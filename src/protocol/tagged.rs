//! Tagged-line framing for the outbound half of the event channel.
//!
//! Every outbound message is a single line: one discriminator byte, a JSON
//! document, and a trailing `\n`. The tag lets the host demultiplex four
//! logical streams from one socket:
//!
//! | Tag | Meaning                         |
//! |-----|---------------------------------|
//! | `r` | handler response                |
//! | `m` | duration metric                 |
//! | `l` | log record                      |
//! | `s` | worker ready (sent exactly once)|
//!
//! # Example
//!
//! ```
//! use funcwire::protocol::{decode_tagged, encode_tagged, Tag};
//! use serde_json::json;
//!
//! let line = encode_tagged(Tag::Metric, &json!({"duration": 0.5})).unwrap();
//! assert_eq!(&line[..], b"m{\"duration\":0.5}\n");
//!
//! let (tag, payload) = decode_tagged(&line).unwrap();
//! assert_eq!(tag, Tag::Metric);
//! assert_eq!(payload, br#"{"duration":0.5}"#);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::error::{Result, WorkerError};

/// Discriminator of an outbound line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Worker is initialized and ready to receive events.
    Start,
    /// Encoded [`Response`](crate::response::Response).
    Response,
    /// `{"duration": seconds}` for the preceding invocation.
    Metric,
    /// Structured log record.
    Log,
}

impl Tag {
    /// The single wire byte for this tag.
    #[inline]
    pub fn as_byte(self) -> u8 {
        match self {
            Tag::Start => b's',
            Tag::Response => b'r',
            Tag::Metric => b'm',
            Tag::Log => b'l',
        }
    }

    /// Parse a wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b's' => Some(Tag::Start),
            b'r' => Some(Tag::Response),
            b'm' => Some(Tag::Metric),
            b'l' => Some(Tag::Log),
            _ => None,
        }
    }
}

/// Encode `payload` as a tagged line.
///
/// serde_json never emits raw newlines inside a document, so the result is
/// always exactly one line.
///
/// # Errors
///
/// Returns error if the payload cannot be serialized to JSON.
pub fn encode_tagged<T: Serialize + ?Sized>(tag: Tag, payload: &T) -> Result<Bytes> {
    let mut line = BytesMut::with_capacity(128).writer();
    line.get_mut().put_u8(tag.as_byte());
    serde_json::to_writer(&mut line, payload)?;

    let mut line = line.into_inner();
    line.put_u8(b'\n');
    Ok(line.freeze())
}

/// Encode a tag with an empty payload (`s\n`).
#[inline]
pub fn encode_bare(tag: Tag) -> Bytes {
    Bytes::from(vec![tag.as_byte(), b'\n'])
}

/// Split one line into its tag and JSON payload.
///
/// A trailing `\n` (and `\r`) is stripped if present.
///
/// # Errors
///
/// `Protocol` if the line is empty or the tag is unknown.
pub fn decode_tagged(line: &[u8]) -> Result<(Tag, &[u8])> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let (&first, payload) = line
        .split_first()
        .ok_or_else(|| WorkerError::Protocol("empty tagged line".to_string()))?;

    let tag = Tag::from_byte(first)
        .ok_or_else(|| WorkerError::Protocol(format!("unknown line tag {:?}", first as char)))?;

    Ok((tag, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_bytes() {
        for tag in [Tag::Start, Tag::Response, Tag::Metric, Tag::Log] {
            assert_eq!(Tag::from_byte(tag.as_byte()), Some(tag));
        }
        assert_eq!(Tag::from_byte(b'x'), None);
    }

    #[test]
    fn test_encode_is_single_line() {
        let payload = json!({"message": "line one\nline two", "with": {"k": "v\n"}});
        let line = encode_tagged(Tag::Log, &payload).unwrap();

        assert_eq!(line[0], b'l');
        assert_eq!(*line.last().unwrap(), b'\n');
        assert_eq!(line.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn test_decode_tagged_payload() {
        let line = encode_tagged(Tag::Response, &json!({"status_code": 200})).unwrap();
        let (tag, payload) = decode_tagged(&line).unwrap();

        assert_eq!(tag, Tag::Response);
        let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(value["status_code"], 200);
    }

    #[test]
    fn test_bare_start_line() {
        let line = encode_bare(Tag::Start);
        assert_eq!(&line[..], b"s\n");

        let (tag, payload) = decode_tagged(&line).unwrap();
        assert_eq!(tag, Tag::Start);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_decode_errors() {
        assert!(decode_tagged(b"").is_err());
        assert!(decode_tagged(b"\n").is_err());
        assert!(decode_tagged(b"x{}\n").is_err());
    }
}
