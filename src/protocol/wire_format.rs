//! Length-prefixed wire format.
//!
//! Inbound events and all control-channel messages use the same framing:
//! ```text
//! ┌──────────────┬───────────────────────────┐
//! │ Length       │ Payload                   │
//! │ 4 bytes      │ `Length` bytes            │
//! │ uint32 BE    │ msgpack (event) / JSON    │
//! └──────────────┴───────────────────────────┘
//! ```
//!
//! A zero length is never valid. The stream is assumed corrupted and the
//! reader does not try to resynchronize.

use crate::error::{Result, WorkerError};

/// Length prefix size in bytes (fixed, exactly 4).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum frame size (1 GB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 1_073_741_824;

/// Decode a big-endian length prefix.
///
/// Returns `None` if the buffer holds fewer than 4 bytes.
///
/// # Example
///
/// ```
/// use funcwire::protocol::decode_length;
///
/// assert_eq!(decode_length(&[0, 0, 1, 0]), Some(256));
/// assert_eq!(decode_length(&[0, 0, 1]), None);
/// ```
pub fn decode_length(buf: &[u8]) -> Option<u32> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = buf.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix))
}

/// Validate a declared frame length.
///
/// # Errors
///
/// `IllegalFrameSize` if the length is zero or above `max_frame_size`.
pub fn validate_length(length: u32, max_frame_size: u32) -> Result<()> {
    if length == 0 || length > max_frame_size {
        return Err(WorkerError::IllegalFrameSize {
            size: length,
            max: max_frame_size,
        });
    }
    Ok(())
}

/// Prepend a big-endian length prefix to `payload`.
///
/// # Errors
///
/// `IllegalFrameSize` if the payload is empty or does not fit in a `u32`.
///
/// # Example
///
/// ```
/// use funcwire::protocol::encode_length_prefixed;
///
/// let frame = encode_length_prefixed(b"abc").unwrap();
/// assert_eq!(frame, vec![0, 0, 0, 3, b'a', b'b', b'c']);
/// ```
pub fn encode_length_prefixed(payload: &[u8]) -> Result<Vec<u8>> {
    let length = u32::try_from(payload.len()).map_err(|_| WorkerError::IllegalFrameSize {
        size: u32::MAX,
        max: DEFAULT_MAX_FRAME_SIZE,
    })?;
    validate_length(length, u32::MAX)?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}
