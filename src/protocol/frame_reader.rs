//! Frame reader for the inbound half of a channel.
//!
//! Uses `bytes::BytesMut` to accumulate socket reads and implements a small
//! state machine:
//! - `WaitingForLength`: need 4 bytes of length prefix
//! - `WaitingForBody`: prefix parsed, need N body bytes
//!
//! [`FrameReader::read_length`] is cancellation-safe. Every byte pulled from
//! the socket lands in the internal buffer before any `.await` point can be
//! dropped, so a `select!` that abandons the wait (e.g. on a drain signal)
//! never loses stream position.
//!
//! # Example
//!
//! ```ignore
//! use funcwire::protocol::FrameReader;
//!
//! let mut reader = FrameReader::new(read_half);
//! let length = reader.read_length().await?;
//! let body = reader.read_body(length).await?;
//! ```

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::wire_format::{decode_length, validate_length, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
use crate::error::{Result, WorkerError};

/// Default read buffer capacity.
const DEFAULT_CAPACITY: usize = 64 * 1024;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for a complete length prefix.
    WaitingForLength,
    /// Prefix parsed, waiting for body bytes.
    WaitingForBody { length: u32 },
}

/// Reads length-prefixed frames from an async byte stream.
pub struct FrameReader<R> {
    /// Underlying stream (socket read half).
    reader: R,
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed frame length.
    max_frame_size: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a new frame reader with default settings (max frame 1GB).
    pub fn new(reader: R) -> Self {
        Self::with_max_frame_size(reader, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame reader with a custom frame size limit.
    pub fn with_max_frame_size(reader: R, max_frame_size: u32) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(DEFAULT_CAPACITY),
            state: State::WaitingForLength,
            max_frame_size,
        }
    }

    /// Wait for and parse the next length prefix.
    ///
    /// Cancellation-safe. If a previous call already parsed a prefix whose
    /// body has not been read yet, that length is returned again.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` if the stream ends before 4 bytes arrive
    /// - `IllegalFrameSize` if the length is 0 or above the limit
    pub async fn read_length(&mut self) -> Result<u32> {
        if let State::WaitingForBody { length } = self.state {
            return Ok(length);
        }

        while self.buffer.len() < LENGTH_PREFIX_SIZE {
            self.fill().await?;
        }

        let length = decode_length(&self.buffer).ok_or(WorkerError::ConnectionClosed)?;
        validate_length(length, self.max_frame_size)?;

        // Consume prefix bytes
        let _ = self.buffer.split_to(LENGTH_PREFIX_SIZE);
        self.state = State::WaitingForBody { length };

        Ok(length)
    }

    /// Read exactly `length` body bytes, looping over partial reads.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` if the stream ends before the body is complete.
    pub async fn read_body(&mut self, length: u32) -> Result<Bytes> {
        let length = length as usize;
        if self.buffer.capacity() < length {
            self.buffer.reserve(length - self.buffer.len());
        }

        while self.buffer.len() < length {
            self.fill().await?;
        }

        // Reset state for next frame
        self.state = State::WaitingForLength;
        Ok(self.buffer.split_to(length).freeze())
    }

    /// Read one complete frame body.
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        let length = self.read_length().await?;
        self.read_body(length).await
    }

    /// One socket read into the buffer. Zero bytes means the peer is gone.
    async fn fill(&mut self) -> Result<()> {
        if self.buffer.capacity() == self.buffer.len() {
            self.buffer.reserve(DEFAULT_CAPACITY);
        }

        match self.reader.read_buf(&mut self.buffer).await {
            Ok(0) => Err(WorkerError::ConnectionClosed),
            Ok(_) => Ok(()),
            Err(e) => Err(WorkerError::Io(e)),
        }
    }

    /// Number of bytes read from the socket but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}
