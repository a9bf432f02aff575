//! Dedicated writer task for outbound lines.
//!
//! Every outbound byte of a channel goes through one writer task fed by an
//! mpsc queue. Each queued item is a complete line (or a complete
//! length-prefixed control frame), so lines emitted from different tasks
//! never interleave mid-line.
//!
//! # Architecture
//!
//! ```text
//! Dispatch loop ──┐
//! Log bridge    ──┼─► mpsc::Sender<WriterCommand> ─► Writer Task ─► Socket
//! Platform      ──┘
//! ```
//!
//! A [`WriterCommand::Flush`] is acknowledged only after every line queued
//! before it has been written and flushed. The dispatch loop relies on this
//! to finish an invocation before reading the next length prefix.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Result, WorkerError};
use crate::protocol::{encode_bare, encode_tagged, Tag};

/// Default maximum pending lines before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum lines to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A complete outbound unit, written atomically with respect to other units.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Encoded bytes, including the trailing `\n` for tagged lines.
    pub bytes: Bytes,
}

impl OutboundFrame {
    /// Wrap pre-encoded bytes.
    #[inline]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Encode a tagged JSON line.
    pub fn tagged<T: Serialize + ?Sized>(tag: Tag, payload: &T) -> Result<Self> {
        Ok(Self::new(encode_tagged(tag, payload)?))
    }

    /// Size of this frame in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Item on the writer queue.
#[derive(Debug)]
pub enum WriterCommand {
    /// Write these bytes.
    Frame(OutboundFrame),
    /// Acknowledge once everything queued before has been flushed.
    Flush(oneshot::Sender<()>),
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending lines before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for the queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for sending lines to the writer task.
///
/// This is cheaply cloneable and can be shared across tasks.
#[derive(Clone)]
pub struct WriterHandle {
    /// Channel sender for commands.
    tx: mpsc::Sender<WriterCommand>,
    /// Pending line count (for backpressure).
    pending: Arc<AtomicUsize>,
    /// Maximum pending lines.
    max_pending: usize,
    /// Backpressure timeout.
    timeout: Duration,
}

impl std::fmt::Debug for WriterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterHandle")
            .field("pending", &self.pending_count())
            .field("max_pending", &self.max_pending)
            .finish()
    }
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<WriterCommand>,
        pending: Arc<AtomicUsize>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Queue a frame.
    ///
    /// Waits if backpressure is active, timing out after the configured
    /// duration.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        // Increment pending count BEFORE sending
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(WriterCommand::Frame(frame)).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            WorkerError::ConnectionClosed
        })
    }

    /// Encode and queue a tagged line.
    pub async fn send_tagged<T: Serialize + ?Sized>(&self, tag: Tag, payload: &T) -> Result<()> {
        self.send(OutboundFrame::tagged(tag, payload)?).await
    }

    /// Queue a tag with no payload (the `s` ready line).
    pub async fn send_bare(&self, tag: Tag) -> Result<()> {
        self.send(OutboundFrame::new(encode_bare(tag))).await
    }

    /// Wait until everything queued so far has been written and flushed.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` if the writer task has stopped.
    pub async fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Flush(ack_tx))
            .await
            .map_err(|_| WorkerError::ConnectionClosed)?;

        ack_rx.await.map_err(|_| WorkerError::ConnectionClosed)
    }

    /// Wait for backpressure to clear with timeout.
    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                return Err(WorkerError::BackpressureTimeout);
            }

            tokio::time::sleep(check_interval).await;
        }
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Get current pending line count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the writer task is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Try to queue a frame without waiting.
    ///
    /// Used from synchronous contexts such as the log bridge.
    /// Returns `Err(BackpressureTimeout)` immediately if at capacity.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            return Err(WorkerError::BackpressureTimeout);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.try_send(WriterCommand::Frame(frame)).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => WorkerError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => WorkerError::ConnectionClosed,
            }
        })
    }
}

/// Spawn the writer task and return a handle for sending lines.
///
/// The returned `JoinHandle` resolves when every handle has been dropped
/// (`Ok`) or a write fails (`Err`).
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        pending.clone(),
        config.max_pending_frames,
        config.backpressure_timeout,
    );

    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

/// Receive commands and write them to the socket.
///
/// Consecutive frames are batched into one vectored write. A flush request
/// closes the current batch; its ack is sent after that batch is on the wire.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<WriterCommand>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    let mut acks = Vec::new();

    loop {
        let first = match rx.recv().await {
            Some(command) => command,
            None => {
                // Channel closed, clean shutdown
                writer.flush().await?;
                return Ok(());
            }
        };

        let mut next = Some(first);
        while let Some(command) = next.take() {
            match command {
                WriterCommand::Frame(frame) => batch.push(frame),
                WriterCommand::Flush(ack) => {
                    acks.push(ack);
                    break;
                }
            }

            if batch.len() >= MAX_BATCH_SIZE {
                break;
            }
            next = rx.try_recv().ok();
        }

        let batch_size = batch.len();
        write_batch(&mut writer, &batch).await?;
        batch.clear();
        pending.fetch_sub(batch_size, Ordering::Release);

        for ack in acks.drain(..) {
            // Requester may have given up waiting
            let _ = ack.send(());
        }
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        writer.flush().await?;
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(WorkerError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after a partial write.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for frame in batch {
        let end = offset + frame.size();
        if skip_bytes < end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.bytes[start..]));
        }
        offset = end;
    }

    slices
}
