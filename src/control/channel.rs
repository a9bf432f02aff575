//! Control channel plumbing.
//!
//! Outbound messages share the writer task machinery with the event
//! channel; inbound messages are read by a dedicated task that forwards
//! lifecycle kinds to the signal queue.

use tokio::io::AsyncRead;
use tokio::task::JoinHandle;

use super::message::ControlMessage;
use crate::error::{Result, WorkerError};
use crate::lifecycle::SignalSender;
use crate::protocol::FrameReader;
use crate::writer::{OutboundFrame, WriterHandle};

/// Sends control messages to the host.
#[derive(Debug, Clone)]
pub struct ControlSender {
    writer: WriterHandle,
}

impl ControlSender {
    /// Wrap the writer of the control socket.
    pub fn new(writer: WriterHandle) -> Self {
        Self { writer }
    }

    /// Send one message and wait until it is on the wire.
    pub async fn send(&self, message: &ControlMessage) -> Result<()> {
        self.writer.send(OutboundFrame::new(message.encode()?)).await?;
        self.writer.flush().await
    }
}

/// Spawn the inbound reader for the control socket.
///
/// Lifecycle kinds go to `signals`; unknown kinds and undecodable messages
/// are logged and skipped. The task ends when the host closes the socket,
/// the framing breaks, or the signal queue is gone.
pub fn spawn_control_reader<R>(
    reader: R,
    signals: SignalSender,
    max_frame_size: u32,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut frames = FrameReader::with_max_frame_size(reader, max_frame_size);

        loop {
            let payload = match frames.read_frame().await {
                Ok(payload) => payload,
                Err(WorkerError::ConnectionClosed) => {
                    tracing::debug!("Control channel closed by host");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Control channel read failed");
                    return;
                }
            };

            let message = match ControlMessage::decode(&payload) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to decode control message");
                    continue;
                }
            };

            match message.as_signal() {
                Some(signal) => {
                    tracing::debug!(kind = %message.kind, "Received control message");
                    if signals.send(signal).await.is_err() {
                        return;
                    }
                }
                None => {
                    tracing::debug!(kind = %message.kind, "Ignoring unknown control message kind");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{signal_channel, LifecycleSignal};
    use crate::protocol::{encode_length_prefixed, DEFAULT_MAX_FRAME_SIZE};
    use crate::writer::spawn_writer_task_default;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_reader_forwards_lifecycle_kinds() {
        let (mut host, worker) = duplex(4096);
        let (tx, mut rx) = signal_channel();
        let task = spawn_control_reader(worker, tx, DEFAULT_MAX_FRAME_SIZE);

        for kind in ["drain", "unknownKind", "continue", "terminate"] {
            let message = ControlMessage::new(kind);
            host.write_all(&message.encode().unwrap()).await.unwrap();
        }
        host.write_all(&encode_length_prefixed(b"{broken").unwrap()).await.unwrap();
        drop(host);

        assert_eq!(rx.recv().await, Some(LifecycleSignal::Drain));
        assert_eq!(rx.recv().await, Some(LifecycleSignal::Continue));
        assert_eq!(rx.recv().await, Some(LifecycleSignal::Terminate));

        task.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_sender_writes_length_prefixed_json() {
        let (worker, mut host) = duplex(4096);
        let (writer, _task) = spawn_writer_task_default(worker);
        let sender = ControlSender::new(writer);

        sender.send(&ControlMessage::wrapper_initialized()).await.unwrap();

        let mut prefix = [0u8; 4];
        host.read_exact(&mut prefix).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(prefix) as usize];
        host.read_exact(&mut body).await.unwrap();

        let message = ControlMessage::decode(&body).unwrap();
        assert_eq!(message, ControlMessage::wrapper_initialized());
    }
}
