//! Event dispatch loop.
//!
//! One event is in flight at a time. Each iteration:
//!
//! 1. apply queued lifecycle signals and run pending callbacks
//! 2. wait for a length prefix, racing the signal queue
//! 3. read and decode the body
//! 4. unless discarding, run the handler in its own task and await it
//! 5. write `m{"duration": ..}` then `r{...}` and wait for the flush
//!
//! Only the length wait is ever cancelled. Once a prefix has been read the
//! frame is processed to completion.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::task::JoinError;

use crate::codec::EventDecoder;
use crate::error::{Result, WorkerError};
use crate::event::Event;
use crate::handler::{Context, Handler, HandlerResult};
use crate::lifecycle::{Lifecycle, LifecycleSignal, SignalReceiver, WorkerState};
use crate::protocol::{FrameReader, Tag};
use crate::response::{EncodedResponse, Response};
use crate::writer::WriterHandle;

/// Prefix of the 500 body for failures outside the handler.
const SERVING_ERROR: &str = "Exception caught while serving";

/// Prefix of the 500 body for handler failures.
const HANDLER_ERROR: &str = "Exception caught in handler";

/// How a loop run ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The host disconnected after Terminate.
    Shutdown,
    /// The requested number of frames was consumed.
    Completed,
}

#[derive(Serialize)]
struct Metric {
    duration: f64,
}

/// What woke the loop while it waited for a length prefix.
enum Wakeup {
    Signal(LifecycleSignal),
    Length(Result<u32>),
}

/// The dispatch loop. Owns the inbound socket half, the decoder and the
/// lifecycle state.
pub struct EventLoop<R> {
    frames: FrameReader<R>,
    decoder: EventDecoder,
    lifecycle: Lifecycle,
    signals: SignalReceiver,
    writer: WriterHandle,
    context: Context,
    handler: Arc<dyn Handler>,
}

impl<R> std::fmt::Debug for EventLoop<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("state", &self.lifecycle.state())
            .field("decoded", &self.decoder.decoded_count())
            .field("failed", &self.decoder.failed_count())
            .finish()
    }
}

impl<R: AsyncRead + Unpin> EventLoop<R> {
    /// Create a loop with a strict decoder.
    pub fn new(
        frames: FrameReader<R>,
        writer: WriterHandle,
        signals: SignalReceiver,
        context: Context,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            frames,
            decoder: EventDecoder::new(true),
            lifecycle: Lifecycle::new(),
            signals,
            writer,
            context,
            handler,
        }
    }

    /// Replace the event decoder.
    pub fn with_decoder(mut self, decoder: EventDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    /// Current worker state.
    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    /// Record that the ready line has been sent.
    pub fn mark_ready(&mut self) {
        self.lifecycle.set_state(WorkerState::Ready);
    }

    /// Serve until a fatal error or shutdown.
    pub async fn serve(&mut self) -> Result<LoopExit> {
        self.serve_requests(None).await
    }

    /// Serve at most `limit` frames.
    ///
    /// Discarded and undecodable frames count towards the limit.
    ///
    /// # Errors
    ///
    /// Fatal protocol and socket errors. Handler failures are not errors
    /// here; they become 500 responses.
    pub async fn serve_requests(&mut self, limit: Option<u64>) -> Result<LoopExit> {
        if matches!(self.lifecycle.state(), WorkerState::Starting | WorkerState::Ready) {
            self.lifecycle.set_state(WorkerState::Serving);
        }

        let mut consumed: u64 = 0;
        loop {
            if limit.is_some_and(|limit| consumed >= limit) {
                return Ok(LoopExit::Completed);
            }

            self.apply_queued_signals();

            let wakeup = tokio::select! {
                biased;
                Some(signal) = self.signals.recv() => Wakeup::Signal(signal),
                length = self.frames.read_length() => Wakeup::Length(length),
            };

            let length = match wakeup {
                Wakeup::Signal(signal) => {
                    self.apply_signal(signal);
                    continue;
                }
                Wakeup::Length(Ok(length)) => length,
                Wakeup::Length(Err(e)) => return self.on_read_error(e).await,
            };

            let body = match self.frames.read_body(length).await {
                Ok(body) => body,
                Err(e) => return self.on_read_error(e).await,
            };
            consumed += 1;

            self.process_frame(&body).await?;
        }
    }

    fn apply_queued_signals(&mut self) {
        while let Ok(signal) = self.signals.try_recv() {
            self.apply_signal(signal);
        }

        if self.lifecycle.take_drain_pending() {
            self.context.platform().run_drain_callback();
        }
        if self.lifecycle.take_termination_pending() {
            self.context.platform().run_termination_callback();
        }
    }

    fn apply_signal(&mut self, signal: LifecycleSignal) {
        if self.lifecycle.apply(signal) {
            tracing::info!(signal = ?signal, state = %self.lifecycle.state(), "Lifecycle transition");
        } else {
            tracing::debug!(signal = ?signal, state = %self.lifecycle.state(), "Ignoring lifecycle signal");
        }
    }

    async fn on_read_error(&mut self, error: WorkerError) -> Result<LoopExit> {
        if self.lifecycle.is_terminating() && matches!(error, WorkerError::ConnectionClosed) {
            self.apply_queued_signals();
            self.lifecycle.set_state(WorkerState::Shutdown);
            tracing::info!("Host disconnected after terminate, shutting down");
            return Ok(LoopExit::Shutdown);
        }

        tracing::error!(error = %error, "Fatal error while reading event");
        self.lifecycle.set_state(WorkerState::Shutdown);

        // The socket is probably gone already
        let response = Response::error(format!("{SERVING_ERROR} - \"{error}\": {error:?}"));
        if let Ok(encoded) = response.encode() {
            let _ = self.write_response(&encoded).await;
        }

        Err(error)
    }

    async fn process_frame(&mut self, body: &[u8]) -> Result<()> {
        let event = match self.decoder.decode(body) {
            Ok(event) => event,
            Err(e) => {
                self.decoder.reset();
                tracing::error!(error = %e, size = body.len(), "{SERVING_ERROR}");
                let response = Response::error(format!("{SERVING_ERROR} - \"{e}\": {e:?}"));
                return self.write_response(&encode_or_fallback(&response)).await;
            }
        };

        if self.lifecycle.discard_events() {
            tracing::debug!(
                event_id = %event.id,
                state = %self.lifecycle.state(),
                "Discarding event"
            );
            return Ok(());
        }

        let started = Instant::now();
        let outcome = self.invoke(event).await;
        let duration = match started.elapsed().as_secs_f64() {
            elapsed if elapsed > 0.0 => elapsed,
            _ => f64::MIN_POSITIVE,
        };

        let response = encode_outcome(outcome);
        self.writer.send_tagged(Tag::Metric, &Metric { duration }).await?;
        self.write_response(&response).await
    }

    /// Run the handler on its own task so a panic stays contained.
    async fn invoke(&self, event: Event) -> std::result::Result<HandlerResult, JoinError> {
        let handler = self.handler.clone();
        let context = self.context.clone();
        tokio::spawn(async move { handler.call(context, event).await }).await
    }

    async fn write_response(&self, response: &EncodedResponse) -> Result<()> {
        self.writer.send_tagged(Tag::Response, response).await?;
        self.writer.flush().await
    }
}

/// Turn a handler outcome into the encoded response, mapping every failure
/// to a 500.
fn encode_outcome(outcome: std::result::Result<HandlerResult, JoinError>) -> EncodedResponse {
    let failure = match outcome {
        Ok(Ok(output)) => match output.into_response().and_then(|response| response.encode()) {
            Ok(encoded) => return encoded,
            Err(e) => format!("{HANDLER_ERROR} - \"{e}\": {e:?}"),
        },
        Ok(Err(e)) => format!("{HANDLER_ERROR} - \"{e}\": {e:?}"),
        Err(join_error) if join_error.is_panic() => {
            let message = panic_message(join_error.into_panic().as_ref());
            format!("{HANDLER_ERROR} - \"{message}\": handler panicked")
        }
        Err(join_error) => format!("{HANDLER_ERROR} - \"{join_error}\": handler task cancelled"),
    };

    tracing::error!(error = %failure, "{HANDLER_ERROR}");
    encode_or_fallback(&Response::error(failure))
}

/// Encode a response that cannot fail validation.
fn encode_or_fallback(response: &Response) -> EncodedResponse {
    response.encode().unwrap_or_else(|e| EncodedResponse {
        body: e.to_string(),
        body_encoding: crate::response::BodyEncoding::Text,
        content_type: crate::response::TEXT_PLAIN.to_string(),
        headers: Default::default(),
        status_code: 500,
    })
}

/// Extract the message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
