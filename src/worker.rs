//! Worker wiring: startup sequence and exit codes.
//!
//! Startup order:
//! 1. Resolve the handler reference
//! 2. Connect the event socket (and the control socket, if configured)
//! 3. Switch logging from stdout to the event channel
//! 4. Run the module's init hook
//! 5. Send the `s` line (and `wrapperInitialized` on the control channel)
//! 6. Serve events until shutdown or a fatal error
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use funcwire::{HandlerRegistry, WorkerConfig};
//!
//! #[tokio::main]
//! async fn main() -> std::process::ExitCode {
//!     let mut registry = HandlerRegistry::new();
//!     registry.module("main").handler_sync("handler", |_ctx, event| Ok(event.body_text().into_owned()));
//!
//!     funcwire::run(WorkerConfig::parse(), registry).await
//! }
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use crate::codec::EventDecoder;
use crate::config::WorkerConfig;
use crate::control::{spawn_control_reader, write_stdout_json, ControlMessage, ControlSender};
use crate::dispatch::{EventLoop, LoopExit};
use crate::error::Result;
use crate::event::TriggerInfo;
use crate::handler::{Context, FunctionCaller, HandlerRegistry, Platform};
use crate::lifecycle::{signal_channel, spawn_signal_listener};
use crate::logging::{init_logging, LogSink};
use crate::protocol::{FrameReader, Tag};
use crate::transport::Connector;
use crate::writer::{spawn_writer_task, WriterConfig};

/// Builder for configuring a [`Worker`].
pub struct WorkerBuilder {
    config: WorkerConfig,
    registry: HandlerRegistry,
    log_sink: Option<LogSink>,
    function_caller: Option<Arc<dyn FunctionCaller>>,
    writer_config: WriterConfig,
    signal_handlers: bool,
}

impl WorkerBuilder {
    /// Route log records to the event channel once it is connected.
    pub fn log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Install a caller for [`Platform::call_function`].
    pub fn function_caller(mut self, caller: Arc<dyn FunctionCaller>) -> Self {
        self.function_caller = Some(caller);
        self
    }

    /// Set the writer configuration used for both channels.
    pub fn writer_config(mut self, config: WriterConfig) -> Self {
        self.writer_config = config;
        self
    }

    /// Whether to turn SIGUSR1 / SIGTERM / SIGCONT into lifecycle signals.
    ///
    /// Default: true
    pub fn signal_handlers(mut self, enabled: bool) -> Self {
        self.signal_handlers = enabled;
        self
    }

    /// Finish configuration.
    pub fn build(self) -> Worker {
        Worker {
            config: self.config,
            registry: self.registry,
            log_sink: self.log_sink,
            function_caller: self.function_caller,
            writer_config: self.writer_config,
            signal_handlers: self.signal_handlers,
        }
    }
}

/// A configured worker, ready to connect.
pub struct Worker {
    config: WorkerConfig,
    registry: HandlerRegistry,
    log_sink: Option<LogSink>,
    function_caller: Option<Arc<dyn FunctionCaller>>,
    writer_config: WriterConfig,
    signal_handlers: bool,
}

impl Worker {
    /// Start configuring a worker.
    pub fn builder(config: WorkerConfig, registry: HandlerRegistry) -> WorkerBuilder {
        WorkerBuilder {
            config,
            registry,
            log_sink: None,
            function_caller: None,
            writer_config: WriterConfig::default(),
            signal_handlers: true,
        }
    }

    /// Connect, initialize and serve.
    ///
    /// # Errors
    ///
    /// Any fatal error: bad handler reference, unreachable socket, failed
    /// init hook, or a protocol / socket failure while serving.
    pub async fn run(self) -> Result<LoopExit> {
        let config = self.config;
        let resolved = self.registry.resolve_str(&config.handler)?;
        tracing::debug!(handler = %resolved.reference(), "Resolved handler");

        let (signal_tx, signal_rx) = signal_channel();

        let event_stream = Connector::new(&config.socket_path)
            .max_attempts(config.connect_attempts)
            .retry_interval(config.connect_interval())
            .connect()
            .await?;
        let (event_read, event_write) = event_stream.into_split();
        let (writer, _writer_task) = spawn_writer_task(event_write, self.writer_config.clone());

        if let Some(sink) = &self.log_sink {
            sink.attach(writer.clone());
        }

        let mut platform = Platform::new(config.platform_kind, config.namespace.clone());

        if let Some(path) = &config.control_socket_path {
            let control_stream = Connector::new(path)
                .max_attempts(config.connect_attempts)
                .retry_interval(config.connect_interval())
                .connect()
                .await?;
            let (control_read, control_write) = control_stream.into_split();
            let (control_writer, _control_task) = spawn_writer_task(control_write, self.writer_config);

            spawn_control_reader(control_read, signal_tx.clone(), config.max_frame_size);
            platform = platform.with_control(ControlSender::new(control_writer));
        }

        if let Some(caller) = self.function_caller {
            platform = platform.with_function_caller(caller);
        }

        if self.signal_handlers {
            spawn_signal_listener(signal_tx)?;
        } else {
            drop(signal_tx);
        }

        let trigger = TriggerInfo {
            class: String::new(),
            kind: config.trigger_kind.clone().unwrap_or_default(),
            name: config.trigger_name.clone().unwrap_or_default(),
        };
        let context = Context::new(platform.clone(), config.worker_id.clone(), trigger);

        if resolved.has_init_hook() {
            tracing::debug!("Running init_context");
            resolved.initialize(context.clone()).await?;
        }

        writer.send_bare(Tag::Start).await?;
        writer.flush().await?;

        if let Some(control) = platform.control() {
            control.send(&ControlMessage::wrapper_initialized()).await?;
        }

        tracing::info!(
            handler = %resolved.reference(),
            platform = %config.platform_kind,
            decode_event_strings = config.decode_event_strings,
            "Worker ready"
        );

        let frames = FrameReader::with_max_frame_size(event_read, config.max_frame_size);
        let mut event_loop = EventLoop::new(frames, writer.clone(), signal_rx, context, resolved.handler())
            .with_decoder(EventDecoder::new(config.decode_event_strings));
        event_loop.mark_ready();

        let exit = event_loop.serve().await;

        // Push out whatever was logged on the way down
        let _ = writer.flush().await;
        exit
    }
}

/// Install logging, run a worker and map the outcome to an exit code.
///
/// 0 on shutdown after Terminate, 1 on any fatal error.
pub async fn run(config: WorkerConfig, registry: HandlerRegistry) -> ExitCode {
    let builder = match init_logging(&config.log_level, config.worker_id.clone()) {
        Ok(sink) => Worker::builder(config, registry).log_sink(sink),
        Err(e) => {
            let _ = write_stdout_json(&serde_json::json!({
                "level": "warning",
                "message": "Logging unavailable",
                "with": {"error": e.to_string()},
            }));
            Worker::builder(config, registry)
        }
    };

    match builder.build().run().await {
        Ok(exit) => {
            tracing::info!(exit = ?exit, "Worker stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, fatal = e.is_fatal(), "Caught unhandled exception, exiting");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use std::time::Duration;

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.module("main").handler_sync("handler", |_ctx, _event| Ok("ok"));
        registry
    }

    #[tokio::test]
    async fn test_malformed_handler_fails_before_connecting() {
        let config = WorkerConfig::new("not-a-reference", "/nonexistent/event.sock");
        let err = Worker::builder(config, registry())
            .signal_handlers(false)
            .build()
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::MalformedHandler(_)));
    }

    #[tokio::test]
    async fn test_unknown_handler_fails() {
        let config = WorkerConfig::new("main:other", "/nonexistent/event.sock");
        let err = Worker::builder(config, registry())
            .signal_handlers(false)
            .build()
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::HandlerNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_socket_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WorkerConfig::new("main:handler", dir.path().join("missing.sock"));
        config.connect_attempts = 2;
        config.connect_interval_ms = 1;

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            Worker::builder(config, registry()).signal_handlers(false).build().run(),
        )
        .await
        .unwrap()
        .unwrap_err();

        assert!(matches!(err, WorkerError::ConnectTimeout { attempts: 2, .. }));
    }
}
