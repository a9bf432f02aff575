//! Structured logging bridge.
//!
//! Everything in the worker logs through `tracing`. [`LogBridge`] is a
//! `tracing_subscriber` layer that turns each event into a JSON record:
//!
//! ```text
//! {"datetime": "...", "level": "info", "message": "...", "with": {...}}
//! ```
//!
//! Until the event socket is connected, records are written to stdout. Once
//! [`LogSink::attach`] hands over the event channel writer they travel as
//! `l` lines on the event channel instead.
//!
//! User code logs through [`Logger`], obtained from the handler context.

use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::control::write_stdout_json;
use crate::error::{Result, WorkerError};
use crate::protocol::Tag;
use crate::writer::{OutboundFrame, WriterHandle};

/// Target of events emitted through [`Logger`].
pub const USER_LOG_TARGET: &str = "funcwire::user";

/// Field carrying structured attributes as a JSON document.
const WITH_FIELD: &str = "with";

/// One log line as sent to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Time the record was produced.
    pub datetime: String,
    /// `debug`, `info`, `warning` or `error`.
    pub level: String,
    /// Log message.
    pub message: String,
    /// Structured attributes.
    pub with: Map<String, Value>,
}

/// Host-side name of a tracing level.
pub fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::TRACE | Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warning",
        Level::ERROR => "error",
    }
}

/// Shared slot for the event channel writer.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    writer: Arc<OnceLock<WriterHandle>>,
}

impl LogSink {
    /// Detached sink: records go to stdout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route records to the event channel from now on.
    ///
    /// Only the first call has an effect.
    pub fn attach(&self, writer: WriterHandle) -> bool {
        self.writer.set(writer).is_ok()
    }

    /// Whether a writer is attached.
    pub fn is_attached(&self) -> bool {
        self.writer.get().is_some()
    }

    fn emit(&self, record: &LogRecord) {
        if let Some(writer) = self.writer.get() {
            let sent = OutboundFrame::tagged(Tag::Log, record).and_then(|frame| writer.try_send(frame));
            if sent.is_ok() {
                return;
            }
        }

        // Nowhere else to report a logging failure
        let _ = write_stdout_json(record);
    }
}

/// Layer turning tracing events into [`LogRecord`]s.
#[derive(Debug, Clone)]
pub struct LogBridge {
    sink: LogSink,
    worker_id: Option<String>,
}

impl LogBridge {
    /// Create a bridge writing to `sink`, binding `worker_id` into every record.
    pub fn new(sink: LogSink, worker_id: Option<String>) -> Self {
        Self { sink, worker_id }
    }

    fn build_record(&self, level: &Level, visitor: RecordVisitor) -> LogRecord {
        let mut with = visitor.fields;
        if let Some(worker_id) = &self.worker_id {
            with.entry("worker_id")
                .or_insert_with(|| Value::String(worker_id.clone()));
        }

        LogRecord {
            datetime: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level: level_name(level).to_string(),
            message: visitor.message.unwrap_or_default(),
            with,
        }
    }
}

impl<S> Layer<S> for LogBridge
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: LayerContext<'_, S>) {
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let record = self.build_record(event.metadata().level(), visitor);
        self.sink.emit(&record);
    }
}

/// Collects the message and fields of one event.
#[derive(Default)]
struct RecordVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl RecordVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }

    fn merge_with(&mut self, raw: &str) {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(attributes)) => self.fields.extend(attributes),
            Ok(other) => {
                self.fields.insert(WITH_FIELD.to_string(), other);
            }
            Err(_) => {
                self.fields
                    .insert(WITH_FIELD.to_string(), Value::String(raw.to_string()));
            }
        }
    }
}

impl Visit for RecordVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let value = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.insert(field, Value::String(value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            WITH_FIELD => self.merge_with(value),
            _ => self.insert(field, Value::String(value.to_string())),
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }
}

/// Install the global subscriber: `EnvFilter` (from `RUST_LOG`, else
/// `level`) plus the bridge.
///
/// # Errors
///
/// `Config` if a global subscriber is already installed.
pub fn init_logging(level: &str, worker_id: Option<String>) -> Result<LogSink> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let sink = LogSink::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(LogBridge::new(sink.clone(), worker_id))
        .try_init()
        .map_err(|e| WorkerError::Config(format!("Failed to install logger: {e}")))?;

    Ok(sink)
}

/// Logger handed to user code.
///
/// Messages go through `tracing` under [`USER_LOG_TARGET`], so they share
/// the worker's filter and sink.
#[derive(Debug, Clone, Default)]
pub struct Logger {
    _private: (),
}

macro_rules! user_event {
    ($level:expr, $message:expr, $with:expr) => {
        match $with {
            Some(with) => {
                let with = with.to_string();
                tracing::event!(target: USER_LOG_TARGET, $level, with = with.as_str(), "{}", $message)
            }
            None => tracing::event!(target: USER_LOG_TARGET, $level, "{}", $message),
        }
    };
}

impl Logger {
    /// Create a logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log at debug level.
    pub fn debug(&self, message: &str) {
        user_event!(Level::DEBUG, message, None::<&Value>);
    }

    /// Log at debug level with attributes.
    pub fn debug_with(&self, message: &str, with: &Value) {
        user_event!(Level::DEBUG, message, Some(with));
    }

    /// Log at info level.
    pub fn info(&self, message: &str) {
        user_event!(Level::INFO, message, None::<&Value>);
    }

    /// Log at info level with attributes.
    pub fn info_with(&self, message: &str, with: &Value) {
        user_event!(Level::INFO, message, Some(with));
    }

    /// Log at warning level.
    pub fn warn(&self, message: &str) {
        user_event!(Level::WARN, message, None::<&Value>);
    }

    /// Log at warning level with attributes.
    pub fn warn_with(&self, message: &str, with: &Value) {
        user_event!(Level::WARN, message, Some(with));
    }

    /// Log at error level.
    pub fn error(&self, message: &str) {
        user_event!(Level::ERROR, message, None::<&Value>);
    }

    /// Log at error level with attributes.
    pub fn error_with(&self, message: &str, with: &Value) {
        user_event!(Level::ERROR, message, Some(with));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_tagged;
    use crate::writer::spawn_writer_task_default;
    use serde_json::json;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};

    #[test]
    fn test_level_names() {
        assert_eq!(level_name(&Level::TRACE), "debug");
        assert_eq!(level_name(&Level::DEBUG), "debug");
        assert_eq!(level_name(&Level::INFO), "info");
        assert_eq!(level_name(&Level::WARN), "warning");
        assert_eq!(level_name(&Level::ERROR), "error");
    }

    #[test]
    fn test_visitor_merges_with_document() {
        let bridge = LogBridge::new(LogSink::new(), Some("7".into()));
        let mut visitor = RecordVisitor::default();
        visitor.message = Some("Handled".into());
        visitor.merge_with(r#"{"user":"ada","count":3}"#);
        visitor.merge_with("not json");

        let record = bridge.build_record(&Level::WARN, visitor);
        assert_eq!(record.level, "warning");
        assert_eq!(record.message, "Handled");
        assert_eq!(record.with["user"], "ada");
        assert_eq!(record.with["count"], 3);
        assert_eq!(record.with["with"], "not json");
        assert_eq!(record.with["worker_id"], "7");
        assert!(!record.datetime.is_empty());
    }

    #[tokio::test]
    async fn test_attached_bridge_emits_log_lines() {
        let (worker, host) = duplex(16 * 1024);
        let (writer, _task) = spawn_writer_task_default(worker);

        let sink = LogSink::new();
        assert!(!sink.is_attached());
        assert!(sink.attach(writer.clone()));
        assert!(sink.is_attached());

        let subscriber = tracing_subscriber::registry().with(LogBridge::new(sink, Some("0".into())));
        tracing::subscriber::with_default(subscriber, || {
            let logger = Logger::new();
            logger.info("plain");
            logger.error_with("failed", &json!({"attempt": 2}));
            tracing::debug!(path = "/tmp/sock", "internal");
        });
        writer.flush().await.unwrap();

        let mut lines = BufReader::new(host).lines();
        let mut records = Vec::new();
        for _ in 0..3 {
            let line = lines.next_line().await.unwrap().unwrap();
            let (tag, payload) = decode_tagged(line.as_bytes()).unwrap();
            assert_eq!(tag, Tag::Log);
            records.push(serde_json::from_slice::<LogRecord>(payload).unwrap());
        }

        assert_eq!(records[0].level, "info");
        assert_eq!(records[0].message, "plain");
        assert_eq!(records[0].with, Map::from_iter([("worker_id".to_string(), json!("0"))]));

        assert_eq!(records[1].level, "error");
        assert_eq!(records[1].with["attempt"], 2);

        assert_eq!(records[2].level, "debug");
        assert_eq!(records[2].with["path"], "/tmp/sock");
    }

    #[test]
    fn test_detached_sink_writes_stdout() {
        let subscriber = tracing_subscriber::registry().with(LogBridge::new(LogSink::new(), None));
        tracing::subscriber::with_default(subscriber, || {
            Logger::new().warn_with("before connect", &json!({"attempt": 1}));
        });
    }
}
