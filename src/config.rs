//! Startup configuration.
//!
//! The host starts the worker with command-line flags; every flag can also
//! come from a `FUNCWIRE_*` environment variable.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::handler::PlatformKind;
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::transport::DEFAULT_CONNECT_ATTEMPTS;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "debug";

/// Default delay between connection attempts, in milliseconds.
pub const DEFAULT_CONNECT_INTERVAL_MS: u64 = 1000;

/// Worker configuration.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "funcwire")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Out-of-process function worker")]
pub struct WorkerConfig {
    /// Handler reference (module.sub:handler)
    #[arg(long, env = "FUNCWIRE_HANDLER")]
    pub handler: String,

    /// Path of the event channel Unix socket
    #[arg(long, env = "FUNCWIRE_SOCKET_PATH")]
    pub socket_path: PathBuf,

    /// Path of the optional control channel Unix socket
    #[arg(long, env = "FUNCWIRE_CONTROL_SOCKET_PATH")]
    pub control_socket_path: Option<PathBuf>,

    /// Log level or filter directive (overridden by RUST_LOG)
    #[arg(long, env = "FUNCWIRE_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Platform the worker runs on
    #[arg(long, env = "FUNCWIRE_PLATFORM_KIND", value_enum, default_value_t = PlatformKind::Local)]
    pub platform_kind: PlatformKind,

    /// Namespace of the function
    #[arg(long, env = "FUNCWIRE_NAMESPACE")]
    pub namespace: Option<String>,

    /// Kind of the trigger this worker serves
    #[arg(long, env = "FUNCWIRE_TRIGGER_KIND")]
    pub trigger_kind: Option<String>,

    /// Name of the trigger this worker serves
    #[arg(long, env = "FUNCWIRE_TRIGGER_NAME")]
    pub trigger_name: Option<String>,

    /// Worker id, bound into every log record
    #[arg(long, env = "FUNCWIRE_WORKER_ID")]
    pub worker_id: Option<String>,

    /// Decode event text fields strictly as UTF-8 (default: lossy)
    #[arg(long, env = "FUNCWIRE_DECODE_EVENT_STRINGS")]
    pub decode_event_strings: bool,

    /// Connection attempts per socket before giving up
    #[arg(long, env = "FUNCWIRE_CONNECT_ATTEMPTS", default_value_t = DEFAULT_CONNECT_ATTEMPTS)]
    pub connect_attempts: u32,

    /// Delay between connection attempts in milliseconds
    #[arg(long, env = "FUNCWIRE_CONNECT_INTERVAL_MS", default_value_t = DEFAULT_CONNECT_INTERVAL_MS)]
    pub connect_interval_ms: u64,

    /// Largest accepted event frame in bytes
    #[arg(long, env = "FUNCWIRE_MAX_FRAME_SIZE", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: u32,
}

impl WorkerConfig {
    /// Configuration with defaults for everything but the handler and socket.
    pub fn new(handler: impl Into<String>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            handler: handler.into(),
            socket_path: socket_path.into(),
            control_socket_path: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            platform_kind: PlatformKind::default(),
            namespace: None,
            trigger_kind: None,
            trigger_name: None,
            worker_id: None,
            decode_event_strings: false,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_interval_ms: DEFAULT_CONNECT_INTERVAL_MS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the control channel socket.
    pub fn with_control_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.control_socket_path = Some(path.into());
        self
    }

    /// Set the worker id.
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    /// Delay between connection attempts.
    pub fn connect_interval(&self) -> Duration {
        Duration::from_millis(self.connect_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_flags() {
        let config =
            WorkerConfig::try_parse_from(["funcwire", "--handler", "main:handler", "--socket-path", "/tmp/ev.sock"])
                .unwrap();

        assert_eq!(config, WorkerConfig::new("main:handler", "/tmp/ev.sock"));
        assert_eq!(config.connect_interval(), Duration::from_secs(1));
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_parse_all_flags() {
        let config = WorkerConfig::try_parse_from([
            "funcwire",
            "--handler",
            "pkg.mod:entry",
            "--socket-path",
            "/tmp/ev.sock",
            "--control-socket-path",
            "/tmp/ctl.sock",
            "--log-level",
            "info",
            "--platform-kind",
            "kube",
            "--namespace",
            "prod",
            "--trigger-kind",
            "http",
            "--trigger-name",
            "web",
            "--worker-id",
            "4",
            "--decode-event-strings",
            "--connect-attempts",
            "3",
            "--connect-interval-ms",
            "10",
            "--max-frame-size",
            "4096",
        ])
        .unwrap();

        assert_eq!(config.control_socket_path, Some(PathBuf::from("/tmp/ctl.sock")));
        assert_eq!(config.platform_kind, PlatformKind::Kube);
        assert_eq!(config.namespace.as_deref(), Some("prod"));
        assert_eq!(config.trigger_kind.as_deref(), Some("http"));
        assert_eq!(config.worker_id.as_deref(), Some("4"));
        assert!(config.decode_event_strings);
        assert_eq!(config.connect_attempts, 3);
        assert_eq!(config.connect_interval(), Duration::from_millis(10));
        assert_eq!(config.max_frame_size, 4096);
    }

    #[test]
    fn test_missing_handler_is_rejected() {
        assert!(WorkerConfig::try_parse_from(["funcwire", "--socket-path", "/tmp/ev.sock"]).is_err());
    }

    #[test]
    fn test_unknown_platform_is_rejected() {
        let result = WorkerConfig::try_parse_from([
            "funcwire",
            "--handler",
            "main:handler",
            "--socket-path",
            "/tmp/ev.sock",
            "--platform-kind",
            "mars",
        ]);
        assert!(result.is_err());
    }
}
