//! Error types for funcwire.

use thiserror::Error;

/// Main error type for all worker operations.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (tagged lines, control plane).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (unknown tag, malformed line, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection closed by the host, possibly in the middle of a frame.
    #[error("Client disconnected")]
    ConnectionClosed,

    /// Length prefix is zero or exceeds the frame size limit.
    #[error("Illegal message size: {size} (max {max})")]
    IllegalFrameSize {
        /// Declared frame length.
        size: u32,
        /// Configured maximum.
        max: u32,
    },

    /// The socket never became connectable.
    #[error("Failed to connect to {path} after {attempts} attempts")]
    ConnectTimeout {
        /// Socket path.
        path: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Handler reference does not match `module[.sub]*:callable`.
    #[error("Malformed handler - {0:?}")]
    MalformedHandler(String),

    /// No module registered under the referenced module path.
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// Module exists but has no such callable.
    #[error("Handler not found: {module}:{name}")]
    HandlerNotFound {
        /// Module path.
        module: String,
        /// Callable name.
        name: String,
    },

    /// The module's `init_context` hook failed.
    #[error("Exception raised while running init_context: {0:#}")]
    Init(anyhow::Error),

    /// An operation needs the control channel but none was configured.
    #[error("Control channel is not available")]
    ControlChannelUnavailable,

    /// Platform capability failure (cross-function call, etc.).
    #[error("Platform error: {0}")]
    Platform(String),

    /// Invalid startup configuration or logging setup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Outbound writer queue stayed full for too long.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl WorkerError {
    /// Whether this error must terminate the worker process.
    ///
    /// Everything else is scoped to the event being processed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WorkerError::Io(_)
                | WorkerError::ConnectionClosed
                | WorkerError::IllegalFrameSize { .. }
                | WorkerError::ConnectTimeout { .. }
                | WorkerError::MalformedHandler(_)
                | WorkerError::ModuleNotFound(_)
                | WorkerError::HandlerNotFound { .. }
                | WorkerError::Init(_)
                | WorkerError::Config(_)
        )
    }
}

/// Result type alias using WorkerError.
pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(WorkerError::ConnectionClosed.is_fatal());
        assert!(WorkerError::IllegalFrameSize { size: 0, max: 10 }.is_fatal());
        assert!(WorkerError::MalformedHandler("json".into()).is_fatal());
        assert!(!WorkerError::Protocol("bad tag".into()).is_fatal());
        assert!(!WorkerError::ControlChannelUnavailable.is_fatal());
    }

    #[test]
    fn test_messages() {
        let err = WorkerError::IllegalFrameSize { size: 0, max: 1024 };
        assert_eq!(err.to_string(), "Illegal message size: 0 (max 1024)");

        let err = WorkerError::MalformedHandler("json".into());
        assert_eq!(err.to_string(), "Malformed handler - \"json\"");
    }
}
