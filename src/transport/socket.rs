//! Unix domain socket connector.
//!
//! The host creates the socket and starts the worker; the worker connects.
//! The socket may not exist yet when the worker starts, so connecting is
//! retried a bounded number of times.
//!
//! # Example
//!
//! ```ignore
//! use funcwire::transport::Connector;
//!
//! let stream = Connector::new("/tmp/nuclio-rpc-abc.sock").connect().await?;
//! let (read_half, write_half) = stream.into_split();
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::UnixStream;

use crate::error::{Result, WorkerError};

/// Default number of connection attempts.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 60;

/// Default delay between attempts.
pub const DEFAULT_CONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Connects to a Unix socket with bounded retry.
#[derive(Debug, Clone)]
pub struct Connector {
    path: PathBuf,
    max_attempts: u32,
    retry_interval: Duration,
}

impl Connector {
    /// Connector for `path` with default retry settings (60 × 1s).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_attempts: DEFAULT_CONNECT_ATTEMPTS,
            retry_interval: DEFAULT_CONNECT_INTERVAL,
        }
    }

    /// Set the number of attempts. Values below 1 are treated as 1.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the delay between attempts.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Connect, retrying until the attempt budget is spent.
    ///
    /// # Errors
    ///
    /// `ConnectTimeout` once every attempt has failed.
    pub async fn connect(&self) -> Result<UnixStream> {
        for attempt in 1..=self.max_attempts {
            match UnixStream::connect(&self.path).await {
                Ok(stream) => {
                    tracing::debug!(path = %self.path.display(), attempt, "Connected to socket");
                    return Ok(stream);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        attempt,
                        error = %e,
                        "Failed to connect to socket"
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_interval).await;
            }
        }

        Err(WorkerError::ConnectTimeout {
            path: self.path.display().to_string(),
            attempts: self.max_attempts,
        })
    }
}
