//! Control channel - lifecycle messages and explicit acks.
//!
//! The control channel is an optional second Unix socket. Inbound messages
//! (`drain`, `terminate`, `continue`) feed the lifecycle signal queue;
//! outbound messages announce readiness and commit stream offsets.
//!
//! Also home of the local stdout output used before any socket exists.

mod channel;
mod message;
mod stdio;

pub use channel::{spawn_control_reader, ControlSender};
pub use message::{kinds, ControlMessage};
pub use stdio::{write_stdout_json, write_stdout_line};
