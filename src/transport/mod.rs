//! Transport module - Unix domain socket connection with retry.

mod socket;

pub use socket::{Connector, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_INTERVAL};
