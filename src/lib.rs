//! # funcwire
//!
//! Out-of-process function worker for a serverless event processor.
//!
//! The host process owns the triggers and sends each event to a worker over
//! a Unix socket. The worker runs the user's handler and answers with
//! exactly one response per event, plus log and metric lines.
//!
//! ## Architecture
//!
//! - **Event channel** (Unix socket): inbound length-prefixed msgpack
//!   events; outbound tagged JSON lines (`s` ready, `r` response,
//!   `m` metric, `l` log)
//! - **Control channel** (optional Unix socket): length-prefixed JSON in
//!   both directions for readiness, stream acks and drain / terminate /
//!   continue
//!
//! ## Example
//!
//! ```ignore
//! use clap::Parser;
//! use funcwire::{Context, Event, HandlerRegistry, Output, WorkerConfig};
//!
//! #[tokio::main]
//! async fn main() -> std::process::ExitCode {
//!     let mut registry = HandlerRegistry::new();
//!     registry
//!         .module("main")
//!         .handler("handler", |ctx: Context, event: Event| async move {
//!             ctx.logger().info("Handling event");
//!             Ok(Output::from((201u16, event.body_text().into_owned())))
//!         });
//!
//!     funcwire::run(WorkerConfig::parse(), registry).await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod handler;
pub mod lifecycle;
pub mod logging;
pub mod protocol;
pub mod response;
pub mod transport;
pub mod writer;

mod worker;

pub use config::WorkerConfig;
pub use error::{Result, WorkerError};
pub use event::{Event, FieldValue, Headers, TriggerInfo};
pub use handler::{Context, HandlerRegistry, Platform, PlatformKind, QualifiedOffset};
pub use logging::Logger;
pub use response::{Body, Output, Response};
pub use worker::{run, Worker, WorkerBuilder};
