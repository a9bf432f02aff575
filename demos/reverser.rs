//! Reverser worker - the smallest useful function.
//!
//! This example demonstrates:
//! - Registering an async handler under a module path
//! - Using `init_context` to prepare state once per worker
//! - Returning a status code with a JSON body
//!
//! # Running against a host
//!
//! ```text
//! cargo run --example reverser -- \
//!     --handler reverser:handler \
//!     --socket-path /tmp/nuclio-rpc-0.sock \
//!     --worker-id 0
//! ```

use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};

use clap::Parser;
use funcwire::{Context, Event, HandlerRegistry, Output, WorkerConfig};
use serde_json::json;

/// Number of events handled by this worker.
#[derive(Default)]
struct Served(AtomicU64);

async fn handler(ctx: Context, event: Event) -> anyhow::Result<Output> {
    let reversed: String = event.body_text().chars().rev().collect();

    let served = match ctx.user_data::<Served>() {
        Some(served) => served.0.fetch_add(1, Ordering::Relaxed) + 1,
        None => anyhow::bail!("init_context did not run"),
    };

    ctx.logger()
        .debug_with("Reversed body", &json!({"event_id": event.id, "served": served}));

    Ok(Output::from((200u16, json!({"reversed": reversed, "served": served}))))
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = WorkerConfig::parse();

    let mut registry = HandlerRegistry::new();
    registry
        .module("reverser")
        .handler("handler", handler)
        .init_context_sync(|ctx| {
            ctx.set_user_data(Served::default());
            ctx.logger().info("Reverser initialized");
            Ok(())
        });

    funcwire::run(config, registry).await
}
