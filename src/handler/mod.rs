//! Handler module - user functions and what they can reach.
//!
//! Provides:
//! - [`HandlerRegistry`] - maps `module:callable` references to handlers
//! - [`Context`] - per-worker handle passed to every handler call
//! - [`Platform`] - explicit acks, lifecycle callbacks, cross-function calls
//!
//! # Example
//!
//! ```ignore
//! use funcwire::handler::{Context, HandlerRegistry};
//! use funcwire::{Event, Output};
//!
//! let mut registry = HandlerRegistry::new();
//!
//! registry.module("main").handler("handler", |ctx: Context, event: Event| async move {
//!     ctx.logger().info("Got event");
//!     Ok(Output::Status(201, event.body_text().into()))
//! });
//! ```

mod context;
mod platform;
mod registry;

pub use context::Context;
pub use platform::{
    FunctionCaller, LifecycleCallback, Platform, PlatformKind, QualifiedOffset, DEFAULT_NAMESPACE,
    FUNCTION_PORT,
};
pub use registry::{
    BoxFuture, Handler, HandlerReference, HandlerRegistry, HandlerResult, InitHook, ModuleBuilder,
    ResolvedFunction, SyncHandler, TypedHandler, HANDLER_REFERENCE_PATTERN,
};
