//! Handler registry resolving `module:callable` references.
//!
//! User functions are compiled into the worker and registered under a
//! module path and a callable name. At startup the handler reference is
//! resolved exactly once into a [`ResolvedFunction`].
//!
//! # Example
//!
//! ```
//! use funcwire::handler::{Context, HandlerRegistry};
//! use funcwire::Event;
//!
//! let mut registry = HandlerRegistry::new();
//!
//! registry
//!     .module("pkg.reverser")
//!     .handler("handler", |_ctx: Context, event: Event| async move {
//!         Ok::<_, anyhow::Error>(event.body_text().chars().rev().collect::<String>())
//!     })
//!     .init_context(|ctx: Context| async move {
//!         ctx.set_user_data(0u64);
//!         Ok::<_, anyhow::Error>(())
//!     });
//!
//! assert!(registry.resolve_str("pkg.reverser:handler").is_ok());
//! assert!(registry.resolve_str("pkg.reverser:missing").is_err());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use regex::Regex;

use super::Context;
use crate::error::{Result, WorkerError};
use crate::event::Event;
use crate::response::Output;

/// Accepted shape of a handler reference.
pub const HANDLER_REFERENCE_PATTERN: &str = r"^[\w-]+(\.[\w-]+)*:\w+$";

/// Result type for handler functions.
pub type HandlerResult = anyhow::Result<Output>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for handler functions.
pub trait Handler: Send + Sync + 'static {
    /// Handle one event.
    fn call(&self, ctx: Context, event: Event) -> BoxFuture<'static, HandlerResult>;
}

/// Trait for a module's `init_context` hook.
pub trait InitHook: Send + Sync + 'static {
    /// Run once before the first event.
    fn call(&self, ctx: Context) -> BoxFuture<'static, anyhow::Result<()>>;
}

/// Async handler whose output converts into [`Output`].
pub struct TypedHandler<F, Fut, O>
where
    F: Fn(Context, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    O: Into<Output> + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> (Fut, O)>,
}

impl<F, Fut, O> TypedHandler<F, Fut, O>
where
    F: Fn(Context, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    O: Into<Output> + 'static,
{
    /// Wrap an async handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut, O> Handler for TypedHandler<F, Fut, O>
where
    F: Fn(Context, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    O: Into<Output> + 'static,
{
    fn call(&self, ctx: Context, event: Event) -> BoxFuture<'static, HandlerResult> {
        let fut = (self.handler)(ctx, event);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}

/// Synchronous handler. Runs on the task the dispatch loop spawns for it.
pub struct SyncHandler<F, O>
where
    F: Fn(&Context, Event) -> anyhow::Result<O> + Send + Sync + 'static,
    O: Into<Output> + 'static,
{
    handler: Arc<F>,
    _phantom: PhantomData<fn() -> O>,
}

impl<F, O> SyncHandler<F, O>
where
    F: Fn(&Context, Event) -> anyhow::Result<O> + Send + Sync + 'static,
    O: Into<Output> + 'static,
{
    /// Wrap a synchronous handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
            _phantom: PhantomData,
        }
    }
}

impl<F, O> Handler for SyncHandler<F, O>
where
    F: Fn(&Context, Event) -> anyhow::Result<O> + Send + Sync + 'static,
    O: Into<Output> + 'static,
{
    fn call(&self, ctx: Context, event: Event) -> BoxFuture<'static, HandlerResult> {
        let handler = self.handler.clone();
        Box::pin(async move { handler(&ctx, event).map(Into::into) })
    }
}

struct FnInitHook<F>(F);

impl<F, Fut> InitHook for FnInitHook<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin((self.0)(ctx))
    }
}

/// Parsed `module[.sub]*:callable` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerReference {
    /// Dotted module path.
    pub module: String,
    /// Callable name within the module.
    pub callable: String,
}

impl HandlerReference {
    /// Parse and validate a reference.
    ///
    /// # Errors
    ///
    /// `MalformedHandler` if the reference does not match
    /// [`HANDLER_REFERENCE_PATTERN`].
    pub fn parse(reference: &str) -> Result<Self> {
        let pattern = Regex::new(HANDLER_REFERENCE_PATTERN)
            .map_err(|e| WorkerError::Protocol(format!("Invalid handler pattern: {e}")))?;

        if !pattern.is_match(reference) {
            return Err(WorkerError::MalformedHandler(reference.to_string()));
        }

        let (module, callable) = reference
            .rsplit_once(':')
            .ok_or_else(|| WorkerError::MalformedHandler(reference.to_string()))?;

        Ok(Self {
            module: module.to_string(),
            callable: callable.to_string(),
        })
    }
}

impl fmt::Display for HandlerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.callable)
    }
}

impl std::str::FromStr for HandlerReference {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A handler resolved at startup, with its module's init hook.
#[derive(Clone)]
pub struct ResolvedFunction {
    reference: HandlerReference,
    handler: Arc<dyn Handler>,
    init_hook: Option<Arc<dyn InitHook>>,
}

impl fmt::Debug for ResolvedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedFunction")
            .field("reference", &self.reference)
            .field("has_init_hook", &self.init_hook.is_some())
            .finish()
    }
}

impl ResolvedFunction {
    /// The reference this was resolved from.
    pub fn reference(&self) -> &HandlerReference {
        &self.reference
    }

    /// Shared handler.
    pub fn handler(&self) -> Arc<dyn Handler> {
        self.handler.clone()
    }

    /// Whether the module has an init hook.
    pub fn has_init_hook(&self) -> bool {
        self.init_hook.is_some()
    }

    /// Run the module's init hook, if any.
    ///
    /// # Errors
    ///
    /// `Init` wrapping the hook's error.
    pub async fn initialize(&self, ctx: Context) -> Result<()> {
        match &self.init_hook {
            Some(hook) => hook.call(ctx).await.map_err(WorkerError::Init),
            None => Ok(()),
        }
    }
}

/// Entry for a registered module.
#[derive(Default)]
struct ModuleEntry {
    handlers: HashMap<String, Arc<dyn Handler>>,
    init_hook: Option<Arc<dyn InitHook>>,
}

/// Fluent registration for one module.
pub struct ModuleBuilder<'r> {
    entry: &'r mut ModuleEntry,
}

impl<'r> ModuleBuilder<'r> {
    /// Register an async handler.
    pub fn handler<F, Fut, O>(self, name: &str, handler: F) -> Self
    where
        F: Fn(Context, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
        O: Into<Output> + 'static,
    {
        self.entry
            .handlers
            .insert(name.to_string(), Arc::new(TypedHandler::new(handler)));
        self
    }

    /// Register a synchronous handler.
    pub fn handler_sync<F, O>(self, name: &str, handler: F) -> Self
    where
        F: Fn(&Context, Event) -> anyhow::Result<O> + Send + Sync + 'static,
        O: Into<Output> + 'static,
    {
        self.entry
            .handlers
            .insert(name.to_string(), Arc::new(SyncHandler::new(handler)));
        self
    }

    /// Register any [`Handler`] implementation.
    pub fn handler_boxed(self, name: &str, handler: Arc<dyn Handler>) -> Self {
        self.entry.handlers.insert(name.to_string(), handler);
        self
    }

    /// Set the module's async `init_context` hook.
    pub fn init_context<F, Fut>(self, hook: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.entry.init_hook = Some(Arc::new(FnInitHook(hook)));
        self
    }

    /// Set the module's synchronous `init_context` hook.
    pub fn init_context_sync<F>(self, hook: F) -> Self
    where
        F: Fn(&Context) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let hook = Arc::new(hook);
        self.init_context(move |ctx| {
            let hook = hook.clone();
            async move { hook(&ctx) }
        })
    }
}

/// Registry of modules and their callables.
#[derive(Default)]
pub struct HandlerRegistry {
    modules: HashMap<String, ModuleEntry>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register into a module, creating it if needed.
    pub fn module(&mut self, path: &str) -> ModuleBuilder<'_> {
        ModuleBuilder {
            entry: self.modules.entry(path.to_string()).or_default(),
        }
    }

    /// Registered module paths, sorted.
    pub fn module_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve a parsed reference.
    ///
    /// # Errors
    ///
    /// `ModuleNotFound` or `HandlerNotFound`.
    pub fn resolve(&self, reference: &HandlerReference) -> Result<ResolvedFunction> {
        let module = self
            .modules
            .get(&reference.module)
            .ok_or_else(|| WorkerError::ModuleNotFound(reference.module.clone()))?;

        let handler = module
            .handlers
            .get(&reference.callable)
            .cloned()
            .ok_or_else(|| WorkerError::HandlerNotFound {
                module: reference.module.clone(),
                name: reference.callable.clone(),
            })?;

        Ok(ResolvedFunction {
            reference: reference.clone(),
            handler,
            init_hook: module.init_hook.clone(),
        })
    }

    /// Parse and resolve a reference string.
    pub fn resolve_str(&self, reference: &str) -> Result<ResolvedFunction> {
        self.resolve(&HandlerReference::parse(reference)?)
    }
}
