//! Platform capabilities exposed to handlers.
//!
//! - explicit stream acks over the control channel
//! - drain / termination callbacks, run by the dispatch loop between events
//! - calls to other functions, through a pluggable [`FunctionCaller`]

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::ValueEnum;

use super::registry::BoxFuture;
use crate::control::{ControlMessage, ControlSender};
use crate::error::{Result, WorkerError};
use crate::event::Event;
use crate::response::Response;

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "nuclio";

/// Port functions listen on.
pub const FUNCTION_PORT: u16 = 8080;

/// Where the worker runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum PlatformKind {
    /// Local docker platform.
    #[default]
    Local,
    /// Kubernetes.
    Kube,
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformKind::Local => f.write_str("local"),
            PlatformKind::Kube => f.write_str("kube"),
        }
    }
}

/// Stream position to commit with [`Platform::explicit_ack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedOffset {
    /// Topic (the event path for stream triggers).
    pub topic: String,
    /// Partition (the event shard).
    pub partition: i64,
    /// Offset within the partition.
    pub offset: i64,
}

impl QualifiedOffset {
    /// Offset of the given stream event.
    pub fn from_event(event: &Event) -> Self {
        Self {
            topic: event.path.clone(),
            partition: event.shard_id,
            offset: event.offset,
        }
    }
}

/// Performs a call to another function.
///
/// The worker itself has no network client; embedders that need
/// cross-function calls install one with [`Platform::with_function_caller`].
pub trait FunctionCaller: Send + Sync + 'static {
    /// Send `event` to the function at `address` and return its response.
    fn call(&self, address: String, event: Event, timeout: Option<Duration>) -> BoxFuture<'static, Result<Response>>;
}

/// Callback run on drain or termination.
pub type LifecycleCallback = Arc<dyn Fn() + Send + Sync>;

struct PlatformInner {
    kind: PlatformKind,
    namespace: String,
    control: Option<ControlSender>,
    caller: Option<Arc<dyn FunctionCaller>>,
    drain_callback: Mutex<Option<LifecycleCallback>>,
    termination_callback: Mutex<Option<LifecycleCallback>>,
}

/// Handle to platform capabilities. Cheap to clone.
#[derive(Clone)]
pub struct Platform {
    inner: Arc<PlatformInner>,
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("kind", &self.inner.kind)
            .field("namespace", &self.inner.namespace)
            .field("control", &self.inner.control.is_some())
            .finish()
    }
}

impl Platform {
    /// Platform without a control channel or function caller.
    pub fn new(kind: PlatformKind, namespace: Option<String>) -> Self {
        Self::build(kind, namespace, None, None)
    }

    fn build(
        kind: PlatformKind,
        namespace: Option<String>,
        control: Option<ControlSender>,
        caller: Option<Arc<dyn FunctionCaller>>,
    ) -> Self {
        Self {
            inner: Arc::new(PlatformInner {
                kind,
                namespace: namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
                control,
                caller,
                drain_callback: Mutex::new(None),
                termination_callback: Mutex::new(None),
            }),
        }
    }

    /// Attach the control channel. Must be called before the handle is shared.
    pub fn with_control(self, control: ControlSender) -> Self {
        Self::build(
            self.inner.kind,
            Some(self.inner.namespace.clone()),
            Some(control),
            self.inner.caller.clone(),
        )
    }

    /// Install a function caller. Must be called before the handle is shared.
    pub fn with_function_caller(self, caller: Arc<dyn FunctionCaller>) -> Self {
        Self::build(
            self.inner.kind,
            Some(self.inner.namespace.clone()),
            self.inner.control.clone(),
            Some(caller),
        )
    }

    /// Platform kind.
    pub fn kind(&self) -> PlatformKind {
        self.inner.kind
    }

    /// Namespace.
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Whether a control channel is attached.
    pub fn has_control_channel(&self) -> bool {
        self.inner.control.is_some()
    }

    pub(crate) fn control(&self) -> Option<&ControlSender> {
        self.inner.control.as_ref()
    }

    /// Address of a function by name, as seen from this platform.
    pub fn function_address(&self, function_name: &str) -> String {
        match self.inner.kind {
            PlatformKind::Local => format!(
                "{}-{}:{}",
                self.inner.namespace, function_name, FUNCTION_PORT
            ),
            PlatformKind::Kube => format!("nuclio-{}:{}", function_name, FUNCTION_PORT),
        }
    }

    /// Invoke another function.
    ///
    /// # Errors
    ///
    /// `Platform` if no function caller is installed, or whatever the
    /// caller reports.
    pub async fn call_function(
        &self,
        function_name: &str,
        event: Event,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let caller = self.inner.caller.clone().ok_or_else(|| {
            WorkerError::Platform(format!(
                "Cannot call function {function_name:?}: no function caller configured"
            ))
        })?;

        let address = self.function_address(function_name);
        tracing::debug!(function = function_name, %address, "Calling function");
        caller.call(address, event, timeout).await
    }

    /// Ask the host to commit a stream offset.
    ///
    /// Pair with [`Response::ensure_no_ack`] so the trigger does not commit
    /// on its own.
    ///
    /// # Errors
    ///
    /// `ControlChannelUnavailable` without a control channel.
    pub async fn explicit_ack(&self, offset: &QualifiedOffset) -> Result<()> {
        let control = self.control().ok_or(WorkerError::ControlChannelUnavailable)?;
        let message = ControlMessage::stream_message_ack(&offset.topic, offset.partition, offset.offset);
        control.send(&message).await
    }

    /// Register the callback run when the worker starts draining.
    pub fn set_drain_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        store(&self.inner.drain_callback, Arc::new(callback));
    }

    /// Register the callback run when the worker is told to terminate.
    pub fn set_termination_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        store(&self.inner.termination_callback, Arc::new(callback));
    }

    pub(crate) fn run_drain_callback(&self) {
        run(&self.inner.drain_callback, "drain");
    }

    pub(crate) fn run_termination_callback(&self) {
        run(&self.inner.termination_callback, "termination");
    }
}

fn store(slot: &Mutex<Option<LifecycleCallback>>, callback: LifecycleCallback) {
    let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = Some(callback);
}

fn run(slot: &Mutex<Option<LifecycleCallback>>, which: &str) {
    // Clone out so the lock is not held while user code runs
    let callback = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();

    let Some(callback) = callback else {
        tracing::debug!(callback = which, "No callback registered");
        return;
    };

    tracing::debug!(callback = which, "Running lifecycle callback");
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback())) {
        tracing::error!(
            callback = which,
            panic = %crate::dispatch::panic_message(panic.as_ref()),
            "Lifecycle callback panicked"
        );
    }
}
