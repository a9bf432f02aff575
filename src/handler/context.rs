//! Per-worker context handed to every handler call.
//!
//! One `Context` is created at startup and cloned into each invocation. It
//! never carries the current event; that is passed to the handler by value.
//!
//! # Example
//!
//! ```ignore
//! async fn handler(ctx: Context, event: Event) -> anyhow::Result<Output> {
//!     ctx.logger().info_with("Handling", &json!({"id": event.id}));
//!     let db = ctx.user_data::<Pool>().context("init_context did not run")?;
//!     Ok(ctx.response(db.lookup(&event.body)?).with_status(200).into())
//! }
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use super::platform::Platform;
use crate::event::TriggerInfo;
use crate::logging::Logger;
use crate::response::{Body, Response};

type UserData = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

struct ContextInner {
    logger: Logger,
    platform: Platform,
    worker_id: Option<String>,
    trigger: TriggerInfo,
    user_data: RwLock<UserData>,
}

/// Context passed to handlers and the init hook.
///
/// `Context` is `Clone` and can be shared across tasks; clones see the same
/// user data.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("worker_id", &self.inner.worker_id)
            .field("trigger", &self.inner.trigger)
            .field("platform", &self.inner.platform)
            .finish()
    }
}

impl Context {
    /// Create a context.
    pub fn new(platform: Platform, worker_id: Option<String>, trigger: TriggerInfo) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                logger: Logger::new(),
                platform,
                worker_id,
                trigger,
                user_data: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Structured logger.
    pub fn logger(&self) -> &Logger {
        &self.inner.logger
    }

    /// Platform capabilities.
    pub fn platform(&self) -> &Platform {
        &self.inner.platform
    }

    /// Worker id assigned by the host.
    pub fn worker_id(&self) -> Option<&str> {
        self.inner.worker_id.as_deref()
    }

    /// Trigger this worker serves.
    pub fn trigger(&self) -> &TriggerInfo {
        &self.inner.trigger
    }

    /// Store a value for later handler calls, replacing any previous value
    /// of the same type.
    pub fn set_user_data<T: Any + Send + Sync>(&self, value: T) {
        let mut data = self.inner.user_data.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        data.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Fetch a value stored with [`set_user_data`](Self::set_user_data).
    pub fn user_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let data = self.inner.user_data.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        data.get(&TypeId::of::<T>())
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Start building a response.
    pub fn response(&self, body: impl Into<Body>) -> Response {
        Response::new(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::PlatformKind;

    fn context() -> Context {
        Context::new(
            Platform::new(PlatformKind::Local, None),
            Some("3".into()),
            TriggerInfo {
                class: "sync".into(),
                kind: "http".into(),
                name: "web".into(),
            },
        )
    }

    #[test]
    fn test_accessors() {
        let ctx = context();
        assert_eq!(ctx.worker_id(), Some("3"));
        assert_eq!(ctx.trigger().kind, "http");
        assert_eq!(ctx.platform().kind(), PlatformKind::Local);
    }

    #[test]
    fn test_user_data_shared_between_clones() {
        #[derive(Debug, PartialEq)]
        struct Counter(u32);

        let ctx = context();
        assert!(ctx.user_data::<Counter>().is_none());

        ctx.set_user_data(Counter(5));
        ctx.set_user_data(String::from("other type"));

        let clone = ctx.clone();
        assert_eq!(*clone.user_data::<Counter>().unwrap(), Counter(5));
        assert_eq!(clone.user_data::<String>().unwrap().as_str(), "other type");

        clone.set_user_data(Counter(6));
        assert_eq!(*ctx.user_data::<Counter>().unwrap(), Counter(6));
    }

    #[test]
    fn test_response_builder() {
        let response = context().response("created").with_status(201);
        assert_eq!(response.status_code, 201);
        assert_eq!(response.body, Body::Text("created".into()));
    }
}
