//! The per-invocation processing context.
//!
//! A [`ProcessingContext`] is created once per inbound event (or per
//! externally triggered operation such as an outbound call), handed by
//! mutable reference to every hook of every stage in turn, and dropped when
//! the last stage finishes or the chain is interrupted.
//!
//! Hooks communicate through it: earlier hooks write metadata, later hooks
//! read it. Because the context is exclusively borrowed for the duration of
//! each hook, no locking is involved.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::foundation::error::{DispatchError, DispatchResult, HandlerError};
use crate::foundation::event::NormalizedEvent;
use crate::integration::dispatch::{CallOptions, DispatchRouter};

/// The mutable bag passed through a pipeline execution.
///
/// # Example
///
/// ```rust,ignore
/// async fn tag_language(ctx: &mut ProcessingContext) -> HookResult {
///     if let Some(text) = ctx.event().and_then(|e| e.content()) {
///         ctx.insert("lang", detect(text));
///     }
///     Ok(true)
/// }
/// ```
#[derive(Default)]
pub struct ProcessingContext {
    /// The event being processed, absent for externally triggered operations.
    event: Option<Arc<NormalizedEvent>>,
    /// Open string-keyed metadata shared between hooks.
    metadata: Map<String, Value>,
    /// Result produced by the operation, if any.
    result: Option<Value>,
    /// Most recent isolated hook failure.
    error: Option<HandlerError>,
    /// Router used for outbound actions requested by hooks.
    router: Option<Arc<DispatchRouter>>,
}

impl ProcessingContext {
    /// Creates a context for an inbound event.
    pub fn new(event: Arc<NormalizedEvent>) -> Self {
        Self {
            event: Some(event),
            ..Default::default()
        }
    }

    /// Creates a context that is not tied to an inbound event.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Attaches the router hooks will use for [`call`](Self::call).
    pub fn with_router(mut self, router: Arc<DispatchRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Returns the event being processed.
    pub fn event(&self) -> Option<&NormalizedEvent> {
        self.event.as_deref()
    }

    /// Returns a shared handle to the event.
    pub fn event_arc(&self) -> Option<Arc<NormalizedEvent>> {
        self.event.clone()
    }

    // ─── Metadata ────────────────────────────────────────────────────────────

    /// Returns the raw metadata value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Deserializes the metadata value stored under `key`.
    ///
    /// Returns `None` when the key is absent or has a different shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.metadata
            .get(key)
            .and_then(|v| T::deserialize(v).ok())
    }

    /// Stores a metadata value, returning the previous one.
    ///
    /// Values that fail to serialize are stored as `null`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Serialize) -> Option<Value> {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.metadata.insert(key.into(), value)
    }

    /// Removes a metadata value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.metadata.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.metadata.contains_key(key)
    }

    /// Read-only view of the whole metadata map.
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    // ─── Result / error ──────────────────────────────────────────────────────

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn set_result(&mut self, result: Value) {
        self.result = Some(result);
    }

    pub fn take_result(&mut self) -> Option<Value> {
        self.result.take()
    }

    /// The last hook failure recorded by the pipeline.
    pub fn error(&self) -> Option<&HandlerError> {
        self.error.as_ref()
    }

    pub(crate) fn set_error(&mut self, error: HandlerError) {
        self.error = Some(error);
    }

    /// Clears the recorded failure, returning it.
    pub fn take_error(&mut self) -> Option<HandlerError> {
        self.error.take()
    }

    // ─── Outbound actions ────────────────────────────────────────────────────

    /// Performs a correlated outbound call with default options.
    pub async fn call(&self, action: &str, params: Value) -> DispatchResult<Value> {
        self.call_with(action, params, CallOptions::default()).await
    }

    /// Performs a correlated outbound call.
    ///
    /// Fails with [`DispatchError::NoBackendRegistered`] when the context
    /// carries no router.
    pub async fn call_with(
        &self,
        action: &str,
        params: Value,
        options: CallOptions,
    ) -> DispatchResult<Value> {
        match &self.router {
            Some(router) => router.call(action, params, options).await,
            None => Err(DispatchError::NoBackendRegistered),
        }
    }
}

impl std::fmt::Debug for ProcessingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingContext")
            .field("event", &self.event)
            .field("metadata", &self.metadata)
            .field("result", &self.result)
            .field("error", &self.error)
            .field("has_router", &self.router.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_roundtrips_typed_values() {
        let mut ctx = ProcessingContext::detached();
        assert!(ctx.insert("count", 3u32).is_none());
        assert_eq!(ctx.get_as::<u32>("count"), Some(3));
        assert_eq!(ctx.get_as::<String>("count"), None);
        assert_eq!(ctx.insert("count", 4u32), Some(json!(3)));
        assert_eq!(ctx.remove("count"), Some(json!(4)));
        assert!(!ctx.contains("count"));
    }

    #[tokio::test]
    async fn call_without_router_fails() {
        let ctx = ProcessingContext::detached();
        let err = ctx.call("ping", Value::Null).await.unwrap_err();
        assert_eq!(err, DispatchError::NoBackendRegistered);
    }
}
