//! # Braid Core
//!
//! The orchestration core of the Braid bot framework.
//!
//! Braid sits between protocol adapters (which own wire formats and
//! connections) and application logic (which owns behavior). This crate
//! provides the four mechanisms in between:
//!
//! - **Hook pipeline** ([`HookPipeline`]): named, prioritized middleware
//!   stages over a mutable [`ProcessingContext`], with per-hook error
//!   isolation.
//! - **Dispatch** ([`DispatchRouter`]): backend selection and
//!   request/response correlation for outbound calls.
//! - **Ingestion** ([`EventRouter`], [`EventDeduplicator`]): normalization of
//!   backend payloads, duplicate suppression and category pub/sub.
//! - **Bootstrap** ([`ComponentRegistry`]): dependency-ordered, fail-fast
//!   component initialization.
//!
//! ## Architecture Layers
//!
//! ### Foundation Layer
//!
//! - **Errors**: one typed error per concern ([`DispatchError`], [`RegistryError`], ...)
//! - **Events**: the normalized event model ([`NormalizedEvent`], [`EventCategory`])
//! - **Context**: the per-invocation [`ProcessingContext`]
//!
//! ### Framework Layer
//!
//! - **Hooks**: [`HookPipeline`], [`Hook`], [`hook_fn`]
//! - **Extensions**: [`Extension`], [`ExtensionBuilder`]
//! - **Components**: [`ComponentRegistry`], [`Component`], [`BootContext`]
//!
//! ### Integration Layer
//!
//! - **Backends**: the [`Backend`] capability implemented by adapters
//! - **Dispatch**: [`DispatchRouter`], [`CorrelationTracker`]
//! - **Ingestion**: [`EventRouter`], [`EventDeduplicator`], [`Normalizer`]
//!
//! ## Data Flow
//!
//! ```text
//!            inbound                                      outbound
//! Backend ──payload──► EventRouter ──► Deduplicator     Hook ──call──► DispatchRouter
//!                          │                                               │
//!                     listeners ◄── publish                   select ──► Backend::send
//!                          │                                               │
//!                    HookPipeline (preprocess → category → postprocess)    │
//!                                                 CorrelationTracker ◄── response
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use braid_core::prelude::*;
//!
//! let pipeline = HookPipeline::new();
//! pipeline.register(
//!     stages::MESSAGE,
//!     hook_fn(|ctx| Box::pin(async move {
//!         if ctx.event().and_then(|e| e.content()) == Some("ping") {
//!             ctx.call("send_msg", serde_json::json!({"text": "pong"})).await?;
//!         }
//!         Ok(true)
//!     })),
//!     0,
//!     "ping",
//! )?;
//! ```

// Architectural layers
pub mod foundation;
pub mod framework;
pub mod integration;

// Re-export foundation types
pub use foundation::{
    BackendError, BackendResult, BoxError, ConfigurationError, CycleError, DispatchError,
    DispatchResult, EventCategory, EventPayload, HandlerError, MessagePayload, MetaPayload,
    NormalizedEvent, NoticePayload, ProcessingContext, RegistryError, RegistryResult,
    RequestPayload,
};

// Re-export framework types
pub use framework::{
    AsAny, BootContext, BoxedComponent, BoxedHook, Component, ComponentDescriptor,
    ComponentFactory, ComponentRegistry, ComponentState, Dependency, Extension, ExtensionBuilder,
    FnHook, Hook, HookBinding, HookPipeline, HookRegistration, HookResult, InitContext,
    StaticExtension, hook_fn, stages, validate_stage_name,
};

// Re-export integration types
pub use integration::{
    ApiRequest, ApiResponse, Backend, BackendSignal, BackendSink, BoxedBackend, CallOptions,
    CorrelationTracker, DispatchRouter, EventDeduplicator, EventListener, EventRouter,
    Fingerprint, JsonNormalizer, Normalizer, PendingCall, RouterOptions, SelectionStrategy,
    SubscriptionId,
};

pub use futures::future::BoxFuture;

/// Prelude for common imports.
pub mod prelude {
    pub use super::BoxFuture;
    pub use super::foundation::*;
    pub use super::framework::{
        BootContext, Component, ComponentDescriptor, ComponentRegistry, Extension,
        ExtensionBuilder, Hook, HookPipeline, HookResult, InitContext, hook_fn, stages,
    };
    pub use super::integration::{
        ApiRequest, Backend, BackendSink, CallOptions, DispatchRouter, EventRouter,
        SelectionStrategy,
    };
}
