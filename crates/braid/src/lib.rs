//! # Braid
//!
//! The middleware core of a multi-backend chat bot.
//!
//! ## Overview
//!
//! Braid sits between protocol adapters, which own connections and wire
//! formats, and application logic, which owns behavior:
//!
//! ```text
//! ┌──────────┐  raw payloads   ┌─────────────┐   events   ┌──────────────┐
//! │ Backends │────────────────▶│   Runtime   │───────────▶│ HookPipeline │──▶ extensions
//! │(adapters)│◀────────────────│ (dispatch)  │◀───────────│   (stages)   │
//! └──────────┘  ApiRequest     └─────────────┘   calls    └──────────────┘
//! ```
//!
//! - **Backends**: connection endpoints implementing [`core::Backend`]
//! - **Dispatch**: backend selection plus request/response correlation
//! - **Ingestion**: normalization, duplicate suppression, category pub/sub
//! - **Hooks**: prioritized middleware over a mutable processing context
//! - **Components**: dependency-ordered startup and reverse-order shutdown
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use braid::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = BraidRuntime::new();
//!     runtime.register_backend(my_backend()).await;
//!
//!     runtime.register_extension(
//!         &ExtensionBuilder::new("ping")
//!             .on(stages::MESSAGE, 0, |ctx| Box::pin(async move {
//!                 if ctx.event().and_then(|e| e.content()) == Some("ping") {
//!                     ctx.call("send_msg", serde_json::json!({"text": "pong"})).await?;
//!                 }
//!                 Ok(true)
//!             }))
//!             .build(),
//!     )?;
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: load `braid.toml` (default)
//! - `yaml-config`: load `braid.yaml`
//! - `json-log`: JSON log output

pub use braid_core as core;
pub use braid_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use braid::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use braid_runtime::{BraidConfig, BraidRuntime, RuntimeError, RuntimeStats};

    // Hooks and extensions
    pub use braid_core::{
        BoxFuture, ExtensionBuilder, Hook, HookPipeline, HookResult, ProcessingContext, hook_fn,
        stages,
    };

    // Events
    pub use braid_core::{EventCategory, EventPayload, NormalizedEvent};

    // Backends and dispatch
    pub use braid_core::{
        ApiRequest, Backend, BackendResult, BackendSink, CallOptions, DispatchError,
        SelectionStrategy,
    };

    // Components
    pub use braid_core::{BootContext, Component, ComponentDescriptor, InitContext};

    pub use braid_core::BoxError;
}
