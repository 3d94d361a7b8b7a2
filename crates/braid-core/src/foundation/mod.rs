//! Foundation layer - Core abstractions and type system.
//!
//! This module contains the fundamental building blocks of Braid:
//! - Error taxonomy shared by every component
//! - Normalized event model for cross-backend events
//! - Processing context threaded through the hook pipeline

pub mod context;
pub mod error;
pub mod event;

pub use context::ProcessingContext;
pub use error::{
    BackendError, BackendResult, BoxError, ConfigurationError, CycleError, DispatchError,
    DispatchResult, HandlerError, RegistryError, RegistryResult,
};
pub use event::{
    EventCategory, EventPayload, MessagePayload, MetaPayload, NormalizedEvent, NoticePayload,
    RequestPayload,
};
