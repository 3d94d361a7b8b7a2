//! Integration layer - Interfaces to backends.
//!
//! This module contains everything that touches the adapter layer:
//! - The [`Backend`] capability consumed from adapters
//! - Outbound dispatch with request/response correlation
//! - Inbound ingestion: normalization, deduplication and fan-out

pub mod backend;
pub mod dispatch;
pub mod ingest;

pub use backend::{ApiRequest, ApiResponse, Backend, BackendSignal, BackendSink, BoxedBackend};
pub use dispatch::{
    CallOptions, CorrelationTracker, DispatchRouter, PendingCall, RouterOptions,
    SelectionStrategy,
};
pub use ingest::{
    EventDeduplicator, EventListener, EventRouter, Fingerprint, JsonNormalizer, Normalizer,
    SubscriptionId,
};
