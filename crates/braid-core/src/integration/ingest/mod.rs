//! Inbound event ingestion.
//!
//! ```text
//! raw payload ──► EventRouter::ingest ──► EventDeduplicator::should_process
//!   (per backend)   (Normalizer)                │
//!                                              ▼
//!                               EventRouter::publish ──► listeners
//! ```

mod dedup;
mod normalize;
mod router;

pub use dedup::{DEFAULT_CONTENT_PREFIX, DEFAULT_WINDOW, EventDeduplicator, Fingerprint};
pub use normalize::{JsonNormalizer, Normalizer};
pub use router::{EventListener, EventRouter, SubscriptionId};
