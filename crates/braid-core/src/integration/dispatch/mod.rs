//! Outbound dispatch.
//!
//! ```text
//! caller ──call(action, params)──► DispatchRouter ──select──► Backend::send
//!                                        │                        │
//!                                 CorrelationTracker ◄──response──┘
//!                                 (token → PendingCall)
//! ```

mod correlation;
mod router;
mod strategy;

pub use correlation::{CorrelationTracker, PendingCall};
pub use router::{CallOptions, DispatchRouter};
pub use strategy::{DEFAULT_CALL_TIMEOUT, RouterOptions, SelectionStrategy};
