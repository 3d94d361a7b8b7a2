//! Request/response correlation for outbound calls.
//!
//! Every outbound call is registered under a fresh opaque token before the
//! request leaves. Whichever of these happens first settles it:
//!
//! | Event | Outcome |
//! |-------|---------|
//! | Matching response arrives | `Ok(data)` or `BackendRejected` |
//! | Deadline passes / caller cancels | `Timeout` |
//! | Target backend disconnects | `ConnectionLost` |
//!
//! Settling removes the entry from the table under the same lock, and only
//! the code path that removed the entry may send through its channel. A
//! late response for an already-settled token finds nothing and is ignored.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::foundation::error::{DispatchError, DispatchResult};
use crate::integration::backend::ApiResponse;

/// An outstanding outbound call.
#[derive(Debug)]
pub struct PendingCall {
    /// Action that was called.
    pub action: String,
    /// Backend the request was sent to.
    pub backend: String,
    /// When the call expires.
    pub deadline: Instant,
    resolver: oneshot::Sender<DispatchResult<Value>>,
}

impl PendingCall {
    fn settle(self, outcome: DispatchResult<Value>) {
        // The waiter may already be gone (its future was dropped).
        let _ = self.resolver.send(outcome);
    }
}

/// Table of outstanding calls keyed by correlation token.
#[derive(Debug, Default)]
pub struct CorrelationTracker {
    pending: Mutex<HashMap<String, PendingCall>>,
}

impl CorrelationTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a token unique among in-flight calls.
    pub fn next_token(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Registers a call and returns the receiver its outcome is sent on.
    pub fn register(
        &self,
        token: impl Into<String>,
        action: impl Into<String>,
        backend: impl Into<String>,
        deadline: Instant,
    ) -> oneshot::Receiver<DispatchResult<Value>> {
        let (tx, rx) = oneshot::channel();
        let call = PendingCall {
            action: action.into(),
            backend: backend.into(),
            deadline,
            resolver: tx,
        };
        self.pending.lock().insert(token.into(), call);
        rx
    }

    /// Settles the call matching `response.echo`.
    ///
    /// Returns `false` when no such call is pending (late or duplicate).
    pub fn resolve(&self, response: ApiResponse) -> bool {
        let Some(call) = self.pending.lock().remove(&response.echo) else {
            return false;
        };

        let outcome = if response.ok {
            Ok(response.data)
        } else {
            Err(DispatchError::BackendRejected {
                action: call.action.clone(),
                backend: call.backend.clone(),
                code: response.code,
                message: response.message.unwrap_or_default(),
            })
        };
        trace!(token = %response.echo, ok = outcome.is_ok(), "Call resolved");
        call.settle(outcome);
        true
    }

    /// Rejects the call with a timeout.
    ///
    /// Used both by the deadline timer and by caller cancellation. Returns
    /// `false` when the call was already settled.
    pub fn expire(&self, token: &str, timeout: Duration) -> bool {
        let Some(call) = self.pending.lock().remove(token) else {
            return false;
        };
        debug!(
            token = %token,
            action = %call.action,
            backend = %call.backend,
            "Call expired"
        );
        let err = DispatchError::Timeout {
            action: call.action.clone(),
            backend: call.backend.clone(),
            timeout,
        };
        call.settle(Err(err));
        true
    }

    /// Removes a call without settling it; its receiver observes a closed
    /// channel.
    pub fn discard(&self, token: &str) -> Option<PendingCall> {
        self.pending.lock().remove(token)
    }

    /// Rejects every call addressed to `backend` with `ConnectionLost`.
    ///
    /// Returns the number of calls rejected.
    pub fn reject_backend(&self, backend: &str) -> usize {
        let drained: Vec<PendingCall> = {
            let mut pending = self.pending.lock();
            let tokens: Vec<String> = pending
                .iter()
                .filter(|(_, call)| call.backend == backend)
                .map(|(token, _)| token.clone())
                .collect();
            tokens
                .iter()
                .filter_map(|token| pending.remove(token))
                .collect()
        };
        let count = drained.len();
        for call in drained {
            let err = DispatchError::ConnectionLost {
                action: call.action.clone(),
                backend: call.backend.clone(),
            };
            call.settle(Err(err));
        }
        count
    }

    /// Rejects every outstanding call with `ConnectionLost`.
    pub fn reject_all(&self) -> usize {
        let drained: Vec<PendingCall> = self.pending.lock().drain().map(|(_, c)| c).collect();
        let count = drained.len();
        for call in drained {
            let err = DispatchError::ConnectionLost {
                action: call.action.clone(),
                backend: call.backend.clone(),
            };
            call.settle(Err(err));
        }
        count
    }

    /// Whether `token` is still pending.
    pub fn contains(&self, token: &str) -> bool {
        self.pending.lock().contains_key(token)
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn resolves_exactly_once() {
        let tracker = CorrelationTracker::new();
        let rx = tracker.register("t1", "get_status", "p1", deadline());

        assert!(tracker.resolve(ApiResponse::ok("t1", json!({"online": true}))));
        // Replayed duplicate response is ignored.
        assert!(!tracker.resolve(ApiResponse::ok("t1", json!({"online": false}))));
        assert!(!tracker.expire("t1", Duration::from_secs(1)));

        assert_eq!(rx.await.unwrap(), Ok(json!({"online": true})));
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn failed_response_rejects_with_provider_details() {
        let tracker = CorrelationTracker::new();
        let rx = tracker.register("t1", "send_msg", "p1", deadline());

        tracker.resolve(ApiResponse::failed("t1", 1404, "no such group"));

        assert_eq!(
            rx.await.unwrap(),
            Err(DispatchError::BackendRejected {
                action: "send_msg".into(),
                backend: "p1".into(),
                code: 1404,
                message: "no such group".into(),
            })
        );
    }

    #[tokio::test]
    async fn expire_wins_over_late_response() {
        let tracker = CorrelationTracker::new();
        let rx = tracker.register("t1", "send_msg", "p1", deadline());

        assert!(tracker.expire("t1", Duration::from_millis(50)));
        assert!(!tracker.resolve(ApiResponse::ok("t1", Value::Null)));

        assert!(matches!(
            rx.await.unwrap(),
            Err(DispatchError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn reject_backend_only_touches_that_backend() {
        let tracker = CorrelationTracker::new();
        let a = tracker.register("a", "x", "p1", deadline());
        let b = tracker.register("b", "y", "p1", deadline());
        let c = tracker.register("c", "z", "p2", deadline());

        assert_eq!(tracker.reject_backend("p1"), 2);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.contains("c"));

        assert!(matches!(
            a.await.unwrap(),
            Err(DispatchError::ConnectionLost { .. })
        ));
        assert!(matches!(
            b.await.unwrap(),
            Err(DispatchError::ConnectionLost { .. })
        ));

        assert_eq!(tracker.reject_all(), 1);
        assert!(matches!(
            c.await.unwrap(),
            Err(DispatchError::ConnectionLost { .. })
        ));
    }

    #[test]
    fn receiver_stays_pending_until_settled() {
        let tracker = CorrelationTracker::new();
        let mut rx = tokio_test::task::spawn(tracker.register("t1", "x", "p1", deadline()));

        tokio_test::assert_pending!(rx.poll());
        assert!(tracker.reject_backend("p2") == 0);
        tokio_test::assert_pending!(rx.poll());

        tracker.resolve(ApiResponse::ok("t1", Value::Bool(true)));
        assert!(rx.is_woken());
        let outcome = tokio_test::assert_ready!(rx.poll());
        assert_eq!(outcome.unwrap(), Ok(Value::Bool(true)));
    }

    #[test]
    fn tokens_are_unique() {
        let tracker = CorrelationTracker::new();
        let a = tracker.next_token();
        let b = tracker.next_token();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }
}
