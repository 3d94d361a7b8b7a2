//! The dispatch router: backend selection plus correlated calls.

use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, debug, info, span, trace, warn};

use super::correlation::CorrelationTracker;
use super::strategy::{RouterOptions, SelectionStrategy};
use crate::foundation::error::{DispatchError, DispatchResult};
use crate::integration::backend::{ApiRequest, ApiResponse, BoxedBackend};

/// Upper bound for call deadlines; longer timeouts are clamped to it.
const MAX_CALL_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

// =============================================================================
// Call Options
// =============================================================================

/// Per-call options for [`DispatchRouter::call`].
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Explicit backend; bypasses the selection strategy and never falls back.
    pub target: Option<String>,
    /// Overrides the router's default timeout.
    pub timeout: Option<Duration>,
    /// Caller-side cancellation; firing it behaves exactly like a timeout.
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(mut self, backend: impl Into<String>) -> Self {
        self.target = Some(backend.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

// =============================================================================
// Dispatch Router
// =============================================================================

/// Selects backends and performs request/response-correlated calls.
///
/// The router is the only path from the core to a backend. It does not own
/// connectivity: backends report transitions, and the router reacts through
/// [`on_backend_connected`](Self::on_backend_connected) and
/// [`on_backend_disconnected`](Self::on_backend_disconnected).
pub struct DispatchRouter {
    /// Registered backends in registration order.
    backends: RwLock<Vec<BoxedBackend>>,
    options: RouterOptions,
    /// Round-robin position: index into `backends` to try next.
    cursor: Mutex<usize>,
    tracker: CorrelationTracker,
}

impl DispatchRouter {
    pub fn new(options: RouterOptions) -> Self {
        Self {
            backends: RwLock::new(Vec::new()),
            options,
            cursor: Mutex::new(0),
            tracker: CorrelationTracker::new(),
        }
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    pub fn tracker(&self) -> &CorrelationTracker {
        &self.tracker
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Registers a backend under its own name.
    ///
    /// A backend registered under an existing name replaces the previous one
    /// in place, keeping its rotation slot; the replaced backend is returned.
    pub fn register_backend(&self, backend: BoxedBackend) -> Option<BoxedBackend> {
        let name = backend.name().to_string();
        let mut backends = self.backends.write();
        if let Some(slot) = backends.iter_mut().find(|b| b.name() == name) {
            warn!(backend = %name, "Backend re-registered, replacing previous instance");
            return Some(std::mem::replace(slot, backend));
        }
        backends.push(backend);
        info!(backend = %name, total = backends.len(), "Backend registered");
        None
    }

    /// Removes a backend; calls still pending on it fail with `ConnectionLost`.
    pub fn unregister_backend(&self, name: &str) -> Option<BoxedBackend> {
        let removed = {
            let mut backends = self.backends.write();
            let idx = backends.iter().position(|b| b.name() == name)?;
            let removed = backends.remove(idx);
            let mut cursor = self.cursor.lock();
            if *cursor > idx {
                *cursor -= 1;
            }
            removed
        };
        let rejected = self.tracker.reject_backend(name);
        info!(backend = %name, rejected, "Backend unregistered");
        Some(removed)
    }

    /// Returns a registered backend by name.
    pub fn backend(&self, name: &str) -> Option<BoxedBackend> {
        self.backends
            .read()
            .iter()
            .find(|b| b.name() == name)
            .cloned()
    }

    /// Names of all registered backends, in registration order.
    pub fn backend_names(&self) -> Vec<String> {
        self.backends
            .read()
            .iter()
            .map(|b| b.name().to_string())
            .collect()
    }

    /// Snapshot of all registered backends.
    pub fn backends(&self) -> Vec<BoxedBackend> {
        self.backends.read().clone()
    }

    pub fn backend_count(&self) -> usize {
        self.backends.read().len()
    }

    pub fn connected_count(&self) -> usize {
        self.backends
            .read()
            .iter()
            .filter(|b| b.is_connected())
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.tracker.len()
    }

    // ─── Selection ───────────────────────────────────────────────────────────

    /// Picks the backend a call would be sent to.
    ///
    /// Round-robin selection advances the rotation, so this is not a pure
    /// query under that strategy.
    pub fn select(&self, target: Option<&str>) -> DispatchResult<BoxedBackend> {
        let backends = self.backends.read();

        if let Some(name) = target {
            let backend = backends
                .iter()
                .find(|b| b.name() == name)
                .ok_or_else(|| DispatchError::UnknownBackend {
                    backend: name.to_string(),
                })?;
            if !backend.is_connected() {
                return Err(DispatchError::BackendDisconnected {
                    backend: name.to_string(),
                });
            }
            return Ok(backend.clone());
        }

        if backends.is_empty() {
            return Err(DispatchError::NoBackendRegistered);
        }
        if !backends.iter().any(|b| b.is_connected()) {
            return Err(DispatchError::NoBackendConnected {
                registered: backends.len(),
            });
        }

        let picked = match self.options.strategy {
            SelectionStrategy::RoundRobin => self.next_in_rotation(&backends),
            SelectionStrategy::FixedPriority | SelectionStrategy::CapabilityBased => {
                self.preferred(&backends)
            }
        };
        picked.ok_or(DispatchError::NoBackendConnected {
            registered: backends.len(),
        })
    }

    fn preferred(&self, backends: &[BoxedBackend]) -> Option<BoxedBackend> {
        let default = self.options.default_backend.as_deref().and_then(|name| {
            backends
                .iter()
                .find(|b| b.name() == name && b.is_connected())
        });
        default
            .or_else(|| backends.iter().find(|b| b.is_connected()))
            .cloned()
    }

    /// Starting at the cursor, takes the first connected backend and moves the
    /// cursor just past it. Disconnected backends are stepped over without
    /// disturbing the position of the others.
    fn next_in_rotation(&self, backends: &[BoxedBackend]) -> Option<BoxedBackend> {
        let len = backends.len();
        let mut cursor = self.cursor.lock();
        let start = *cursor % len;
        (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&idx| backends[idx].is_connected())
            .map(|idx| {
                *cursor = (idx + 1) % len;
                backends[idx].clone()
            })
    }

    // ─── Calls ───────────────────────────────────────────────────────────────

    /// Performs a correlated outbound call and waits for its outcome.
    ///
    /// The call settles exactly once: with the response data, with
    /// `BackendRejected`, with `Timeout` (deadline or cancellation), or with
    /// `ConnectionLost`. Dropping the returned future abandons the call and
    /// removes its pending entry.
    pub async fn call(
        &self,
        action: &str,
        params: Value,
        options: CallOptions,
    ) -> DispatchResult<Value> {
        let backend = self.select(options.target.as_deref())?;
        let backend_name = backend.name().to_string();
        let timeout = options.timeout.unwrap_or(self.options.call_timeout);
        let token = self.tracker.next_token();

        let span = span!(
            Level::DEBUG,
            "call",
            action = %action,
            backend = %backend_name,
            token = %token
        );

        async {
            let deadline = call_deadline(Instant::now(), timeout);
            let mut rx = self
                .tracker
                .register(token.as_str(), action, backend_name.as_str(), deadline);
            let _guard = PendingGuard {
                tracker: &self.tracker,
                token: &token,
            };

            let request = ApiRequest {
                action: action.to_string(),
                params,
                echo: token.clone(),
            };
            debug!("Sending request");
            trace!(params = %request.params, "Request params");

            if let Err(e) = backend.send(request).await {
                self.tracker.discard(&token);
                warn!(error = %e, "Send failed");
                return Err(DispatchError::SendFailed {
                    action: action.to_string(),
                    backend: backend_name.clone(),
                    reason: e.to_string(),
                });
            }

            let cancelled = async {
                match &options.cancel {
                    Some(cancel) => cancel.cancelled().await,
                    None => std::future::pending().await,
                }
            };

            let settled = tokio::select! {
                biased;
                outcome = &mut rx => Some(outcome),
                _ = tokio::time::sleep_until(deadline) => None,
                _ = cancelled => None,
            };

            let outcome = match settled {
                Some(outcome) => outcome,
                None => {
                    // Deadline and cancellation share one path. If a
                    // response won the race, expire() is a no-op and the
                    // response is already waiting in the channel.
                    self.tracker.expire(&token, timeout);
                    rx.await
                }
            };

            let result = outcome.unwrap_or_else(|_| {
                Err(DispatchError::ConnectionLost {
                    action: action.to_string(),
                    backend: backend_name.clone(),
                })
            });
            match &result {
                Ok(_) => debug!("Call succeeded"),
                Err(e) => debug!(error = %e, "Call failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    // ─── Signals ─────────────────────────────────────────────────────────────

    /// Routes a decoded response to its pending call.
    ///
    /// Returns `false` for late, duplicate or unknown tokens, which are
    /// ignored.
    pub fn handle_response(&self, response: ApiResponse) -> bool {
        let token = response.echo.clone();
        let matched = self.tracker.resolve(response);
        if !matched {
            debug!(token = %token, "Ignoring response for unknown or settled call");
        }
        matched
    }

    /// Reacts to a backend reporting a live connection.
    pub fn on_backend_connected(&self, name: &str) {
        if self.backends.read().iter().any(|b| b.name() == name) {
            info!(backend = %name, "Backend connected");
        } else {
            debug!(backend = %name, "Connect signal from unregistered backend");
        }
    }

    /// Reacts to a backend losing its connection: every call pending on it
    /// fails with `ConnectionLost`. Returns the number of calls rejected.
    pub fn on_backend_disconnected(&self, name: &str) -> usize {
        let rejected = self.tracker.reject_backend(name);
        warn!(backend = %name, rejected, "Backend disconnected");
        rejected
    }

    /// Rejects every outstanding call with `ConnectionLost`.
    pub fn shutdown(&self) -> usize {
        let rejected = self.tracker.reject_all();
        if rejected > 0 {
            info!(rejected, "Rejected outstanding calls on shutdown");
        }
        rejected
    }
}

impl Default for DispatchRouter {
    fn default() -> Self {
        Self::new(RouterOptions::default())
    }
}

impl std::fmt::Debug for DispatchRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRouter")
            .field("backends", &self.backend_names())
            .field("options", &self.options)
            .field("pending", &self.tracker.len())
            .finish()
    }
}

fn call_deadline(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout.min(MAX_CALL_TIMEOUT)).unwrap_or(now)
}

/// Removes the pending entry if the waiting future is dropped early.
struct PendingGuard<'a> {
    tracker: &'a CorrelationTracker,
    token: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.tracker.discard(self.token);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::foundation::error::{BackendError, BackendResult};
    use crate::integration::backend::{Backend, BackendSink};

    struct MockBackend {
        name: String,
        connected: AtomicBool,
        fail_send: AtomicBool,
        sent: mpsc::UnboundedSender<ApiRequest>,
    }

    impl MockBackend {
        fn new(name: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<ApiRequest>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let backend = Arc::new(Self {
                name: name.to_string(),
                connected: AtomicBool::new(true),
                fail_send: AtomicBool::new(false),
                sent: tx,
            });
            (backend, rx)
        }

        fn set_connected(&self, connected: bool) {
            self.connected.store(connected, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn connect(&self) -> BackendResult<()> {
            self.set_connected(true);
            Ok(())
        }

        async fn disconnect(&self) -> BackendResult<()> {
            self.set_connected(false);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn send(&self, request: ApiRequest) -> BackendResult<()> {
            if self.fail_send.load(Ordering::SeqCst) {
                return Err(BackendError::SendFailed("socket closed".into()));
            }
            let _ = self.sent.send(request);
            Ok(())
        }

        fn subscribe(&self, _sink: BackendSink) {}
    }

    fn router_with(
        strategy: SelectionStrategy,
        names: &[&str],
    ) -> (DispatchRouter, Vec<Arc<MockBackend>>) {
        let router = DispatchRouter::new(RouterOptions::new().strategy(strategy));
        let backends = names
            .iter()
            .map(|name| {
                let (backend, _rx) = MockBackend::new(name);
                router.register_backend(backend.clone());
                backend
            })
            .collect();
        (router, backends)
    }

    fn selected(router: &DispatchRouter) -> String {
        router.select(None).unwrap().name().to_string()
    }

    #[test]
    fn round_robin_rotates_and_skips_disconnected() {
        let (router, backends) =
            router_with(SelectionStrategy::RoundRobin, &["p1", "p2", "p3"]);

        assert_eq!(selected(&router), "p1");
        assert_eq!(selected(&router), "p2");
        assert_eq!(selected(&router), "p3");
        assert_eq!(selected(&router), "p1");

        backends[1].set_connected(false);
        assert_eq!(selected(&router), "p3");
        assert_eq!(selected(&router), "p1");
        assert_eq!(selected(&router), "p3");

        backends[1].set_connected(true);
        assert_eq!(selected(&router), "p1");
        assert_eq!(selected(&router), "p2");
    }

    #[test]
    fn fixed_priority_prefers_default_then_registration_order() {
        let router = DispatchRouter::new(RouterOptions::new().default_backend("p2"));
        let (p1, _) = MockBackend::new("p1");
        let (p2, _) = MockBackend::new("p2");
        router.register_backend(p1.clone());
        router.register_backend(p2.clone());

        assert_eq!(selected(&router), "p2");
        assert_eq!(selected(&router), "p2");

        p2.set_connected(false);
        assert_eq!(selected(&router), "p1");

        p1.set_connected(false);
        p2.set_connected(true);
        assert_eq!(selected(&router), "p2");
    }

    #[test]
    fn capability_based_behaves_like_fixed_priority() {
        let (router, backends) =
            router_with(SelectionStrategy::CapabilityBased, &["p1", "p2"]);
        assert_eq!(selected(&router), "p1");
        assert_eq!(selected(&router), "p1");
        backends[0].set_connected(false);
        assert_eq!(selected(&router), "p2");
    }

    #[test]
    fn empty_and_disconnected_sets_are_distinguished() {
        let router = DispatchRouter::default();
        assert_eq!(
            router.select(None).err(),
            Some(DispatchError::NoBackendRegistered)
        );

        let (p1, _) = MockBackend::new("p1");
        p1.set_connected(false);
        router.register_backend(p1);
        assert_eq!(
            router.select(None).err(),
            Some(DispatchError::NoBackendConnected { registered: 1 })
        );
    }

    #[test]
    fn explicit_target_fails_fast() {
        let (router, backends) = router_with(SelectionStrategy::FixedPriority, &["p1", "p2"]);

        assert_eq!(router.select(Some("p2")).unwrap().name(), "p2");
        assert_eq!(
            router.select(Some("nope")).err(),
            Some(DispatchError::UnknownBackend {
                backend: "nope".into()
            })
        );

        backends[1].set_connected(false);
        assert_eq!(
            router.select(Some("p2")).err(),
            Some(DispatchError::BackendDisconnected {
                backend: "p2".into()
            })
        );
    }

    #[tokio::test]
    async fn call_resolves_with_response_data() {
        let router = Arc::new(DispatchRouter::default());
        let (p1, mut sent) = MockBackend::new("p1");
        router.register_backend(p1);

        let task = tokio::spawn({
            let router = router.clone();
            async move {
                router
                    .call("get_status", json!({}), CallOptions::default())
                    .await
            }
        });

        let request = sent.recv().await.unwrap();
        assert_eq!(request.action, "get_status");
        assert_eq!(router.pending_count(), 1);

        assert!(router.handle_response(ApiResponse::ok(
            request.echo.clone(),
            json!({"online": true})
        )));
        // A replayed duplicate finds nothing.
        assert!(!router.handle_response(ApiResponse::ok(request.echo, json!(null))));

        assert_eq!(task.await.unwrap(), Ok(json!({"online": true})));
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn unbounded_timeout_is_clamped() {
        let router = Arc::new(DispatchRouter::default());
        let (p1, mut sent) = MockBackend::new("p1");
        router.register_backend(p1);

        let task = tokio::spawn({
            let router = router.clone();
            async move {
                router
                    .call("x", Value::Null, CallOptions::new().timeout(Duration::MAX))
                    .await
            }
        });

        let request = sent.recv().await.unwrap();
        assert!(router.handle_response(ApiResponse::ok(request.echo, json!(1))));
        assert_eq!(task.await.unwrap(), Ok(json!(1)));

        let now = Instant::now();
        assert_eq!(call_deadline(now, Duration::MAX), now + MAX_CALL_TIMEOUT);
        assert_eq!(
            call_deadline(now, Duration::from_secs(5)),
            now + Duration::from_secs(5)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn call_times_out_and_clears_entry() {
        let router = DispatchRouter::default();
        let (p1, _sent) = MockBackend::new("p1");
        router.register_backend(p1);

        let before = router.pending_count();
        let started = Instant::now();
        let err = router
            .call(
                "slow",
                json!({}),
                CallOptions::new().timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();

        let elapsed = started.elapsed();
        assert!(matches!(err, DispatchError::Timeout { .. }));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(60));
        assert_eq!(router.pending_count(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_behaves_like_timeout() {
        let router = Arc::new(DispatchRouter::default());
        let (p1, mut sent) = MockBackend::new("p1");
        router.register_backend(p1);
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let router = router.clone();
            let cancel = cancel.clone();
            async move {
                router
                    .call("slow", json!({}), CallOptions::new().cancel(cancel))
                    .await
            }
        });

        let request = sent.recv().await.unwrap();
        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { .. }));
        assert_eq!(router.pending_count(), 0);
        assert!(!router.handle_response(ApiResponse::ok(request.echo, json!(1))));
    }

    #[tokio::test]
    async fn disconnect_rejects_every_pending_call_on_that_backend() {
        let router = Arc::new(DispatchRouter::default());
        let (b, mut sent) = MockBackend::new("B");
        router.register_backend(b.clone());

        let spawn_call = |action: &'static str| {
            let router = router.clone();
            tokio::spawn(async move { router.call(action, json!({}), CallOptions::default()).await })
        };
        let first = spawn_call("a");
        let second = spawn_call("b");
        sent.recv().await.unwrap();
        sent.recv().await.unwrap();
        assert_eq!(router.pending_count(), 2);

        b.set_connected(false);
        assert_eq!(router.on_backend_disconnected("B"), 2);

        for task in [first, second] {
            let err = task.await.unwrap().unwrap_err();
            assert!(matches!(err, DispatchError::ConnectionLost { ref backend, .. } if backend == "B"));
        }
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn rejected_response_carries_code_and_message() {
        let router = Arc::new(DispatchRouter::default());
        let (p1, mut sent) = MockBackend::new("p1");
        router.register_backend(p1);

        let task = tokio::spawn({
            let router = router.clone();
            async move { router.call("send_msg", json!({}), CallOptions::default()).await }
        });
        let request = sent.recv().await.unwrap();
        router.handle_response(ApiResponse::failed(request.echo, 100, "bad params"));

        assert_eq!(
            task.await.unwrap(),
            Err(DispatchError::BackendRejected {
                action: "send_msg".into(),
                backend: "p1".into(),
                code: 100,
                message: "bad params".into(),
            })
        );
    }

    #[tokio::test]
    async fn send_failure_leaves_no_pending_entry() {
        let router = DispatchRouter::default();
        let (p1, _sent) = MockBackend::new("p1");
        p1.fail_send.store(true, Ordering::SeqCst);
        router.register_backend(p1);

        let err = router
            .call("x", json!({}), CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::SendFailed { .. }));
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn unregister_rejects_pending_calls() {
        let router = Arc::new(DispatchRouter::default());
        let (p1, mut sent) = MockBackend::new("p1");
        router.register_backend(p1);

        let task = tokio::spawn({
            let router = router.clone();
            async move { router.call("x", json!({}), CallOptions::default()).await }
        });
        sent.recv().await.unwrap();

        assert!(router.unregister_backend("p1").is_some());
        assert!(router.unregister_backend("p1").is_none());
        assert!(matches!(
            task.await.unwrap(),
            Err(DispatchError::ConnectionLost { .. })
        ));
        assert!(router.backend_names().is_empty());
    }

    #[test]
    fn reregistering_replaces_in_place() {
        let (router, _) = router_with(SelectionStrategy::RoundRobin, &["p1", "p2"]);
        let (again, _) = MockBackend::new("p1");
        assert!(router.register_backend(again).is_some());
        assert_eq!(router.backend_names(), vec!["p1", "p2"]);
        assert_eq!(router.connected_count(), 2);
    }
}
