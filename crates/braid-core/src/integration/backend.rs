//! Backend capability consumed from the adapter layer.
//!
//! A backend is one live connection endpoint (a chat platform account, a
//! relay, a bridge). Adapters implement [`Backend`]; the core only holds
//! `Arc<dyn Backend>` references, sends [`ApiRequest`]s through them and
//! reacts to the [`BackendSignal`]s they push through their [`BackendSink`].
//!
//! # Correlation envelope
//!
//! The core owns no wire format. It hands adapters an [`ApiRequest`] whose
//! `echo` field is an opaque correlation token, and expects the token to
//! come back verbatim in the matching response. Adapters that frame
//! requests as JSON can serialize [`ApiRequest`] directly:
//!
//! ```json
//! {"action": "send_msg", "params": {"text": "hi"}, "echo": "7f0c…"}
//! ```
//!
//! and responses are recognised by [`ApiResponse::from_value`]:
//!
//! ```json
//! {"status": "ok", "retcode": 0, "data": {"message_id": 1}, "echo": "7f0c…"}
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::foundation::error::BackendResult;

// =============================================================================
// Backend Trait
// =============================================================================

/// A connection endpoint registered with the dispatch router.
///
/// Reconnection and retry policy belong to the implementation; the core
/// only observes the `Connected`/`Disconnected` signals it emits.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Unique backend name, used for routing and logging.
    fn name(&self) -> &str;

    /// Establishes the connection.
    async fn connect(&self) -> BackendResult<()>;

    /// Tears the connection down.
    async fn disconnect(&self) -> BackendResult<()>;

    /// Whether the backend currently has a live connection.
    fn is_connected(&self) -> bool;

    /// Sends an outbound request. The `echo` token must be round-tripped
    /// verbatim in the response.
    async fn send(&self, request: ApiRequest) -> BackendResult<()>;

    /// Installs the sink through which the backend reports inbound payloads
    /// and connectivity changes. Called once, at registration.
    fn subscribe(&self, sink: BackendSink);
}

/// A shared backend trait object.
pub type BoxedBackend = Arc<dyn Backend>;

// =============================================================================
// Signals
// =============================================================================

/// Notifications pushed from a backend to the core.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendSignal {
    /// A raw payload arrived (an event or a call response).
    Inbound {
        /// Backend that received it.
        backend: String,
        /// The undecoded payload.
        payload: Value,
    },
    /// The backend (re)established its connection.
    Connected(String),
    /// The backend lost its connection.
    Disconnected(String),
}

/// The subscription handle given to a backend at registration.
///
/// Cheap to clone; every method is fire-and-forget. Signals sent after the
/// core has shut down are dropped.
#[derive(Debug, Clone)]
pub struct BackendSink {
    backend: String,
    tx: mpsc::UnboundedSender<BackendSignal>,
}

impl BackendSink {
    /// Creates a sink that tags every signal with `backend`.
    pub fn new(backend: impl Into<String>, tx: mpsc::UnboundedSender<BackendSignal>) -> Self {
        Self {
            backend: backend.into(),
            tx,
        }
    }

    /// Name of the backend this sink belongs to.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Reports an inbound raw payload.
    pub fn inbound(&self, payload: Value) {
        self.emit(BackendSignal::Inbound {
            backend: self.backend.clone(),
            payload,
        });
    }

    /// Reports that the connection is up.
    pub fn connected(&self) {
        self.emit(BackendSignal::Connected(self.backend.clone()));
    }

    /// Reports that the connection is down.
    pub fn disconnected(&self) {
        self.emit(BackendSignal::Disconnected(self.backend.clone()));
    }

    fn emit(&self, signal: BackendSignal) {
        if self.tx.send(signal).is_err() {
            trace!(backend = %self.backend, "Signal dropped, receiver closed");
        }
    }
}

// =============================================================================
// Request / Response Envelope
// =============================================================================

/// An outbound call as handed to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Action name (e.g. `send_msg`).
    pub action: String,
    /// Action parameters.
    pub params: Value,
    /// Opaque correlation token.
    pub echo: String,
}

/// A decoded response to an [`ApiRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// Correlation token echoed by the backend.
    pub echo: String,
    /// Whether the provider reported success.
    pub ok: bool,
    /// Provider-reported code (`0` when absent).
    pub code: i64,
    /// Response data.
    pub data: Value,
    /// Provider-reported message, if any.
    pub message: Option<String>,
}

impl ApiResponse {
    /// Builds a successful response.
    pub fn ok(echo: impl Into<String>, data: Value) -> Self {
        Self {
            echo: echo.into(),
            ok: true,
            code: 0,
            data,
            message: None,
        }
    }

    /// Builds a failed response.
    pub fn failed(echo: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            echo: echo.into(),
            ok: false,
            code,
            data: Value::Null,
            message: Some(message.into()),
        }
    }

    /// Decodes a raw payload as a response.
    ///
    /// Returns `None` unless the payload is an object carrying an `echo`
    /// token (string or integer). Success is read from `status` (`"ok"` or
    /// `"async"`) when present, otherwise from `retcode == 0`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let echo = match obj.get("echo")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let code = obj.get("retcode").and_then(Value::as_i64).unwrap_or(0);
        let ok = match obj.get("status").and_then(Value::as_str) {
            Some(status) => matches!(status, "ok" | "async"),
            None => code == 0,
        };
        let message = ["message", "wording", "msg"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Some(Self {
            echo,
            ok,
            code,
            data: obj.get("data").cloned().unwrap_or(Value::Null),
            message,
        })
    }
}
