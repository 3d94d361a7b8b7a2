//! An in-process backend that replays a script of inbound messages on
//! connect and acknowledges every outbound request.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use braid::core::{ApiRequest, Backend, BackendError, BackendResult, BackendSink};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::info;

pub struct LoopbackBackend {
    name: String,
    connected: AtomicBool,
    sink: Mutex<Option<BackendSink>>,
    script: Vec<Value>,
    next_message_id: AtomicI64,
}

impl LoopbackBackend {
    pub fn new(name: impl Into<String>, script: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            connected: AtomicBool::new(false),
            sink: Mutex::new(None),
            script,
            next_message_id: AtomicI64::new(10_000),
        }
    }

    fn sink(&self) -> Option<BackendSink> {
        self.sink.lock().clone()
    }
}

/// OneBot-style group message payloads, numbered from 1.
///
/// Every backend replays the same ids, so the deduplicator lets each
/// message through only once.
pub fn script(messages: &[String]) -> Vec<Value> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    messages
        .iter()
        .enumerate()
        .map(|(i, text)| {
            json!({
                "post_type": "message",
                "message_type": "group",
                "message_id": i + 1,
                "user_id": 10001,
                "group_id": 42,
                "raw_message": text,
                "time": now
            })
        })
        .collect()
}

#[async_trait]
impl Backend for LoopbackBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> BackendResult<()> {
        let sink = self
            .sink()
            .ok_or_else(|| BackendError::Other("not subscribed".into()))?;
        self.connected.store(true, Ordering::SeqCst);
        sink.connected();
        for payload in &self.script {
            sink.inbound(payload.clone());
        }
        Ok(())
    }

    async fn disconnect(&self) -> BackendResult<()> {
        if self.connected.swap(false, Ordering::SeqCst)
            && let Some(sink) = self.sink()
        {
            sink.disconnected();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, request: ApiRequest) -> BackendResult<()> {
        if !self.is_connected() {
            return Err(BackendError::NotConnected);
        }
        let sink = self.sink().ok_or(BackendError::NotConnected)?;

        info!(backend = %self.name, action = %request.action, params = %request.params, "Outbound");
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        sink.inbound(json!({
            "status": "ok",
            "retcode": 0,
            "data": {"message_id": message_id},
            "echo": request.echo
        }));
        Ok(())
    }

    fn subscribe(&self, sink: BackendSink) {
        *self.sink.lock() = Some(sink);
    }
}
