//! Normalization plus typed category pub/sub.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::normalize::{JsonNormalizer, Normalizer};
use crate::foundation::error::{BoxError, panic_message};
use crate::foundation::event::{EventCategory, NormalizedEvent};

/// A listener for normalized events of one category.
pub type EventListener = Arc<dyn Fn(&NormalizedEvent) -> Result<(), BoxError> + Send + Sync>;

/// Handle returned by [`EventRouter::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Normalizes raw backend payloads and fans events out to listeners.
///
/// Listeners run synchronously, in subscription order, on the publishing
/// task. An error or panic in one listener is logged and does not reach the
/// other listeners or the publisher.
pub struct EventRouter {
    fallback: Arc<dyn Normalizer>,
    normalizers: RwLock<HashMap<String, Arc<dyn Normalizer>>>,
    listeners: RwLock<HashMap<EventCategory, Vec<(SubscriptionId, EventListener)>>>,
    next_id: AtomicU64,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    /// Creates a router using [`JsonNormalizer`] for every backend.
    pub fn new() -> Self {
        Self::with_normalizer(JsonNormalizer)
    }

    /// Creates a router with a custom fallback normalizer.
    pub fn with_normalizer(normalizer: impl Normalizer) -> Self {
        Self {
            fallback: Arc::new(normalizer),
            normalizers: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Overrides the normalizer for one backend.
    pub fn set_normalizer(&self, backend: impl Into<String>, normalizer: impl Normalizer) {
        self.normalizers
            .write()
            .insert(backend.into(), Arc::new(normalizer));
    }

    /// Translates a raw payload from `backend` into a normalized event.
    ///
    /// Returns `None` if the payload cannot be normalized.
    pub fn ingest(&self, raw: &Value, backend: &str) -> Option<NormalizedEvent> {
        let normalizer = self
            .normalizers
            .read()
            .get(backend)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());

        let event = normalizer.normalize(raw, backend);
        match &event {
            Some(event) => trace!(backend = %backend, category = %event.category(), "Event normalized"),
            None => debug!(backend = %backend, "Payload could not be normalized, dropping"),
        }
        event
    }

    // ─── Pub/sub ─────────────────────────────────────────────────────────────

    /// Subscribes a listener to one category.
    pub fn subscribe<F>(&self, category: EventCategory, listener: F) -> SubscriptionId
    where
        F: Fn(&NormalizedEvent) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(category)
            .or_default()
            .push((id, Arc::new(listener)));
        debug!(category = %category, subscription = %id, "Listener subscribed");
        id
    }

    /// Removes a listener. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        for list in listeners.values_mut() {
            if let Some(pos) = list.iter().position(|(sub, _)| *sub == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn listener_count(&self, category: EventCategory) -> usize {
        self.listeners.read().get(&category).map_or(0, Vec::len)
    }

    /// Delivers an event to every listener of its category.
    ///
    /// Returns the number of listeners that completed without error.
    pub fn publish(&self, event: &NormalizedEvent) -> usize {
        let category = event.category();
        // Snapshot so listeners may (un)subscribe while being called.
        let listeners: Vec<(SubscriptionId, EventListener)> = self
            .listeners
            .read()
            .get(&category)
            .cloned()
            .unwrap_or_default();

        let mut delivered = 0;
        for (id, listener) in listeners {
            match std::panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(
                    category = %category,
                    subscription = %id,
                    error = %e,
                    "Event listener failed"
                ),
                Err(panic) => warn!(
                    category = %category,
                    subscription = %id,
                    panic = %panic_message(panic.as_ref()),
                    "Event listener panicked"
                ),
            }
        }
        delivered
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<EventCategory, usize> = self
            .listeners
            .read()
            .iter()
            .map(|(category, list)| (*category, list.len()))
            .collect();
        f.debug_struct("EventRouter")
            .field("listeners", &counts)
            .field("overrides", &self.normalizers.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::event::{EventPayload, MessagePayload, NoticePayload};
    use parking_lot::Mutex;
    use serde_json::json;

    fn message(text: &str) -> NormalizedEvent {
        NormalizedEvent::new(
            "p1",
            EventPayload::Message(MessagePayload {
                content: text.into(),
                ..Default::default()
            }),
        )
    }

    #[test]
    fn listeners_receive_only_their_category_in_order() {
        let router = EventRouter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = seen.clone();
            router.subscribe(EventCategory::Message, move |e| {
                seen.lock().push(format!("{tag}:{}", e.content().unwrap_or("")));
                Ok(())
            });
        }
        let notices = seen.clone();
        router.subscribe(EventCategory::Notice, move |_| {
            notices.lock().push("notice".into());
            Ok(())
        });

        assert_eq!(router.publish(&message("hi")), 2);
        assert_eq!(*seen.lock(), vec!["first:hi", "second:hi"]);

        let notice = NormalizedEvent::new("p1", EventPayload::Notice(NoticePayload::default()));
        assert_eq!(router.publish(&notice), 1);
        assert_eq!(seen.lock().last().map(String::as_str), Some("notice"));
    }

    #[test]
    fn failing_listeners_are_isolated() {
        let router = EventRouter::new();
        let reached = Arc::new(Mutex::new(0));

        router.subscribe(EventCategory::Message, |_| Err("boom".into()));
        router.subscribe(EventCategory::Message, |_| panic!("listener exploded"));
        let counter = reached.clone();
        router.subscribe(EventCategory::Message, move |_| {
            *counter.lock() += 1;
            Ok(())
        });

        assert_eq!(router.publish(&message("x")), 1);
        assert_eq!(*reached.lock(), 1);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let router = EventRouter::new();
        let id = router.subscribe(EventCategory::Meta, |_| Ok(()));
        assert_eq!(router.listener_count(EventCategory::Meta), 1);
        assert!(router.unsubscribe(id));
        assert!(!router.unsubscribe(id));
        assert_eq!(router.listener_count(EventCategory::Meta), 0);
    }

    #[test]
    fn per_backend_normalizer_override() {
        let router = EventRouter::new();
        router.set_normalizer("irc", |raw: &Value, backend: &str| {
            raw.get("line").and_then(Value::as_str).map(|line| {
                NormalizedEvent::new(
                    backend,
                    EventPayload::Message(MessagePayload {
                        content: line.to_string(),
                        ..Default::default()
                    }),
                )
            })
        });

        let irc = router.ingest(&json!({"line": "hello"}), "irc").unwrap();
        assert_eq!(irc.content(), Some("hello"));
        assert!(router.ingest(&json!({"line": "hello"}), "qq").is_none());

        let qq = router
            .ingest(&json!({"post_type": "message", "raw_message": "yo"}), "qq")
            .unwrap();
        assert_eq!(qq.content(), Some("yo"));
    }
}
