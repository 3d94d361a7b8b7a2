//! Translation of backend payloads into [`NormalizedEvent`]s.

use serde::Deserialize;
use serde_json::Value;

use crate::foundation::event::{
    EventCategory, EventPayload, MessagePayload, MetaPayload, NormalizedEvent, NoticePayload,
    RequestPayload, now_ms,
};

/// Translates one backend's raw payloads into normalized events.
///
/// Returning `None` means the payload is not an event this normalizer
/// understands; it is dropped.
pub trait Normalizer: Send + Sync + 'static {
    fn normalize(&self, raw: &Value, backend: &str) -> Option<NormalizedEvent>;
}

impl<F> Normalizer for F
where
    F: Fn(&Value, &str) -> Option<NormalizedEvent> + Send + Sync + 'static,
{
    fn normalize(&self, raw: &Value, backend: &str) -> Option<NormalizedEvent> {
        self(raw, backend)
    }
}

/// The default normalizer for JSON backends.
///
/// Understands two shapes:
///
/// - OneBot-style payloads discriminated by `post_type`
///   (`message`, `message_sent`, `notice`, `request`, `meta_event`), with
///   `time` in seconds, `user_id`, `group_id`, `message_id`, and either
///   `raw_message` or a segment array under `message`.
/// - Already-normalized payloads of the form
///   `{"category": "...", "data": {...}}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonNormalizer;

impl JsonNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl Normalizer for JsonNormalizer {
    fn normalize(&self, raw: &Value, backend: &str) -> Option<NormalizedEvent> {
        let obj = raw.as_object()?;

        if obj.contains_key("category") && obj.contains_key("data") {
            let payload = EventPayload::deserialize(raw).ok()?;
            let timestamp_ms = obj
                .get("timestamp_ms")
                .and_then(Value::as_i64)
                .unwrap_or_else(now_ms);
            return Some(NormalizedEvent::new(backend, payload).with_timestamp(timestamp_ms));
        }

        let category: EventCategory = obj.get("post_type")?.as_str()?.parse().ok()?;
        let payload = match category {
            EventCategory::Message => EventPayload::Message(MessagePayload {
                message_id: id_field(raw, "message_id"),
                sender_id: sender_of(raw),
                group_id: group_of(raw),
                content: message_text(raw),
                raw: raw.clone(),
            }),
            EventCategory::Notice => EventPayload::Notice(NoticePayload {
                notice_type: str_field(raw, "notice_type").unwrap_or_default(),
                sender_id: sender_of(raw),
                group_id: group_of(raw),
                raw: raw.clone(),
            }),
            EventCategory::Request => EventPayload::Request(RequestPayload {
                request_type: str_field(raw, "request_type").unwrap_or_default(),
                sender_id: sender_of(raw),
                group_id: group_of(raw),
                comment: str_field(raw, "comment").filter(|c| !c.is_empty()),
                raw: raw.clone(),
            }),
            EventCategory::Meta => EventPayload::Meta(MetaPayload {
                meta_type: str_field(raw, "meta_event_type").unwrap_or_default(),
                raw: raw.clone(),
            }),
        };

        let timestamp_ms = obj
            .get("time")
            .and_then(Value::as_i64)
            .and_then(|secs| secs.checked_mul(1000))
            .unwrap_or_else(now_ms);
        Some(NormalizedEvent::new(backend, payload).with_timestamp(timestamp_ms))
    }
}

fn str_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Reads an identifier that may be encoded as a string or a number.
fn id_field(raw: &Value, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn sender_of(raw: &Value) -> Option<String> {
    id_field(raw, "user_id").or_else(|| raw.get("sender").and_then(|s| id_field(s, "user_id")))
}

fn group_of(raw: &Value) -> Option<String> {
    id_field(raw, "group_id").or_else(|| id_field(raw, "channel_id"))
}

/// Plain text of a message: `raw_message`, a string `message`, or the
/// concatenated `text` segments of a segment array.
fn message_text(raw: &Value) -> String {
    if let Some(text) = raw.get("raw_message").and_then(Value::as_str) {
        return text.to_string();
    }
    match raw.get("message") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(segments)) => segments
            .iter()
            .filter(|seg| seg.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|seg| seg.get("data")?.get("text")?.as_str())
            .collect(),
        _ => String::new(),
    }
}
