//! Normalized event model.
//!
//! Every backend speaks its own wire format. Before an inbound payload
//! reaches listeners or the hook pipeline it is translated into a
//! [`NormalizedEvent`]: a common envelope (category, timestamp, backend
//! identity) around one of four category-specific payloads.
//!
//! ```text
//! NormalizedEvent { timestamp_ms, backend, payload }
//! └── EventPayload (its variant is the category)
//!     ├── Message(MessagePayload { message_id, sender_id, group_id, content })
//!     ├── Notice(NoticePayload   { notice_type, sender_id, group_id })
//!     ├── Request(RequestPayload { request_type, sender_id, group_id, comment })
//!     └── Meta(MetaPayload       { meta_type })
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Event Category
// ============================================================================

/// The closed set of event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    /// Chat messages (private, group, channel).
    Message,
    /// Notices (membership changes, recalls, pokes).
    Notice,
    /// Requests awaiting a decision (friend or group join requests).
    Request,
    /// Meta events (lifecycle, heartbeat).
    Meta,
}

impl EventCategory {
    /// All categories, in declaration order.
    pub const ALL: [EventCategory; 4] = [
        EventCategory::Message,
        EventCategory::Notice,
        EventCategory::Request,
        EventCategory::Meta,
    ];

    /// Returns the lowercase name, which is also the pipeline stage name
    /// for events of this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Notice => "notice",
            Self::Request => "request",
            Self::Meta => "meta",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "message" | "message_sent" => Ok(Self::Message),
            "notice" => Ok(Self::Notice),
            "request" => Ok(Self::Request),
            "meta" | "meta_event" => Ok(Self::Meta),
            _ => Err(()),
        }
    }
}

// ============================================================================
// Category Payloads
// ============================================================================

/// Payload of a message event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Backend-assigned unique message identifier, when the backend has one.
    pub message_id: Option<String>,
    /// Sender identity.
    pub sender_id: Option<String>,
    /// Group or channel identity; `None` for private messages.
    pub group_id: Option<String>,
    /// Plain-text content.
    pub content: String,
    /// The backend payload this was derived from.
    pub raw: Value,
}

/// Payload of a notice event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoticePayload {
    /// Backend-specific notice kind (e.g. `group_recall`).
    pub notice_type: String,
    pub sender_id: Option<String>,
    pub group_id: Option<String>,
    pub raw: Value,
}

/// Payload of a request event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Backend-specific request kind (e.g. `friend`, `group`).
    pub request_type: String,
    pub sender_id: Option<String>,
    pub group_id: Option<String>,
    /// Free-form text attached by the requester.
    pub comment: Option<String>,
    pub raw: Value,
}

/// Payload of a meta event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaPayload {
    /// Backend-specific meta kind (e.g. `heartbeat`, `lifecycle`).
    pub meta_type: String,
    pub raw: Value,
}

/// Category-specific payload of a [`NormalizedEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", content = "data", rename_all = "lowercase")]
pub enum EventPayload {
    Message(MessagePayload),
    Notice(NoticePayload),
    Request(RequestPayload),
    Meta(MetaPayload),
}

impl EventPayload {
    /// The category this payload belongs to.
    pub fn category(&self) -> EventCategory {
        match self {
            Self::Message(_) => EventCategory::Message,
            Self::Notice(_) => EventCategory::Notice,
            Self::Request(_) => EventCategory::Request,
            Self::Meta(_) => EventCategory::Meta,
        }
    }
}

// ============================================================================
// Normalized Event
// ============================================================================

/// A backend-independent inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Name of the backend that delivered the event.
    pub backend: String,
    /// Category-specific data.
    pub payload: EventPayload,
}

impl NormalizedEvent {
    /// Creates an event stamped with the current wall-clock time.
    pub fn new(backend: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            timestamp_ms: now_ms(),
            backend: backend.into(),
            payload,
        }
    }

    /// Overrides the timestamp.
    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    pub fn category(&self) -> EventCategory {
        self.payload.category()
    }

    /// Unique message identifier, if the payload carries one.
    pub fn message_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Message(m) => m.message_id.as_deref(),
            _ => None,
        }
    }

    pub fn sender_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Message(m) => m.sender_id.as_deref(),
            EventPayload::Notice(n) => n.sender_id.as_deref(),
            EventPayload::Request(r) => r.sender_id.as_deref(),
            EventPayload::Meta(_) => None,
        }
    }

    pub fn group_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Message(m) => m.group_id.as_deref(),
            EventPayload::Notice(n) => n.group_id.as_deref(),
            EventPayload::Request(r) => r.group_id.as_deref(),
            EventPayload::Meta(_) => None,
        }
    }

    /// Textual content: message text or request comment.
    pub fn content(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Message(m) => Some(m.content.as_str()),
            EventPayload::Request(r) => r.comment.as_deref(),
            _ => None,
        }
    }

    /// The raw backend payload the event was built from.
    pub fn raw(&self) -> &Value {
        match &self.payload {
            EventPayload::Message(m) => &m.raw,
            EventPayload::Notice(n) => &n.raw,
            EventPayload::Request(r) => &r.raw,
            EventPayload::Meta(m) => &m.raw,
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parses_meta_event_alias() {
        assert_eq!("meta_event".parse::<EventCategory>(), Ok(EventCategory::Meta));
        assert_eq!("MESSAGE".parse::<EventCategory>(), Ok(EventCategory::Message));
        assert!("unknown".parse::<EventCategory>().is_err());
    }

    #[test]
    fn accessors_follow_payload_kind() {
        let event = NormalizedEvent::new(
            "qq",
            EventPayload::Message(MessagePayload {
                message_id: Some("42".into()),
                sender_id: Some("u1".into()),
                group_id: Some("g1".into()),
                content: "hello".into(),
                raw: Value::Null,
            }),
        );
        assert_eq!(event.category(), EventCategory::Message);
        assert_eq!(event.message_id(), Some("42"));
        assert_eq!(event.sender_id(), Some("u1"));
        assert_eq!(event.group_id(), Some("g1"));
        assert_eq!(event.content(), Some("hello"));

        let meta = NormalizedEvent::new(
            "qq",
            EventPayload::Meta(MetaPayload {
                meta_type: "heartbeat".into(),
                raw: Value::Null,
            }),
        );
        assert_eq!(meta.sender_id(), None);
        assert_eq!(meta.content(), None);
    }
}
