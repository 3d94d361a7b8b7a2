//! Time-window duplicate suppression.
//!
//! The same logical event often arrives more than once: several backends
//! relaying one account, or a backend replaying after a reconnect. Each
//! event is reduced to a [`Fingerprint`], most specific source first:
//!
//! 1. the backend-assigned message identifier, alone;
//! 2. sender + group + a bounded content prefix;
//! 3. sender + a bounded content prefix;
//! 4. a hash of backend name + serialized raw payload.
//!
//! Steps 2 and 3 need a sender; events without text use an empty prefix,
//! so content-less notices from one sender and group still collapse.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::foundation::event::NormalizedEvent;

/// Default suppression window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Default number of content characters folded into a fingerprint.
pub const DEFAULT_CONTENT_PREFIX: usize = 64;

/// A derived deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Suppresses events whose fingerprint was seen within the window.
#[derive(Debug)]
pub struct EventDeduplicator {
    window: Duration,
    content_prefix: usize,
    last_seen: Mutex<HashMap<Fingerprint, Instant>>,
}

impl Default for EventDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl EventDeduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            content_prefix: DEFAULT_CONTENT_PREFIX,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Sets how many leading content characters take part in fingerprints.
    pub fn with_content_prefix(mut self, chars: usize) -> Self {
        self.content_prefix = chars;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Derives the fingerprint of `event`.
    pub fn fingerprint(&self, event: &NormalizedEvent) -> Fingerprint {
        if let Some(id) = event.message_id() {
            return Fingerprint(format!("id:{id}"));
        }

        if let Some(sender) = event.sender_id() {
            let content = event.content().unwrap_or_default();
            let prefix: String = content.chars().take(self.content_prefix).collect();
            return match event.group_id() {
                Some(group) => Fingerprint(format!(
                    "{}:{sender}@{group}:{prefix}",
                    event.category()
                )),
                None => Fingerprint(format!("{}:{sender}:{prefix}", event.category())),
            };
        }

        let mut hasher = DefaultHasher::new();
        event.backend.hash(&mut hasher);
        event.raw().to_string().hash(&mut hasher);
        Fingerprint(format!("raw:{:016x}", hasher.finish()))
    }

    /// Returns `true` if the event should be processed.
    ///
    /// Processed events refresh their fingerprint's last-seen time;
    /// suppressed ones do not, so a steady stream of duplicates cannot keep
    /// a fingerprint alive forever.
    pub fn should_process(&self, event: &NormalizedEvent) -> bool {
        let fingerprint = self.fingerprint(event);
        let now = Instant::now();
        let mut last_seen = self.last_seen.lock();

        let duplicate = last_seen
            .get(&fingerprint)
            .is_some_and(|seen| now.duration_since(*seen) < self.window);
        if duplicate {
            trace!(fingerprint = %fingerprint, "Duplicate event suppressed");
            return false;
        }
        last_seen.insert(fingerprint, now);
        true
    }

    /// Purges fingerprints last seen more than two windows ago.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let horizon = self.window * 2;
        let now = Instant::now();
        let mut last_seen = self.last_seen.lock();
        let before = last_seen.len();
        last_seen.retain(|_, seen| now.duration_since(*seen) <= horizon);
        before - last_seen.len()
    }

    /// Runs [`sweep`](Self::sweep) once per window until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let dedup = Arc::clone(self);
        tokio::spawn(async move {
            let period = dedup.window.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = dedup.sweep();
                        if purged > 0 {
                            trace!(purged, remaining = dedup.len(), "Fingerprints swept");
                        }
                    }
                }
            }
            debug!("Dedup sweeper stopped");
        })
    }

    /// Number of tracked fingerprints.
    pub fn len(&self) -> usize {
        self.last_seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.lock().is_empty()
    }

    pub fn clear(&self) {
        self.last_seen.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::event::{EventPayload, MessagePayload, NoticePayload};
    use serde_json::json;
    use tokio::time::advance;

    fn chat(sender: &str, group: Option<&str>, text: &str) -> NormalizedEvent {
        NormalizedEvent::new(
            "p1",
            EventPayload::Message(MessagePayload {
                message_id: None,
                sender_id: Some(sender.into()),
                group_id: group.map(Into::into),
                content: text.into(),
                raw: json!({"text": text}),
            }),
        )
    }

    #[test]
    fn fingerprint_prefers_most_specific_source() {
        let dedup = EventDeduplicator::default().with_content_prefix(4);

        let mut with_id = chat("u1", Some("g1"), "hello");
        if let EventPayload::Message(m) = &mut with_id.payload {
            m.message_id = Some("42".into());
        }
        assert_eq!(dedup.fingerprint(&with_id).as_str(), "id:42");

        assert_eq!(
            dedup.fingerprint(&chat("u1", Some("g1"), "hello")).as_str(),
            "message:u1@g1:hell"
        );
        assert_eq!(
            dedup.fingerprint(&chat("u1", None, "hello")).as_str(),
            "message:u1:hell"
        );

        let notice = NormalizedEvent::new(
            "p1",
            EventPayload::Notice(NoticePayload {
                notice_type: "poke".into(),
                raw: json!({"notice_type": "poke"}),
                ..Default::default()
            }),
        );
        assert!(dedup.fingerprint(&notice).as_str().starts_with("raw:"));
        assert_eq!(dedup.fingerprint(&notice), dedup.fingerprint(&notice.clone()));
    }

    fn member_joined(backend: &str) -> NormalizedEvent {
        NormalizedEvent::new(
            backend,
            EventPayload::Notice(NoticePayload {
                notice_type: "group_increase".into(),
                sender_id: Some("u1".into()),
                group_id: Some("g1".into()),
                raw: json!({"notice_type": "group_increase", "self_id": backend}),
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn contentless_notices_relayed_by_two_backends_collapse() {
        let dedup = EventDeduplicator::new(Duration::from_millis(200));
        let first = member_joined("p1");
        let relayed = member_joined("p2");

        assert_eq!(dedup.fingerprint(&first).as_str(), "notice:u1@g1:");
        assert_eq!(dedup.fingerprint(&first), dedup.fingerprint(&relayed));

        assert!(dedup.should_process(&first));
        advance(Duration::from_millis(100)).await;
        assert!(!dedup.should_process(&relayed));
    }

    #[test]
    fn prefix_counts_characters_not_bytes() {
        let dedup = EventDeduplicator::default().with_content_prefix(2);
        assert_eq!(
            dedup.fingerprint(&chat("u", None, "héllo")).as_str(),
            "message:u:hé"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn suppresses_within_window_only() {
        let dedup = EventDeduplicator::new(Duration::from_millis(200));
        let event = chat("u1", Some("g1"), "same text");

        assert!(dedup.should_process(&event));
        advance(Duration::from_millis(100)).await;
        assert!(!dedup.should_process(&event));
        advance(Duration::from_millis(150)).await;
        // 250ms after the first, which was the last processed occurrence.
        assert!(dedup.should_process(&event));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_purges_entries_older_than_two_windows() {
        let dedup = EventDeduplicator::new(Duration::from_millis(100));
        dedup.should_process(&chat("u1", None, "a"));
        advance(Duration::from_millis(150)).await;
        dedup.should_process(&chat("u2", None, "b"));

        advance(Duration::from_millis(100)).await;
        assert_eq!(dedup.sweep(), 1);
        assert_eq!(dedup.len(), 1);

        advance(Duration::from_millis(150)).await;
        assert_eq!(dedup.sweep(), 1);
        assert!(dedup.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_task_runs_until_cancelled() {
        let dedup = Arc::new(EventDeduplicator::new(Duration::from_millis(100)));
        let cancel = CancellationToken::new();
        let handle = dedup.spawn_sweeper(cancel.clone());

        dedup.should_process(&chat("u1", None, "a"));
        assert_eq!(dedup.len(), 1);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(dedup.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
