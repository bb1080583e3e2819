//! In-process topic publish/subscribe.
//!
//! Topics are opaque strings; a subscription pattern ending in `*` matches
//! any suffix. Delivery channels are bounded: a subscriber that cannot keep
//! up is dropped rather than ever blocking a publisher.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;

/// Capacity of each subscriber's delivery channel.
const CHANNEL_CAPACITY: usize = 64;

/// Topics emitted by the host itself.
pub mod topics {
    /// Broadcast on every SSE connect.
    pub const CLIENT_CONNECTED: &str = "mcp:client_connected";
    /// Broadcast on every SSE disconnect.
    pub const CLIENT_DISCONNECTED: &str = "mcp:client_disconnected";
    /// Every incoming RPC, with full envelope and latency.
    pub const REQUESTS: &str = "mcp:requests";

    /// Per-client delivery queue consumed by that client's SSE stream.
    #[must_use]
    pub fn client_notifications(client_id: &str) -> String {
        format!("mcp:notifications:{client_id}")
    }
}

/// One published event as seen by a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub topic: String,
    pub payload: Value,
}

struct Subscriber {
    patterns: Vec<String>,
    tx: mpsc::Sender<BusEvent>,
}

/// Topic-based fan-out bus.
///
/// Shared by value behind an `Arc`; the subscriber map sits behind a
/// short-lived mutex that is never held across an await.
#[derive(Default)]
pub struct NotificationBus {
    subscribers: Mutex<HashMap<String, Subscriber>>,
}

impl NotificationBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber_id` for the given topic patterns, returning the
    /// delivery channel. A second call for the same id replaces the previous
    /// registration (the old receiver sees end-of-stream).
    pub fn subscribe(
        &self,
        subscriber_id: &str,
        patterns: &[&str],
    ) -> mpsc::Receiver<BusEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let subscriber = Subscriber {
            patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
            tx,
        };
        let previous = self
            .subscribers
            .lock()
            .expect("bus lock poisoned")
            .insert(subscriber_id.to_string(), subscriber);
        if previous.is_some() {
            tracing::debug!(subscriber = %subscriber_id, "Replaced existing subscription");
        }
        rx
    }

    /// Add a pattern to an existing subscriber. No-op when the subscriber
    /// is unknown (it may have just been pruned).
    pub fn add_subscription(&self, subscriber_id: &str, pattern: &str) {
        let mut subscribers = self.subscribers.lock().expect("bus lock poisoned");
        if let Some(entry) = subscribers.get_mut(subscriber_id) {
            entry.patterns.push(pattern.to_string());
        }
    }

    /// Remove all subscriptions owned by `subscriber_id`.
    pub fn unsubscribe(&self, subscriber_id: &str) {
        let removed = self
            .subscribers
            .lock()
            .expect("bus lock poisoned")
            .remove(subscriber_id)
            .is_some();
        if removed {
            tracing::debug!(subscriber = %subscriber_id, "Unsubscribed");
        }
    }

    /// Fan a payload out to every subscriber with a matching pattern.
    ///
    /// A subscriber whose channel is full or closed is dropped and removed
    /// with a warning; publishing never blocks. Returns the number of
    /// subscribers that received the event.
    pub fn publish(&self, topic: &str, payload: Value) -> usize {
        let mut dead = Vec::new();
        let mut delivered = 0;

        {
            let subscribers = self.subscribers.lock().expect("bus lock poisoned");
            for (id, subscriber) in subscribers.iter() {
                if !subscriber.patterns.iter().any(|p| topic_matches(p, topic)) {
                    continue;
                }
                let event = BusEvent { topic: topic.to_string(), payload: payload.clone() };
                match subscriber.tx.try_send(event) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        tracing::warn!(
                            subscriber = %id,
                            topic = %topic,
                            error = %e,
                            "Dropping unresponsive subscriber"
                        );
                        dead.push(id.clone());
                    }
                }
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.subscribers.lock().expect("bus lock poisoned");
            for id in dead {
                subscribers.remove(&id);
            }
        }

        delivered
    }

    /// Number of live subscribers (for monitoring).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("bus lock poisoned").len()
    }
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Exact match, or prefix match when the pattern ends with `*`.
fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("mcp:requests", "mcp:requests"));
        assert!(topic_matches("mcp:*", "mcp:requests"));
        assert!(topic_matches("*", "anything"));
        assert!(!topic_matches("mcp:requests", "mcp:requests:extra"));
        assert!(!topic_matches("mcp:a*", "mcp:b"));
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscriber() {
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe("c1", &["mcp:notifications:c1"]);

        let delivered = bus.publish("mcp:notifications:c1", json!({"n": 1}));
        assert_eq!(delivered, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "mcp:notifications:c1");
        assert_eq!(event.payload, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_non_matching_subscriber_skipped() {
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe("c1", &["mcp:notifications:c1"]);

        assert_eq!(bus.publish("mcp:notifications:c2", json!({})), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_channel_drops_subscriber() {
        let bus = NotificationBus::new();
        let _rx = bus.subscribe("slow", &["t"]);

        for _ in 0..CHANNEL_CAPACITY {
            assert_eq!(bus.publish("t", json!({})), 1);
        }
        // Channel is now full; the subscriber gets pruned.
        assert_eq!(bus.publish("t", json!({})), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_all() {
        let bus = NotificationBus::new();
        let _rx = bus.subscribe("c1", &["a", "b"]);
        bus.add_subscription("c1", "c");

        bus.unsubscribe("c1");
        assert_eq!(bus.publish("a", json!({})), 0);
        assert_eq!(bus.publish("c", json!({})), 0);
    }

    #[tokio::test]
    async fn test_per_topic_fifo() {
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe("c1", &["t"]);

        for i in 0..5 {
            bus.publish("t", json!({"seq": i}));
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap().payload["seq"], i);
        }
    }
}
