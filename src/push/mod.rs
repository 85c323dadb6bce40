//! Push Hub (spec §4.E): topic-subscribed, best-effort, at-most-once
//! broadcast over a persistent connection.
//!
//! Grounded on `odds-processor/src/network/stream.rs`'s broadcast-plus-
//! per-client-state shape, but where the teacher fans out over an unbounded
//! `tokio::sync::broadcast` channel (a slow consumer there just lags and
//! misses messages silently), this hub gives each subscriber its own
//! bounded queue and counts drops explicitly — the spec's redesign flag for
//! this component (spec §4.E, §9).

use crate::model::{PushMessage, Topic};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

pub struct Subscriber {
    pub id: u64,
    tx: mpsc::Sender<PushMessage>,
    dropped: Arc<AtomicU64>,
}

pub struct SubscriberHandle {
    pub id: u64,
    pub rx: mpsc::Receiver<PushMessage>,
    hub: Arc<PushHubInner>,
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.hub.remove_subscriber(self.id);
    }
}

struct PushHubInner {
    subscriber_queue_capacity: usize,
    next_id: AtomicU64,
    /// subscriber id -> (subscription set, sender)
    subscribers: DashMap<u64, (HashSet<Topic>, Subscriber)>,
}

impl PushHubInner {
    fn remove_subscriber(&self, id: u64) {
        self.subscribers.remove(&id);
    }
}

#[derive(Clone)]
pub struct PushHub {
    inner: Arc<PushHubInner>,
}

impl PushHub {
    pub fn new() -> Self {
        Self::with_queue_capacity(SUBSCRIBER_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PushHubInner {
                subscriber_queue_capacity: capacity,
                next_id: AtomicU64::new(1),
                subscribers: DashMap::new(),
            }),
        }
    }

    pub fn connect(&self) -> SubscriberHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.subscriber_queue_capacity);
        self.inner.subscribers.insert(
            id,
            (
                HashSet::new(),
                Subscriber {
                    id,
                    tx,
                    dropped: Arc::new(AtomicU64::new(0)),
                },
            ),
        );
        SubscriberHandle {
            id,
            rx,
            hub: self.inner.clone(),
        }
    }

    /// Idempotent: subscribing to an already-subscribed topic is a no-op.
    pub fn subscribe(&self, subscriber_id: u64, topics: &[Topic]) {
        if let Some(mut entry) = self.inner.subscribers.get_mut(&subscriber_id) {
            for topic in topics {
                entry.0.insert(*topic);
            }
        }
    }

    /// Idempotent: unsubscribing from a topic not currently subscribed is a no-op.
    pub fn unsubscribe(&self, subscriber_id: u64, topics: &[Topic]) {
        if let Some(mut entry) = self.inner.subscribers.get_mut(&subscriber_id) {
            for topic in topics {
                entry.0.remove(topic);
            }
        }
    }

    /// Best-effort, at-most-once fan-out. A full subscriber queue drops the
    /// message for that subscriber and increments its drop counter; the
    /// connection itself is never closed because of it.
    pub fn publish(&self, message: PushMessage) {
        for entry in self.inner.subscribers.iter() {
            let (topics, subscriber) = entry.value();
            if !topics.contains(&message.topic) {
                continue;
            }
            if subscriber.tx.try_send(message.clone()).is_err() {
                subscriber.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(subscriber_id = subscriber.id, "push queue full, message dropped");
            }
        }
    }

    pub fn dropped_count(&self, subscriber_id: u64) -> u64 {
        self.inner
            .subscribers
            .get(&subscriber_id)
            .map(|e| e.1.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

impl Default for PushHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribe_is_idempotent_and_delivers_only_subscribed_topics() {
        let hub = PushHub::new();
        let mut handle = hub.connect();
        hub.subscribe(handle.id, &[Topic::OddsUpdates]);
        hub.subscribe(handle.id, &[Topic::OddsUpdates]); // idempotent

        hub.publish(PushMessage { topic: Topic::ScrapeProgress, payload: json!({}) });
        hub.publish(PushMessage { topic: Topic::OddsUpdates, payload: json!({"k": 1}) });

        let msg = handle.rx.recv().await.unwrap();
        assert_eq!(msg.topic, Topic::OddsUpdates);
        assert!(handle.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_subscriber_queue_drops_without_closing_connection() {
        let hub = PushHub::with_queue_capacity(1);
        let handle = hub.connect();
        hub.subscribe(handle.id, &[Topic::OddsUpdates]);

        for _ in 0..5 {
            hub.publish(PushMessage { topic: Topic::OddsUpdates, payload: json!({}) });
        }

        assert!(hub.dropped_count(handle.id) > 0);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_then_publish_delivers_nothing() {
        let hub = PushHub::new();
        let mut handle = hub.connect();
        hub.subscribe(handle.id, &[Topic::OddsUpdates]);
        hub.unsubscribe(handle.id, &[Topic::OddsUpdates]);
        hub.unsubscribe(handle.id, &[Topic::OddsUpdates]); // idempotent

        hub.publish(PushMessage { topic: Topic::OddsUpdates, payload: json!({}) });
        assert!(handle.rx.try_recv().is_err());
    }
}
