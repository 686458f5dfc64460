// Topic-based pub/sub with bounded per-subscriber channels
//
// Delivery is best-effort, at-most-once: a publish never waits on a slow
// consumer. A full channel drops that subscriber's message and the drop is
// counted, so a stalled reader costs exactly nothing to everyone else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::debug;

/// Per-subscriber channel capacity used when the configured value is zero.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// One published payload, tagged with the topic it was sent on.
#[derive(Debug, Clone, PartialEq)]
pub struct Message<T> {
    pub topic: String,
    pub payload: T,
}

/// The receiving half handed to a subscriber. The stream ends (`recv`
/// returns `None`) when the subscriber is unsubscribed, replaced by a
/// re-subscribe under the same id, or the broadcaster is closed.
#[derive(Debug)]
pub struct Subscription<T> {
    pub id: String,
    pub receiver: mpsc::Receiver<Message<T>>,
}

#[derive(Debug, Default)]
struct BroadcastCounters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time delivery counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// Topic registry: topic -> subscriber id -> sender. One reader/writer lock
/// guards the registry; publishes share the read side so they proceed
/// concurrently with each other.
pub struct Broadcaster<T> {
    topics: RwLock<HashMap<String, HashMap<String, mpsc::Sender<Message<T>>>>>,
    channel_capacity: usize,
    counters: BroadcastCounters,
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// A zero capacity falls back to the default; a bounded channel is the
    /// contract that keeps publishing non-blocking.
    pub fn with_capacity(channel_capacity: usize) -> Self {
        let channel_capacity = if channel_capacity == 0 {
            DEFAULT_CHANNEL_CAPACITY
        } else {
            channel_capacity
        };

        Self {
            topics: RwLock::new(HashMap::new()),
            channel_capacity,
            counters: BroadcastCounters::default(),
        }
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    /// Register a subscriber on a topic, creating the topic on demand, and
    /// hand back the receiving half. Re-subscribing under an id already
    /// registered on the topic replaces the previous entry; the replaced
    /// sender is dropped, which terminates the old subscription's stream
    /// instead of leaking it.
    pub async fn subscribe(&self, topic: &str, subscriber_id: &str) -> Subscription<T> {
        let (sender, receiver) = mpsc::channel(self.channel_capacity);

        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_default()
            .insert(subscriber_id.to_string(), sender);

        Subscription {
            id: subscriber_id.to_string(),
            receiver,
        }
    }

    /// Remove a subscriber, ending its stream. The topic entry itself is
    /// removed once its last subscriber leaves, so dead topics hold no
    /// memory. Unknown topics and ids are ignored.
    pub async fn unsubscribe(&self, topic: &str, subscriber_id: &str) {
        let mut topics = self.topics.write().await;
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.remove(subscriber_id);
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Fan a payload out to every subscriber currently registered on the
    /// topic. Each delivery is a non-blocking try-send: a full channel
    /// drops the message for that subscriber without delaying the publisher
    /// or any other subscriber. Publishing to a topic nobody listens on is
    /// a no-op.
    pub async fn publish(&self, topic: &str, payload: T) {
        let topics = self.topics.read().await;
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        let Some(subscribers) = topics.get(topic) else {
            return;
        };

        for (subscriber_id, sender) in subscribers {
            let message = Message {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            match sender.try_send(message) {
                Ok(()) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        topic = %topic,
                        subscriber = %subscriber_id,
                        "subscriber channel full, dropping message"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        topic = %topic,
                        subscriber = %subscriber_id,
                        "subscriber channel closed, dropping message"
                    );
                }
            }
        }
    }

    /// Current subscriber count for a topic; zero for unknown topics.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    /// Number of live topics; a topic dies with its last subscriber.
    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Drop every sender and clear the registry, ending all subscriber
    /// streams. Idempotent.
    pub async fn close(&self) {
        self.topics.write().await.clear();
    }
}

impl<T: Clone + Send + 'static> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}
