//! Subscriber fan-out (§4.H): each `/stream` client owns a bounded
//! channel; `publish` offers to every live subscriber without blocking
//! and drops the event for any subscriber whose queue is full (§5, §7
//! drop-newest policy) or whose receiver has gone away.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 5_000;

pub struct SubscriberRegistry {
    subscribers: DashMap<u64, mpsc::Sender<Value>>,
    next_id: AtomicU64,
    capacity: usize,
    pub dropped_full_total: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
            capacity,
            dropped_full_total: AtomicU64::new(0),
        }
    }

    /// Registers a new subscriber and returns its receiver; the caller
    /// streams from this into the SSE response body.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<Value>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity.max(1));
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Non-blocking best-effort publish to every live subscriber. A full
    /// queue is dropped, not awaited; a closed receiver is pruned.
    pub fn publish(&self, event: &Value) {
        let mut dead = Vec::new();
        for entry in self.subscribers.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped_full_total.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(*entry.key());
                }
            }
        }
        for id in dead {
            self.subscribers.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let registry = SubscriberRegistry::new(10);
        let (_id, mut rx) = registry.subscribe();
        registry.publish(&serde_json::json!({"kind": "req_end"}));
        let got = rx.recv().await.unwrap();
        assert_eq!(got["kind"], "req_end");
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let registry = SubscriberRegistry::new(1);
        let (_id, mut rx) = registry.subscribe();
        registry.publish(&serde_json::json!({"n": 1}));
        registry.publish(&serde_json::json!({"n": 2}));
        assert_eq!(registry.dropped_full_total.load(Ordering::Relaxed), 1);
        let first = rx.recv().await.unwrap();
        assert_eq!(first["n"], 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_entry() {
        let registry = SubscriberRegistry::new(10);
        let (id, _rx) = registry.subscribe();
        assert_eq!(registry.subscriber_count(), 1);
        registry.unsubscribe(id);
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn publish_prunes_dropped_receivers() {
        let registry = SubscriberRegistry::new(10);
        let (_id, rx) = registry.subscribe();
        drop(rx);
        registry.publish(&serde_json::json!({"n": 1}));
        assert_eq!(registry.subscriber_count(), 0);
    }
}
