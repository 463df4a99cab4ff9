//! Subscriber registry and best-effort notification fan-out.
//!
//! Delivery is at-most-once, fire-and-forget: a subscriber whose send
//! fails or times out is dropped from the registry and must reconcile by
//! re-reading current state through whatever read surface the transport
//! offers. There is no acknowledgement and no retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::watcher::DeliveryError;

/// Opaque handle identifying one subscriber.
pub type SubscriberId = u64;

/// Transport seam: the broadcaster only knows how to hand a serialized
/// payload to a subscriber, not what the transport is.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, payload: &str) -> Result<(), DeliveryError>;
}

/// In-process sink backed by a tokio channel. Used by the CLI and tests;
/// a WebSocket transport would implement [`NotificationSink`] the same way.
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl ChannelSink {
    /// Returns the sink and the receiving half for the consumer.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn send(&self, payload: &str) -> Result<(), DeliveryError> {
        self.tx
            .send(payload.to_string())
            .await
            .map_err(|_| DeliveryError::Closed)
    }
}

struct SubscriberEntry {
    scope: Option<String>,
    sink: Arc<dyn NotificationSink>,
}

/// Tracks live subscribers, optionally scoped, and fans payloads out.
///
/// Scoped payloads reach only that scope's subscribers; unscoped payloads
/// reach everyone. The registry lock is never held across a send, so a
/// slow subscriber cannot block subscribe/unsubscribe traffic.
pub struct Broadcaster {
    subscribers: RwLock<HashMap<SubscriberId, SubscriberEntry>>,
    next_id: AtomicU64,
    send_timeout: Duration,
}

impl Broadcaster {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            send_timeout,
        }
    }

    /// Register a subscriber, optionally restricted to one scope.
    pub fn subscribe(&self, sink: Arc<dyn NotificationSink>, scope: Option<String>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .insert(id, SubscriberEntry { scope, sink });
        tracing::info!(
            "[broadcast] subscriber {id} added, total={}",
            self.subscriber_count()
        );
        id
    }

    /// Remove a subscriber. Returns false if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            tracing::info!(
                "[broadcast] subscriber {id} removed, total={}",
                self.subscriber_count()
            );
        }
        removed
    }

    /// Deliver a payload to every subscriber interested in `scope`.
    ///
    /// Sends run sequentially so per-subscriber ordering is preserved
    /// across broadcasts from a single caller. Each send is bounded by the
    /// configured timeout; failed and timed-out subscribers are removed
    /// afterward. Returns the number of successful deliveries.
    pub async fn broadcast(&self, payload: &str, scope: Option<&str>) -> usize {
        let targets: Vec<(SubscriberId, Arc<dyn NotificationSink>)> = {
            let subscribers = self.subscribers.read();
            subscribers
                .iter()
                .filter(|(_, entry)| match scope {
                    Some(s) => entry.scope.as_deref() == Some(s),
                    None => true,
                })
                .map(|(id, entry)| (*id, Arc::clone(&entry.sink)))
                .collect()
        };

        if targets.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, sink) in targets {
            match timeout(self.send_timeout, sink.send(payload)).await {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!("[broadcast] dropping subscriber {id}: {e}");
                    failed.push(id);
                }
                Err(_) => {
                    tracing::warn!(
                        "[broadcast] dropping subscriber {id}: send timed out after {}ms",
                        self.send_timeout.as_millis()
                    );
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in failed {
                subscribers.remove(&id);
            }
        }

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Subscriber counts per scope, for status reporting.
    pub fn scope_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for entry in self.subscribers.read().values() {
            if let Some(scope) = &entry.scope {
                *counts.entry(scope.clone()).or_insert(0) += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that always fails, for drop-on-failure coverage.
    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn send(&self, _payload: &str) -> Result<(), DeliveryError> {
            Err(DeliveryError::Transport {
                reason: "boom".to_string(),
            })
        }
    }

    fn broadcaster() -> Broadcaster {
        Broadcaster::new(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_unscoped_broadcast_reaches_everyone() {
        let b = broadcaster();
        let (sink_a, mut rx_a) = ChannelSink::new(8);
        let (sink_b, mut rx_b) = ChannelSink::new(8);
        b.subscribe(Arc::new(sink_a), None);
        b.subscribe(Arc::new(sink_b), Some("proj-1".to_string()));

        let delivered = b.broadcast("hello", None).await;
        assert_eq!(delivered, 2);
        assert_eq!(rx_a.recv().await.unwrap(), "hello");
        assert_eq!(rx_b.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_scoped_broadcast_routes_to_scope_only() {
        let b = broadcaster();
        let (sink_a, mut rx_a) = ChannelSink::new(8);
        let (sink_b, mut rx_b) = ChannelSink::new(8);
        b.subscribe(Arc::new(sink_a), Some("proj-1".to_string()));
        b.subscribe(Arc::new(sink_b), Some("proj-2".to_string()));

        let delivered = b.broadcast("scoped", Some("proj-1")).await;
        assert_eq!(delivered, 1);
        assert_eq!(rx_a.recv().await.unwrap(), "scoped");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_subscriber_dropped_others_unaffected() {
        let b = broadcaster();
        b.subscribe(Arc::new(FailingSink), None);
        let (sink_ok, mut rx_ok) = ChannelSink::new(8);
        b.subscribe(Arc::new(sink_ok), None);
        assert_eq!(b.subscriber_count(), 2);

        let delivered = b.broadcast("n1", None).await;
        assert_eq!(delivered, 1);
        assert_eq!(rx_ok.recv().await.unwrap(), "n1");
        assert_eq!(b.subscriber_count(), 1);

        // the failing subscriber stays gone on the next broadcast
        let delivered = b.broadcast("n2", None).await;
        assert_eq!(delivered, 1);
        assert_eq!(rx_ok.recv().await.unwrap(), "n2");
    }

    #[tokio::test]
    async fn test_per_subscriber_fifo() {
        let b = broadcaster();
        let (sink, mut rx) = ChannelSink::new(8);
        b.subscribe(Arc::new(sink), None);

        b.broadcast("first", None).await;
        b.broadcast("second", None).await;
        assert_eq!(rx.recv().await.unwrap(), "first");
        assert_eq!(rx.recv().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let b = broadcaster();
        let (sink, mut rx) = ChannelSink::new(8);
        let id = b.subscribe(Arc::new(sink), None);

        assert!(b.unsubscribe(id));
        assert!(!b.unsubscribe(id));
        assert_eq!(b.broadcast("late", None).await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_scope_counts() {
        let b = broadcaster();
        let (sink_a, _rx_a) = ChannelSink::new(8);
        let (sink_b, _rx_b) = ChannelSink::new(8);
        let (sink_c, _rx_c) = ChannelSink::new(8);
        b.subscribe(Arc::new(sink_a), Some("proj-1".to_string()));
        b.subscribe(Arc::new(sink_b), Some("proj-1".to_string()));
        b.subscribe(Arc::new(sink_c), None);

        let counts = b.scope_counts();
        assert_eq!(counts.get("proj-1"), Some(&2));
        assert_eq!(counts.len(), 1);
        assert_eq!(b.subscriber_count(), 3);
    }
}
