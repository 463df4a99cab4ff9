//! Fan-out behavior with mixed healthy, slow, and scoped subscribers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use watchcast::{Broadcaster, ChannelSink, DeliveryError, NotificationSink};

/// Sink that never completes within the configured send timeout.
struct StuckSink;

#[async_trait]
impl NotificationSink for StuckSink {
    async fn send(&self, _payload: &str) -> Result<(), DeliveryError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

fn broadcaster() -> Broadcaster {
    Broadcaster::new(Duration::from_millis(200))
}

#[tokio::test]
async fn test_stuck_subscriber_dropped_others_delivered() {
    let b = broadcaster();
    let (healthy, mut rx) = ChannelSink::new(8);
    b.subscribe(Arc::new(healthy), None);
    b.subscribe(Arc::new(StuckSink), None);
    assert_eq!(b.subscriber_count(), 2);

    let delivered = b.broadcast("hello", None).await;
    assert_eq!(delivered, 1);
    assert_eq!(rx.recv().await.unwrap(), "hello");

    // the stuck sink was evicted by its failure
    assert_eq!(b.subscriber_count(), 1);
    assert_eq!(b.broadcast("again", None).await, 1);
    assert_eq!(rx.recv().await.unwrap(), "again");
}

#[tokio::test]
async fn test_scoped_delivery_isolated() {
    let b = broadcaster();
    let (alpha, mut rx_alpha) = ChannelSink::new(8);
    let (beta, mut rx_beta) = ChannelSink::new(8);
    let (global, mut rx_global) = ChannelSink::new(8);
    b.subscribe(Arc::new(alpha), Some("alpha".to_string()));
    b.subscribe(Arc::new(beta), Some("beta".to_string()));
    b.subscribe(Arc::new(global), None);

    // scoped payload reaches only its scope
    assert_eq!(b.broadcast("for-alpha", Some("alpha")).await, 1);
    assert_eq!(rx_alpha.recv().await.unwrap(), "for-alpha");
    assert!(rx_beta.try_recv().is_err());
    assert!(rx_global.try_recv().is_err());

    // unscoped payload reaches everyone
    assert_eq!(b.broadcast("for-all", None).await, 3);
    assert_eq!(rx_alpha.recv().await.unwrap(), "for-all");
    assert_eq!(rx_beta.recv().await.unwrap(), "for-all");
    assert_eq!(rx_global.recv().await.unwrap(), "for-all");
}

#[tokio::test]
async fn test_resubscribe_after_eviction() {
    let b = broadcaster();
    b.subscribe(Arc::new(StuckSink), None);
    assert_eq!(b.broadcast("lost", None).await, 0);
    assert_eq!(b.subscriber_count(), 0);

    // a fresh subscription gets a fresh id and deliveries resume
    let (sink, mut rx) = ChannelSink::new(8);
    b.subscribe(Arc::new(sink), None);
    assert_eq!(b.broadcast("back", None).await, 1);
    assert_eq!(rx.recv().await.unwrap(), "back");
}
