use std::time::Duration;

use sluice::{
    DeadlineItem, DeliveryTracker, Keyed, SerialNumbers, TrackerConfig, TrackerError,
    TrackerStats,
};

use super::{init_tracing, settle};

#[tokio::test(start_paused = true)]
async fn test_items_come_out_in_serial_order() {
    init_tracing();
    let serials = SerialNumbers::new();
    let config = TrackerConfig::default().with_obj_in_capacity(16);
    let tracker = DeliveryTracker::with_config(config).unwrap();

    for _ in 0..10 {
        let item = DeadlineItem::new(serials.next(), (), Duration::from_secs(2));
        tracker.send(item).await.unwrap();
    }

    let output = tracker.obj_out();
    let closer = {
        let tracker = tracker;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            tracker.close();
            tracker
        })
    };

    let mut keys = Vec::new();
    while let Some(item) = output.recv().await {
        keys.push(*item.key());
    }
    assert_eq!(keys, (0..10).collect::<Vec<u64>>());

    let tracker = closer.await.unwrap();
    let stats = tracker.stats();
    assert_eq!(stats.forwarded, 10);
    assert_eq!(stats.staged, 10);
    assert_eq!(stats.expired, 10);
}

#[tokio::test(start_paused = true)]
async fn test_acks_through_port_prevent_expiry() {
    init_tracing();
    let tracker = DeliveryTracker::with_config(
        TrackerConfig::default().with_default_deadline(Duration::from_secs(1)),
    )
    .unwrap();
    let acks = tracker.ack_in();
    let producer = tracker.obj_in();

    let feeder = tokio::spawn(async move {
        for key in 0..5u32 {
            producer
                .send(DeadlineItem::new(key, key, Duration::from_secs(1)))
                .await
                .unwrap();
        }
    });

    for _ in 0..5 {
        let item = tracker.next().await.unwrap();
        // Acknowledge even keys only
        if item.key() % 2 == 0 {
            acks.send(*item.key()).await.unwrap();
        }
    }
    feeder.await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let stats = tracker.stats();
    assert_eq!(stats.forwarded, 5);
    assert_eq!(stats.acks_received, 3);
    assert_eq!(stats.expired, 2);
}

#[tokio::test(start_paused = true)]
async fn test_consumer_cancel_expires_record() {
    init_tracing();
    let tracker = DeliveryTracker::new().unwrap();
    tracker.track("job", 1u8).await.unwrap();

    let item = tracker.next().await.unwrap();
    settle().await;
    item.cancel();
    settle().await;

    assert_eq!(tracker.stats().expired, 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_releases_waiting_consumer() {
    init_tracing();
    let tracker = std::sync::Arc::new(DeliveryTracker::<u64, ()>::new().unwrap());
    let consumer = {
        let tracker = std::sync::Arc::clone(&tracker);
        tokio::spawn(async move { tracker.next().await.map(|item| *item.key()) })
    };
    settle().await;

    tracker.close();

    assert_eq!(consumer.await.unwrap(), Err(TrackerError::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_stats_serialize() {
    init_tracing();
    let tracker = DeliveryTracker::new().unwrap();
    tracker.track(1u64, "a").await.unwrap();
    tracker.next().await.unwrap();
    tracker.ack(1).await.unwrap();
    settle().await;

    let json = serde_json::to_value(tracker.stats()).unwrap();
    assert_eq!(json["forwarded"], 1);
    assert_eq!(json["acks_received"], 1);
    assert_eq!(json["expired"], 0);
    assert_ne!(tracker.stats(), TrackerStats::default());
}
