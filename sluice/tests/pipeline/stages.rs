use std::sync::Arc;
use std::time::Duration;

use sluice::port;
use sluice::serial;
use sluice::{
    Buffer, DeadlineItem, DeliveryTracker, Keyed, KeyedItem, MetricUpdate, Metrics, Mux,
    OrderedKeyedContainer, SerialNumbers, Skip, Stage, StageError,
};
use tokio_util::sync::CancellationToken;

use super::{init_tracing, settle};

#[tokio::test(start_paused = true)]
async fn test_container_chained_into_buffer() {
    init_tracing();
    let container = OrderedKeyedContainer::new().unwrap();
    let adds = container.add_port();
    let deletes = container.delete_port();
    let buffer = Buffer::from_stage(0, container).unwrap();

    adds.send(KeyedItem::new(1u32, "a")).await.unwrap();
    adds.send(KeyedItem::new(2, "b")).await.unwrap();
    adds.send(KeyedItem::new(3, "c")).await.unwrap();
    settle().await;
    // "a" is held by the buffer loop; "b" is still deletable
    deletes.send(2).await.unwrap();

    assert_eq!(*buffer.next().await.unwrap().value(), "a");
    assert_eq!(*buffer.next().await.unwrap().value(), "c");

    buffer.close();
    settle().await;
    assert!(adds.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_tracker_and_buffer_muxed() {
    init_tracing();
    let tracker = DeliveryTracker::new().unwrap();
    let side = Buffer::new(4).unwrap();
    let mux = Mux::new(tracker.output(), side.output(), 4).unwrap();

    tracker.track(1u64, "tracked").await.unwrap();
    side.send(DeadlineItem::new(2u64, "side", Duration::from_secs(30)))
        .await
        .unwrap();

    let mut keys = vec![
        *mux.next().await.unwrap().key(),
        *mux.next().await.unwrap().key(),
    ];
    keys.sort_unstable();
    assert_eq!(keys, vec![1, 2]);

    tracker.ack(1).await.unwrap();
    settle().await;
    assert_eq!(tracker.stats().expired, 0);

    tracker.close();
    side.close();
    assert_eq!(mux.next().await.map(|item| *item.key()), Err(StageError::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_skip_behind_slow_consumer() {
    init_tracing();
    let source = Buffer::new(16).unwrap();
    let skip = Skip::new(source.output(), 2).unwrap();

    for value in 0..10u32 {
        source.send(value).await.unwrap();
    }
    settle().await;

    assert_eq!(skip.next().await, Ok(0));
    assert_eq!(skip.next().await, Ok(1));
    assert_eq!(skip.dropped(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_serial_framed_payloads_through_buffer() {
    init_tracing();
    let serials = SerialNumbers::starting_at(40);
    let buffer = Buffer::new(8).unwrap();

    let payloads: [&[u8]; 3] = [b"one", b"two", b"three"];
    for payload in payloads {
        buffer.send(serials.stamp(payload)).await.unwrap();
    }

    let mut decoded = Vec::new();
    for _ in 0..3 {
        let frame = buffer.next().await.unwrap();
        let (sn, payload) = serial::split(&frame).unwrap();
        decoded.push((sn, payload.to_vec()));
    }
    assert_eq!(
        decoded,
        vec![
            (40, b"one".to_vec()),
            (41, b"two".to_vec()),
            (42, b"three".to_vec()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_metrics_fed_by_consumer() {
    init_tracing();
    let metrics = Arc::new(Metrics::new());
    metrics.register(["consumed"]);
    let (updates, updates_rx) = port::inbound(8);
    let shutdown = CancellationToken::new();
    let server = tokio::spawn({
        let metrics = Arc::clone(&metrics);
        let shutdown = shutdown.clone();
        async move { metrics.serve(updates_rx, shutdown).await }
    });

    let tracker = DeliveryTracker::new().unwrap();
    let consumer = {
        let output = tracker.obj_out();
        let updates = updates.clone();
        tokio::spawn(async move {
            while let Some(_item) = output.recv().await {
                updates.send(MetricUpdate::inc("consumed")).await.unwrap();
                updates.send(MetricUpdate::inc("not-registered")).await.unwrap();
            }
        })
    };

    for key in 0..3u32 {
        tracker.track(key, ()).await.unwrap();
    }
    settle().await;
    assert_eq!(metrics.value("consumed"), Ok(3));
    assert!(metrics.value("not-registered").is_err());

    tracker.close();
    consumer.await.unwrap();
    shutdown.cancel();
    server.await.unwrap();
}
