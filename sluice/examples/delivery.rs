//! Delivery tracker demo.
//!
//! A producer stamps serial numbers on payloads, a consumer acknowledges most
//! of them, and the tracker discards the rest once their deadline passes.
//! Stops on ctrl-c or after a few seconds.
//!
//! ```bash
//! RUST_LOG=sluice=debug cargo run --example delivery
//! ```

use std::time::Duration;

use sluice::{
    wait_for_signal, DeadlineItem, DeliveryTracker, Keyed, SerialNumbers, TrackerConfig,
    TrackerError,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), TrackerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let config = TrackerConfig::default()
        .with_obj_in_capacity(8)
        .with_default_deadline(Duration::from_millis(500));
    let tracker = DeliveryTracker::with_config(config)?;

    let producer = {
        let input = tracker.obj_in();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let serials = SerialNumbers::new();
            while !shutdown.is_cancelled() {
                let sn = serials.next();
                let item = DeadlineItem::new(sn, format!("payload-{sn}"), Duration::from_millis(500));
                if input.send(item).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
    };

    let consumer = {
        let output = tracker.obj_out();
        let acks = tracker.ack_in();
        tokio::spawn(async move {
            while let Some(item) = output.recv().await {
                tracing::info!(key = item.key(), value = %item.value(), "consumed");
                // Leave every fifth item unacknowledged
                if item.key() % 5 != 0 && acks.send(*item.key()).await.is_err() {
                    break;
                }
            }
        })
    };

    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(Duration::from_secs(5)) => shutdown.cancel(),
    }

    tracker.close();
    if let Err(error) = producer.await {
        tracing::warn!(%error, "producer task failed");
    }
    if let Err(error) = consumer.await {
        tracing::warn!(%error, "consumer task failed");
    }

    tracing::info!(stats = ?tracker.stats(), "tracker stopped");
    Ok(())
}
