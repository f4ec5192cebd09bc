//! Ordered, keyed container driven entirely through message ports.
//!
//! `OrderedKeyedContainer` is a FIFO queue whose elements can be removed by
//! key before they reach the head. All state lives in a single control loop
//! task; callers only ever talk to it through ports, so no locks guard the
//! queue itself.
//!
//! # Architecture
//!
//! ```text
//!            add ──▶ ┌──────────────────────────────┐
//!                    │ ControlLoop                  │
//!         delete ──▶ │  items: key → (seq, item)    │
//!                    │  order: [(seq, key), ...]    │ ──▶ output
//!       shutdown ──▶ │  staged: Option<item>        │
//!                    └──────────────────────────────┘
//!                              │
//!                              ▼
//!                     approx_size (atomic)
//! ```
//!
//! Each cycle the loop moves the queue head into the staged slot if it is
//! empty, publishes the occupancy, then waits for whichever comes first: an
//! add, a delete, shutdown, or (only while something is staged) a consumer
//! waiting on the output. Adds and deletes keep flowing while an item sits in
//! the staged slot, and deleting the staged key clears the slot.
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice::{KeyedItem, OrderedKeyedContainer};
//!
//! let container = OrderedKeyedContainer::new()?;
//! container.add(KeyedItem::new(1, "a")).await?;
//! container.add(KeyedItem::new(2, "b")).await?;
//! container.delete(1).await?;
//!
//! assert_eq!(container.next().await?.value(), &"b");
//! container.close();
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::ContainerConfig;
use crate::error::ContainerError;
use crate::keyed::Keyed;
use crate::port::{self, InboundRx, InboundTx, OutboundRx, OutboundTx};

/// Tombstones tolerated in the order queue before it is compacted.
const COMPACT_SLACK: usize = 64;

/// FIFO container addressable by key.
///
/// Cheap operations are exposed as async methods; the underlying ports are
/// also available for wiring into pipelines. Dropping the handle closes the
/// container.
pub struct OrderedKeyedContainer<T: Keyed> {
    add: InboundTx<T>,
    delete: InboundTx<T::Key>,
    output: OutboundRx<T>,
    approx_size: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl<T> OrderedKeyedContainer<T>
where
    T: Keyed + Send + 'static,
{
    /// Create a container with rendezvous ports.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Result<Self, ContainerError> {
        Self::with_config(ContainerConfig::default())
    }

    /// Create a container with the given port capacities.
    pub fn with_config(config: ContainerConfig) -> Result<Self, ContainerError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ContainerError::NoRuntime)?;

        let (add_tx, add_rx) = port::inbound(config.add_capacity);
        let (delete_tx, delete_rx) = port::inbound(config.delete_capacity);
        let (output_tx, output_rx) = port::outbound(config.output_capacity);
        let approx_size = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let control = ControlLoop {
            items: HashMap::new(),
            order: VecDeque::new(),
            next_seq: 0,
            staged: None,
            adds: add_rx,
            deletes: delete_rx,
            output: output_tx,
            approx_size: Arc::clone(&approx_size),
            shutdown: shutdown.clone(),
        };
        runtime.spawn(control.run());

        tracing::debug!(
            add_capacity = config.add_capacity,
            delete_capacity = config.delete_capacity,
            output_capacity = config.output_capacity,
            "container started"
        );

        Ok(Self {
            add: add_tx,
            delete: delete_tx,
            output: output_rx,
            approx_size,
            shutdown,
            closed: AtomicBool::new(false),
        })
    }

    /// Insert an item at the back of the queue.
    ///
    /// An item whose key is already live is silently dropped; the first one
    /// wins. Suspends while the add port is full.
    pub async fn add(&self, item: T) -> Result<(), ContainerError> {
        if self.is_closed() {
            return Err(ContainerError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ContainerError::Closed),
            result = self.add.send(item) => result.map_err(ContainerError::from),
        }
    }

    /// Remove the item with `key`, wherever it currently is.
    ///
    /// Deleting a key that is not present is a no-op.
    pub async fn delete(&self, key: T::Key) -> Result<(), ContainerError> {
        if self.is_closed() {
            return Err(ContainerError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ContainerError::Closed),
            result = self.delete.send(key) => result.map_err(ContainerError::from),
        }
    }

    /// Wait for the item at the head of the queue.
    ///
    /// Returns [`ContainerError::Closed`] once the container is closed, even
    /// if items were left inside.
    pub async fn next(&self) -> Result<T, ContainerError> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ContainerError::Closed),
            item = self.output.recv() => item.ok_or(ContainerError::Closed),
        }
    }

    /// Last recorded number of items held, including the staged one.
    ///
    /// Never blocks and may lag behind concurrent adds and deletes by one
    /// control-loop cycle.
    pub fn approx_size(&self) -> usize {
        self.approx_size.load(Ordering::Relaxed)
    }

    /// A producer handle for the add port.
    pub fn add_port(&self) -> InboundTx<T> {
        self.add.clone()
    }

    /// A producer handle for the delete port.
    pub fn delete_port(&self) -> InboundTx<T::Key> {
        self.delete.clone()
    }

    /// A consumer handle for the output port.
    ///
    /// The port reports closed once the control loop has stopped.
    pub fn output_port(&self) -> OutboundRx<T> {
        self.output.clone()
    }
}

impl<T: Keyed> OrderedKeyedContainer<T> {
    /// Stop the control loop and close the output port.
    ///
    /// Idempotent and safe to call concurrently. Items still inside are
    /// discarded.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        tracing::debug!("container closed");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<T: Keyed> Drop for OrderedKeyedContainer<T> {
    fn drop(&mut self) {
        self.close();
    }
}

struct Entry<T> {
    seq: u64,
    item: T,
}

/// Sole owner of the container state.
struct ControlLoop<T: Keyed> {
    items: HashMap<T::Key, Entry<T>>,
    /// Arrival order. An entry whose seq no longer matches `items` is a tombstone.
    order: VecDeque<(u64, T::Key)>,
    next_seq: u64,
    staged: Option<T>,
    adds: InboundRx<T>,
    deletes: InboundRx<T::Key>,
    output: OutboundTx<T>,
    approx_size: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl<T: Keyed> ControlLoop<T> {
    async fn run(mut self) {
        loop {
            if self.staged.is_none() {
                self.staged = self.pop();
            }
            self.approx_size.store(self.occupancy(), Ordering::Relaxed);
            let offering = self.staged.is_some();

            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                item = self.adds.recv() => match item {
                    Some(item) => self.insert(item),
                    None => break,
                },

                key = self.deletes.recv() => match key {
                    Some(key) => self.remove(&key),
                    None => break,
                },

                slot = self.output.reserve(), if offering => match slot {
                    Ok(slot) => {
                        if let Some(item) = self.staged.take() {
                            // The consumer may have stopped waiting; keep the item.
                            if let Err(item) = slot.send(item) {
                                self.staged = Some(item);
                            }
                        }
                    }
                    Err(_) => {
                        tracing::debug!("container output has no consumers left");
                        break;
                    }
                },
            }
        }

        let discarded = self.occupancy();
        self.approx_size.store(0, Ordering::Relaxed);
        tracing::debug!(discarded, "container control loop stopped");
        // Dropping `self.output` here closes the output port.
    }

    fn occupancy(&self) -> usize {
        self.items.len() + usize::from(self.staged.is_some())
    }

    fn is_live(&self, key: &T::Key) -> bool {
        self.items.contains_key(key) || self.staged.as_ref().is_some_and(|s| s.key() == key)
    }

    fn insert(&mut self, item: T) {
        let key = item.key().clone();
        if self.is_live(&key) {
            tracing::trace!(?key, "duplicate key ignored");
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push_back((seq, key.clone()));
        self.items.insert(key, Entry { seq, item });
    }

    fn remove(&mut self, key: &T::Key) {
        if self.staged.as_ref().is_some_and(|s| s.key() == key) {
            self.staged = None;
            tracing::trace!(?key, "deleted staged item");
            return;
        }

        if self.items.remove(key).is_some() {
            tracing::trace!(?key, "deleted queued item");
            self.compact();
        }
    }

    /// Take the oldest live item out of the queue.
    fn pop(&mut self) -> Option<T> {
        while let Some((seq, key)) = self.order.pop_front() {
            let current = self.items.get(&key).is_some_and(|entry| entry.seq == seq);
            if current {
                return self.items.remove(&key).map(|entry| entry.item);
            }
        }
        None
    }

    fn compact(&mut self) {
        if self.order.len() <= 2 * self.items.len() + COMPACT_SLACK {
            return;
        }
        let items = &self.items;
        self.order
            .retain(|(seq, key)| items.get(key).is_some_and(|entry| entry.seq == *seq));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyed::KeyedItem;
    use std::future::Future;
    use std::task::Poll;
    use std::time::Duration;

    type Item = KeyedItem<u64, &'static str>;

    fn item(key: u64, value: &'static str) -> Item {
        KeyedItem::new(key, value)
    }

    /// Let the control loop run a few cycles.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    async fn read_values(container: &OrderedKeyedContainer<Item>, n: usize) -> Vec<&'static str> {
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(*container.next().await.unwrap().value());
        }
        values
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let result = OrderedKeyedContainer::<Item>::new();
        assert!(matches!(result, Err(ContainerError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = ContainerConfig::default().with_add_capacity(usize::MAX);
        let result = OrderedKeyedContainer::<Item>::with_config(config);
        assert!(matches!(result, Err(ContainerError::Config(_))));
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let container = OrderedKeyedContainer::new().unwrap();
        container.add(item(1, "a")).await.unwrap();
        container.add(item(2, "b")).await.unwrap();
        container.add(item(3, "c")).await.unwrap();

        assert_eq!(read_values(&container, 3).await, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_key_dropped() {
        let container = OrderedKeyedContainer::new().unwrap();
        container.add(item(1, "a")).await.unwrap();
        settle().await;
        // "a" is staged by now; the duplicate must still be rejected
        container.add(item(1, "b")).await.unwrap();
        container.add(item(2, "c")).await.unwrap();

        assert_eq!(read_values(&container, 2).await, vec!["a", "c"]);
        settle().await;
        assert_eq!(container.approx_size(), 0);
    }

    #[tokio::test]
    async fn test_delete_mid_queue() {
        let container = OrderedKeyedContainer::new().unwrap();
        container.add(item(1, "a")).await.unwrap();
        container.add(item(2, "b")).await.unwrap();
        container.add(item(3, "c")).await.unwrap();
        container.delete(2).await.unwrap();

        assert_eq!(read_values(&container, 2).await, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_delete_first() {
        let container = OrderedKeyedContainer::new().unwrap();
        container.add(item(1, "a")).await.unwrap();
        container.add(item(2, "b")).await.unwrap();
        container.add(item(3, "c")).await.unwrap();
        container.delete(1).await.unwrap();

        assert_eq!(read_values(&container, 2).await, vec!["b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_staged_item() {
        let container = OrderedKeyedContainer::new().unwrap();
        container.add(item(1, "a")).await.unwrap();
        settle().await;
        assert_eq!(container.approx_size(), 1);

        container.delete(1).await.unwrap();
        container.add(item(2, "b")).await.unwrap();

        assert_eq!(read_values(&container, 1).await, vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_read_keeps_item() {
        let container = OrderedKeyedContainer::new().unwrap();
        container.add(item(1, "a")).await.unwrap();
        container.add(item(2, "b")).await.unwrap();

        // Poll a read once, let the loop hand "a" over, then give up on it
        let mut reading = Box::pin(container.next());
        let first = std::future::poll_fn(|cx| Poll::Ready(reading.as_mut().poll(cx))).await;
        assert!(first.is_pending());
        settle().await;
        drop(reading);
        assert_eq!(container.approx_size(), 1);

        assert_eq!(read_values(&container, 2).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_delete_absent_key_is_noop() {
        let container = OrderedKeyedContainer::new().unwrap();
        container.add(item(1, "a")).await.unwrap();
        container.add(item(2, "b")).await.unwrap();
        container.delete(99).await.unwrap();

        assert_eq!(read_values(&container, 2).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_readd_after_delete_goes_to_back() {
        let container = OrderedKeyedContainer::new().unwrap();
        container.add(item(1, "a")).await.unwrap();
        container.add(item(2, "b")).await.unwrap();
        container.add(item(3, "c")).await.unwrap();
        container.delete(2).await.unwrap();
        container.add(item(2, "b2")).await.unwrap();

        assert_eq!(read_values(&container, 3).await, vec!["a", "c", "b2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_approx_size_settles() {
        let container = OrderedKeyedContainer::new().unwrap();
        assert_eq!(container.approx_size(), 0);

        container.add(item(1, "a")).await.unwrap();
        settle().await;
        assert_eq!(container.approx_size(), 1);

        container.next().await.unwrap();
        settle().await;
        assert_eq!(container.approx_size(), 0);

        for key in 0..100 {
            container.add(item(key, "x")).await.unwrap();
        }
        settle().await;
        assert_eq!(container.approx_size(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_deletes_compact_order() {
        let container = OrderedKeyedContainer::new().unwrap();
        for key in 0..500 {
            container.add(item(key, "x")).await.unwrap();
        }
        for key in 0..499 {
            container.delete(key).await.unwrap();
        }
        settle().await;
        assert_eq!(container.approx_size(), 1);

        let last = container.next().await.unwrap();
        assert_eq!(last.key(), &499);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent() {
        let container = OrderedKeyedContainer::new().unwrap();
        container.add(item(1, "a")).await.unwrap();
        let output = container.output_port();

        container.close();
        container.close();

        assert!(container.is_closed());
        assert_eq!(container.next().await, Err(ContainerError::Closed));
        assert_eq!(container.add(item(2, "b")).await, Err(ContainerError::Closed));
        assert_eq!(container.delete(1).await, Err(ContainerError::Closed));

        settle().await;
        assert_eq!(output.recv().await, None);
        assert_eq!(container.approx_size(), 0);
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_reader() {
        let container = Arc::new(OrderedKeyedContainer::<Item>::new().unwrap());
        let reader = {
            let container = Arc::clone(&container);
            tokio::spawn(async move { container.next().await })
        };
        tokio::task::yield_now().await;

        container.close();

        assert_eq!(reader.await.unwrap(), Err(ContainerError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffered_output_releases_items_early() {
        let config = ContainerConfig::default().with_output_capacity(2);
        let container = OrderedKeyedContainer::with_config(config).unwrap();
        container.add(item(1, "a")).await.unwrap();
        container.add(item(2, "b")).await.unwrap();
        container.add(item(3, "c")).await.unwrap();
        settle().await;

        // "a" and "b" sit in the output buffer and can no longer be deleted
        container.delete(1).await.unwrap();
        container.delete(3).await.unwrap();

        assert_eq!(read_values(&container, 2).await, vec!["a", "b"]);
        settle().await;
        assert_eq!(container.approx_size(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers() {
        let container = Arc::new(OrderedKeyedContainer::<KeyedItem<u64, u64>>::new().unwrap());

        let mut producers = Vec::new();
        for producer in 0..4u64 {
            let container = Arc::clone(&container);
            producers.push(tokio::spawn(async move {
                for i in 0..25u64 {
                    let key = producer * 100 + i;
                    container.add(KeyedItem::new(key, i)).await.unwrap();
                }
            }));
        }

        let mut seen = std::collections::HashSet::new();
        let mut last_per_producer = HashMap::new();
        for _ in 0..100 {
            let item = container.next().await.unwrap();
            let producer = item.key() / 100;
            // Per-producer FIFO is preserved
            if let Some(prev) = last_per_producer.insert(producer, *item.value()) {
                assert!(*item.value() > prev);
            }
            assert!(seen.insert(*item.key()));
        }

        for producer in producers {
            producer.await.unwrap();
        }
        assert_eq!(seen.len(), 100);
    }
}
