//! Delivery tracker: forward each item once, then keep a pending
//! acknowledgment for it until the consumer acks or the deadline passes.
//!
//! ```text
//!  producer ──▶ ObjIn ──▶ ┌───────────────┐ ──▶ ObjOut ──▶ consumer
//!                         │ ControlLoop   │                  │
//!                         │   in_flight   │ ◀── AckIn ◀──────┘
//!                         │   head        │
//!                         └──────┬────────┘
//!                          add   │  ▲ output (head record)
//!                         delete ▼  │
//!                    OrderedKeyedContainer<PendingAck>
//! ```
//!
//! For every item the loop walks a small state machine:
//!
//! 1. On arrival, an item whose deadline is already done is dropped.
//! 2. Otherwise it is offered on `ObjOut`. The offer races the item's own
//!    deadline and shutdown; losing either race drops the item.
//! 3. Once forwarded, a [`PendingAck`] record sharing the item's deadline is
//!    staged into the internal container, racing the same two signals.
//! 4. An ack on `AckIn` retires the record, wherever it is.
//! 5. Each staged record has a watcher task on its deadline. When it fires
//!    before an ack, the record is deleted from the container and discarded;
//!    it is never resent.
//!
//! The loop also pulls the oldest record out of the container and holds it
//! until it is retired. A record that comes out after it was already retired
//! is dropped on the spot.
//!
//! None of the drops are reported as errors. They are visible through
//! [`DeliveryTracker::stats`] and `tracing` events only.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::TrackerConfig;
use crate::container::OrderedKeyedContainer;
use crate::deadline::{Deadline, DeadlineItem};
use crate::error::TrackerError;
use crate::keyed::Keyed;
use crate::port::{self, InboundRx, InboundTx, OutboundRx, OutboundTx, Request};

/// Record of an item that was forwarded and not yet acknowledged.
///
/// Shares its deadline with the forwarded item, so canceling the item's
/// deadline on the consumer side also expires the record.
pub struct PendingAck<K> {
    key: K,
    deadline: Deadline,
}

impl<K> PendingAck<K> {
    /// The deadline shared with the forwarded item.
    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }
}

impl<K> Keyed for PendingAck<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    type Key = K;

    fn key(&self) -> &K {
        &self.key
    }
}

impl<K: fmt::Debug> fmt::Debug for PendingAck<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAck")
            .field("key", &self.key)
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    expired_on_arrival: AtomicU64,
    expired_before_forward: AtomicU64,
    forwarded: AtomicU64,
    expired_before_stage: AtomicU64,
    staged: AtomicU64,
    acks_received: AtomicU64,
    expired: AtomicU64,
    pending: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TrackerStats {
        TrackerStats {
            received: self.received.load(Ordering::Relaxed),
            expired_on_arrival: self.expired_on_arrival.load(Ordering::Relaxed),
            expired_before_forward: self.expired_before_forward.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            expired_before_stage: self.expired_before_stage.load(Ordering::Relaxed),
            staged: self.staged.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of what a tracker did with its items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    /// Items taken from `ObjIn`.
    pub received: u64,
    /// Items whose deadline was already done when they arrived.
    pub expired_on_arrival: u64,
    /// Items whose deadline fired while waiting for a consumer.
    pub expired_before_forward: u64,
    /// Items handed to a consumer.
    pub forwarded: u64,
    /// Forwarded items for which no record was staged because the deadline
    /// fired first.
    pub expired_before_stage: u64,
    /// Records staged for acknowledgment.
    pub staged: u64,
    /// Keys received on `AckIn`, including keys with no record.
    pub acks_received: u64,
    /// Records discarded because their deadline fired before an ack.
    pub expired: u64,
    /// Records currently waiting for an ack or their deadline.
    pub pending: u64,
}

/// Forwards items exactly once and tracks their acknowledgment.
///
/// Dropping the handle shuts the tracker down.
pub struct DeliveryTracker<K, V> {
    obj_in: InboundTx<DeadlineItem<K, V>>,
    obj_out: OutboundRx<DeadlineItem<K, V>>,
    ack_in: InboundTx<K>,
    default_deadline: Duration,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl<K, V> DeliveryTracker<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    /// Create a tracker with rendezvous ports and a 30 second default deadline.
    pub fn new() -> Result<Self, TrackerError> {
        Self::with_config(TrackerConfig::default())
    }

    /// Create a tracker from `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_config(config: TrackerConfig) -> Result<Self, TrackerError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| TrackerError::NoRuntime)?;

        let pending = OrderedKeyedContainer::new()?;
        let records = pending.output_port();
        let (obj_in_tx, obj_in_rx) = port::inbound(config.obj_in_capacity);
        let (obj_out_tx, obj_out_rx) = port::outbound(config.obj_out_capacity);
        let (ack_in_tx, ack_in_rx) = port::inbound(config.ack_in_capacity);
        let counters = Arc::new(Counters::default());
        let shutdown = CancellationToken::new();

        let control = ControlLoop {
            obj_in: obj_in_rx,
            obj_out: obj_out_tx,
            ack_in: ack_in_rx,
            pending,
            records,
            watchers: HashMap::new(),
            expiries: JoinSet::new(),
            counters: Arc::clone(&counters),
            shutdown: shutdown.clone(),
        };
        runtime.spawn(control.run());

        tracing::debug!(
            obj_in_capacity = config.obj_in_capacity,
            obj_out_capacity = config.obj_out_capacity,
            ack_in_capacity = config.ack_in_capacity,
            default_deadline = ?config.default_deadline,
            "tracker started"
        );

        Ok(Self {
            obj_in: obj_in_tx,
            obj_out: obj_out_rx,
            ack_in: ack_in_tx,
            default_deadline: config.default_deadline,
            counters,
            shutdown,
            closed: AtomicBool::new(false),
        })
    }

    /// Hand an item to the tracker through `ObjIn`.
    pub async fn send(&self, item: DeadlineItem<K, V>) -> Result<(), TrackerError> {
        if self.is_closed() {
            return Err(TrackerError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(TrackerError::Closed),
            result = self.obj_in.send(item) => result.map_err(TrackerError::from),
        }
    }

    /// Send `value` under `key` with the configured default deadline.
    pub async fn track(&self, key: K, value: V) -> Result<(), TrackerError> {
        self.send(DeadlineItem::new(key, value, self.default_deadline))
            .await
    }

    /// Wait for the next forwarded item.
    ///
    /// Returns [`TrackerError::Closed`] once the tracker is shut down.
    pub async fn next(&self) -> Result<DeadlineItem<K, V>, TrackerError> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(TrackerError::Closed),
            item = self.obj_out.recv() => item.ok_or(TrackerError::Closed),
        }
    }

    /// Acknowledge the item with `key`.
    ///
    /// Acknowledging a key with no pending record is a no-op.
    pub async fn ack(&self, key: K) -> Result<(), TrackerError> {
        if self.is_closed() {
            return Err(TrackerError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(TrackerError::Closed),
            result = self.ack_in.send(key) => result.map_err(TrackerError::from),
        }
    }

    /// A producer handle for `ObjIn`.
    pub fn obj_in(&self) -> InboundTx<DeadlineItem<K, V>> {
        self.obj_in.clone()
    }

    /// A consumer handle for `ObjOut`.
    pub fn obj_out(&self) -> OutboundRx<DeadlineItem<K, V>> {
        self.obj_out.clone()
    }

    /// A producer handle for `AckIn`.
    pub fn ack_in(&self) -> InboundTx<K> {
        self.ack_in.clone()
    }
}

impl<K, V> DeliveryTracker<K, V> {
    /// Counters for every way an item can leave the tracker.
    pub fn stats(&self) -> TrackerStats {
        self.counters.snapshot()
    }

    /// Shut the tracker down. Idempotent.
    ///
    /// `ObjOut` closes once the control loop has stopped; records still
    /// pending are discarded.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        tracing::debug!("tracker closed");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<K, V> Drop for DeliveryTracker<K, V> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Resolves when `deadline` is done; never resolves for `None`.
async fn deadline_done(deadline: Option<&Deadline>) {
    match deadline {
        Some(deadline) => deadline.done().await,
        None => std::future::pending().await,
    }
}

/// Resolves with the next record; never resolves for `None`.
async fn next_record<T>(request: Option<&mut Request<T>>) -> Option<T> {
    match request {
        Some(request) => request.await,
        None => std::future::pending().await,
    }
}

/// Resolves with the next finished watcher; never resolves when there is none.
async fn next_expiry<K: Send + 'static>(expiries: &mut JoinSet<Option<K>>) -> Option<K> {
    match expiries.join_next().await {
        Some(Ok(key)) => key,
        // Watchers never panic and are only aborted on drop.
        Some(Err(_)) => None,
        None => std::future::pending().await,
    }
}

/// Wait for `deadline`, unless the record is retired first.
async fn watch_deadline<K>(key: K, deadline: Deadline, retired: CancellationToken) -> Option<K> {
    tokio::select! {
        _ = retired.cancelled() => None,
        _ = deadline.done() => Some(key),
    }
}

struct ControlLoop<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    obj_in: InboundRx<DeadlineItem<K, V>>,
    obj_out: OutboundTx<DeadlineItem<K, V>>,
    ack_in: InboundRx<K>,
    pending: OrderedKeyedContainer<PendingAck<K>>,
    records: OutboundRx<PendingAck<K>>,
    /// One entry per live record; canceling it stops the record's watcher.
    watchers: HashMap<K, CancellationToken>,
    expiries: JoinSet<Option<K>>,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
}

impl<K, V> ControlLoop<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    async fn run(mut self) {
        // Item waiting for a consumer.
        let mut in_flight: Option<DeadlineItem<K, V>> = None;
        // Oldest record, already out of the container.
        let mut head: Option<PendingAck<K>> = None;
        // Outstanding pull for the next head; only while `head` is empty.
        let mut request: Option<Request<PendingAck<K>>> = None;

        loop {
            if head.is_none() && request.is_none() {
                request = Some(self.records.request());
            }

            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                key = self.ack_in.recv() => match key {
                    Some(key) => self.acknowledge(key, &mut head).await,
                    None => {
                        tracing::debug!("tracker ack input closed");
                        break;
                    }
                },

                Some(key) = next_expiry(&mut self.expiries) => self.expire(key, &mut head).await,

                record = next_record(request.as_mut()), if head.is_none() => {
                    request = None;
                    match record {
                        Some(record) if self.watchers.contains_key(&record.key) => head = Some(record),
                        Some(record) => {
                            tracing::trace!(key = ?record.key, "retired record left the container, dropped");
                        }
                        None => break,
                    }
                }

                _ = deadline_done(in_flight.as_ref().map(DeadlineItem::deadline)) => {
                    if let Some(item) = in_flight.take() {
                        Counters::bump(&self.counters.expired_before_forward);
                        tracing::debug!(key = ?item.key(), "deadline fired before forward, item dropped");
                    }
                }

                slot = self.obj_out.reserve(), if in_flight.is_some() => match slot {
                    Ok(slot) => {
                        if let Some(item) = in_flight.take() {
                            in_flight = self.forward(slot, item).await;
                        }
                    }
                    Err(_) => {
                        tracing::debug!("tracker output has no consumers left");
                        break;
                    }
                },

                item = self.obj_in.recv(), if in_flight.is_none() => match item {
                    Some(item) => in_flight = self.accept(item),
                    None => {
                        tracing::debug!("tracker input closed");
                        break;
                    }
                },
            }
        }

        let discarded = self.watchers.len();
        self.watchers.clear();
        self.sync_pending();
        self.pending.close();
        tracing::debug!(discarded, "tracker control loop stopped");
        // Dropping `self.expiries` aborts the watchers and dropping
        // `self.obj_out` closes ObjOut.
    }

    fn accept(&self, item: DeadlineItem<K, V>) -> Option<DeadlineItem<K, V>> {
        Counters::bump(&self.counters.received);
        if item.is_expired() {
            Counters::bump(&self.counters.expired_on_arrival);
            tracing::debug!(key = ?item.key(), "item expired on arrival, dropped");
            return None;
        }
        Some(item)
    }

    /// Hand `item` to the consumer behind `slot` and stage its record.
    ///
    /// Returns the item if the consumer went away, so it can be offered again.
    async fn forward(
        &mut self,
        slot: port::Slot<DeadlineItem<K, V>>,
        item: DeadlineItem<K, V>,
    ) -> Option<DeadlineItem<K, V>> {
        if item.is_expired() {
            Counters::bump(&self.counters.expired_before_forward);
            tracing::debug!(key = ?item.key(), "deadline fired before forward, item dropped");
            return None;
        }

        let record = PendingAck {
            key: item.key().clone(),
            deadline: item.deadline().share(),
        };
        if let Err(item) = slot.send(item) {
            return Some(item);
        }
        Counters::bump(&self.counters.forwarded);

        let key = record.key.clone();
        let deadline = record.deadline.share();
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {}
            _ = deadline.done() => {
                // The container may still have taken the record; without a
                // watcher it is dropped once it reaches the head.
                Counters::bump(&self.counters.expired_before_stage);
                tracing::debug!(?key, "deadline fired before staging, no record kept");
            }
            result = self.pending.add(record) => {
                if result.is_ok() {
                    Counters::bump(&self.counters.staged);
                    tracing::trace!(?key, "record staged");
                    self.watch(key, deadline);
                }
            }
        }
        None
    }

    /// Start the watcher that expires the record under `key`.
    fn watch(&mut self, key: K, deadline: Deadline) {
        // A live record under the same key keeps its watcher, which then
        // covers this one too.
        if self.watchers.contains_key(&key) {
            return;
        }
        let retired = CancellationToken::new();
        self.watchers.insert(key.clone(), retired.clone());
        self.expiries.spawn(watch_deadline(key, deadline, retired));
        self.sync_pending();
    }

    fn sync_pending(&self) {
        self.counters
            .pending
            .store(self.watchers.len() as u64, Ordering::Relaxed);
    }

    async fn acknowledge(&mut self, key: K, head: &mut Option<PendingAck<K>>) {
        Counters::bump(&self.counters.acks_received);
        if let Some(retired) = self.watchers.remove(&key) {
            retired.cancel();
            self.sync_pending();
            tracing::trace!(?key, "record acknowledged");
        }
        self.retire(key, head).await;
    }

    async fn expire(&mut self, key: K, head: &mut Option<PendingAck<K>>) {
        // Acked after the watcher had already finished.
        if self.watchers.remove(&key).is_none() {
            return;
        }
        self.sync_pending();
        Counters::bump(&self.counters.expired);
        tracing::debug!(?key, "no ack before deadline, record discarded");
        self.retire(key, head).await;
    }

    /// Remove the record under `key` from wherever it is.
    ///
    /// A record already on its way out of the container is dropped when it
    /// arrives, as it no longer has a watcher.
    async fn retire(&mut self, key: K, head: &mut Option<PendingAck<K>>) {
        if head.as_ref().is_some_and(|record| record.key == key) {
            *head = None;
            return;
        }
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = self.pending.delete(key) => {}
        }
    }
}
