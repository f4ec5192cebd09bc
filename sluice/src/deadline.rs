//! Per-item deadlines.
//!
//! A [`Deadline`] is a point in time plus a cancellation signal. It is *done*
//! exactly once: when the instant passes or when it is canceled, whichever
//! comes first. Deadlines use tokio's clock, so tests can drive them with a
//! paused runtime.
//!
//! A [`DeadlineItem`] bundles a keyed payload with a deadline of its own.
//! Every constructor creates a fresh deadline; two items never share one.
//! Dropping the item fires the item's signal. Handles taken with
//! [`Deadline::share`] follow the deadline itself and only fire when it
//! elapses or is canceled.

use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::keyed::{Keyed, KeyedItem};

/// Where a deadline stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineState {
    /// Neither elapsed nor canceled.
    Pending,
    /// The instant has passed.
    Elapsed,
    /// Canceled before the instant passed.
    Canceled,
}

/// A cancelable point in time.
pub struct Deadline {
    at: Instant,
    /// What this handle waits on.
    signal: CancellationToken,
    /// Canceled by [`cancel`](Self::cancel); reaches every handle.
    root: CancellationToken,
}

impl Deadline {
    /// Start a deadline that elapses `duration` from now.
    pub fn after(duration: Duration) -> Self {
        let root = CancellationToken::new();
        Self {
            at: Instant::now() + duration,
            signal: root.clone(),
            root,
        }
    }

    /// Another handle to this same deadline.
    ///
    /// Used by the tracker so its pending record expires together with the
    /// forwarded item.
    pub(crate) fn share(&self) -> Self {
        Self {
            at: self.at,
            signal: self.root.clone(),
            root: self.root.clone(),
        }
    }

    /// A handle whose signal can also be fired on its own, without touching
    /// the other handles.
    fn scoped(&self) -> Self {
        Self {
            at: self.at,
            signal: self.root.child_token(),
            root: self.root.clone(),
        }
    }

    /// The instant at which the deadline elapses.
    pub fn at(&self) -> Instant {
        self.at
    }

    /// Time left until the deadline elapses, zero if it already has.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Whether the instant has passed.
    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Whether [`cancel`](Self::cancel) was called, or the item owning this
    /// handle was dropped.
    pub fn is_canceled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Whether the deadline has fired, by elapsing or by cancellation.
    pub fn is_done(&self) -> bool {
        self.is_canceled() || self.is_elapsed()
    }

    /// Current state. Cancellation wins if both apply.
    pub fn state(&self) -> DeadlineState {
        if self.is_canceled() {
            DeadlineState::Canceled
        } else if self.is_elapsed() {
            DeadlineState::Elapsed
        } else {
            DeadlineState::Pending
        }
    }

    /// Cancel the deadline for every handle. Idempotent.
    pub fn cancel(&self) {
        self.root.cancel();
    }

    /// Wait until the deadline is done.
    ///
    /// Resolves immediately if it already is. Cancel safe.
    pub async fn done(&self) {
        tokio::select! {
            _ = tokio::time::sleep_until(self.at) => {}
            _ = self.signal.cancelled() => {}
        }
    }
}

impl fmt::Debug for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deadline")
            .field("remaining", &self.remaining())
            .field("state", &self.state())
            .finish()
    }
}

/// A keyed payload with its own deadline.
///
/// Dropping the item, or taking it apart with [`into_item`](Self::into_item)
/// or [`into_parts`](Self::into_parts), fires the signal seen through
/// [`deadline`](Self::deadline) and [`watch`](Self::watch). A record the
/// tracker keeps for the item is not affected; it only expires when the
/// deadline elapses or is canceled.
pub struct DeadlineItem<K, V> {
    item: KeyedItem<K, V>,
    deadline: Deadline,
    _release: DropGuard,
}

impl<K, V> DeadlineItem<K, V> {
    /// Create an item whose deadline elapses `ttl` from now.
    pub fn new(key: K, value: V, ttl: Duration) -> Self {
        Self::from_item(KeyedItem::new(key, value), ttl)
    }

    /// Attach a fresh deadline to an existing keyed item.
    pub fn from_item(item: KeyedItem<K, V>, ttl: Duration) -> Self {
        let deadline = Deadline::after(ttl).scoped();
        let release = deadline.signal.clone().drop_guard();
        Self {
            item,
            deadline,
            _release: release,
        }
    }

    /// The payload.
    pub fn value(&self) -> &V {
        self.item.value()
    }

    /// Mutable access to the payload.
    pub fn value_mut(&mut self) -> &mut V {
        self.item.value_mut()
    }

    /// The item's deadline.
    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    /// A handle on this item's deadline that outlives the item.
    ///
    /// Fires when the deadline elapses, is canceled, or the item is dropped.
    pub fn watch(&self) -> Deadline {
        Deadline {
            at: self.deadline.at,
            signal: self.deadline.signal.clone(),
            root: self.deadline.root.clone(),
        }
    }

    /// Whether the deadline has elapsed or been canceled.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_done()
    }

    /// Cancel the deadline.
    pub fn cancel(&self) {
        self.deadline.cancel();
    }

    /// Drop the deadline and return the keyed item.
    pub fn into_item(self) -> KeyedItem<K, V> {
        self.item
    }

    /// Split into key and payload, dropping the deadline.
    pub fn into_parts(self) -> (K, V) {
        self.item.into_parts()
    }
}

impl<K, V> Keyed for DeadlineItem<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    type Key = K;

    fn key(&self) -> &K {
        self.item.key()
    }
}

impl<K, V> fmt::Debug for DeadlineItem<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlineItem")
            .field("key", self.key())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let deadline = Deadline::after(Duration::from_millis(100));
        assert_eq!(deadline.state(), DeadlineState::Pending);
        assert!(!deadline.is_done());

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(deadline.is_elapsed());
        assert!(deadline.is_done());
        assert_eq!(deadline.state(), DeadlineState::Elapsed);
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_resolves_at_deadline() {
        let start = Instant::now();
        let deadline = Deadline::after(Duration::from_secs(5));

        deadline.done().await;

        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent_and_wakes_waiters() {
        let deadline = Deadline::after(Duration::from_secs(3600));
        let shared = deadline.share();

        let waiter = tokio::spawn(async move { shared.done().await });
        deadline.cancel();
        deadline.cancel();

        waiter.await.unwrap();
        assert!(deadline.is_canceled());
        assert!(!deadline.is_elapsed());
        assert_eq!(deadline.state(), DeadlineState::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_own_independent_deadlines() {
        let first = DeadlineItem::new(1u64, "a", Duration::from_secs(10));
        let second = DeadlineItem::new(2u64, "b", Duration::from_secs(10));

        first.cancel();

        assert!(first.is_expired());
        assert!(!second.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_item_fires_its_signal_only() {
        let item = DeadlineItem::new(1u64, "a", Duration::from_secs(3600));
        let watcher = item.watch();
        let shared = item.deadline().share();

        let waiter = tokio::spawn(async move { watcher.done().await });
        drop(item);
        waiter.await.unwrap();

        assert!(!shared.is_done());
        assert_eq!(shared.state(), DeadlineState::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_cancel_reaches_shared_handles() {
        let item = DeadlineItem::new(1u64, "a", Duration::from_secs(3600));
        let shared = item.deadline().share();

        item.cancel();

        assert!(shared.is_canceled());
        assert!(item.watch().is_canceled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_item_accessors() {
        let mut item = DeadlineItem::new(3u64, vec![1u8, 2], Duration::from_millis(100));
        assert_eq!(item.key(), &3);
        assert_eq!(item.value(), &vec![1, 2]);

        item.value_mut().push(3);
        assert!(!item.is_expired());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(item.is_expired());

        let (key, value) = item.into_parts();
        assert_eq!(key, 3);
        assert_eq!(value, vec![1, 2, 3]);
    }
}
