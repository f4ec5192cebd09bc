//! Keyed items: the capability every container element must provide.
//!
//! A container only needs to know how to read a key off an element. The key
//! is used for duplicate detection, deletion and acknowledgment.
//!
//! # Handoff modes
//!
//! Values cross ports in one of two explicit modes:
//!
//! - **By value**: the item is moved into the port. A producer that wants to
//!   keep its own copy must `clone()` it before sending; later changes on the
//!   producer side are never observed by the consumer.
//! - **By shared handle**: the producer converts the item with
//!   [`KeyedItem::into_shared`] (or wraps any `Keyed` value in an `Arc`). Both
//!   sides then observe the same allocation, and any mutation has to go through
//!   interior mutability inside the payload.
//!
//! ```rust,ignore
//! // By value
//! container.add(KeyedItem::new(1, "a")).await?;
//!
//! // By shared handle
//! let shared = KeyedItem::new(2, Mutex::new(vec![])).into_shared();
//! container.add(Arc::clone(&shared)).await?;
//! ```

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// A value that exposes a key used for lookup, ordering and deletion.
///
/// `key()` must be pure: it must return the same key for the whole time the
/// value lives inside a container.
pub trait Keyed {
    /// The key type.
    type Key: Eq + Hash + Clone + Debug + Send + Sync + 'static;

    /// Returns the key identifying this value.
    fn key(&self) -> &Self::Key;
}

impl<T: Keyed + ?Sized> Keyed for Arc<T> {
    type Key = T::Key;

    fn key(&self) -> &Self::Key {
        (**self).key()
    }
}

impl<T: Keyed + ?Sized> Keyed for Box<T> {
    type Key = T::Key;

    fn key(&self) -> &Self::Key {
        (**self).key()
    }
}

/// A key paired with an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedItem<K, V> {
    key: K,
    value: V,
}

impl<K, V> KeyedItem<K, V> {
    /// Create a new keyed item.
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    /// The payload.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Mutable access to the payload.
    ///
    /// The key cannot be changed once the item exists.
    pub fn value_mut(&mut self) -> &mut V {
        &mut self.value
    }

    /// Split the item into its key and payload.
    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }

    /// Convert into a shared handle.
    ///
    /// Every clone of the returned `Arc` refers to the same item, so a
    /// consumer reading it from a port sees the producer's allocation rather
    /// than a copy.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl<K, V> Keyed for KeyedItem<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    type Key = K;

    fn key(&self) -> &K {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_keyed_item_accessors() {
        let mut item = KeyedItem::new(7u64, "payload".to_string());
        assert_eq!(item.key(), &7);
        assert_eq!(item.value(), "payload");

        item.value_mut().push_str("-changed");
        let (key, value) = item.into_parts();
        assert_eq!(key, 7);
        assert_eq!(value, "payload-changed");
    }

    #[test]
    fn test_by_value_copy_is_isolated() {
        let mut original = KeyedItem::new(1u32, 10u32);
        let sent = original.clone();

        *original.value_mut() = 20;

        assert_eq!(*sent.value(), 10);
    }

    #[test]
    fn test_shared_handle_observes_mutation() {
        let shared = KeyedItem::new("k".to_string(), Mutex::new(1)).into_shared();
        let consumer_view = Arc::clone(&shared);

        *shared.value().lock().unwrap() = 2;

        assert_eq!(*consumer_view.value().lock().unwrap(), 2);
        assert_eq!(consumer_view.key(), "k");
        assert!(Arc::ptr_eq(&shared, &consumer_view));
    }
}
