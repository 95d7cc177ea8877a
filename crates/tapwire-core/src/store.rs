//! Bounded in-memory record stores.
//!
//! Records are kept in arrival order. When the store is full the oldest
//! record is evicted. Readers get shared `Arc`s so snapshots never block
//! writers for longer than a clone of the pointer list.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::models::{ExchangeRecord, LifecycleEvent};

/// Default number of records kept per store.
pub const DEFAULT_STORE_CAPACITY: usize = 1000;

/// Anything with a stable string identifier.
pub trait Identified {
    fn id(&self) -> &str;
}

impl Identified for ExchangeRecord {
    fn id(&self) -> &str {
        ExchangeRecord::id(self)
    }
}

impl Identified for LifecycleEvent {
    fn id(&self) -> &str {
        LifecycleEvent::id(self)
    }
}

/// A FIFO store that never holds more than `capacity` items.
#[derive(Debug)]
pub struct BoundedStore<T> {
    items: RwLock<VecDeque<Arc<T>>>,
    capacity: usize,
}

/// Store for captured API exchanges.
pub type ExchangeStore = BoundedStore<ExchangeRecord>;

/// Store for ingested lifecycle events.
pub type LifecycleStore = BoundedStore<LifecycleEvent>;

impl<T: Identified> BoundedStore<T> {
    /// Creates a store. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: RwLock::new(VecDeque::with_capacity(capacity.min(DEFAULT_STORE_CAPACITY))),
            capacity,
        }
    }

    /// Appends an item, evicting the oldest ones if the store is full.
    /// Returns the shared handle that was stored.
    pub fn append(&self, item: T) -> Arc<T> {
        let item = Arc::new(item);
        let mut items = self.items.write();
        while items.len() >= self.capacity {
            if let Some(evicted) = items.pop_front() {
                tracing::trace!(id = %evicted.id(), "evicted oldest record");
            }
        }
        items.push_back(Arc::clone(&item));
        item
    }

    /// Snapshot of all items, oldest first.
    pub fn get_all(&self) -> Vec<Arc<T>> {
        self.items.read().iter().cloned().collect()
    }

    /// Looks up an item by identifier.
    pub fn get_by_id(&self, id: &str) -> Option<Arc<T>> {
        self.items.read().iter().find(|item| item.id() == id).cloned()
    }

    /// Removes every item.
    pub fn clear(&self) {
        self.items.write().clear();
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Identified> Default for BoundedStore<T> {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Debug)]
    struct Item(String);

    impl Identified for Item {
        fn id(&self) -> &str {
            &self.0
        }
    }

    fn item(n: usize) -> Item {
        Item(format!("item-{}", n))
    }

    #[test]
    fn evicts_oldest_when_full() {
        let store = BoundedStore::new(3);
        for n in 0..4 {
            store.append(item(n));
        }

        let ids: Vec<_> = store.get_all().iter().map(|i| i.0.clone()).collect();
        assert_eq!(ids, vec!["item-1", "item-2", "item-3"]);
        assert!(store.get_by_id("item-0").is_none());
    }

    #[test]
    fn default_capacity_holds_exactly_the_newest() {
        let store: BoundedStore<Item> = BoundedStore::default();
        for n in 0..=DEFAULT_STORE_CAPACITY {
            store.append(item(n));
        }

        assert_eq!(store.len(), DEFAULT_STORE_CAPACITY);
        assert!(store.get_by_id("item-0").is_none());
        assert!(store.get_by_id(&format!("item-{}", DEFAULT_STORE_CAPACITY)).is_some());
        assert_eq!(store.get_all()[0].0, "item-1");
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let store = BoundedStore::new(0);
        store.append(item(1));
        store.append(item(2));
        assert_eq!(store.capacity(), 1);
        assert_eq!(store.get_all()[0].0, "item-2");
    }

    #[test]
    fn clear_empties_the_store() {
        let store = BoundedStore::new(10);
        store.append(item(1));
        store.append(item(2));
        store.clear();
        assert!(store.is_empty());
        assert!(store.get_all().is_empty());
        assert!(store.get_by_id("item-1").is_none());
    }

    #[test]
    fn lookup_by_id() {
        let store = BoundedStore::new(10);
        let stored = store.append(item(7));
        let found = store.get_by_id("item-7").unwrap();
        assert!(Arc::ptr_eq(&stored, &found));
        assert!(store.get_by_id("missing").is_none());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_writes() {
        let store = BoundedStore::new(10);
        store.append(item(1));
        let snapshot = store.get_all();
        store.append(item(2));
        store.clear();
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn concurrent_appends_respect_capacity() {
        let store = Arc::new(BoundedStore::new(50));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for n in 0..100 {
                        store.append(item(t * 1000 + n));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 50);
    }

    #[test]
    fn exchange_records_are_identified_by_their_id() {
        let store = ExchangeStore::new(2);
        let record = ExchangeRecord::new("POST", "/v1/messages");
        let id = record.id().to_string();
        store.append(record);
        assert_eq!(store.get_by_id(&id).unwrap().path, "/v1/messages");
    }
}
