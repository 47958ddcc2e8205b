//! Generic list manager.
//!
//! A list manager owns one [`SortedIndexedCollection`], routes every
//! mutation through `put`/`remove`/`purge`/`clear`, and emits exactly one
//! event per effective mutation after the collection has been updated.
//! Readers only ever receive clones.
//!
//! Handlers run after the write lock is released so they can call back
//! into any manager. Managers that react to each other must therefore be
//! driven from a single thread (a current-thread runtime).

mod factory;
mod kinds;

pub use factory::*;
pub use kinds::*;

use parking_lot::RwLock;

use crate::collection::{Indexable, SortPolicy, SortedIndexedCollection};
use crate::errors::{AppError, AppResult};
use crate::events::{Event, EventHub, SubscriptionId};

/// Static description of a list.
pub struct ListConfig<T: Indexable> {
    /// Logical name, used in logs
    pub name: &'static str,
    /// Ordering; a list without one is a configuration error
    pub sort: Option<SortPolicy<T>>,
    /// Field `purge` compares against; defaults to the numeric sort key
    pub age_key: Option<fn(&T) -> i64>,
    /// Durable storage key; lists with one are persisted automatically
    pub storage_key: Option<&'static str>,
    /// Trim the oldest entries when a durable write hits the storage quota
    pub quota_recovery: bool,
}

/// Kinds of list events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListEventKind {
    Created,
    Updated,
    Removed,
    RemovedMultiple,
    Cleared,
}

impl ListEventKind {
    pub const ALL: [ListEventKind; 5] = [
        ListEventKind::Created,
        ListEventKind::Updated,
        ListEventKind::Removed,
        ListEventKind::RemovedMultiple,
        ListEventKind::Cleared,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListEventKind::Created => "created",
            ListEventKind::Updated => "updated",
            ListEventKind::Removed => "removed",
            ListEventKind::RemovedMultiple => "removedMultiple",
            ListEventKind::Cleared => "cleared",
        }
    }
}

/// Event emitted after a list mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum ListEvent<T: Indexable> {
    Created(T),
    Updated {
        item: T,
        /// Field names the caller reported as changed
        changes: Vec<&'static str>,
    },
    Removed(T::Key),
    RemovedMultiple(Vec<T::Key>),
    Cleared,
}

impl<T: Indexable> Event for ListEvent<T> {
    type Kind = ListEventKind;

    fn kind(&self) -> ListEventKind {
        match self {
            ListEvent::Created(_) => ListEventKind::Created,
            ListEvent::Updated { .. } => ListEventKind::Updated,
            ListEvent::Removed(_) => ListEventKind::Removed,
            ListEvent::RemovedMultiple(_) => ListEventKind::RemovedMultiple,
            ListEvent::Cleared => ListEventKind::Cleared,
        }
    }
}

pub struct ListManager<T: Indexable> {
    name: &'static str,
    storage_key: Option<&'static str>,
    age_key: Option<fn(&T) -> i64>,
    quota_recovery: bool,
    items: RwLock<SortedIndexedCollection<T>>,
    events: EventHub<ListEvent<T>>,
}

impl<T: Indexable + std::fmt::Debug> ListManager<T> {
    pub fn new(config: ListConfig<T>) -> AppResult<Self> {
        let sort = config.sort.ok_or_else(|| {
            AppError::Configuration(format!(
                "List {} has neither a sort key nor a sort function",
                config.name
            ))
        })?;

        Ok(Self {
            name: config.name,
            storage_key: config.storage_key,
            age_key: config.age_key.or(sort.sort_key()),
            quota_recovery: config.quota_recovery,
            items: RwLock::new(SortedIndexedCollection::new(sort)),
            events: EventHub::new(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn storage_key(&self) -> Option<&'static str> {
        self.storage_key
    }

    pub fn quota_recovery(&self) -> bool {
        self.quota_recovery
    }

    /// Field used to decide what `purge` removes.
    pub fn age_key(&self) -> Option<fn(&T) -> i64> {
        self.age_key
    }

    /// Insert or replace an item by primary key.
    ///
    /// Callers pass the complete desired item; `changes` only annotates the
    /// `Updated` event.
    pub fn put(&self, item: T, changes: &[&'static str]) {
        tracing::debug!(list = self.name, key = ?item.primary_key(), ?changes, "Putting item");
        let replaced = self.items.write().add(item.clone()).is_some();

        let event = if replaced {
            tracing::debug!(list = self.name, "Item already exists, updated");
            ListEvent::Updated {
                item,
                changes: changes.to_vec(),
            }
        } else {
            tracing::debug!(list = self.name, "Item does not exist, created");
            ListEvent::Created(item)
        };
        self.events.emit(&event);
    }

    /// Snapshot of the whole collection. Never the live collection.
    pub fn all(&self) -> SortedIndexedCollection<T> {
        self.items.read().clone()
    }

    pub fn has(&self, key: &T::Key) -> bool {
        self.items.read().has(key)
    }

    pub fn one(&self, key: &T::Key) -> Option<T> {
        self.items.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Remove by primary key. Emits nothing if the key is absent.
    pub fn remove(&self, key: &T::Key) -> bool {
        let removed = self.items.write().delete(key);
        if removed {
            tracing::info!(list = self.name, ?key, "Item removed");
            self.events.emit(&ListEvent::Removed(key.clone()));
        } else {
            tracing::warn!(list = self.name, ?key, "Item not found");
        }
        removed
    }

    /// Remove every item whose age key is `<= threshold`.
    ///
    /// Key-ordered lists find the boundary by binary search; comparator
    /// ordered lists fall back to a scan over their age key. A list with no
    /// age key at all cannot be purged.
    pub fn purge(&self, threshold: i64) -> AppResult<usize> {
        tracing::info!(list = self.name, threshold, "Purging items older than");

        let removed: Vec<T> = {
            let mut items = self.items.write();
            if items.policy().sort_key().is_some() {
                match items.find_greatest_less_than_or_equal(threshold) {
                    Some(last) => items.splice(0, last + 1),
                    None => Vec::new(),
                }
            } else if let Some(age_of) = self.age_key {
                items.remove_where(|item| age_of(item) <= threshold)
            } else {
                return Err(AppError::Configuration(format!(
                    "List {} has no age key to purge by",
                    self.name
                )));
            }
        };

        if removed.is_empty() {
            return Ok(0);
        }

        tracing::info!(list = self.name, count = removed.len(), "Purged items");
        let keys: Vec<T::Key> = removed.iter().map(|i| i.primary_key().clone()).collect();
        let count = keys.len();
        self.events.emit(&ListEvent::RemovedMultiple(keys));
        Ok(count)
    }

    pub fn clear(&self) {
        tracing::info!(list = self.name, "Clearing all items");
        self.items.write().clear();
        self.events.emit(&ListEvent::Cleared);
    }

    pub fn subscribe<F>(&self, kind: ListEventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ListEvent<T>) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, handler)
    }

    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ListEvent<T>) + Send + Sync + 'static,
    {
        self.events.subscribe_all(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::models::{HiddenProduct, Product, ProductQueue};

    fn recorder<T: Indexable + std::fmt::Debug>(
        manager: &ListManager<T>,
    ) -> Arc<Mutex<Vec<ListEvent<T>>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.subscribe_all(move |event| sink.lock().push(event.clone()));
        seen
    }

    fn product(asin: &str, timestamp: i64, pinned: bool) -> Product {
        let mut p = Product::new(asin, ProductQueue::RFY, timestamp).with_title("Thing");
        p.pinned = pinned;
        p
    }

    #[test]
    fn test_missing_sort_policy_is_configuration_error() {
        let result = ListManager::<HiddenProduct>::new(ListConfig {
            name: "broken",
            sort: None,
            age_key: None,
            storage_key: None,
            quota_recovery: false,
        });
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_put_twice_updates_instead_of_creating() {
        let manager = ListManager::new(ProductList::config()).unwrap();
        let events = recorder(&manager);

        manager.put(product("B001", 100, false), &[]);
        manager.put(product("B001", 100, true), &["pinned"]);

        assert_eq!(manager.len(), 1);
        assert!(manager.one(&"B001".to_string()).unwrap().pinned);

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ListEvent::Created(_)));
        match &events[1] {
            ListEvent::Updated { item, changes } => {
                assert!(item.pinned);
                assert_eq!(changes, &vec!["pinned"]);
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_product_order_pinned_first_then_newest() {
        let manager = ListManager::new(ProductList::config()).unwrap();
        manager.put(product("old", 1, false), &[]);
        manager.put(product("new", 9, false), &[]);
        manager.put(product("pinned-old", 2, true), &[]);
        manager.put(product("mid", 5, false), &[]);

        let order: Vec<String> = manager.all().iter().map(|p| p.asin.clone()).collect();
        assert_eq!(order, vec!["pinned-old", "new", "mid", "old"]);

        // Unpinning moves it back into timestamp order.
        manager.put(product("pinned-old", 2, false), &["pinned"]);
        let order: Vec<String> = manager.all().iter().map(|p| p.asin.clone()).collect();
        assert_eq!(order, vec!["new", "mid", "pinned-old", "old"]);
    }

    #[test]
    fn test_all_returns_isolated_clone() {
        let manager = ListManager::new(HiddenProductList::config()).unwrap();
        manager.put(HiddenProduct::new("A", 1), &[]);

        let mut snapshot = manager.all();
        snapshot.delete(&"A".to_string());
        snapshot.add(HiddenProduct::new("Z", 2));

        assert!(manager.has(&"A".to_string()));
        assert!(!manager.has(&"Z".to_string()));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_absent_emits_nothing() {
        let manager = ListManager::new(HiddenProductList::config()).unwrap();
        let events = recorder(&manager);

        assert!(!manager.remove(&"nope".to_string()));
        manager.put(HiddenProduct::new("A", 1), &[]);
        assert!(manager.remove(&"A".to_string()));

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], ListEvent::Removed("A".to_string()));
    }

    #[test]
    fn test_purge_hidden_products() {
        let manager = ListManager::new(HiddenProductList::config()).unwrap();
        let events = recorder(&manager);
        for (asin, ts) in [("A", 1), ("B", 5), ("C", 10)] {
            manager.put(HiddenProduct::new(asin, ts), &[]);
        }

        assert_eq!(manager.purge(5).unwrap(), 2);
        assert!(!manager.has(&"A".to_string()));
        assert!(!manager.has(&"B".to_string()));
        assert!(manager.has(&"C".to_string()));

        let events = events.lock();
        assert_eq!(
            events.last(),
            Some(&ListEvent::RemovedMultiple(vec!["A".to_string(), "B".to_string()]))
        );
    }

    #[test]
    fn test_purge_nothing_old_enough() {
        let manager = ListManager::new(HiddenProductList::config()).unwrap();
        let events = recorder(&manager);
        manager.put(HiddenProduct::new("A", 10), &[]);

        assert_eq!(manager.purge(3).unwrap(), 0);
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn test_purge_comparator_list_by_age_key() {
        let manager = ListManager::new(ProductList::config()).unwrap();
        manager.put(product("a", 1, false), &[]);
        manager.put(product("b", 2, true), &[]);
        manager.put(product("c", 30, false), &[]);

        assert_eq!(manager.purge(2).unwrap(), 2);
        assert_eq!(manager.all().keys(), vec!["c".to_string()]);
    }

    #[test]
    fn test_purge_property_over_thresholds() {
        for threshold in [-1, 0, 3, 7, 19, 20, 100] {
            let manager = ListManager::new(NotificationList::config()).unwrap();
            let removed_keys = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&removed_keys);
            manager.subscribe(ListEventKind::RemovedMultiple, move |event| {
                if let ListEvent::RemovedMultiple(keys) = event {
                    sink.lock().extend(keys.iter().cloned());
                }
            });

            let stamps: Vec<i64> = (0..=20).step_by(2).collect();
            for ts in &stamps {
                manager.put(
                    crate::models::NotificationItem::new(format!("n{}", ts), "B001", *ts),
                    &[],
                );
            }

            let expected = stamps.iter().filter(|ts| **ts <= threshold).count();
            assert_eq!(manager.purge(threshold).unwrap(), expected);
            assert_eq!(removed_keys.lock().len(), expected);
            assert!(manager.all().iter().all(|n| n.timestamp > threshold));
            assert_eq!(manager.len(), stamps.len() - expected);
        }
    }

    #[test]
    fn test_clear_emits_cleared() {
        let manager = ListManager::new(NotificationList::config()).unwrap();
        let events = recorder(&manager);
        manager.put(crate::models::NotificationItem::new("n1", "B001", 1), &[]);
        manager.clear();
        assert!(manager.is_empty());
        assert_eq!(events.lock().last(), Some(&ListEvent::Cleared));
    }

    #[test]
    fn test_event_observes_post_state() {
        let manager = Arc::new(ListManager::new(HiddenProductList::config()).unwrap());
        let observed = Arc::new(Mutex::new(None));
        let weak = Arc::downgrade(&manager);
        let sink = Arc::clone(&observed);
        manager.subscribe(ListEventKind::Created, move |_| {
            if let Some(m) = weak.upgrade() {
                *sink.lock() = Some(m.len());
            }
        });

        manager.put(HiddenProduct::new("A", 1), &[]);
        assert_eq!(*observed.lock(), Some(1));
    }
}
