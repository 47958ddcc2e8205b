//! Sorted, primary-key indexed collection.
//!
//! Items are looked up by primary key through a hash index and kept in
//! order by an ordered tree of slots. Each item carries an insertion
//! sequence number that breaks ties, so items comparing equal under the
//! sort policy keep their insertion order.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use serde::Serialize;

/// An entity with a stable primary key.
///
/// Types without a natural key can use a clone of themselves as the key,
/// which gives full-equality semantics.
pub trait Indexable: Clone + Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Ord + fmt::Debug + Serialize + Send + Sync + 'static;

    fn primary_key(&self) -> &Self::Key;
}

/// How a collection orders its items.
pub enum SortPolicy<T> {
    /// Ascending on a numeric field.
    Key(fn(&T) -> i64),
    /// Custom comparator.
    Comparator(fn(&T, &T) -> Ordering),
}

impl<T> SortPolicy<T> {
    pub fn compare(&self, a: &T, b: &T) -> Ordering {
        match self {
            SortPolicy::Key(key) => key(a).cmp(&key(b)),
            SortPolicy::Comparator(cmp) => cmp(a, b),
        }
    }

    /// The numeric sort key, if ordering is by key.
    pub fn sort_key(&self) -> Option<fn(&T) -> i64> {
        match self {
            SortPolicy::Key(key) => Some(*key),
            SortPolicy::Comparator(_) => None,
        }
    }
}

impl<T> Clone for SortPolicy<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SortPolicy<T> {}

impl<T> fmt::Debug for SortPolicy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortPolicy::Key(_) => f.write_str("SortPolicy::Key"),
            SortPolicy::Comparator(_) => f.write_str("SortPolicy::Comparator"),
        }
    }
}

/// One stored item with its tie-breaking sequence number.
///
/// Slots order themselves by the collection's policy, then by `seq`, so a
/// `BTreeSet` of slots is the collection's order. Items sit behind an `Arc`
/// so the index and the order share them and clones stay cheap.
struct Slot<T> {
    seq: u64,
    item: Arc<T>,
    policy: SortPolicy<T>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            seq: self.seq,
            item: Arc::clone(&self.item),
            policy: self.policy,
        }
    }
}

impl<T> Ord for Slot<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.policy
            .compare(self.item.as_ref(), other.item.as_ref())
            .then(self.seq.cmp(&other.seq))
    }
}

impl<T> PartialOrd for Slot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Slot<T> {}

/// Keyed lookups are O(1), insert and delete O(log n). Positional access
/// (`index_of`, `get_at`, `splice`) walks the order from the front.
pub struct SortedIndexedCollection<T: Indexable> {
    policy: SortPolicy<T>,
    entries: HashMap<T::Key, Slot<T>>,
    order: BTreeSet<Slot<T>>,
    next_seq: u64,
}

impl<T: Indexable> SortedIndexedCollection<T> {
    pub fn new(policy: SortPolicy<T>) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
            order: BTreeSet::new(),
            next_seq: 0,
        }
    }

    pub fn policy(&self) -> SortPolicy<T> {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an item, replacing any item with the same primary key.
    ///
    /// A replaced item keeps its original insertion sequence, so among
    /// equal-sorting items it does not jump behind later insertions.
    /// Returns the replaced item.
    pub fn add(&mut self, item: T) -> Option<T> {
        let key = item.primary_key().clone();
        let previous = self.take(&key);
        let seq = match &previous {
            Some(slot) => slot.seq,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                seq
            }
        };

        let slot = Slot {
            seq,
            item: Arc::new(item),
            policy: self.policy,
        };
        self.order.insert(slot.clone());
        self.entries.insert(key, slot);

        previous.map(into_item)
    }

    /// Position of the item with this primary key.
    pub fn index_of(&self, key: &T::Key) -> Option<usize> {
        let slot = self.entries.get(key)?;
        Some(self.order.range(..slot).count())
    }

    pub fn has(&self, key: &T::Key) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &T::Key) -> Option<&T> {
        self.entries.get(key).map(|slot| slot.item.as_ref())
    }

    pub fn get_at(&self, index: usize) -> Option<&T> {
        self.order.iter().nth(index).map(|slot| slot.item.as_ref())
    }

    fn take(&mut self, key: &T::Key) -> Option<Slot<T>> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot);
        Some(slot)
    }

    /// Remove by primary key. Returns the removed item.
    pub fn remove(&mut self, key: &T::Key) -> Option<T> {
        self.take(key).map(into_item)
    }

    /// Remove by primary key. Returns whether an item was removed.
    pub fn delete(&mut self, key: &T::Key) -> bool {
        self.take(key).is_some()
    }

    /// Remove `count` items starting at `start`, returned in order.
    pub fn splice(&mut self, start: usize, count: usize) -> Vec<T> {
        let keys: Vec<T::Key> = self
            .order
            .iter()
            .skip(start)
            .take(count)
            .map(|slot| slot.item.primary_key().clone())
            .collect();
        keys.iter().filter_map(|key| self.remove(key)).collect()
    }

    /// Remove every item matching `predicate`, returned in order.
    pub fn remove_where<F: Fn(&T) -> bool>(&mut self, predicate: F) -> Vec<T> {
        let keys: Vec<T::Key> = self
            .order
            .iter()
            .filter(|slot| predicate(slot.item.as_ref()))
            .map(|slot| slot.item.primary_key().clone())
            .collect();
        keys.iter().filter_map(|key| self.remove(key)).collect()
    }

    /// Index of the last item whose sort key is `<= value`.
    ///
    /// Only meaningful for key-ordered collections; comparator-ordered
    /// collections return `None`. Walks only the items at or below `value`.
    pub fn find_greatest_less_than_or_equal(&self, value: i64) -> Option<usize> {
        let key_of = self.policy.sort_key()?;
        let count = self
            .order
            .iter()
            .take_while(|slot| key_of(slot.item.as_ref()) <= value)
            .count();
        count.checked_sub(1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.order.iter().map(|slot| slot.item.as_ref())
    }

    /// Items in order.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    /// Primary keys in order.
    pub fn keys(&self) -> Vec<T::Key> {
        self.iter().map(|item| item.primary_key().clone()).collect()
    }
}

fn into_item<T: Clone>(slot: Slot<T>) -> T {
    Arc::try_unwrap(slot.item).unwrap_or_else(|shared| shared.as_ref().clone())
}

impl<T: Indexable> Clone for SortedIndexedCollection<T> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy,
            entries: self.entries.clone(),
            order: self.order.clone(),
            next_seq: self.next_seq,
        }
    }
}

impl<T: Indexable + fmt::Debug> fmt::Debug for SortedIndexedCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a, T: Indexable> IntoIterator for &'a SortedIndexedCollection<T> {
    type Item = &'a T;
    type IntoIter = Box<dyn Iterator<Item = &'a T> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
