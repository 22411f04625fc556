//! Ordered-Key Map
//!
//! A sorted vector with binary search, used for the small, mutation-rare
//! collections of the fabric: node manager buckets, header items, request
//! session values, route tables and reassembly buffers.
//!
//! [`SortedItems`] is the unsynchronized core; [`Bucket`] wraps it in a
//! single reader/writer lock. Every item exposes its key through a key
//! function, and keys are ordered by a comparator fixed at construction.

use std::cmp::Ordering;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Errors returned by ordered-map mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BucketError {
    #[error("item already exists at index {0}")]
    Duplicate(usize),
}

/// Extracts the ordering key of an item.
pub type KeyFn<T, K> = fn(&T) -> &K;

/// Compares two keys.
pub type CompareFn<K> = fn(&K, &K) -> Ordering;

/// Sorted vector of items ordered by key.
pub struct SortedItems<T, K: ?Sized> {
    items: Vec<T>,
    key: KeyFn<T, K>,
    cmp: CompareFn<K>,
}

impl<T, K: ?Sized + Ord> SortedItems<T, K> {
    /// Create an empty collection ordered by the natural key order.
    pub fn new(key: KeyFn<T, K>) -> Self {
        Self::with_compare(key, K::cmp)
    }
}

impl<T, K: ?Sized> SortedItems<T, K> {
    /// Create an empty collection with an explicit key comparator.
    pub fn with_compare(key: KeyFn<T, K>, cmp: CompareFn<K>) -> Self {
        Self {
            items: Vec::new(),
            key,
            cmp,
        }
    }

    /// Binary search for `key`.
    ///
    /// Returns `Ok(index)` when found, `Err(insertion_index)` otherwise.
    pub fn search(&self, key: &K) -> Result<usize, usize> {
        let (key_of, cmp) = (self.key, self.cmp);
        self.items.binary_search_by(|item| cmp(key_of(item), key))
    }

    /// Get the item stored under `key`.
    pub fn get(&self, key: &K) -> Option<&T> {
        self.search(key).ok().map(|idx| &self.items[idx])
    }

    /// Get a mutable reference to the item stored under `key`.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut T> {
        match self.search(key) {
            Ok(idx) => Some(&mut self.items[idx]),
            Err(_) => None,
        }
    }

    /// Check whether an item with `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        self.search(key).is_ok()
    }

    /// Insert an item, failing if its key is already present.
    pub fn store(&mut self, item: T) -> Result<usize, BucketError> {
        match self.search((self.key)(&item)) {
            Ok(idx) => Err(BucketError::Duplicate(idx)),
            Err(idx) => {
                self.items.insert(idx, item);
                Ok(idx)
            }
        }
    }

    /// Insert an item unless its key is present.
    ///
    /// Returns the index of the stored item and whether it already existed.
    /// When it existed, `item` is dropped and the stored one is kept.
    pub fn search_or_store(&mut self, item: T) -> (usize, bool) {
        match self.search((self.key)(&item)) {
            Ok(idx) => (idx, true),
            Err(idx) => {
                self.items.insert(idx, item);
                (idx, false)
            }
        }
    }

    /// Insert or replace an item, returning the previous one if any.
    pub fn swap(&mut self, item: T) -> Option<T> {
        match self.search((self.key)(&item)) {
            Ok(idx) => Some(std::mem::replace(&mut self.items[idx], item)),
            Err(idx) => {
                self.items.insert(idx, item);
                None
            }
        }
    }

    /// Remove the item stored under `key`.
    pub fn delete(&mut self, key: &K) -> Option<T> {
        match self.search(key) {
            Ok(idx) => Some(self.items.remove(idx)),
            Err(_) => None,
        }
    }

    /// Remove the item at `index`.
    pub fn remove_at(&mut self, index: usize) -> Option<T> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }

    /// Item at `index`; negative indices count from the end.
    pub fn at(&self, index: isize) -> Option<&T> {
        let len = self.items.len() as isize;
        let idx = if index < 0 { len + index } else { index };
        if idx < 0 || idx >= len {
            return None;
        }
        self.items.get(idx as usize)
    }

    /// All items in key order.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Iterate items in key order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove all items.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Consume the collection, yielding items in key order.
    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

impl<T: Clone, K: ?Sized> Clone for SortedItems<T, K> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            key: self.key,
            cmp: self.cmp,
        }
    }
}

impl<T: fmt::Debug, K: ?Sized> fmt::Debug for SortedItems<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

/// Ordered-key map guarded by a single reader/writer lock.
///
/// Mutations take the writer lock, lookups the shared lock. Lookups return
/// clones so no lock outlives a call; use [`Bucket::read`] and
/// [`Bucket::write`] for compound operations.
pub struct Bucket<T, K: ?Sized> {
    inner: RwLock<SortedItems<T, K>>,
}

impl<T, K: ?Sized + Ord> Bucket<T, K> {
    /// Create an empty bucket ordered by the natural key order.
    pub fn new(key: KeyFn<T, K>) -> Self {
        Self {
            inner: RwLock::new(SortedItems::new(key)),
        }
    }
}

impl<T, K: ?Sized> Bucket<T, K> {
    /// Create an empty bucket with an explicit key comparator.
    pub fn with_compare(key: KeyFn<T, K>, cmp: CompareFn<K>) -> Self {
        Self {
            inner: RwLock::new(SortedItems::with_compare(key, cmp)),
        }
    }

    /// Acquire the shared lock.
    pub fn read(&self) -> RwLockReadGuard<'_, SortedItems<T, K>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire the writer lock.
    pub fn write(&self) -> RwLockWriteGuard<'_, SortedItems<T, K>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binary search for `key`.
    pub fn index(&self, key: &K) -> Result<usize, usize> {
        self.read().search(key)
    }

    /// Insert an item, failing if its key is already present.
    pub fn store(&self, item: T) -> Result<usize, BucketError> {
        self.write().store(item)
    }

    /// Remove the item stored under `key`.
    pub fn delete(&self, key: &K) -> Option<T> {
        self.write().delete(key)
    }

    /// Insert or replace an item, returning the previous one if any.
    pub fn swap(&self, item: T) -> Option<T> {
        self.write().swap(item)
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if the bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl<T: Clone, K: ?Sized> Bucket<T, K> {
    /// Get a clone of the item stored under `key`.
    pub fn search(&self, key: &K) -> Option<T> {
        self.read().get(key).cloned()
    }

    /// Insert an item unless its key is present.
    ///
    /// Returns the stored item and whether it already existed.
    pub fn search_or_store(&self, item: T) -> (T, bool) {
        let mut items = self.write();
        let (idx, existed) = items.search_or_store(item);
        (items.items()[idx].clone(), existed)
    }

    /// Clone of the item at `index`; negative indices count from the end.
    pub fn at(&self, index: isize) -> Option<T> {
        self.read().at(index).cloned()
    }

    /// Clone of all items in key order.
    pub fn items(&self) -> Vec<T> {
        self.read().items().to_vec()
    }
}

impl<T: fmt::Debug, K: ?Sized> fmt::Debug for Bucket<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket").field("items", &*self.read()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Entry {
        key: Vec<u8>,
        value: u32,
    }

    fn entry_key(entry: &Entry) -> &[u8] {
        &entry.key
    }

    fn entry(key: &[u8], value: u32) -> Entry {
        Entry {
            key: key.to_vec(),
            value,
        }
    }

    #[test]
    fn test_store_keeps_order() {
        let mut items = SortedItems::new(entry_key);
        items.store(entry(b"c", 3)).unwrap();
        items.store(entry(b"a", 1)).unwrap();
        items.store(entry(b"b", 2)).unwrap();

        let keys: Vec<&[u8]> = items.iter().map(|e| e.key.as_slice()).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]);
    }

    #[test]
    fn test_store_duplicate_fails() {
        let mut items = SortedItems::new(entry_key);
        items.store(entry(b"a", 1)).unwrap();
        assert_eq!(items.store(entry(b"a", 2)), Err(BucketError::Duplicate(0)));
        assert_eq!(items.get(b"a").unwrap().value, 1);
    }

    #[test]
    fn test_search_or_store() {
        let bucket = Bucket::new(entry_key);
        let (stored, existed) = bucket.search_or_store(entry(b"k", 1));
        assert!(!existed);
        assert_eq!(stored.value, 1);

        let (stored, existed) = bucket.search_or_store(entry(b"k", 2));
        assert!(existed);
        assert_eq!(stored.value, 1);
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn test_swap_returns_previous() {
        let bucket = Bucket::new(entry_key);
        assert!(bucket.swap(entry(b"k", 1)).is_none());
        let prev = bucket.swap(entry(b"k", 2)).unwrap();
        assert_eq!(prev.value, 1);
        assert_eq!(bucket.search(b"k").unwrap().value, 2);
    }

    #[test]
    fn test_delete() {
        let bucket = Bucket::new(entry_key);
        bucket.store(entry(b"a", 1)).unwrap();
        bucket.store(entry(b"b", 2)).unwrap();

        assert_eq!(bucket.delete(b"a").unwrap().value, 1);
        assert!(bucket.delete(b"a").is_none());
        assert_eq!(bucket.items(), vec![entry(b"b", 2)]);
    }

    #[test]
    fn test_at_negative_index() {
        let bucket = Bucket::new(entry_key);
        for (i, key) in [b"a", b"b", b"c"].iter().enumerate() {
            bucket.store(entry(*key, i as u32)).unwrap();
        }

        assert_eq!(bucket.at(0).unwrap().key, b"a");
        assert_eq!(bucket.at(-1).unwrap().key, b"c");
        assert_eq!(bucket.at(-3).unwrap().key, b"a");
        assert!(bucket.at(3).is_none());
        assert!(bucket.at(-4).is_none());
    }

    #[test]
    fn test_custom_comparator() {
        fn reverse(a: &[u8], b: &[u8]) -> Ordering {
            b.cmp(a)
        }

        let mut items = SortedItems::with_compare(entry_key, reverse);
        items.store(entry(b"a", 1)).unwrap();
        items.store(entry(b"c", 3)).unwrap();
        items.store(entry(b"b", 2)).unwrap();

        assert_eq!(items.at(0).unwrap().key, b"c");
        assert_eq!(items.search(b"b"), Ok(1));
    }

    #[test]
    fn test_search_insertion_point() {
        let mut items = SortedItems::new(entry_key);
        items.store(entry(b"b", 1)).unwrap();
        items.store(entry(b"d", 2)).unwrap();

        assert_eq!(items.search(b"a"), Err(0));
        assert_eq!(items.search(b"c"), Err(1));
        assert_eq!(items.search(b"e"), Err(2));
    }
}
