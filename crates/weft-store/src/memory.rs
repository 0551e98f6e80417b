use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::traits::{KvIterator, KvPair, KvStore, ReadOnlyKvStore};

/// In-memory, `BTreeMap`-based ordered key-value store.
///
/// Intended for tests and embedding. Entries live behind a `RwLock` for safe
/// concurrent access. Iterators work on a snapshot of the requested range, so
/// writes made while iterating are not observed.
pub struct InMemoryKvStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryKvStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of entries currently stored.
    ///
    /// # Panics
    ///
    /// Panics if the lock was poisoned by a writer that panicked.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("lock poisoned").is_empty()
    }

    /// Remove all entries from the store.
    pub fn clear(&self) -> StoreResult<()> {
        self.entries
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .clear();
        Ok(())
    }

    /// Sorted list of every key in the store.
    pub fn keys(&self) -> StoreResult<Vec<Vec<u8>>> {
        let map = self
            .entries
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        Ok(map.keys().cloned().collect())
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Translate optional `[start, end)` bounds into `BTreeMap` range bounds.
///
/// Returns `None` for an empty range; `BTreeMap::range` panics when start is
/// past end, so inverted ranges never reach it.
pub(crate) fn range_bounds<'k>(
    start: Option<&'k [u8]>,
    end: Option<&'k [u8]>,
) -> Option<(Bound<&'k [u8]>, Bound<&'k [u8]>)> {
    if let (Some(s), Some(e)) = (start, end) {
        if s >= e {
            return None;
        }
    }
    let lower = start.map_or(Bound::Unbounded, Bound::Included);
    let upper = end.map_or(Bound::Unbounded, Bound::Excluded);
    Some((lower, upper))
}

impl ReadOnlyKvStore for InMemoryKvStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let map = self
            .entries
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        Ok(map.get(key).cloned())
    }

    fn has(&self, key: &[u8]) -> StoreResult<bool> {
        let map = self
            .entries
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        Ok(map.contains_key(key))
    }

    fn iterator(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> StoreResult<KvIterator<'_>> {
        let Some(bounds) = range_bounds(start, end) else {
            return Ok(Box::new(std::iter::empty()));
        };
        let map = self
            .entries
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        let snapshot: Vec<KvPair> = map
            .range::<[u8], _>(bounds)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }
}

impl KvStore for InMemoryKvStore {
    fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let mut map = self
            .entries
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        let mut map = self
            .entries
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        map.remove(key);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryKvStore")
            .field("entry_count", &self.len())
            .finish()
    }
}
