//! Write-buffering wrapper for all-or-nothing batches.
//!
//! [`CacheWrap`] sits on top of any [`KvStore`] and holds every write in
//! memory. Reads and iteration see the buffered writes layered over the
//! parent. Nothing reaches the parent until [`CacheWrap::write`] is called;
//! dropping the wrapper (or calling [`CacheWrap::discard`]) throws the
//! buffer away.

use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::memory::range_bounds;
use crate::traits::{KvIterator, KvStore, ReadOnlyKvStore};

/// Pending writes keyed by store key; `None` marks a buffered delete.
type Pending = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// A write buffer over a parent store.
pub struct CacheWrap<'a> {
    parent: &'a dyn KvStore,
    pending: RwLock<Pending>,
}

impl<'a> CacheWrap<'a> {
    /// Wrap `parent`; no writes are buffered yet.
    pub fn new(parent: &'a dyn KvStore) -> Self {
        Self {
            parent,
            pending: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of buffered writes (sets and deletes).
    pub fn pending_len(&self) -> usize {
        self.pending.read().expect("lock poisoned").len()
    }

    /// Flush every buffered write to the parent in key order.
    ///
    /// Returns the number of writes applied.
    pub fn write(self) -> StoreResult<usize> {
        let pending = self
            .pending
            .into_inner()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        let count = pending.len();
        for (key, value) in pending {
            match value {
                Some(value) => self.parent.set(&key, &value)?,
                None => self.parent.delete(&key)?,
            }
        }
        debug!(writes = count, "cache flushed to parent");
        Ok(count)
    }

    /// Drop every buffered write.
    pub fn discard(self) {
        debug!(writes = self.pending_len(), "cache discarded");
    }
}

impl ReadOnlyKvStore for CacheWrap<'_> {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        {
            let pending = self
                .pending
                .read()
                .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
            if let Some(buffered) = pending.get(key) {
                return Ok(buffered.clone());
            }
        }
        self.parent.get(key)
    }

    fn iterator(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> StoreResult<KvIterator<'_>> {
        let Some(bounds) = range_bounds(start, end) else {
            return Ok(Box::new(std::iter::empty()));
        };

        let mut merged = BTreeMap::new();
        for entry in self.parent.iterator(start, end)? {
            let (key, value) = entry?;
            merged.insert(key, value);
        }

        let pending = self
            .pending
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        for (key, value) in pending.range::<[u8], _>(bounds) {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(Box::new(merged.into_iter().map(Ok)))
    }
}

impl KvStore for CacheWrap<'_> {
    fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.pending
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.pending
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .insert(key.to_vec(), None);
        Ok(())
    }
}

impl std::fmt::Debug for CacheWrap<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWrap")
            .field("pending", &self.pending_len())
            .finish()
    }
}
