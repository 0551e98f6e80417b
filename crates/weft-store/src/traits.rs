use crate::error::StoreResult;

/// A key-value pair yielded by store iteration.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Ordered iterator over a key range, ascending by key.
pub type KvIterator<'a> = Box<dyn Iterator<Item = StoreResult<KvPair>> + 'a>;

/// Read access to an ordered byte-keyed store.
///
/// All implementations must satisfy these invariants:
/// - Keys are ordered byte-lexicographically.
/// - A missing key is `Ok(None)`, never an error.
/// - Iteration covers the half-open range `[start, end)`; a `None` bound is
///   unbounded on that side.
/// - All backend errors are propagated, never silently ignored.
pub trait ReadOnlyKvStore: Send + Sync {
    /// Read the value stored at `key`.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Check whether `key` holds a value.
    fn has(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Iterate over `[start, end)` in ascending key order.
    fn iterator(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> StoreResult<KvIterator<'_>>;

    /// Iterate over every key beginning with `prefix`.
    ///
    /// Default implementation derives the exclusive upper bound with
    /// [`prefix_end`].
    fn prefix_iterator(&self, prefix: &[u8]) -> StoreResult<KvIterator<'_>> {
        let end = prefix_end(prefix);
        self.iterator(Some(prefix), end.as_deref())
    }
}

/// Read-write access to an ordered byte-keyed store.
///
/// Writes take `&self`: backends provide their own interior mutability, and
/// transactional isolation is the host's responsibility.
pub trait KvStore: ReadOnlyKvStore {
    /// Write `value` at `key`, replacing any previous value.
    fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Remove `key`. Removing an absent key is a no-op.
    fn delete(&self, key: &[u8]) -> StoreResult<()>;
}

/// Smallest key strictly greater than every key starting with `prefix`.
///
/// Returns `None` when no such bound exists (empty prefix or all `0xFF`),
/// meaning the scan is unbounded above.
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}
