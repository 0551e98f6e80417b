//! Lazy consumption of store iterators into bounded result sets.

use weft_store::{KvPair, StoreResult};

use crate::error::OrmResult;
use crate::query::QueryEntry;

/// Lazy sequence of primary keys produced by an index lookup.
pub type KeyIterator<'a> = Box<dyn Iterator<Item = OrmResult<Vec<u8>>> + 'a>;

/// An iterator that stops after a fixed number of items.
///
/// The inner iterator is never polled past the limit. This caps the result
/// set, not the backend read: [`weft_store::InMemoryKvStore`] and
/// [`weft_store::CacheWrap`] snapshot the whole range before iterating.
#[derive(Debug)]
pub struct Paginated<I> {
    inner: I,
    remaining: usize,
}

impl<I: Iterator> Paginated<I> {
    /// Cap `inner` at `limit` items.
    pub fn new(inner: I, limit: usize) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }

    /// Items still allowed before the page is full.
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl<I: Iterator> Iterator for Paginated<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.inner.next()?;
        self.remaining -= 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (lower, upper) = self.inner.size_hint();
        let upper = upper.map_or(self.remaining, |u| u.min(self.remaining));
        (lower.min(self.remaining), Some(upper))
    }
}

/// Drain store pairs into query entries, stopping at the first error.
pub fn consume_entries<I>(iter: I) -> OrmResult<Vec<QueryEntry>>
where
    I: Iterator<Item = StoreResult<KvPair>>,
{
    iter.map(|entry| {
        let (key, value) = entry?;
        Ok(QueryEntry { key, value })
    })
    .collect()
}

/// Drain a key iterator, stopping at the first error.
pub fn consume_keys(iter: KeyIterator<'_>) -> OrmResult<Vec<Vec<u8>>> {
    iter.collect()
}
