//! Secondary indexes over bucket objects.
//!
//! An index maps keys derived from an object's value (by an indexer
//! function) to the primary keys of the objects that produced them. Two
//! storage strategies implement the same [`Index`] trait:
//!
//! - [`SetIndex`] keeps one entry per index key holding the sorted set of
//!   primary keys. Every update rewrites that set, so it suits small
//!   collections.
//! - [`NativeIndex`] keeps one store entry per `(index key, primary key)`
//!   pair and answers lookups with a range scan, so it suits large
//!   collections.
//!
//! Both live under `_i.<bucket>:<index>:`. Neither name may contain `:`, so
//! every `(bucket, index)` pair owns a distinct prefix, and `.` keeps the
//! whole range apart from bucket prefixes.

pub mod native;
pub mod set;

use std::collections::BTreeSet;
use std::sync::Arc;

use weft_store::{KvStore, ReadOnlyKvStore};

use crate::error::{OrmError, OrmResult};
use crate::iter::KeyIterator;
use crate::model::{Model, Object};
use crate::query::{QueryEntry, QueryHandler};

pub use native::NativeIndex;
pub use set::SetIndex;

/// Derives at most one index key from an object. `None` means "not indexed".
pub type Indexer<M> = Arc<dyn Fn(&Object<M>) -> OrmResult<Option<Vec<u8>>> + Send + Sync>;

/// Derives any number of index keys from an object.
pub type MultiKeyIndexer<M> = Arc<dyn Fn(&Object<M>) -> OrmResult<Vec<Vec<u8>>> + Send + Sync>;

/// Adapt a single-key indexer to the multi-key shape.
pub fn as_multi_key_indexer<M: Model>(indexer: Indexer<M>) -> MultiKeyIndexer<M> {
    Arc::new(move |obj: &Object<M>| -> OrmResult<Vec<Vec<u8>>> {
        Ok(indexer(obj)?.into_iter().collect())
    })
}

const INDEX_PREFIX: &str = "_i.";

/// Storage prefix of index `index` bound to `bucket`.
pub(crate) fn index_prefix(bucket: &str, index: &str) -> Vec<u8> {
    format!("{INDEX_PREFIX}{bucket}:{index}:").into_bytes()
}

/// Internal name of index `index` bound to `bucket`. Orders indexes and
/// names them in errors and logs; storage keys use [`index_prefix`].
pub(crate) fn internal_name(bucket: &str, index: &str) -> String {
    format!("{bucket}_{index}")
}

/// Storage prefix of the objects in `bucket`.
pub(crate) fn bucket_prefix(bucket: &str) -> Vec<u8> {
    format!("{bucket}:").into_bytes()
}

/// `prefix || key` in a freshly allocated buffer.
pub(crate) fn prefixed(prefix: &[u8], key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + key.len());
    out.extend_from_slice(prefix);
    out.extend_from_slice(key);
    out
}

/// A secondary index bound to one model type.
///
/// `check` must be called for every bound index before any of them is
/// updated, so a unique violation in one index never leaves another half
/// written. Both take the previous and the new object stored under one
/// primary key; `None` on either side means "absent".
pub trait Index<M: Model>: QueryHandler {
    /// Internal name, `<bucket>_<public name>`.
    fn name(&self) -> &str;

    /// Whether an index key may reference at most one primary key.
    fn is_unique(&self) -> bool;

    /// Read-only constraint check for a pending update.
    fn check(
        &self,
        db: &dyn KvStore,
        prev: Option<&Object<M>>,
        next: Option<&Object<M>>,
    ) -> OrmResult<()>;

    /// Move the index from `prev` to `next`.
    fn update(
        &self,
        db: &dyn KvStore,
        prev: Option<&Object<M>>,
        next: Option<&Object<M>>,
    ) -> OrmResult<()>;

    /// Primary keys referenced by `index_key`, in index order.
    fn keys<'a>(&self, db: &'a dyn ReadOnlyKvStore, index_key: &[u8]) -> OrmResult<KeyIterator<'a>>;
}

/// `(index key, primary key)` pairs an update removes and adds.
///
/// Pairs present on both sides are left alone, so re-saving an unchanged
/// object writes nothing to the index.
#[derive(Debug, Default)]
pub(crate) struct Changes {
    pub remove: Vec<(Vec<u8>, Vec<u8>)>,
    pub add: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Changes {
    pub fn compute<M: Model>(
        indexer: &MultiKeyIndexer<M>,
        prev: Option<&Object<M>>,
        next: Option<&Object<M>>,
    ) -> OrmResult<Self> {
        let before = pairs(indexer, prev)?;
        let after = pairs(indexer, next)?;
        Ok(Self {
            remove: before.difference(&after).cloned().collect(),
            add: after.difference(&before).cloned().collect(),
        })
    }

    fn removes(&self, index_key: &[u8], primary_key: &[u8]) -> bool {
        self.remove
            .iter()
            .any(|(k, pk)| k.as_slice() == index_key && pk.as_slice() == primary_key)
    }

    /// Fail with [`OrmError::Duplicate`] if any added pair would share its
    /// index key with a primary key that stays referenced.
    pub fn ensure_unique<F>(&self, index_name: &str, mut existing: F) -> OrmResult<()>
    where
        F: FnMut(&[u8]) -> OrmResult<Vec<Vec<u8>>>,
    {
        for (index_key, primary_key) in &self.add {
            for other in existing(index_key.as_slice())? {
                if other != *primary_key && !self.removes(index_key, &other) {
                    return Err(OrmError::Duplicate {
                        index: index_name.to_string(),
                        key: hex::encode(index_key),
                    });
                }
            }
        }
        Ok(())
    }
}

fn pairs<M: Model>(
    indexer: &MultiKeyIndexer<M>,
    obj: Option<&Object<M>>,
) -> OrmResult<BTreeSet<(Vec<u8>, Vec<u8>)>> {
    let Some(obj) = obj else {
        return Ok(BTreeSet::new());
    };
    Ok(indexer(obj)?
        .into_iter()
        .map(|key| (key, obj.key().to_vec()))
        .collect())
}

/// Load the bucket entries behind `refs`, skipping dangling references.
pub(crate) fn load_refs<I>(
    db: &dyn ReadOnlyKvStore,
    ref_prefix: &[u8],
    refs: I,
) -> OrmResult<Vec<QueryEntry>>
where
    I: IntoIterator<Item = OrmResult<Vec<u8>>>,
{
    let mut out = Vec::new();
    for primary_key in refs {
        let key = prefixed(ref_prefix, &primary_key?);
        if let Some(value) = db.get(&key)? {
            out.push(QueryEntry { key, value });
        }
    }
    Ok(out)
}
