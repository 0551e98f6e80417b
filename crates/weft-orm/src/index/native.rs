//! Range-scanning index: one store entry per `(index key, primary key)`.
//!
//! Entry layout under the index prefix:
//!
//! ```text
//! escape(index_key) || 0x00 0x00 || primary_key  =>  primary_key
//! ```
//!
//! `escape` rewrites every `0x00` in the index key as `0x00 0xFF`, so the
//! two-byte terminator can never occur inside an escaped key. A scan over
//! `escape(k) || 0x00 0x00` therefore yields exactly the primary keys of `k`,
//! and entries sort by index key first, then by primary key.

use tracing::debug;
use weft_store::{KvStore, ReadOnlyKvStore};

use crate::error::{OrmError, OrmResult};
use crate::index::{
    bucket_prefix, index_prefix, internal_name, load_refs, Changes, Index, MultiKeyIndexer,
};
use crate::iter::KeyIterator;
use crate::model::{Model, Object};
use crate::query::{QueryEntry, QueryHandler, QueryMode};

const TERMINATOR: [u8; 2] = [0x00, 0x00];
const ESCAPED_ZERO: [u8; 2] = [0x00, 0xFF];

/// Append the escaped form of `key` to `out`.
fn escape_into(out: &mut Vec<u8>, key: &[u8]) {
    for &b in key {
        if b == 0 {
            out.extend_from_slice(&ESCAPED_ZERO);
        } else {
            out.push(b);
        }
    }
}

/// Index backed directly by ordered store entries.
pub struct NativeIndex<M> {
    name: String,
    prefix: Vec<u8>,
    ref_prefix: Vec<u8>,
    indexer: MultiKeyIndexer<M>,
    unique: bool,
}

impl<M: Model> NativeIndex<M> {
    /// Create index `index` over the objects of `bucket`.
    pub fn new(bucket: &str, index: &str, indexer: MultiKeyIndexer<M>, unique: bool) -> Self {
        Self {
            name: internal_name(bucket, index),
            prefix: index_prefix(bucket, index),
            ref_prefix: bucket_prefix(bucket),
            indexer,
            unique,
        }
    }

    /// Scan prefix covering every entry of exactly `index_key`.
    fn match_prefix(&self, index_key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix.len() + index_key.len() + 2);
        out.extend_from_slice(&self.prefix);
        escape_into(&mut out, index_key);
        out.extend_from_slice(&TERMINATOR);
        out
    }

    fn entry_key(&self, index_key: &[u8], primary_key: &[u8]) -> Vec<u8> {
        let mut out = self.match_prefix(index_key);
        out.extend_from_slice(primary_key);
        out
    }

    fn existing(&self, db: &dyn KvStore, index_key: &[u8]) -> OrmResult<Vec<Vec<u8>>> {
        db.prefix_iterator(&self.match_prefix(index_key))?
            .map(|entry| -> OrmResult<Vec<u8>> { Ok(entry?.1) })
            .collect()
    }
}

impl<M: Model> Index<M> for NativeIndex<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_unique(&self) -> bool {
        self.unique
    }

    fn check(
        &self,
        db: &dyn KvStore,
        prev: Option<&Object<M>>,
        next: Option<&Object<M>>,
    ) -> OrmResult<()> {
        if !self.unique {
            return Ok(());
        }
        let changes = Changes::compute(&self.indexer, prev, next)?;
        changes.ensure_unique(&self.name, |index_key| self.existing(db, index_key))
    }

    fn update(
        &self,
        db: &dyn KvStore,
        prev: Option<&Object<M>>,
        next: Option<&Object<M>>,
    ) -> OrmResult<()> {
        let changes = Changes::compute(&self.indexer, prev, next)?;
        if self.unique {
            changes.ensure_unique(&self.name, |index_key| self.existing(db, index_key))?;
        }
        for (index_key, primary_key) in &changes.remove {
            db.delete(&self.entry_key(index_key, primary_key))?;
        }
        for (index_key, primary_key) in &changes.add {
            db.set(&self.entry_key(index_key, primary_key), primary_key)?;
        }
        debug!(
            index = %self.name,
            removed = changes.remove.len(),
            added = changes.add.len(),
            "native index updated"
        );
        Ok(())
    }

    fn keys<'a>(&self, db: &'a dyn ReadOnlyKvStore, index_key: &[u8]) -> OrmResult<KeyIterator<'a>> {
        let iter = db.prefix_iterator(&self.match_prefix(index_key))?;
        Ok(Box::new(
            iter.map(|entry| -> OrmResult<Vec<u8>> { Ok(entry?.1) }),
        ))
    }
}

impl<M: Model> QueryHandler for NativeIndex<M> {
    fn query(
        &self,
        db: &dyn ReadOnlyKvStore,
        mode: &str,
        data: &[u8],
    ) -> OrmResult<Vec<QueryEntry>> {
        match mode.parse::<QueryMode>()? {
            QueryMode::Key => load_refs(db, &self.ref_prefix, self.keys(db, data)?),
            QueryMode::Prefix => {
                let mut scan = self.prefix.clone();
                escape_into(&mut scan, data);
                let refs = db
                    .prefix_iterator(&scan)?
                    .map(|entry| -> OrmResult<Vec<u8>> { Ok(entry?.1) });
                load_refs(db, &self.ref_prefix, refs)
            }
            QueryMode::Range => Err(OrmError::Input(format!(
                "index {} does not support range queries",
                self.name
            ))),
        }
    }
}

impl<M> std::fmt::Debug for NativeIndex<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeIndex")
            .field("name", &self.name)
            .field("unique", &self.unique)
            .finish()
    }
}
