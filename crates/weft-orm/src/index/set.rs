//! Set-based index: one serialized set of primary keys per index key.

use serde::{Deserialize, Serialize};
use tracing::warn;
use weft_store::{KvStore, ReadOnlyKvStore};

use crate::error::{OrmError, OrmResult};
use crate::index::{
    bucket_prefix, index_prefix, internal_name, load_refs, prefixed, Changes, Index,
    MultiKeyIndexer,
};
use crate::iter::KeyIterator;
use crate::model::{Model, Object};
use crate::query::{QueryEntry, QueryHandler, QueryMode};

/// De-duplicated primary keys stored under one index key, in the order they
/// were added.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefSet {
    refs: Vec<Vec<u8>>,
}

impl RefSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `key`. Returns `false` if it was already present.
    pub fn add(&mut self, key: Vec<u8>) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.refs.push(key);
        true
    }

    /// Remove `key`, keeping the order of the rest. Returns `false` if it
    /// was not present.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        match self.refs.iter().position(|r| r.as_slice() == key) {
            Some(pos) => {
                self.refs.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.refs.iter().any(|r| r.as_slice() == key)
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Primary keys in insertion order.
    pub fn refs(&self) -> &[Vec<u8>] {
        &self.refs
    }

    pub fn into_refs(self) -> Vec<Vec<u8>> {
        self.refs
    }

    /// Encode for storage.
    pub fn encode(&self) -> OrmResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| OrmError::Serialization(e.to_string()))
    }

    /// Decode stored bytes.
    pub fn decode(bytes: &[u8]) -> OrmResult<Self> {
        bincode::deserialize(bytes).map_err(|e| OrmError::State(format!("index entry: {e}")))
    }
}

/// Index storing, for each index key, the full set of referencing primary
/// keys as one blob at `_i.<bucket>:<index>:<index key>`.
///
/// Each update decodes and re-encodes the touched sets, so cost grows with
/// the number of objects sharing an index key.
pub struct SetIndex<M> {
    name: String,
    prefix: Vec<u8>,
    ref_prefix: Vec<u8>,
    indexer: MultiKeyIndexer<M>,
    unique: bool,
}

impl<M: Model> SetIndex<M> {
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

    fn entry_key(&self, index_key: &[u8]) -> Vec<u8> {
        prefixed(&self.prefix, index_key)
    }

    fn load<S: ReadOnlyKvStore + ?Sized>(&self, db: &S, index_key: &[u8]) -> OrmResult<RefSet> {
        match db.get(&self.entry_key(index_key))? {
            Some(bytes) => RefSet::decode(&bytes),
            None => Ok(RefSet::new()),
        }
    }

    fn save(&self, db: &dyn KvStore, index_key: &[u8], set: &RefSet) -> OrmResult<()> {
        let key = self.entry_key(index_key);
        if set.is_empty() {
            db.delete(&key)?;
        } else {
            db.set(&key, &set.encode()?)?;
        }
        Ok(())
    }
}

impl<M: Model> Index<M> for SetIndex<M> {
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
        changes.ensure_unique(&self.name, |index_key| {
            Ok(self.load(db, index_key)?.into_refs())
        })
    }

    fn update(
        &self,
        db: &dyn KvStore,
        prev: Option<&Object<M>>,
        next: Option<&Object<M>>,
    ) -> OrmResult<()> {
        let changes = Changes::compute(&self.indexer, prev, next)?;
        if self.unique {
            changes.ensure_unique(&self.name, |index_key| {
                Ok(self.load(db, index_key)?.into_refs())
            })?;
        }

        for (index_key, primary_key) in &changes.remove {
            let mut set = self.load(db, index_key)?;
            if !set.remove(primary_key) {
                warn!(
                    index = %self.name,
                    index_key = %hex::encode(index_key),
                    primary_key = %hex::encode(primary_key),
                    "index entry missing reference on removal"
                );
                continue;
            }
            self.save(db, index_key, &set)?;
        }
        for (index_key, primary_key) in &changes.add {
            let mut set = self.load(db, index_key)?;
            if set.add(primary_key.clone()) {
                self.save(db, index_key, &set)?;
            }
        }
        Ok(())
    }

    fn keys<'a>(&self, db: &'a dyn ReadOnlyKvStore, index_key: &[u8]) -> OrmResult<KeyIterator<'a>> {
        let refs = self.load(db, index_key)?.into_refs();
        Ok(Box::new(refs.into_iter().map(OrmResult::Ok)))
    }
}

impl<M: Model> QueryHandler for SetIndex<M> {
    fn query(
        &self,
        db: &dyn ReadOnlyKvStore,
        mode: &str,
        data: &[u8],
    ) -> OrmResult<Vec<QueryEntry>> {
        match mode.parse::<QueryMode>()? {
            QueryMode::Key => {
                let refs = self.load(db, data)?.into_refs();
                load_refs(db, &self.ref_prefix, refs.into_iter().map(OrmResult::Ok))
            }
            QueryMode::Prefix => {
                let mut refs = Vec::new();
                for entry in db.prefix_iterator(&self.entry_key(data))? {
                    let (_, value) = entry?;
                    refs.extend(RefSet::decode(&value)?.into_refs());
                }
                load_refs(db, &self.ref_prefix, refs.into_iter().map(OrmResult::Ok))
            }
            QueryMode::Range => Err(OrmError::Input(format!(
                "index {} does not support range queries",
                self.name
            ))),
        }
    }
}

impl<M> std::fmt::Debug for SetIndex<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetIndex")
            .field("name", &self.name)
            .field("unique", &self.unique)
            .finish()
    }
}
