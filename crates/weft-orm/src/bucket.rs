//! Buckets: named, prefixed partitions of the key space holding one model
//! type, with their secondary indexes kept in step on every write.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, warn};
use weft_store::{KvStore, ReadOnlyKvStore};

use crate::config::QueryConfig;
use crate::error::{OrmError, OrmResult};
use crate::index::{
    as_multi_key_indexer, bucket_prefix, Index, MultiKeyIndexer, NativeIndex, SetIndex,
};
use crate::iter::{consume_entries, consume_keys, Paginated};
use crate::model::{Model, Object};
use crate::names::{validate_bucket_name, validate_index_name};
use crate::query::{range_bounds, QueryEntry, QueryHandler, QueryMode, QueryRouter};
use crate::sequence::{Sequence, SEQ_ID};

/// An index bound to a bucket under its public name.
///
/// The same index is held twice, once per trait object, so it can be handed
/// to a router without upcasting.
struct BoundIndex<M: Model> {
    public_name: String,
    index: Arc<dyn Index<M>>,
    handler: Arc<dyn QueryHandler>,
}

impl<M: Model> Clone for BoundIndex<M> {
    fn clone(&self) -> Self {
        Self {
            public_name: self.public_name.clone(),
            index: Arc::clone(&self.index),
            handler: Arc::clone(&self.handler),
        }
    }
}

/// Collects indexes for a bucket before it is frozen with [`build`].
///
/// Every `with_*` method consumes the builder and returns it, so calls chain.
///
/// [`build`]: BucketBuilder::build
pub struct BucketBuilder<M: Model> {
    name: String,
    prefix: Vec<u8>,
    indexes: Vec<BoundIndex<M>>,
    config: QueryConfig,
}

impl<M: Model> BucketBuilder<M> {
    fn new(name: &str) -> Self {
        if let Err(e) = validate_bucket_name(name) {
            panic!("illegal bucket: {e}");
        }
        Self {
            name: name.to_string(),
            prefix: bucket_prefix(name),
            indexes: Vec::new(),
            config: QueryConfig::default(),
        }
    }

    /// Add a set-based index with at most one key per object.
    ///
    /// # Panics
    ///
    /// Panics if `name` is malformed or already bound to this bucket.
    pub fn with_index<F>(self, name: &str, indexer: F, unique: bool) -> Self
    where
        F: Fn(&Object<M>) -> OrmResult<Option<Vec<u8>>> + Send + Sync + 'static,
    {
        self.bind_set(name, as_multi_key_indexer(Arc::new(indexer)), unique)
    }

    /// Add a set-based index with any number of keys per object.
    ///
    /// # Panics
    ///
    /// Panics if `name` is malformed or already bound to this bucket.
    pub fn with_multi_key_index<F>(self, name: &str, indexer: F, unique: bool) -> Self
    where
        F: Fn(&Object<M>) -> OrmResult<Vec<Vec<u8>>> + Send + Sync + 'static,
    {
        self.bind_set(name, Arc::new(indexer), unique)
    }

    fn bind_set(self, name: &str, indexer: MultiKeyIndexer<M>, unique: bool) -> Self {
        self.bind(name, |bucket, index| SetIndex::new(bucket, index, indexer, unique))
    }

    /// Add an index stored as one store entry per object and key, answered
    /// with range scans. Suited to large collections.
    ///
    /// # Panics
    ///
    /// Panics if `name` is malformed or already bound to this bucket.
    pub fn with_native_index<F>(self, name: &str, indexer: F, unique: bool) -> Self
    where
        F: Fn(&Object<M>) -> OrmResult<Vec<Vec<u8>>> + Send + Sync + 'static,
    {
        let indexer: MultiKeyIndexer<M> = Arc::new(indexer);
        self.bind(name, |bucket, index| NativeIndex::new(bucket, index, indexer, unique))
    }

    /// Replace the range query settings.
    ///
    /// # Panics
    ///
    /// Panics if `config` fails [`QueryConfig::validate`].
    pub fn with_query_config(mut self, config: QueryConfig) -> Self {
        if let Err(e) = config.validate() {
            panic!("illegal query config for bucket {}: {e}", self.name);
        }
        self.config = config;
        self
    }

    fn bind<I, B>(mut self, public_name: &str, build: B) -> Self
    where
        I: Index<M> + 'static,
        B: FnOnce(&str, &str) -> I,
    {
        if let Err(e) = validate_index_name(public_name) {
            panic!("illegal index for bucket {}: {e}", self.name);
        }
        if self.indexes.iter().any(|b| b.public_name == public_name) {
            panic!("index {public_name} registered twice");
        }
        let index = Arc::new(build(&self.name, public_name));
        self.indexes.push(BoundIndex {
            public_name: public_name.to_string(),
            index: index.clone(),
            handler: index,
        });
        self.indexes
            .sort_by(|a, b| a.index.name().cmp(b.index.name()));
        self
    }

    /// Freeze the bucket. Its index set cannot change afterwards.
    pub fn build(self) -> Bucket<M> {
        debug!(
            bucket = %self.name,
            indexes = self.indexes.len(),
            "bucket built"
        );
        Bucket {
            name: self.name,
            prefix: self.prefix,
            indexes: self.indexes.into(),
            config: self.config,
            _model: PhantomData,
        }
    }
}

/// A named partition of the store holding objects of model type `M`.
///
/// Objects live at `<name>:<primary key>`. Indexes are held in order of
/// their internal name `<name>_<public name>`. Cloning is cheap and shares
/// the index set.
pub struct Bucket<M: Model> {
    name: String,
    prefix: Vec<u8>,
    indexes: Arc<[BoundIndex<M>]>,
    config: QueryConfig,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Clone for Bucket<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            prefix: self.prefix.clone(),
            indexes: Arc::clone(&self.indexes),
            config: self.config.clone(),
            _model: PhantomData,
        }
    }
}

impl<M: Model> Bucket<M> {
    /// A bucket without indexes.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not 3 to 10 characters of `[a-z_]`.
    pub fn new(name: &str) -> Self {
        Self::builder(name).build()
    }

    /// Start building a bucket.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not 3 to 10 characters of `[a-z_]`.
    pub fn builder(name: &str) -> BucketBuilder<M> {
        BucketBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Full store key for `key`: the bucket prefix followed by `key`.
    ///
    /// Every call returns a new buffer.
    pub fn db_key(&self, key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix.len() + key.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(key);
        out
    }

    /// The sequence `name` scoped to this bucket.
    pub fn sequence(&self, name: &str) -> Sequence {
        Sequence::new(&self.name, name)
    }

    /// The index bound under public `name`.
    pub fn index(&self, name: &str) -> OrmResult<&dyn Index<M>> {
        self.bound(name).map(|b| b.index.as_ref())
    }

    /// Public names of the bound indexes, in internal name order.
    pub fn index_names(&self) -> impl Iterator<Item = &str> {
        self.indexes.iter().map(|b| b.public_name.as_str())
    }

    fn bound(&self, name: &str) -> OrmResult<&BoundIndex<M>> {
        self.indexes
            .iter()
            .find(|b| b.public_name == name)
            .ok_or_else(|| OrmError::InvalidIndex(name.to_string()))
    }

    /// Load the object stored under `key`.
    pub fn get<S: ReadOnlyKvStore + ?Sized>(
        &self,
        db: &S,
        key: &[u8],
    ) -> OrmResult<Option<Object<M>>> {
        match db.get(&self.db_key(key))? {
            Some(value) => self.parse(key, &value).map(Some),
            None => Ok(None),
        }
    }

    /// Returns `true` if an object is stored under `key`.
    pub fn has<S: ReadOnlyKvStore + ?Sized>(&self, db: &S, key: &[u8]) -> OrmResult<bool> {
        Ok(db.has(&self.db_key(key))?)
    }

    /// Decode stored bytes into an object. Bytes that do not decode as `M`
    /// are reported as corrupted state.
    pub fn parse(&self, key: &[u8], value: &[u8]) -> OrmResult<Object<M>> {
        let model = M::unmarshal(value).map_err(|e| {
            warn!(
                bucket = %self.name,
                key = %hex::encode(key),
                error = %e,
                "stored object does not decode"
            );
            OrmError::State(e.to_string())
        })?;
        Ok(Object::new(key.to_vec(), model))
    }

    /// Validate and store `obj`, bringing every index up to date.
    ///
    /// Constraint checks run over all indexes before any of them is written,
    /// so a unique violation leaves the store untouched.
    pub fn save(&self, db: &dyn KvStore, obj: &Object<M>) -> OrmResult<()> {
        obj.validate()?;
        let value = obj.value().marshal()?;
        self.update_indexes(db, obj.key(), Some(obj))?;
        db.set(&self.db_key(obj.key()), &value)?;
        debug!(bucket = %self.name, key = %hex::encode(obj.key()), "object saved");
        Ok(())
    }

    /// Store `model` under the next value of the bucket's `id` sequence.
    ///
    /// The new key is passed to [`Model::set_primary_key`] before saving.
    pub fn create(&self, db: &dyn KvStore, mut model: M) -> OrmResult<Object<M>> {
        model.validate()?;
        let key = self.sequence(SEQ_ID).next_val(db)?;
        model.set_primary_key(&key)?;
        let obj = Object::new(key, model);
        self.save(db, &obj)?;
        Ok(obj)
    }

    /// Remove the object under `key` and its index entries. Removing a key
    /// that holds nothing is a no-op.
    pub fn delete(&self, db: &dyn KvStore, key: &[u8]) -> OrmResult<()> {
        self.update_indexes(db, key, None)?;
        db.delete(&self.db_key(key))?;
        debug!(bucket = %self.name, key = %hex::encode(key), "object deleted");
        Ok(())
    }

    fn update_indexes(
        &self,
        db: &dyn KvStore,
        key: &[u8],
        next: Option<&Object<M>>,
    ) -> OrmResult<()> {
        if self.indexes.is_empty() {
            return Ok(());
        }
        let prev = self.get(db, key)?;
        for bound in self.indexes.iter() {
            bound.index.check(db, prev.as_ref(), next)?;
        }
        for bound in self.indexes.iter() {
            bound.index.update(db, prev.as_ref(), next)?;
        }
        Ok(())
    }

    /// Objects referenced by `key` in the index `name`, in index order.
    pub fn get_indexed(
        &self,
        db: &dyn ReadOnlyKvStore,
        name: &str,
        key: &[u8],
    ) -> OrmResult<Vec<Object<M>>> {
        let refs = consume_keys(self.bound(name)?.index.keys(db, key)?)?;
        refs.iter()
            .map(|primary_key| {
                self.get(db, primary_key)?.ok_or_else(|| {
                    OrmError::State(format!(
                        "index {name} references missing object {}",
                        hex::encode(primary_key)
                    ))
                })
            })
            .collect()
    }

    /// Register this bucket at `/<name>` and each index at
    /// `/<name>/<index>`. An empty `name` uses the bucket name.
    pub fn register(&self, name: &str, router: &mut QueryRouter) {
        let name = if name.is_empty() { self.name.as_str() } else { name };
        let root = format!("/{name}");
        router.register(&root, Arc::new(self.clone()));
        for bound in self.indexes.iter() {
            router.register(
                &format!("{root}/{}", bound.public_name),
                Arc::clone(&bound.handler),
            );
        }
    }
}

impl<M: Model> QueryHandler for Bucket<M> {
    fn query(
        &self,
        db: &dyn ReadOnlyKvStore,
        mode: &str,
        data: &[u8],
    ) -> OrmResult<Vec<QueryEntry>> {
        match mode.parse::<QueryMode>()? {
            QueryMode::Key => {
                let key = self.db_key(data);
                Ok(db
                    .get(&key)?
                    .map(|value| QueryEntry { key, value })
                    .into_iter()
                    .collect())
            }
            QueryMode::Prefix => consume_entries(db.prefix_iterator(&self.db_key(data))?),
            QueryMode::Range => {
                let (start, end) = range_bounds(&self.config, data)?;
                let (start, end) = (self.db_key(&start), self.db_key(&end));
                let iter = db.iterator(Some(start.as_slice()), Some(end.as_slice()))?;
                consume_entries(Paginated::new(iter, self.config.range_limit))
            }
        }
    }
}

impl<M: Model> fmt::Debug for Bucket<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("indexes", &self.index_names().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Once;

    use super::*;
    use crate::index::prefixed;
    use crate::test_models::{by_color, by_name, by_tags, parity, Counter, CounterWithId, Named};
    use weft_store::{CacheWrap, InMemoryKvStore, KvIterator, StoreError, StoreResult};

    static TRACING: Once = Once::new();

    fn init_tracing() {
        TRACING.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(tracing::Level::DEBUG)
                .try_init();
        });
    }

    fn counters() -> Bucket<Counter> {
        Bucket::builder("cnt").with_index("parity", parity, false).build()
    }

    fn users() -> Bucket<Named> {
        Bucket::builder("usr")
            .with_index("name", by_name, true)
            .with_index("color", by_color, false)
            .with_multi_key_index("tags", by_tags, false)
            .build()
    }

    fn native_users() -> Bucket<Named> {
        Bucket::builder("usr")
            .with_native_index(
                "name",
                |obj: &Object<Named>| -> OrmResult<Vec<Vec<u8>>> {
                    Ok(vec![obj.value().name.as_bytes().to_vec()])
                },
                true,
            )
            .with_native_index("tags", by_tags, false)
            .build()
    }

    fn names(objs: &[Object<Named>]) -> Vec<String> {
        objs.iter().map(|o| o.value().name.clone()).collect()
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    #[test]
    fn db_key_prefixes_and_never_aliases() {
        let b: Bucket<Counter> = Bucket::new("abcd");
        let mut first = b.db_key(b"ABC");
        let second = b.db_key(b"LED");
        first[0] = b'X';
        assert_eq!(second, b"abcd:LED".to_vec());
        assert_eq!(b.db_key(b"ABC"), b"abcd:ABC".to_vec());
    }

    #[test]
    #[should_panic(expected = "illegal bucket")]
    fn rejects_bad_bucket_name() {
        let _: Bucket<Counter> = Bucket::new("No");
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn rejects_duplicate_index() {
        let _: Bucket<Counter> = Bucket::builder("cnt")
            .with_index("parity", parity, false)
            .with_index("parity", parity, true)
            .build();
    }

    #[test]
    #[should_panic(expected = "illegal index")]
    fn rejects_bad_index_name() {
        let _: Bucket<Counter> = Bucket::builder("cnt")
            .with_index("bad name", parity, false)
            .build();
    }

    #[test]
    fn indexes_sorted_by_internal_name() {
        let b = users();
        assert_eq!(b.index_names().collect::<Vec<_>>(), vec!["color", "name", "tags"]);
        assert_eq!(b.index("name").unwrap().name(), "usr_name");
        assert!(b.index("name").unwrap().is_unique());
        assert!(matches!(b.index("nope"), Err(OrmError::InvalidIndex(_))));
        assert!(format!("{b:?}").contains("usr"));
    }

    #[test]
    fn sequence_is_scoped_to_bucket() {
        let b = counters();
        assert_eq!(b.sequence("id").id(), b"_s.cnt:id");
    }

    // -----------------------------------------------------------------------
    // Primary storage
    // -----------------------------------------------------------------------

    #[test]
    fn save_get_delete() {
        init_tracing();
        let db = InMemoryKvStore::new();
        let b = counters();
        let obj = Object::new(vec![1], Counter::new(5));
        b.save(&db, &obj).unwrap();

        assert_eq!(b.get(&db, &[1]).unwrap(), Some(obj));
        assert!(b.has(&db, &[1]).unwrap());

        b.delete(&db, &[1]).unwrap();
        assert_eq!(b.get(&db, &[1]).unwrap(), None);
        assert!(!b.has(&db, &[1]).unwrap());
        assert!(db.is_empty());
    }

    #[test]
    fn delete_missing_is_noop() {
        let db = InMemoryKvStore::new();
        counters().delete(&db, b"ghost").unwrap();
        assert!(db.is_empty());
    }

    #[test]
    fn invalid_model_writes_nothing() {
        let db = InMemoryKvStore::new();
        let b = counters();
        let bad = Object::new(vec![1], Counter::new(-1));
        assert!(matches!(b.save(&db, &bad), Err(OrmError::InvalidModel(_))));
        let keyless = Object::new(Vec::new(), Counter::new(1));
        assert!(matches!(b.save(&db, &keyless), Err(OrmError::InvalidModel(_))));
        assert!(db.is_empty());
    }

    #[test]
    fn corrupt_bytes_are_state_errors() {
        init_tracing();
        let db = InMemoryKvStore::new();
        let b = users();
        db.set(&b.db_key(b"1"), &[0xFF]).unwrap();
        assert!(matches!(b.get(&db, b"1"), Err(OrmError::State(_))));
        assert!(matches!(b.parse(b"1", &[0xFF]), Err(OrmError::State(_))));
    }

    #[test]
    fn buckets_do_not_see_each_other() {
        let db = InMemoryKvStore::new();
        let a: Bucket<Counter> = Bucket::new("aaa");
        let b: Bucket<Counter> = Bucket::new("aaa_b");
        a.save(&db, &Object::new(b"k".to_vec(), Counter::new(1)))
            .unwrap();
        assert!(b.get(&db, b"k").unwrap().is_none());
        assert!(b.query(&db, "prefix", b"").unwrap().is_empty());
    }

    #[test]
    fn create_assigns_sequential_keys() {
        let db = InMemoryKvStore::new();
        let b: Bucket<CounterWithId> = Bucket::new("cwi");
        let first = b.create(&db, CounterWithId::default()).unwrap();
        let second = b.create(&db, CounterWithId::default()).unwrap();
        assert_eq!(first.key(), &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(second.key(), &[0, 0, 0, 0, 0, 0, 0, 2]);
        assert_eq!(second.value().primary_key, second.key().to_vec());

        let loaded = b.get(&db, second.key()).unwrap().unwrap();
        assert_eq!(loaded.value().primary_key, second.key().to_vec());
    }

    #[test]
    fn create_rejects_invalid_model_without_burning_a_key() {
        let db = InMemoryKvStore::new();
        let b = counters();
        assert!(b.create(&db, Counter::new(-4)).is_err());
        assert_eq!(b.sequence(SEQ_ID).curr_int(&db).unwrap(), 0);
    }

    // -----------------------------------------------------------------------
    // Indexes
    // -----------------------------------------------------------------------

    #[test]
    fn parity_scenario() {
        init_tracing();
        let db = InMemoryKvStore::new();
        let b = counters();
        b.save(&db, &Object::new(vec![1], Counter::new(5))).unwrap();

        let odd = b.get_indexed(&db, "parity", &[1]).unwrap();
        assert_eq!(odd.len(), 1);
        assert_eq!(odd[0].key(), &[1]);
        assert!(b.get_indexed(&db, "parity", &[0]).unwrap().is_empty());

        b.delete(&db, &[1]).unwrap();
        assert!(b.get_indexed(&db, "parity", &[1]).unwrap().is_empty());
    }

    #[test]
    fn get_indexed_unknown_index() {
        let db = InMemoryKvStore::new();
        assert!(matches!(
            counters().get_indexed(&db, "missing", &[1]),
            Err(OrmError::InvalidIndex(_))
        ));
    }

    #[test]
    fn non_unique_index_returns_all() {
        let db = InMemoryKvStore::new();
        let b = counters();
        for (k, v) in [(3u8, 1), (1, 3), (2, 5)] {
            b.save(&db, &Object::new(vec![k], Counter::new(v))).unwrap();
        }
        let keys: Vec<_> = b
            .get_indexed(&db, "parity", &[1])
            .unwrap()
            .into_iter()
            .map(|o| o.key().to_vec())
            .collect();
        assert_eq!(keys, vec![vec![3], vec![1], vec![2]]);
    }

    #[test]
    fn set_index_keeps_insertion_order_across_updates() {
        let db = InMemoryKvStore::new();
        let b = counters();
        for k in [3u8, 1, 2] {
            b.save(&db, &Object::new(vec![k], Counter::new(1))).unwrap();
        }
        let odd_keys = |db: &InMemoryKvStore| -> Vec<Vec<u8>> {
            b.get_indexed(db, "parity", &[1])
                .unwrap()
                .into_iter()
                .map(|o| o.key().to_vec())
                .collect()
        };
        assert_eq!(odd_keys(&db), vec![vec![3], vec![1], vec![2]]);

        // Re-saving under the same key keeps its position.
        b.save(&db, &Object::new(vec![1], Counter::new(7))).unwrap();
        assert_eq!(odd_keys(&db), vec![vec![3], vec![1], vec![2]]);

        // Leaving and rejoining moves it to the end.
        b.save(&db, &Object::new(vec![3], Counter::new(2))).unwrap();
        b.save(&db, &Object::new(vec![3], Counter::new(9))).unwrap();
        assert_eq!(odd_keys(&db), vec![vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn update_moves_index_membership() {
        let db = InMemoryKvStore::new();
        let b = counters();
        b.save(&db, &Object::new(vec![1], Counter::new(5))).unwrap();
        b.save(&db, &Object::new(vec![1], Counter::new(6))).unwrap();
        assert!(b.get_indexed(&db, "parity", &[1]).unwrap().is_empty());
        assert_eq!(b.get_indexed(&db, "parity", &[0]).unwrap().len(), 1);
    }

    #[test]
    fn unique_violation_leaves_only_first_object() {
        let db = InMemoryKvStore::new();
        let b = users();
        b.save(&db, &Object::new(b"1".to_vec(), Named::new("alice", "red")))
            .unwrap();
        let before = db.keys().unwrap();

        let dup = Object::new(b"2".to_vec(), Named::new("alice", "blue").with_tags(&["x"]));
        assert!(matches!(b.save(&db, &dup), Err(OrmError::Duplicate { .. })));

        // The color and tag indexes sort around the unique name index and
        // must not have been touched either.
        assert_eq!(db.keys().unwrap(), before);
        assert!(b.get(&db, b"2").unwrap().is_none());
        assert!(b.get_indexed(&db, "color", b"blue").unwrap().is_empty());
        assert_eq!(names(&b.get_indexed(&db, "name", b"alice").unwrap()), vec!["alice"]);
    }

    #[test]
    fn unique_key_can_be_reused_after_delete() {
        let db = InMemoryKvStore::new();
        let b = users();
        b.save(&db, &Object::new(b"1".to_vec(), Named::new("alice", "")))
            .unwrap();
        b.delete(&db, b"1").unwrap();
        b.save(&db, &Object::new(b"2".to_vec(), Named::new("alice", "")))
            .unwrap();
        let found = b.get_indexed(&db, "name", b"alice").unwrap();
        assert_eq!(found[0].key(), b"2");
    }

    #[test]
    fn multi_key_index() {
        let db = InMemoryKvStore::new();
        let b = users();
        b.save(
            &db,
            &Object::new(b"1".to_vec(), Named::new("a", "").with_tags(&["x", "y"])),
        )
        .unwrap();
        b.save(
            &db,
            &Object::new(b"2".to_vec(), Named::new("b", "").with_tags(&["y"])),
        )
        .unwrap();
        assert_eq!(names(&b.get_indexed(&db, "tags", b"x").unwrap()), vec!["a"]);
        assert_eq!(names(&b.get_indexed(&db, "tags", b"y").unwrap()), vec!["a", "b"]);
        assert!(b.get_indexed(&db, "color", b"").unwrap().is_empty());
    }

    #[test]
    fn native_indexes_behave_like_set_indexes() {
        init_tracing();
        let db = InMemoryKvStore::new();
        let b = native_users();
        b.save(
            &db,
            &Object::new(b"1".to_vec(), Named::new("alice", "").with_tags(&["x", "y"])),
        )
        .unwrap();
        b.save(
            &db,
            &Object::new(b"2".to_vec(), Named::new("bob", "").with_tags(&["y"])),
        )
        .unwrap();

        assert_eq!(names(&b.get_indexed(&db, "tags", b"y").unwrap()), vec!["alice", "bob"]);
        let dup = Object::new(b"3".to_vec(), Named::new("bob", ""));
        assert!(matches!(b.save(&db, &dup), Err(OrmError::Duplicate { .. })));

        b.delete(&db, b"1").unwrap();
        assert_eq!(names(&b.get_indexed(&db, "tags", b"y").unwrap()), vec!["bob"]);
        assert!(b.get_indexed(&db, "name", b"alice").unwrap().is_empty());
    }

    #[test]
    fn dangling_reference_is_state_error() {
        let db = InMemoryKvStore::new();
        let b = counters();
        b.save(&db, &Object::new(vec![1], Counter::new(5))).unwrap();
        db.delete(&b.db_key(&[1])).unwrap();
        assert!(matches!(
            b.get_indexed(&db, "parity", &[1]),
            Err(OrmError::State(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    fn letters(db: &InMemoryKvStore) -> Bucket<Counter> {
        let b: Bucket<Counter> = Bucket::new("abc");
        for (i, k) in [b"a", b"b", b"c"].into_iter().enumerate() {
            b.save(db, &Object::new(k.to_vec(), Counter::new(i as i64)))
                .unwrap();
        }
        b
    }

    fn keys(entries: &[QueryEntry]) -> Vec<Vec<u8>> {
        entries.iter().map(|e| e.key.clone()).collect()
    }

    #[test]
    fn query_key_mode() {
        let db = InMemoryKvStore::new();
        let b = letters(&db);
        let hit = b.query(&db, "", b"b").unwrap();
        assert_eq!(keys(&hit), vec![b"abc:b".to_vec()]);
        assert_eq!(Counter::unmarshal(&hit[0].value).unwrap(), Counter::new(1));
        assert!(b.query(&db, "key", b"z").unwrap().is_empty());
    }

    #[test]
    fn query_prefix_mode() {
        let db = InMemoryKvStore::new();
        let b = letters(&db);
        assert_eq!(b.query(&db, "prefix", b"").unwrap().len(), 3);
        assert_eq!(keys(&b.query(&db, "prefix", b"c").unwrap()), vec![b"abc:c".to_vec()]);
    }

    #[test]
    fn query_range_mode() {
        let db = InMemoryKvStore::new();
        let b = letters(&db);
        let all = b.query(&db, "range", b"").unwrap();
        assert_eq!(all.len(), 3);

        let from_b = b.query(&db, "range", hex::encode("b").as_bytes()).unwrap();
        assert_eq!(keys(&from_b), vec![b"abc:b".to_vec(), b"abc:c".to_vec()]);

        let a_to_b = b.query(&db, "range", b"61:62").unwrap();
        assert_eq!(keys(&a_to_b), vec![b"abc:a".to_vec(), b"abc:b".to_vec()]);

        assert!(matches!(
            b.query(&db, "range", b"61:62:63"),
            Err(OrmError::Input(_))
        ));
        assert!(matches!(b.query(&db, "bogus", b""), Err(OrmError::Input(_))));
    }

    #[test]
    fn query_range_is_paginated() {
        let db = InMemoryKvStore::new();
        let b: Bucket<Counter> = Bucket::builder("pages")
            .with_query_config(QueryConfig {
                range_limit: 4,
                ..QueryConfig::default()
            })
            .build();
        for i in 0..10u8 {
            b.save(&db, &Object::new(vec![i + 1], Counter::new(i as i64)))
                .unwrap();
        }
        let page = b.query(&db, "range", b"").unwrap();
        assert_eq!(page.len(), 4);
        assert_eq!(page[0].key, b.db_key(&[1]));

        let default_bucket: Bucket<Counter> = Bucket::new("pages");
        assert_eq!(default_bucket.query(&db, "range", b"").unwrap().len(), 10);
    }

    #[test]
    fn router_registration() {
        let db = InMemoryKvStore::new();
        let b = users();
        b.save(&db, &Object::new(b"1".to_vec(), Named::new("alice", "red")))
            .unwrap();

        let mut router = QueryRouter::new();
        b.register("", &mut router);
        assert_eq!(
            router.paths().collect::<Vec<_>>(),
            vec!["/usr", "/usr/color", "/usr/name", "/usr/tags"]
        );

        let direct = router.query(&db, "/usr", b"1").unwrap();
        assert_eq!(keys(&direct), vec![b"usr:1".to_vec()]);
        let via_index = router.query(&db, "/usr/color", b"red").unwrap();
        assert_eq!(via_index, direct);
        let via_prefix = router.query(&db, "/usr/name?prefix", b"al").unwrap();
        assert_eq!(via_prefix, direct);

        let mut aliased = QueryRouter::new();
        b.register("people", &mut aliased);
        assert!(aliased.handler("/people/tags").is_some());
    }

    // -----------------------------------------------------------------------
    // Stores
    // -----------------------------------------------------------------------

    #[test]
    fn cache_wrap_batches_are_all_or_nothing() {
        let db = InMemoryKvStore::new();
        let b = users();

        let cache = CacheWrap::new(&db);
        b.save(&cache, &Object::new(b"1".to_vec(), Named::new("alice", "red")))
            .unwrap();
        b.save(&cache, &Object::new(b"2".to_vec(), Named::new("bob", "red")))
            .unwrap();
        let dup = Object::new(b"3".to_vec(), Named::new("bob", ""));
        assert!(b.save(&cache, &dup).is_err());
        cache.discard();
        assert!(db.is_empty());

        let cache = CacheWrap::new(&db);
        b.save(&cache, &Object::new(b"1".to_vec(), Named::new("alice", "red")))
            .unwrap();
        cache.write().unwrap();
        assert_eq!(names(&b.get_indexed(&db, "color", b"red").unwrap()), vec!["alice"]);
    }

    /// Fails every operation.
    struct BrokenStore;

    impl ReadOnlyKvStore for BrokenStore {
        fn get(&self, _key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
            Err(StoreError::Backend("offline".into()))
        }

        fn iterator(
            &self,
            _start: Option<&[u8]>,
            _end: Option<&[u8]>,
        ) -> StoreResult<KvIterator<'_>> {
            Err(StoreError::Backend("offline".into()))
        }
    }

    impl KvStore for BrokenStore {
        fn set(&self, _key: &[u8], _value: &[u8]) -> StoreResult<()> {
            Err(StoreError::Backend("offline".into()))
        }

        fn delete(&self, _key: &[u8]) -> StoreResult<()> {
            Err(StoreError::Backend("offline".into()))
        }
    }

    #[test]
    fn store_errors_propagate() {
        let b = counters();
        let obj = Object::new(vec![1], Counter::new(1));
        assert!(matches!(b.save(&BrokenStore, &obj), Err(OrmError::Store(_))));
        assert!(matches!(b.get(&BrokenStore, &[1]), Err(OrmError::Store(_))));
        assert!(matches!(b.delete(&BrokenStore, &[1]), Err(OrmError::Store(_))));
        assert!(matches!(
            b.query(&BrokenStore, "prefix", b""),
            Err(OrmError::Store(_))
        ));
        let plain: Bucket<Counter> = Bucket::new("cnt");
        assert!(matches!(plain.save(&BrokenStore, &obj), Err(OrmError::Store(_))));
    }

    #[test]
    fn set_index_entries_live_under_bucket_and_index() {
        let db = InMemoryKvStore::new();
        let b = counters();
        b.save(&db, &Object::new(vec![1], Counter::new(5))).unwrap();
        assert!(db.get(&prefixed(b"_i.cnt:parity:", &[1])).unwrap().is_some());
        assert_eq!(b.index("parity").unwrap().name(), "cnt_parity");
    }

    /// Indexes sharing the internal name `usr_a_b` from two buckets.
    fn overlapping_buckets() -> (Bucket<Counter>, Bucket<Counter>) {
        let odd_even = |obj: &Object<Counter>| -> OrmResult<Option<Vec<u8>>> {
            Ok(Some(vec![(obj.value().value % 2) as u8]))
        };
        let usr = Bucket::builder("usr").with_index("a_b", odd_even, false).build();
        let usr_a = Bucket::builder("usr_a")
            .with_native_index(
                "b",
                move |obj: &Object<Counter>| -> OrmResult<Vec<Vec<u8>>> {
                    Ok(odd_even(obj)?.into_iter().collect())
                },
                false,
            )
            .build();
        (usr, usr_a)
    }

    #[test]
    fn indexes_of_underscored_buckets_do_not_collide() {
        let db = InMemoryKvStore::new();
        let (usr, usr_a) = overlapping_buckets();
        assert_eq!(usr.index("a_b").unwrap().name(), usr_a.index("b").unwrap().name());

        usr.save(&db, &Object::new(vec![7], Counter::new(1))).unwrap();
        assert!(usr_a.get_indexed(&db, "b", &[1]).unwrap().is_empty());
        assert!(usr_a.query(&db, "prefix", b"").unwrap().is_empty());

        usr_a.save(&db, &Object::new(vec![8], Counter::new(3))).unwrap();
        let from_usr: Vec<_> = usr
            .get_indexed(&db, "a_b", &[1])
            .unwrap()
            .into_iter()
            .map(|o| o.key().to_vec())
            .collect();
        assert_eq!(from_usr, vec![vec![7]]);
        let from_usr_a: Vec<_> = usr_a
            .get_indexed(&db, "b", &[1])
            .unwrap()
            .into_iter()
            .map(|o| o.key().to_vec())
            .collect();
        assert_eq!(from_usr_a, vec![vec![8]]);
    }

    #[test]
    #[should_panic(expected = "illegal query config")]
    fn rejects_invalid_query_config() {
        let _ = Bucket::<Counter>::builder("cnt").with_query_config(QueryConfig {
            range_limit: 0,
            ..QueryConfig::default()
        });
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// Saved objects read back unchanged and index lookups agree with
            /// a direct scan of primary storage.
            #[test]
            fn index_agrees_with_storage(
                ops in prop::collection::vec((0u8..8, prop::option::of(0i64..20)), 1..40)
            ) {
                let db = InMemoryKvStore::new();
                let b = counters();
                let mut model = std::collections::BTreeMap::new();
                // Primary keys per parity, in the order they joined it.
                let mut joined: [Vec<u8>; 2] = [Vec::new(), Vec::new()];
                for (key, value) in ops {
                    let before = model.get(&key).map(|v: &i64| (v % 2) as usize);
                    let after = value.map(|v| (v % 2) as usize);
                    match value {
                        Some(v) => {
                            b.save(&db, &Object::new(vec![key], Counter::new(v))).unwrap();
                            model.insert(key, v);
                        }
                        None => {
                            b.delete(&db, &[key]).unwrap();
                            model.remove(&key);
                        }
                    }
                    if before != after {
                        if let Some(p) = before {
                            joined[p].retain(|k| *k != key);
                        }
                        if let Some(p) = after {
                            joined[p].push(key);
                        }
                    }
                }
                for parity_key in [0u8, 1] {
                    let got: Vec<u8> = b
                        .get_indexed(&db, "parity", &[parity_key])
                        .unwrap()
                        .into_iter()
                        .map(|o| o.key()[0])
                        .collect();
                    prop_assert_eq!(&got, &joined[parity_key as usize]);
                }
                for (key, value) in &model {
                    prop_assert_eq!(
                        b.get(&db, &[*key]).unwrap().map(|o| o.into_value()),
                        Some(Counter::new(*value))
                    );
                }
            }

            #[test]
            fn db_keys_are_independent(a in prop::collection::vec(any::<u8>(), 0..16),
                                       c in prop::collection::vec(any::<u8>(), 0..16)) {
                let b: Bucket<Counter> = Bucket::new("abcd");
                let ka = b.db_key(&a);
                let kc = b.db_key(&c);
                prop_assert_eq!(&ka[..5], b"abcd:");
                prop_assert_eq!(&ka[5..], a.as_slice());
                prop_assert_eq!(&kc[5..], c.as_slice());
            }
        }
    }
}
