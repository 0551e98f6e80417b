//! Typed buckets and secondary indexes over an ordered key-value store.
//!
//! The flat key space of a [`weft_store::KvStore`] is partitioned into named
//! buckets, each holding one [`Model`] type under the prefix `<name>:`.
//! Buckets keep their secondary indexes consistent with primary data on
//! every save and delete, and answer read-only queries routed by path.
//!
//! # Key Layout
//!
//! - `<bucket>:<primary key>` -- model bytes
//! - `_i.<bucket>:<index>:...` -- index entries ([`SetIndex`] or [`NativeIndex`])
//! - `_s.<bucket>:<sequence>` -- 8-byte big-endian counters ([`Sequence`])
//!
//! # Example
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use weft_orm::{Bucket, Model, Object, OrmResult};
//! use weft_store::InMemoryKvStore;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Counter {
//!     value: u64,
//! }
//!
//! impl Model for Counter {
//!     fn validate(&self) -> OrmResult<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn parity(obj: &Object<Counter>) -> OrmResult<Option<Vec<u8>>> {
//!     Ok(Some(vec![(obj.value().value % 2) as u8]))
//! }
//!
//! let db = InMemoryKvStore::new();
//! let counters = Bucket::<Counter>::builder("cnt")
//!     .with_index("parity", parity, false)
//!     .build();
//! counters.save(&db, &Object::new(vec![1], Counter { value: 5 })).unwrap();
//!
//! let odd = counters.get_indexed(&db, "parity", &[1]).unwrap();
//! assert_eq!(odd[0].key(), &[1]);
//! ```
//!
//! # Design Rules
//!
//! 1. The store is passed per call; buckets hold no store handle.
//! 2. Index constraints are checked for every index before any is written.
//! 3. Absence is `Ok(None)` or an empty `Vec`, never an error.
//! 4. Setup mistakes (bad names, duplicate indexes or routes) panic.

pub mod bucket;
pub mod config;
pub mod error;
pub mod index;
pub mod iter;
pub mod model;
pub mod names;
pub mod query;
pub mod sequence;

#[cfg(test)]
mod test_models;

pub use bucket::{Bucket, BucketBuilder};
pub use config::QueryConfig;
pub use error::{OrmError, OrmResult};
pub use index::{Index, Indexer, MultiKeyIndexer, NativeIndex, SetIndex};
pub use model::{Model, Object};
pub use query::{QueryEntry, QueryHandler, QueryMode, QueryRouter};
pub use sequence::{Sequence, SEQ_ID};
