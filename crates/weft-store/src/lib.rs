//! Ordered key-value store contract for Weft.
//!
//! The ORM layer never owns a store. A host (typically a state-machine
//! engine executing one transaction at a time) hands it a store handle per
//! call, either read-only or read-write. This crate defines that contract and
//! ships two implementations useful for tests and embedding.
//!
//! # Traits
//!
//! - [`ReadOnlyKvStore`] -- `get`, `has`, ordered `iterator` over `[start, end)`
//! - [`KvStore`] -- adds `set` and `delete`
//!
//! # Implementations
//!
//! - [`InMemoryKvStore`] -- `BTreeMap`-backed ordered store
//! - [`CacheWrap`] -- buffers writes over a parent and flushes them on demand
//!
//! # Design Rules
//!
//! 1. Keys are raw bytes ordered lexicographically; the store never
//!    interprets them.
//! 2. Absence is `Ok(None)`, never an error.
//! 3. Commit and isolation semantics belong to the host, not to this crate.
//! 4. All backend errors are propagated, never silently ignored.

pub mod cache;
pub mod error;
pub mod memory;
pub mod traits;

pub use cache::CacheWrap;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryKvStore;
pub use traits::{prefix_end, KvIterator, KvPair, KvStore, ReadOnlyKvStore};
