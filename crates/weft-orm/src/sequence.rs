//! Persisted monotonic counters for minting primary keys.
//!
//! A sequence lives at `_s.<bucket>:<name>` and holds the last issued value
//! as 8 big-endian bytes. Values are returned in the same encoding, so byte
//! order of generated keys matches numeric order. Nothing is cached in
//! memory; every call reads and writes the store.

use tracing::debug;
use weft_store::{KvStore, ReadOnlyKvStore};

use crate::error::{OrmError, OrmResult};

/// Name of the sequence a bucket uses for generated primary keys.
pub const SEQ_ID: &str = "id";

const SEQUENCE_PREFIX: &str = "_s.";

/// Width of an encoded sequence value.
pub const SEQUENCE_WIDTH: usize = 8;

/// Encode a sequence value as fixed-width big-endian bytes.
pub fn encode_sequence(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Decode a value produced by [`encode_sequence`].
pub fn decode_sequence(bytes: &[u8]) -> OrmResult<u64> {
    let raw: [u8; SEQUENCE_WIDTH] = bytes.try_into().map_err(|_| {
        OrmError::State(format!(
            "sequence value must be {SEQUENCE_WIDTH} bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(u64::from_be_bytes(raw))
}

/// A named counter scoped to a bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sequence {
    id: Vec<u8>,
}

impl Sequence {
    /// Sequence `name` within `bucket`.
    pub fn new(bucket: &str, name: &str) -> Self {
        Self {
            id: format!("{SEQUENCE_PREFIX}{bucket}:{name}").into_bytes(),
        }
    }

    /// The store key holding this counter.
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    /// The last issued value, or 0 if none has been issued.
    pub fn curr_int<S: ReadOnlyKvStore + ?Sized>(&self, db: &S) -> OrmResult<u64> {
        match db.get(&self.id)? {
            Some(bytes) => decode_sequence(&bytes),
            None => Ok(0),
        }
    }

    /// Advance the counter and return the new value.
    pub fn next_int(&self, db: &dyn KvStore) -> OrmResult<u64> {
        let next = self
            .curr_int(db)?
            .checked_add(1)
            .ok_or_else(|| OrmError::State("sequence overflow".into()))?;
        db.set(&self.id, &encode_sequence(next))?;
        debug!(sequence = %String::from_utf8_lossy(&self.id), value = next, "sequence advanced");
        Ok(next)
    }

    /// Advance the counter and return the new value as key bytes.
    pub fn next_val(&self, db: &dyn KvStore) -> OrmResult<Vec<u8>> {
        self.next_int(db).map(encode_sequence)
    }
}
