//! Models and the objects that carry them.
//!
//! A [`Model`] is any serde-serializable record that can validate itself.
//! An [`Object`] pairs a model with the raw primary key it is stored under.
//! Buckets accept and return objects; the key bytes are opaque to them.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{OrmError, OrmResult};

/// A self-validating, serializable record type stored in a bucket.
///
/// Serialization defaults to bincode. Types whose primary key is part of the
/// record override [`Model::set_primary_key`] so keys minted by a sequence
/// can be written back into the value.
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Check domain invariants. Called before every save.
    fn validate(&self) -> OrmResult<()>;

    /// Encode the model to bytes.
    fn marshal(&self) -> OrmResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| OrmError::Serialization(e.to_string()))
    }

    /// Decode a model from bytes.
    fn unmarshal(bytes: &[u8]) -> OrmResult<Self> {
        bincode::deserialize(bytes).map_err(|e| OrmError::Serialization(e.to_string()))
    }

    /// Accept an externally generated primary key.
    fn set_primary_key(&mut self, _key: &[u8]) -> OrmResult<()> {
        Ok(())
    }
}

/// A primary key paired with a model value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Object<M> {
    key: Vec<u8>,
    value: M,
}

impl<M: Model> Object<M> {
    /// Create an object stored under `key`.
    pub fn new(key: impl Into<Vec<u8>>, value: M) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// The raw primary key.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The model value.
    pub fn value(&self) -> &M {
        &self.value
    }

    /// Mutable access to the model value.
    pub fn value_mut(&mut self) -> &mut M {
        &mut self.value
    }

    /// Consume the object, returning the model.
    pub fn into_value(self) -> M {
        self.value
    }

    /// Consume the object, returning key and model.
    pub fn into_parts(self) -> (Vec<u8>, M) {
        (self.key, self.value)
    }

    /// Validate the key and then the model.
    pub fn validate(&self) -> OrmResult<()> {
        if self.key.is_empty() {
            return Err(OrmError::InvalidModel("missing primary key".into()));
        }
        self.value.validate()
    }
}
