//! Error types for the ORM crate.

/// Errors that can occur during bucket, index, sequence, and query
/// operations.
///
/// Absence of a value is never an error: lookups return `Ok(None)` or an
/// empty `Vec`.
#[derive(Debug, thiserror::Error)]
pub enum OrmError {
    /// The object or its model failed validation. Nothing was written.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// Malformed caller input (query syntax, hex, unknown mode or path).
    #[error("invalid input: {0}")]
    Input(String),

    /// Stored bytes do not match the expected schema.
    #[error("corrupted state: {0}")]
    State(String),

    /// No index with this public name is bound to the bucket.
    #[error("invalid index: {0}")]
    InvalidIndex(String),

    /// A unique index already maps this key to another primary key.
    #[error("duplicate entry in unique index {index}: {key}")]
    Duplicate { index: String, key: String },

    /// A bucket, index, or route name is malformed.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// Model serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be parsed or is out of range.
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying store failure, propagated unchanged.
    #[error("store error: {0}")]
    Store(#[from] weft_store::StoreError),
}

/// Convenience alias for ORM results.
pub type OrmResult<T> = Result<T, OrmError>;
