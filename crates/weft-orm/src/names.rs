//! Name validation for buckets, indexes, and query routes.
//!
//! Bucket names double as storage prefixes, so they are deliberately narrow:
//! - 3 to 10 characters
//! - only lowercase ASCII letters and `_`
//!
//! Index names appear in query paths and in internal index prefixes:
//! - 1 to 32 characters
//! - ASCII letters, digits, and `_`
//!
//! Route paths are `/`-separated and made of the same characters as index
//! names.

use crate::error::{OrmError, OrmResult};

/// Shortest legal bucket name.
pub const MIN_BUCKET_NAME_LEN: usize = 3;

/// Longest legal bucket name.
pub const MAX_BUCKET_NAME_LEN: usize = 10;

/// Longest legal index name.
pub const MAX_INDEX_NAME_LEN: usize = 32;

fn invalid(name: &str, reason: impl Into<String>) -> OrmError {
    OrmError::InvalidName {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Validate a bucket name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use weft_orm::names::validate_bucket_name;
///
/// assert!(validate_bucket_name("cash").is_ok());
/// assert!(validate_bucket_name("user_sets").is_ok());
/// assert!(validate_bucket_name("ab").is_err());
/// assert!(validate_bucket_name("Cash").is_err());
/// ```
pub fn validate_bucket_name(name: &str) -> OrmResult<()> {
    let len = name.len();
    if !(MIN_BUCKET_NAME_LEN..=MAX_BUCKET_NAME_LEN).contains(&len) {
        return Err(invalid(
            name,
            format!("length must be {MIN_BUCKET_NAME_LEN}..={MAX_BUCKET_NAME_LEN}, got {len}"),
        ));
    }
    if let Some(ch) = name.chars().find(|c| !(c.is_ascii_lowercase() || *c == '_')) {
        return Err(invalid(name, format!("contains forbidden character: {ch:?}")));
    }
    Ok(())
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Validate an index public name.
pub fn validate_index_name(name: &str) -> OrmResult<()> {
    if name.is_empty() {
        return Err(invalid(name, "index name must not be empty"));
    }
    if name.len() > MAX_INDEX_NAME_LEN {
        return Err(invalid(
            name,
            format!("longer than {MAX_INDEX_NAME_LEN} characters"),
        ));
    }
    if let Some(ch) = name.chars().find(|c| !is_ident_char(*c)) {
        return Err(invalid(name, format!("contains forbidden character: {ch:?}")));
    }
    Ok(())
}

/// Validate a query route path such as `/cash` or `/cash/owner`.
pub fn validate_route_path(path: &str) -> OrmResult<()> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err(invalid(path, "path must start with '/'"));
    };
    for segment in rest.split('/') {
        if segment.is_empty() {
            return Err(invalid(path, "path segments must not be empty"));
        }
        if let Some(ch) = segment.chars().find(|c| !is_ident_char(*c)) {
            return Err(invalid(path, format!("contains forbidden character: {ch:?}")));
        }
    }
    Ok(())
}
