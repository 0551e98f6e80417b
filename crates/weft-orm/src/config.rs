use serde::{Deserialize, Serialize};

use crate::error::{OrmError, OrmResult};

/// Configuration for bucket range queries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Maximum number of entries a single range query returns.
    pub range_limit: usize,
    /// Zero bytes appended to an explicit end bound so composite keys that
    /// extend the bound are not cut off. Keys extending the bound by more
    /// than this many bytes fall outside the range.
    pub end_padding: usize,
    /// Length of the all-`0xFF` sentinel used when no end bound is given.
    pub open_end_len: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            range_limit: 50,
            end_padding: 24,
            open_end_len: 128,
        }
    }
}

impl QueryConfig {
    /// Parse a configuration from TOML. Missing fields take their defaults.
    ///
    /// ```
    /// use weft_orm::QueryConfig;
    ///
    /// let cfg = QueryConfig::from_toml_str("range_limit = 10").unwrap();
    /// assert_eq!(cfg.range_limit, 10);
    /// assert_eq!(cfg.end_padding, 24);
    /// ```
    pub fn from_toml_str(raw: &str) -> OrmResult<Self> {
        let cfg: Self = toml::from_str(raw).map_err(|e| OrmError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make range queries meaningless.
    pub fn validate(&self) -> OrmResult<()> {
        if self.range_limit == 0 {
            return Err(OrmError::Config("range_limit must be at least 1".into()));
        }
        if self.open_end_len == 0 {
            return Err(OrmError::Config("open_end_len must be at least 1".into()));
        }
        Ok(())
    }
}
