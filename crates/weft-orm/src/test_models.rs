//! Model fixtures shared by unit tests.

use serde::{Deserialize, Serialize};

use crate::error::{OrmError, OrmResult};
use crate::model::{Model, Object};

/// A bare counter; negative values are invalid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub value: i64,
}

impl Counter {
    pub fn new(value: i64) -> Self {
        Self { value }
    }
}

impl Model for Counter {
    fn validate(&self) -> OrmResult<()> {
        if self.value < 0 {
            return Err(OrmError::InvalidModel(format!(
                "negative counter: {}",
                self.value
            )));
        }
        Ok(())
    }
}

/// Parity of a counter as a one-byte index key.
pub fn parity(obj: &Object<Counter>) -> OrmResult<Option<Vec<u8>>> {
    Ok(Some(vec![(obj.value().value % 2) as u8]))
}

/// A counter that stores its own primary key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterWithId {
    pub primary_key: Vec<u8>,
    pub count: u64,
}

impl Model for CounterWithId {
    fn validate(&self) -> OrmResult<()> {
        Ok(())
    }

    fn set_primary_key(&mut self, key: &[u8]) -> OrmResult<()> {
        self.primary_key = key.to_vec();
        Ok(())
    }
}

/// A named record with a list of tags, for unique and multi-key indexes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Named {
    pub name: String,
    pub color: String,
    pub tags: Vec<String>,
}

impl Named {
    pub fn new(name: &str, color: &str) -> Self {
        Self {
            name: name.to_string(),
            color: color.to_string(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

impl Model for Named {
    fn validate(&self) -> OrmResult<()> {
        if self.name.is_empty() {
            return Err(OrmError::InvalidModel("name is required".into()));
        }
        Ok(())
    }
}

pub fn by_name(obj: &Object<Named>) -> OrmResult<Option<Vec<u8>>> {
    Ok(Some(obj.value().name.as_bytes().to_vec()))
}

/// Empty colors are not indexed.
pub fn by_color(obj: &Object<Named>) -> OrmResult<Option<Vec<u8>>> {
    let color = &obj.value().color;
    if color.is_empty() {
        return Ok(None);
    }
    Ok(Some(color.as_bytes().to_vec()))
}

pub fn by_tags(obj: &Object<Named>) -> OrmResult<Vec<Vec<u8>>> {
    Ok(obj
        .value()
        .tags
        .iter()
        .map(|t| t.as_bytes().to_vec())
        .collect())
}
