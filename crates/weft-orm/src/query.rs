//! Read-only query protocol and path-based routing.
//!
//! A query is `(path, mode, data)`. The [`QueryRouter`] resolves the path to
//! a registered [`QueryHandler`] (a bucket or one of its indexes), which then
//! interprets `data` according to the [`QueryMode`]:
//!
//! - key: `data` is a raw key, zero or one result
//! - prefix: `data` is a raw key prefix, every match
//! - range: `data` is `""`, `"<start>"` or `"<start>:<end>"` with hex bounds,
//!   capped at one page

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use weft_store::ReadOnlyKvStore;

use crate::config::QueryConfig;
use crate::error::{OrmError, OrmResult};
use crate::names::validate_route_path;

/// How a query interprets its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryMode {
    /// Exact key lookup.
    Key,
    /// Every key starting with the payload.
    Prefix,
    /// Paginated scan between hex-encoded bounds.
    Range,
}

impl QueryMode {
    /// Wire name of the mode. Key mode is also accepted as the empty string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Prefix => "prefix",
            Self::Range => "range",
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = OrmError;

    fn from_str(s: &str) -> OrmResult<Self> {
        match s {
            "" | "key" => Ok(Self::Key),
            "prefix" => Ok(Self::Prefix),
            "range" => Ok(Self::Range),
            other => Err(OrmError::Input(format!("unknown query mode: {other}"))),
        }
    }
}

/// One result row: the full store key and the raw stored bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Anything that can answer read-only queries against a store.
pub trait QueryHandler: Send + Sync {
    /// Answer a query. `mode` is the wire name of a [`QueryMode`].
    fn query(
        &self,
        db: &dyn ReadOnlyKvStore,
        mode: &str,
        data: &[u8],
    ) -> OrmResult<Vec<QueryEntry>>;
}

fn decode_bound(segment: &[u8], which: &str) -> OrmResult<Option<Vec<u8>>> {
    if segment.is_empty() {
        return Ok(None);
    }
    hex::decode(segment)
        .map(Some)
        .map_err(|e| OrmError::Input(format!("query data: {which}: {e}")))
}

/// Parse range query data into optional start and end bounds.
///
/// ```
/// use weft_orm::query::parse_query_range;
///
/// let (start, end) = parse_query_range(b"61:62").unwrap();
/// assert_eq!(start.as_deref(), Some(&b"a"[..]));
/// assert_eq!(end.as_deref(), Some(&b"b"[..]));
/// assert!(parse_query_range(b"61:62:63").is_err());
/// ```
pub fn parse_query_range(raw: &[u8]) -> OrmResult<(Option<Vec<u8>>, Option<Vec<u8>>)> {
    if raw.is_empty() {
        return Ok((None, None));
    }
    let parts: Vec<&[u8]> = raw.splitn(3, |b| *b == b':').collect();
    match parts.as_slice() {
        [start] => Ok((decode_bound(start, "start")?, None)),
        [start, end] => Ok((decode_bound(start, "start")?, decode_bound(end, "end")?)),
        _ => Err(OrmError::Input(
            "query data: invalid range format, expected <start>:<end>".into(),
        )),
    }
}

/// Resolve range query data into unprefixed `[start, end)` scan bounds.
///
/// A missing start scans from the beginning. A missing end becomes an
/// all-`0xFF` sentinel; a present end is padded with zero bytes so composite
/// keys extending it are still included.
pub fn range_bounds(config: &QueryConfig, raw: &[u8]) -> OrmResult<(Vec<u8>, Vec<u8>)> {
    let (start, end) = parse_query_range(raw)?;
    let start = start.unwrap_or_default();
    let end = match end {
        Some(mut end) => {
            end.resize(end.len() + config.end_padding, 0);
            end
        }
        None => vec![u8::MAX; config.open_end_len],
    };
    Ok((start, end))
}

/// Maps query paths to handlers.
///
/// Paths look like `/<bucket>` and `/<bucket>/<index>`. A full request path
/// may carry the mode after `?`, for example `/cash?prefix`.
#[derive(Clone, Default)]
pub struct QueryRouter {
    routes: BTreeMap<String, Arc<dyn QueryHandler>>,
}

impl QueryRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` at `path`.
    ///
    /// # Panics
    ///
    /// Panics if `path` is malformed or already registered. Routes are set up
    /// once at startup; either case is a wiring bug.
    pub fn register(&mut self, path: &str, handler: Arc<dyn QueryHandler>) {
        if let Err(e) = validate_route_path(path) {
            panic!("illegal query path: {e}");
        }
        if self.routes.contains_key(path) {
            panic!("query path {path} registered twice");
        }
        debug!(path, "query route registered");
        self.routes.insert(path.to_string(), handler);
    }

    /// The handler registered at exactly `path`.
    pub fn handler(&self, path: &str) -> Option<&dyn QueryHandler> {
        self.routes.get(path).map(|h| h.as_ref())
    }

    /// Every registered path, sorted.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatch a request path (optionally `path?mode`) to its handler.
    pub fn query(
        &self,
        db: &dyn ReadOnlyKvStore,
        request_path: &str,
        data: &[u8],
    ) -> OrmResult<Vec<QueryEntry>> {
        let (path, mode) = request_path
            .split_once('?')
            .unwrap_or((request_path, ""));
        let handler = self
            .handler(path)
            .ok_or_else(|| OrmError::Input(format!("no query handler for path: {path}")))?;
        handler.query(db, mode, data)
    }
}

impl fmt::Debug for QueryRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRouter")
            .field("paths", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}
