//! The [`HashBackend`] trait: the storage commands the hash-record store needs.
//!
//! The store keeps every entity as one hash (field → bytes) under a string
//! key. Backends provide single-key hash commands, key expiry, an atomic
//! multi-command [`exec`](HashBackend::exec), and optionally a secondary
//! index over hash fields used for tenant listing.
//!
//! # Implementing a Backend
//!
//! 1. Implement the single-key commands with the semantics documented below
//! 2. Make [`exec`](HashBackend::exec) all-or-nothing and invisible to readers until applied
//! 3. Either implement the search commands or return `false` from
//!    [`supports_search`](HashBackend::supports_search)
//!
//! See [`MemoryHashBackend`](crate::MemoryHashBackend) for a reference implementation.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use fanout_tenantstore::SortOrder;

use crate::error::Result;

/// Field → value contents of one hash.
pub type HashFields = BTreeMap<String, Bytes>;

/// One command inside an atomic [`exec`](HashBackend::exec) batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashOp {
    /// Sets fields, creating the hash if needed.
    HSet {
        /// Hash key.
        key: String,
        /// Fields to write.
        fields: Vec<(String, Bytes)>,
    },
    /// Removes fields. A hash left empty is removed.
    HDel {
        /// Hash key.
        key: String,
        /// Fields to remove.
        fields: Vec<String>,
    },
    /// Removes the whole hash.
    Del {
        /// Hash key.
        key: String,
    },
    /// Schedules the hash for removal after `ttl`.
    Expire {
        /// Hash key.
        key: String,
        /// Time to live.
        ttl: Duration,
    },
    /// Clears a scheduled removal.
    Persist {
        /// Hash key.
        key: String,
    },
}

impl HashOp {
    /// An `HSet` of a single field.
    #[must_use]
    pub fn hset(key: impl Into<String>, field: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self::HSet { key: key.into(), fields: vec![(field.into(), value.into())] }
    }

    /// An `HDel` of a single field.
    #[must_use]
    pub fn hdel(key: impl Into<String>, field: impl Into<String>) -> Self {
        Self::HDel { key: key.into(), fields: vec![field.into()] }
    }

    /// The key this command touches.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::HSet { key, .. }
            | Self::HDel { key, .. }
            | Self::Del { key }
            | Self::Expire { key, .. }
            | Self::Persist { key } => key,
        }
    }
}

/// A secondary index over hashes.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
pub struct IndexDefinition {
    /// Index name.
    #[builder(into)]
    pub name: String,
    /// Only keys with this prefix are indexed.
    #[builder(into)]
    pub prefix: String,
    /// Only hashes whose `entity` field equals this value are indexed.
    #[builder(into)]
    pub entity: String,
    /// Numeric, sortable field.
    #[builder(into)]
    pub sort_field: String,
    /// Numeric fields that queries may name in
    /// [`SearchQuery::without_field`].
    #[builder(default)]
    pub filter_fields: Vec<String>,
}

/// Inclusive numeric bounds on a field. Missing bounds are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NumericRange {
    /// Lower bound.
    pub min: Option<i64>,
    /// Upper bound.
    pub max: Option<i64>,
}

impl NumericRange {
    /// The single value `value`.
    #[must_use]
    pub fn exactly(value: i64) -> Self {
        Self { min: Some(value), max: Some(value) }
    }

    /// Returns `true` if `value` lies within the bounds.
    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

/// A query against an [`IndexDefinition`].
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
pub struct SearchQuery {
    /// Excludes hashes carrying this field.
    #[builder(into)]
    pub without_field: Option<String>,
    /// Restricts the index's sort field.
    pub range: Option<NumericRange>,
    /// Sort direction over the index's sort field.
    #[builder(default)]
    pub sort: SortOrder,
    /// Maximum number of documents returned. Zero returns only the total.
    pub limit: usize,
}

/// Result of [`HashBackend::search`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    /// Number of matching documents, ignoring `limit`.
    pub total: usize,
    /// Matching documents as `(key, fields)`, at most `limit`.
    pub docs: Vec<(String, HashFields)>,
}

/// Hash-per-key storage with expiry and optional search.
///
/// Missing keys behave like empty hashes; expired keys behave like missing
/// ones.
#[async_trait]
pub trait HashBackend: Send + Sync {
    /// Returns every field of a hash; empty if the key does not exist.
    async fn hgetall(&self, key: &str) -> Result<HashFields>;

    /// Returns every field of each hash, in order, in one round trip.
    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<HashFields>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.hgetall(key).await?);
        }
        Ok(out)
    }

    /// Sets fields of a hash.
    async fn hset(&self, key: &str, fields: Vec<(String, Bytes)>) -> Result<()>;

    /// Removes fields of a hash.
    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<()>;

    /// Number of fields in a hash.
    async fn hlen(&self, key: &str) -> Result<usize>;

    /// Field names of a hash.
    async fn hkeys(&self, key: &str) -> Result<Vec<String>>;

    /// Whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Clears any expiry on a key.
    async fn persist(&self, key: &str) -> Result<()>;

    /// Schedules a key for removal after `ttl`.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Removes a key.
    async fn del(&self, key: &str) -> Result<()>;

    /// Applies a batch of commands atomically.
    async fn exec(&self, ops: Vec<HashOp>) -> Result<()>;

    /// Whether the search commands are available.
    async fn supports_search(&self) -> bool;

    /// Creates an index unless one with the same name exists.
    async fn ensure_index(&self, index: &IndexDefinition) -> Result<()>;

    /// Runs a query against a named index.
    async fn search(&self, index: &str, query: &SearchQuery) -> Result<SearchResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_range_bounds_are_inclusive() {
        let range = NumericRange { min: Some(10), max: Some(20) };
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(9));
        assert!(!range.contains(21));
        assert!(NumericRange::default().contains(i64::MIN));
        assert!(NumericRange::exactly(i64::MAX).contains(i64::MAX));
        assert!(!NumericRange::exactly(5).contains(4));
    }

    #[test]
    fn test_op_key() {
        assert_eq!(HashOp::hset("k", "f", "v").key(), "k");
        assert_eq!(HashOp::Del { key: "d".into() }.key(), "d");
    }
}
