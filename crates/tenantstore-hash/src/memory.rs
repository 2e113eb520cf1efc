//! In-process hash backend.
//!
//! This module provides [`MemoryHashBackend`], an implementation of
//! [`HashBackend`] that keeps hashes in a [`BTreeMap`]. It is the backend the
//! hash store's tests run against, and it is usable for development or for
//! single-process deployments.
//!
//! # Features
//!
//! - **Thread-safe**: [`parking_lot::RwLock`] guards the data and expiry maps
//! - **Atomic batches**: [`exec`](HashBackend::exec) applies under both write locks
//! - **Key expiry**: expired keys read as missing; a background task reclaims them
//! - **Optional search**: numeric range, sort and limit over indexed hashes; can be disabled
//!   to model a backend without a search module
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - Expired-key cleanup runs every second, so reclamation is not precise
//! - Search scans every indexed hash

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use fanout_tenantstore::SortOrder;
use parking_lot::RwLock;
use tokio::{select, sync::watch, time::sleep};

use crate::{
    backend::{HashBackend, HashFields, HashOp, IndexDefinition, SearchQuery, SearchResult},
    error::{HashStoreError, Result},
};

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the cleanup task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// In-process [`HashBackend`].
///
/// # Cloning
///
/// `MemoryHashBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same hashes, which is how several stores with different deployment IDs
/// share one backend.
///
/// # Shutdown
///
/// The background cleanup task stops automatically when all clones are
/// dropped. Call [`shutdown`](Self::shutdown) to stop it explicitly.
#[derive(Clone)]
pub struct MemoryHashBackend {
    data: Arc<RwLock<BTreeMap<String, HashFields>>>,
    ttl_data: Arc<RwLock<BTreeMap<String, Instant>>>,
    indexes: Arc<RwLock<BTreeMap<String, IndexDefinition>>>,
    search_enabled: bool,
    shutdown_guard: Arc<ShutdownGuard>,
}

impl MemoryHashBackend {
    /// Creates an empty backend with search enabled.
    ///
    /// Spawns the expired-key cleanup task, so this must be called inside a
    /// Tokio runtime.
    ///
    /// # Example
    ///
    /// ```
    /// use fanout_tenantstore_hash::{HashBackend, MemoryHashBackend};
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let backend = MemoryHashBackend::new();
    ///     backend.hset("k", vec![("f".into(), "v".into())]).await.unwrap();
    ///     assert_eq!(backend.hlen("k").await.unwrap(), 1);
    /// }
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::with_search(true)
    }

    /// Creates an empty backend with search enabled or disabled.
    #[must_use]
    pub fn with_search(search_enabled: bool) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let backend = Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            ttl_data: Arc::new(RwLock::new(BTreeMap::new())),
            indexes: Arc::new(RwLock::new(BTreeMap::new())),
            search_enabled,
            shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }),
        };

        // The task holds the maps only, so dropping the last clone drops the guard.
        let data = Arc::clone(&backend.data);
        let ttl_data = Arc::clone(&backend.ttl_data);
        tokio::spawn(async move {
            cleanup_expired_keys(data, ttl_data, shutdown_rx).await;
        });

        backend
    }

    /// Signals the background cleanup task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_guard.shutdown_tx.send(());
    }

    /// Remaining time to live of a key, if it has one.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let ttl_guard = self.ttl_data.read();
        ttl_guard.get(key).map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Number of stored keys, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn is_expired(&self, key: &str) -> bool {
        let ttl_guard = self.ttl_data.read();
        ttl_guard.get(key).is_some_and(|at| *at <= Instant::now())
    }

    fn read<T>(&self, key: &str, f: impl FnOnce(Option<&HashFields>) -> T) -> T {
        if self.is_expired(key) {
            return f(None);
        }
        let data = self.data.read();
        f(data.get(key))
    }

    /// Applies commands under both write locks (data, then expiry).
    fn apply(&self, ops: Vec<HashOp>) {
        let now = Instant::now();
        let mut data = self.data.write();
        let mut ttl = self.ttl_data.write();

        for op in ops {
            let key = op.key().to_string();
            if ttl.get(&key).is_some_and(|at| *at <= now) {
                data.remove(&key);
                ttl.remove(&key);
            }

            match op {
                HashOp::HSet { key, fields } => {
                    data.entry(key).or_default().extend(fields);
                },
                HashOp::HDel { key, fields } => {
                    if let Some(hash) = data.get_mut(&key) {
                        for field in &fields {
                            hash.remove(field);
                        }
                        if hash.is_empty() {
                            data.remove(&key);
                            ttl.remove(&key);
                        }
                    }
                },
                HashOp::Del { key } => {
                    data.remove(&key);
                    ttl.remove(&key);
                },
                HashOp::Expire { key, ttl: duration } => {
                    if data.contains_key(&key) {
                        ttl.insert(key, now + duration);
                    }
                },
                HashOp::Persist { key } => {
                    ttl.remove(&key);
                },
            }
        }
    }
}

impl Default for MemoryHashBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryHashBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHashBackend")
            .field("keys", &self.len())
            .field("search_enabled", &self.search_enabled)
            .finish_non_exhaustive()
    }
}

/// Removes expired keys every second until shut down.
async fn cleanup_expired_keys(
    data: Arc<RwLock<BTreeMap<String, HashFields>>>,
    ttl_data: Arc<RwLock<BTreeMap<String, Instant>>>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    loop {
        select! {
            _ = sleep(Duration::from_secs(1)) => {}
            _ = shutdown_rx.changed() => {
                return;
            }
        }

        let now = Instant::now();
        let expired: Vec<String> = {
            let ttl_guard = ttl_data.read();
            ttl_guard.iter().filter(|(_, at)| **at <= now).map(|(k, _)| k.clone()).collect()
        };

        if !expired.is_empty() {
            let mut data_guard = data.write();
            let mut ttl_guard = ttl_data.write();
            for key in expired {
                // Re-check: the key may have been persisted since the scan.
                if ttl_guard.get(&key).is_some_and(|at| *at <= now) {
                    data_guard.remove(&key);
                    ttl_guard.remove(&key);
                }
            }
        }
    }
}

fn sort_value(fields: &HashFields, field: &str) -> Option<i64> {
    let raw = fields.get(field)?;
    std::str::from_utf8(raw).ok()?.parse().ok()
}

#[async_trait]
impl HashBackend for MemoryHashBackend {
    async fn hgetall(&self, key: &str) -> Result<HashFields> {
        Ok(self.read(key, |hash| hash.cloned().unwrap_or_default()))
    }

    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<HashFields>> {
        Ok(keys.iter().map(|key| self.read(key, |hash| hash.cloned().unwrap_or_default())).collect())
    }

    async fn hset(&self, key: &str, fields: Vec<(String, Bytes)>) -> Result<()> {
        self.apply(vec![HashOp::HSet { key: key.to_string(), fields }]);
        Ok(())
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<()> {
        let fields = fields.iter().map(ToString::to_string).collect();
        self.apply(vec![HashOp::HDel { key: key.to_string(), fields }]);
        Ok(())
    }

    async fn hlen(&self, key: &str) -> Result<usize> {
        Ok(self.read(key, |hash| hash.map_or(0, BTreeMap::len)))
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.read(key, |hash| hash.map(|h| h.keys().cloned().collect()).unwrap_or_default()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read(key, |hash| hash.is_some()))
    }

    async fn persist(&self, key: &str) -> Result<()> {
        self.apply(vec![HashOp::Persist { key: key.to_string() }]);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.apply(vec![HashOp::Expire { key: key.to_string(), ttl }]);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.apply(vec![HashOp::Del { key: key.to_string() }]);
        Ok(())
    }

    async fn exec(&self, ops: Vec<HashOp>) -> Result<()> {
        self.apply(ops);
        Ok(())
    }

    async fn supports_search(&self) -> bool {
        self.search_enabled
    }

    async fn ensure_index(&self, index: &IndexDefinition) -> Result<()> {
        if !self.search_enabled {
            return Err(HashStoreError::SearchUnsupported);
        }
        self.indexes.write().entry(index.name.clone()).or_insert_with(|| index.clone());
        Ok(())
    }

    async fn search(&self, index: &str, query: &SearchQuery) -> Result<SearchResult> {
        if !self.search_enabled {
            return Err(HashStoreError::SearchUnsupported);
        }
        let definition = self
            .indexes
            .read()
            .get(index)
            .cloned()
            .ok_or_else(|| HashStoreError::UnknownIndex(index.to_string()))?;

        let now = Instant::now();
        let expired: Vec<String> = {
            let ttl_guard = self.ttl_data.read();
            ttl_guard.iter().filter(|(_, at)| **at <= now).map(|(k, _)| k.clone()).collect()
        };

        let mut hits: Vec<(i64, String, HashFields)> = {
            let data = self.data.read();
            data.range(definition.prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&definition.prefix))
                .filter(|(key, _)| !expired.contains(key))
                .filter(|(_, fields)| {
                    fields.get("entity").is_some_and(|e| e.as_ref() == definition.entity.as_bytes())
                })
                .filter(|(_, fields)| {
                    query.without_field.as_ref().is_none_or(|f| !fields.contains_key(f))
                })
                .filter_map(|(key, fields)| {
                    let value = sort_value(fields, &definition.sort_field)?;
                    query
                        .range
                        .is_none_or(|r| r.contains(value))
                        .then(|| (value, key.clone(), fields.clone()))
                })
                .collect()
        };

        match query.sort {
            SortOrder::Asc => hits.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1))),
            SortOrder::Desc => hits.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1))),
        }

        let total = hits.len();
        let docs = hits.into_iter().take(query.limit).map(|(_, key, fields)| (key, fields)).collect();
        Ok(SearchResult { total, docs })
    }
}
