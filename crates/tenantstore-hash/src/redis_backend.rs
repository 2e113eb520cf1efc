//! Redis hash backend.
//!
//! This module provides [`RedisHashBackend`], an implementation of
//! [`HashBackend`] over a Redis server. Available with the `redis` feature.
//!
//! # Features
//!
//! - **Reconnecting**: commands go through a [`ConnectionManager`], which
//!   re-establishes the connection after a network failure
//! - **Atomic batches**: [`exec`](HashBackend::exec) sends one `MULTI`/`EXEC` pipeline
//! - **Search**: tenant listing uses the RediSearch module (`FT.CREATE`, `FT.SEARCH`) when the
//!   server has it loaded
//!
//! # Limitations
//!
//! - Search replies are read in RESP2 form
//! - Cluster mode is not supported; keys of one tenant share a hash tag, but
//!   the search index is per node

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use fanout_tenantstore::SortOrder;
use parking_lot::RwLock;
use redis::{Client, RedisError, Value, aio::ConnectionManager};

use crate::{
    backend::{HashBackend, HashFields, HashOp, IndexDefinition, NumericRange, SearchQuery, SearchResult},
    error::{HashStoreError, Result},
};

impl From<RedisError> for HashStoreError {
    fn from(err: RedisError) -> Self {
        HashStoreError::backend_with_source("redis command failed", err)
    }
}

/// [`HashBackend`] over a Redis server.
///
/// # Cloning
///
/// Clones share one multiplexed connection and one view of the known
/// indexes.
///
/// # Example
///
/// ```no_run
/// use fanout_tenantstore::{TenantStore, TenantStoreConfig};
/// use fanout_tenantstore_hash::{HashTenantStore, RedisHashBackend};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = RedisHashBackend::connect("redis://localhost:6379").await?;
///     let config = TenantStoreConfig::builder().secret("0123456789abcdef").deployment_id("dp_001").build()?;
///     let store = HashTenantStore::new(backend, &config);
///     store.init().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct RedisHashBackend {
    conn: ConnectionManager,
    indexes: Arc<RwLock<BTreeMap<String, IndexDefinition>>>,
}

impl std::fmt::Debug for RedisHashBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisHashBackend")
            .field("indexes", &self.indexes.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl RedisHashBackend {
    /// Connects to the server at `url` (`redis://[user:pass@]host:port[/db]`).
    ///
    /// # Errors
    ///
    /// Returns [`HashStoreError::Backend`] if the URL is malformed or the
    /// server cannot be reached.
    #[tracing::instrument]
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        tracing::debug!("connected to redis");
        Ok(Self::from_connection(conn))
    }

    /// Wraps an existing connection manager.
    #[must_use]
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn, indexes: Arc::new(RwLock::new(BTreeMap::new())) }
    }

    async fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        let mut conn = self.conn.clone();
        Ok(cmd.query_async(&mut conn).await?)
    }
}

fn to_fields(raw: BTreeMap<String, Vec<u8>>) -> HashFields {
    raw.into_iter().map(|(field, value)| (field, Bytes::from(value))).collect()
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn push_op(pipe: &mut redis::Pipeline, op: &HashOp) {
    match op {
        HashOp::HSet { key, fields } => {
            if fields.is_empty() {
                return;
            }
            let cmd = pipe.cmd("HSET").arg(key);
            for (field, value) in fields {
                cmd.arg(field).arg(value.as_ref());
            }
        },
        HashOp::HDel { key, fields } => {
            if fields.is_empty() {
                return;
            }
            pipe.cmd("HDEL").arg(key).arg(fields);
        },
        HashOp::Del { key } => {
            pipe.cmd("DEL").arg(key);
        },
        HashOp::Expire { key, ttl } => {
            pipe.cmd("PEXPIRE").arg(key).arg(ttl_millis(*ttl));
        },
        HashOp::Persist { key } => {
            pipe.cmd("PERSIST").arg(key);
        },
    }
    pipe.ignore();
}

fn create_index_cmd(index: &IndexDefinition) -> redis::Cmd {
    let mut cmd = redis::cmd("FT.CREATE");
    cmd.arg(&index.name)
        .arg("ON")
        .arg("HASH")
        .arg("PREFIX")
        .arg(1)
        .arg(&index.prefix)
        .arg("FILTER")
        .arg(format!("@entity == \"{}\"", index.entity))
        .arg("SCHEMA")
        .arg("entity")
        .arg("TAG")
        .arg(&index.sort_field)
        .arg("NUMERIC")
        .arg("SORTABLE");
    for field in &index.filter_fields {
        cmd.arg(field).arg("NUMERIC");
    }
    cmd
}

fn bound(value: Option<i64>, open: &str) -> String {
    value.map_or_else(|| open.to_string(), |v| v.to_string())
}

/// Query string selecting the documents of `query` on `sort_field`.
fn query_string(sort_field: &str, query: &SearchQuery) -> String {
    let mut clauses = Vec::new();
    if let Some(NumericRange { min, max }) = query.range {
        clauses.push(format!("@{sort_field}:[{} {}]", bound(min, "-inf"), bound(max, "+inf")));
    }
    if let Some(field) = &query.without_field {
        clauses.push(format!("-@{field}:[-inf +inf]"));
    }
    if clauses.is_empty() { "*".to_string() } else { clauses.join(" ") }
}

fn search_cmd(index: &str, sort_field: &str, query: &SearchQuery) -> redis::Cmd {
    let mut cmd = redis::cmd("FT.SEARCH");
    cmd.arg(index).arg(query_string(sort_field, query));
    if query.limit > 0 {
        let dir = match query.sort {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        cmd.arg("SORTBY").arg(sort_field).arg(dir);
    }
    cmd.arg("LIMIT").arg(0).arg(query.limit);
    cmd
}

fn malformed(what: &str) -> HashStoreError {
    HashStoreError::backend(format!("malformed FT.SEARCH reply: {what}"))
}

fn bulk_string(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::BulkString(bytes) => Some(bytes.clone()),
        Value::SimpleString(s) => Some(s.clone().into_bytes()),
        _ => None,
    }
}

/// Parses a RESP2 `FT.SEARCH` reply: `[total, key, [field, value, ...], ...]`.
fn parse_search_reply(reply: Value) -> Result<SearchResult> {
    let Value::Array(items) = reply else {
        return Err(malformed("not an array"));
    };
    let mut items = items.into_iter();
    let total = match items.next() {
        Some(Value::Int(n)) => usize::try_from(n).map_err(|_| malformed("negative total"))?,
        _ => return Err(malformed("missing total")),
    };

    let mut docs = Vec::new();
    while let Some(key) = items.next() {
        let key = bulk_string(&key)
            .and_then(|k| String::from_utf8(k).ok())
            .ok_or_else(|| malformed("document key"))?;
        let Some(Value::Array(pairs)) = items.next() else {
            return Err(malformed("document fields"));
        };
        let mut fields = HashFields::new();
        for pair in pairs.chunks(2) {
            let [name, value] = pair else {
                return Err(malformed("odd field list"));
            };
            let name = bulk_string(name)
                .and_then(|n| String::from_utf8(n).ok())
                .ok_or_else(|| malformed("field name"))?;
            let value = bulk_string(value).ok_or_else(|| malformed("field value"))?;
            fields.insert(name, Bytes::from(value));
        }
        docs.push((key, fields));
    }
    Ok(SearchResult { total, docs })
}

#[async_trait]
impl HashBackend for RedisHashBackend {
    async fn hgetall(&self, key: &str) -> Result<HashFields> {
        let raw: BTreeMap<String, Vec<u8>> = self.query(redis::cmd("HGETALL").arg(key)).await?;
        Ok(to_fields(raw))
    }

    async fn hgetall_many(&self, keys: &[String]) -> Result<Vec<HashFields>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("HGETALL").arg(key);
        }
        let mut conn = self.conn.clone();
        let raw: Vec<BTreeMap<String, Vec<u8>>> = pipe.query_async(&mut conn).await?;
        Ok(raw.into_iter().map(to_fields).collect())
    }

    async fn hset(&self, key: &str, fields: Vec<(String, Bytes)>) -> Result<()> {
        self.exec(vec![HashOp::HSet { key: key.to_string(), fields }]).await
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let _: i64 = self.query(redis::cmd("HDEL").arg(key).arg(fields)).await?;
        Ok(())
    }

    async fn hlen(&self, key: &str) -> Result<usize> {
        self.query(redis::cmd("HLEN").arg(key)).await
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>> {
        self.query(redis::cmd("HKEYS").arg(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let count: i64 = self.query(redis::cmd("EXISTS").arg(key)).await?;
        Ok(count > 0)
    }

    async fn persist(&self, key: &str) -> Result<()> {
        let _: i64 = self.query(redis::cmd("PERSIST").arg(key)).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let _: i64 = self.query(redis::cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl))).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let _: i64 = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(())
    }

    async fn exec(&self, ops: Vec<HashOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            push_op(&mut pipe, op);
        }
        let mut conn = self.conn.clone();
        let () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn supports_search(&self) -> bool {
        match self.query::<Value>(&redis::cmd("FT._LIST")).await {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(error = %err, "FT._LIST failed; search module not loaded");
                false
            },
        }
    }

    async fn ensure_index(&self, index: &IndexDefinition) -> Result<()> {
        if self.query::<Value>(redis::cmd("FT.INFO").arg(&index.name)).await.is_err() {
            let _: Value = self.query(&create_index_cmd(index)).await?;
            tracing::info!(index = %index.name, prefix = %index.prefix, "created search index");
        }
        self.indexes.write().insert(index.name.clone(), index.clone());
        Ok(())
    }

    async fn search(&self, index: &str, query: &SearchQuery) -> Result<SearchResult> {
        let sort_field = self
            .indexes
            .read()
            .get(index)
            .map(|definition| definition.sort_field.clone())
            .ok_or_else(|| HashStoreError::UnknownIndex(index.to_string()))?;
        let reply: Value = self.query(&search_cmd(index, &sort_field, query)).await?;
        parse_search_reply(reply)
    }
}
