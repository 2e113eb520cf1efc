//! [`TenantStore`] over a [`HashBackend`].
//!
//! Each tenant and each destination is one hash. Next to the destination
//! records, every tenant has a summary hash (destination ID → serialized
//! [`DestinationSummary`](fanout_tenantstore::DestinationSummary)) that is
//! written in the same atomic batch as the record. Matching, counting and
//! topic aggregation read only the summary hash, so they never touch or
//! decrypt the full records.
//!
//! Deletes are soft: the record gets a `deleted_at` field and an expiry of
//! the configured tombstone TTL, and the destination leaves the summary hash
//! at once. An upsert clears both the field and the expiry.
//!
//! Tenant listing needs the backend's search capability. [`init`] probes for
//! it and creates the index; without it [`list_tenant`] reports
//! [`TenantStoreError::ListTenantNotSupported`].
//!
//! [`init`]: TenantStore::init
//! [`list_tenant`]: TenantStore::list_tenant

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use fanout_tenantstore::{
    Cipher, Destination, DestinationSummary, Event, ListDestinationByTenantOpts,
    ListTenantRequest, SeekPagination, SortOrder, Tenant, TenantCursorCodec,
    TenantPaginatedResult, TenantPosition, TenantStore, TenantStoreConfig, TenantStoreError,
    TenantStoreResult, aggregate_topics,
    pagination::{self, Comparison, QueryInput},
};

use crate::{
    backend::{HashBackend, HashOp, IndexDefinition, NumericRange, SearchQuery},
    keys::KeySpace,
    serialization::{self, CREATED_AT, DELETED_AT, TENANT_ENTITY},
};

/// Page size used when reading every tenant created in one millisecond.
const TIED_BATCH: usize = 100;

/// Hash-record [`TenantStore`].
///
/// # Example
///
/// ```
/// use fanout_tenantstore::{Tenant, TenantStore, TenantStoreConfig};
/// use fanout_tenantstore_hash::{HashTenantStore, MemoryHashBackend};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = TenantStoreConfig::builder().secret("0123456789abcdef").deployment_id("dp_001").build()?;
///     let store = HashTenantStore::new(MemoryHashBackend::new(), &config);
///     store.init().await?;
///
///     store.upsert_tenant(Tenant::new("t1")).await?;
///     assert!(store.retrieve_tenant("t1").await?.is_some());
///     Ok(())
/// }
/// ```
pub struct HashTenantStore<B> {
    backend: B,
    keys: KeySpace,
    cipher: Cipher,
    max_destinations_per_tenant: usize,
    tombstone_ttl: Duration,
    list_tenant_supported: AtomicBool,
}

impl<B: HashBackend> HashTenantStore<B> {
    /// Creates a store over `backend`. Call [`init`](TenantStore::init) before use.
    #[must_use]
    pub fn new(backend: B, config: &TenantStoreConfig) -> Self {
        Self {
            backend,
            keys: KeySpace::new(config.deployment_id()),
            cipher: Cipher::new(config.secret()),
            max_destinations_per_tenant: config.max_destinations_per_tenant(),
            tombstone_ttl: config.tombstone_ttl(),
            list_tenant_supported: AtomicBool::new(false),
        }
    }

    /// The underlying backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The key layout of this store's deployment namespace.
    #[must_use]
    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    fn tenant_index(&self) -> IndexDefinition {
        IndexDefinition::builder()
            .name(self.keys.tenant_index())
            .prefix(self.keys.tenant_prefix())
            .entity(TENANT_ENTITY)
            .sort_field(CREATED_AT)
            .filter_fields(vec![DELETED_AT.to_string()])
            .build()
    }

    fn tombstone(&self, key: String, now_millis: i64) -> [HashOp; 2] {
        [
            HashOp::hset(key.clone(), DELETED_AT, now_millis.to_string()),
            HashOp::Expire { key, ttl: self.tombstone_ttl },
        ]
    }

    async fn summaries(&self, tenant_id: &str) -> TenantStoreResult<Vec<DestinationSummary>> {
        let key = self.keys.destination_summaries(tenant_id);
        let fields = self.backend.hgetall(&key).await?;
        Ok(serialization::decode_summaries(&key, &fields)?)
    }

    /// Live tenants whose `created_at` lies in `range`, in `sort` order.
    ///
    /// The second value is `true` when more documents matched than `limit`.
    async fn search_tenants(
        &self,
        range: Option<NumericRange>,
        sort: SortOrder,
        limit: usize,
    ) -> TenantStoreResult<(Vec<Tenant>, bool)> {
        let query = SearchQuery::builder()
            .without_field(DELETED_AT)
            .maybe_range(range)
            .sort(sort)
            .limit(limit)
            .build();
        let result = self.backend.search(&self.keys.tenant_index(), &query).await?;
        let truncated = result.total > result.docs.len();

        let mut tenants = Vec::with_capacity(result.docs.len());
        for (key, fields) in &result.docs {
            match serialization::decode_tenant(key, fields) {
                Ok(tenant) => tenants.push(tenant),
                Err(err) => tracing::warn!(key = %key, error = %err, "skipping undecodable tenant"),
            }
        }
        Ok((tenants, truncated))
    }

    /// Every live tenant created in millisecond `ms`.
    async fn tenants_created_at(&self, ms: i64) -> TenantStoreResult<Vec<Tenant>> {
        let range = Some(NumericRange::exactly(ms));
        let (tenants, truncated) = self.search_tenants(range, SortOrder::Asc, TIED_BATCH).await?;
        if !truncated {
            return Ok(tenants);
        }
        let total = self.search_count(range).await?;
        Ok(self.search_tenants(range, SortOrder::Asc, total).await?.0)
    }

    // The index sorts on `created_at` alone and orders ties arbitrarily, so
    // the millisecond at each end of the page is read whole and ordered by ID
    // here.
    async fn fetch_tenants(&self, q: QueryInput) -> TenantStoreResult<Vec<Tenant>> {
        let cursor = q.cursor_pos.as_deref().map(TenantPosition::parse).transpose()?;

        let mut rows: Vec<Tenant> = Vec::new();
        let mut range = Some(NumericRange::default());
        if let Some(cursor) = &cursor {
            rows = self
                .tenants_created_at(cursor.created_at_ms)
                .await?
                .into_iter()
                .filter(|t| q.compare.admits(&TenantPosition::of(t), cursor))
                .collect();
            // An overflowing bound means nothing lies strictly beyond the cursor.
            range = match q.compare {
                Comparison::LessThan => cursor
                    .created_at_ms
                    .checked_sub(1)
                    .map(|max| NumericRange { min: None, max: Some(max) }),
                Comparison::GreaterThan => cursor
                    .created_at_ms
                    .checked_add(1)
                    .map(|min| NumericRange { min: Some(min), max: None }),
            };
        }

        if let Some(range) = range.filter(|_| rows.len() < q.limit) {
            let (mut beyond, truncated) =
                self.search_tenants(Some(range), q.sort, q.limit - rows.len()).await?;
            let edge = beyond.last().map(|t| t.created_at.timestamp_millis());
            if let (true, Some(edge)) = (truncated, edge) {
                beyond.retain(|t| t.created_at.timestamp_millis() != edge);
                beyond.extend(self.tenants_created_at(edge).await?);
            }
            rows.extend(beyond);
        }

        rows.sort_by_cached_key(TenantPosition::of);
        if q.sort == SortOrder::Desc {
            rows.reverse();
        }
        rows.truncate(q.limit);
        Ok(rows)
    }

    async fn search_count(&self, range: Option<NumericRange>) -> TenantStoreResult<usize> {
        let query = SearchQuery::builder().without_field(DELETED_AT).maybe_range(range).limit(0).build();
        Ok(self.backend.search(&self.keys.tenant_index(), &query).await?.total)
    }

    async fn count_tenants(&self) -> TenantStoreResult<usize> {
        self.search_count(None).await
    }

    async fn enrich(&self, tenants: &mut [Tenant]) -> TenantStoreResult<()> {
        let keys: Vec<String> =
            tenants.iter().map(|t| self.keys.destination_summaries(&t.id)).collect();
        let hashes = self.backend.hgetall_many(&keys).await?;
        for ((tenant, key), fields) in tenants.iter_mut().zip(&keys).zip(&hashes) {
            let summaries = serialization::decode_summaries(key, fields)?;
            tenant.destinations_count = summaries.len();
            tenant.topics = aggregate_topics(summaries.iter().map(|s| &s.topics));
        }
        Ok(())
    }
}

impl<B> std::fmt::Debug for HashTenantStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashTenantStore")
            .field("keys", &self.keys)
            .field("max_destinations_per_tenant", &self.max_destinations_per_tenant)
            .field("tombstone_ttl", &self.tombstone_ttl)
            .field("list_tenant_supported", &self.list_tenant_supported.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<B: HashBackend> TenantStore for HashTenantStore<B> {
    #[tracing::instrument(skip(self))]
    async fn init(&self) -> TenantStoreResult<()> {
        let supported = if self.backend.supports_search().await {
            match self.backend.ensure_index(&self.tenant_index()).await {
                Ok(()) => true,
                Err(err) => {
                    tracing::info!(error = %err, "tenant index unavailable; listing disabled");
                    false
                },
            }
        } else {
            tracing::info!("backend has no search capability; listing disabled");
            false
        };
        tracing::debug!(supported, "probed tenant listing capability");
        self.list_tenant_supported.store(supported, Ordering::Release);
        Ok(())
    }

    fn supports_list_tenant(&self) -> bool {
        self.list_tenant_supported.load(Ordering::Acquire)
    }

    #[tracing::instrument(skip(self))]
    async fn retrieve_tenant(&self, tenant_id: &str) -> TenantStoreResult<Option<Tenant>> {
        let tenant_key = self.keys.tenant(tenant_id);
        let summary_key = self.keys.destination_summaries(tenant_id);
        let mut hashes = self.backend.hgetall_many(&[tenant_key.clone(), summary_key.clone()]).await?;
        let summary_fields = hashes.pop().unwrap_or_default();
        let tenant_fields = hashes.pop().unwrap_or_default();

        if tenant_fields.is_empty() {
            return Ok(None);
        }
        if serialization::is_deleted(&tenant_fields) {
            return Err(TenantStoreError::TenantDeleted);
        }

        let mut tenant = serialization::decode_tenant(&tenant_key, &tenant_fields)?;
        let summaries = serialization::decode_summaries(&summary_key, &summary_fields)?;
        tenant.destinations_count = summaries.len();
        tenant.topics = aggregate_topics(summaries.iter().map(|s| &s.topics));
        Ok(Some(tenant))
    }

    #[tracing::instrument(skip(self, tenant), fields(tenant_id = %tenant.id))]
    async fn upsert_tenant(&self, mut tenant: Tenant) -> TenantStoreResult<()> {
        tenant.fill_timestamps(Utc::now());
        let ops = serialization::tenant_ops(&self.keys.tenant(&tenant.id), &tenant)?;
        self.backend.exec(ops).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_tenant(&self, tenant_id: &str) -> TenantStoreResult<()> {
        let tenant_key = self.keys.tenant(tenant_id);
        if !self.backend.exists(&tenant_key).await? {
            return Err(TenantStoreError::TenantNotFound);
        }

        let summary_key = self.keys.destination_summaries(tenant_id);
        let destination_ids = self.backend.hkeys(&summary_key).await?;

        let now = Utc::now().timestamp_millis();
        let mut ops = Vec::with_capacity(destination_ids.len() * 2 + 3);
        for destination_id in &destination_ids {
            ops.extend(self.tombstone(self.keys.destination(tenant_id, destination_id), now));
        }
        ops.push(HashOp::Del { key: summary_key });
        ops.extend(self.tombstone(tenant_key, now));
        self.backend.exec(ops).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_tenant(
        &self,
        request: ListTenantRequest,
    ) -> TenantStoreResult<TenantPaginatedResult> {
        if !self.supports_list_tenant() {
            return Err(TenantStoreError::ListTenantNotSupported);
        }
        let page_request = request.to_page_request()?;
        let (limit, dir) = (page_request.limit, page_request.order);

        let page =
            pagination::run(page_request, &TenantCursorCodec, |q| self.fetch_tenants(q)).await?;
        let mut models = page.items;
        self.enrich(&mut models).await?;
        let count = self.count_tenants().await?;

        Ok(TenantPaginatedResult {
            models,
            pagination: SeekPagination {
                order_by: CREATED_AT.into(),
                dir,
                limit,
                next: page.next,
                prev: page.prev,
            },
            count,
        })
    }

    #[tracing::instrument(skip(self, opts))]
    async fn list_destination_by_tenant(
        &self,
        tenant_id: &str,
        opts: ListDestinationByTenantOpts,
    ) -> TenantStoreResult<Vec<Destination>> {
        let keys: Vec<String> = self
            .summaries(tenant_id)
            .await?
            .into_iter()
            .filter(|s| opts.includes(&s.destination_type, &s.topics))
            .map(|s| self.keys.destination(tenant_id, &s.id))
            .collect();
        let hashes = self.backend.hgetall_many(&keys).await?;

        let mut destinations = Vec::with_capacity(hashes.len());
        for (key, fields) in keys.iter().zip(&hashes) {
            if fields.is_empty() || serialization::is_deleted(fields) {
                continue;
            }
            destinations.push(serialization::decode_destination(key, tenant_id, fields, &self.cipher)?);
        }
        destinations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(destinations)
    }

    #[tracing::instrument(skip(self))]
    async fn retrieve_destination(
        &self,
        tenant_id: &str,
        destination_id: &str,
    ) -> TenantStoreResult<Option<Destination>> {
        let key = self.keys.destination(tenant_id, destination_id);
        let fields = self.backend.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        if serialization::is_deleted(&fields) {
            return Err(TenantStoreError::DestinationDeleted);
        }
        Ok(Some(serialization::decode_destination(&key, tenant_id, &fields, &self.cipher)?))
    }

    #[tracing::instrument(
        skip(self, destination),
        fields(tenant_id = %destination.tenant_id, destination_id = %destination.id)
    )]
    async fn create_destination(&self, destination: Destination) -> TenantStoreResult<()> {
        let key = self.keys.destination(&destination.tenant_id, &destination.id);
        let fields = self.backend.hgetall(&key).await?;
        if !fields.is_empty() && !serialization::is_deleted(&fields) {
            return Err(TenantStoreError::DuplicateDestination);
        }

        // Read-then-write: concurrent creates at the boundary can both pass.
        let live = self.backend.hlen(&self.keys.destination_summaries(&destination.tenant_id)).await?;
        if live >= self.max_destinations_per_tenant {
            return Err(TenantStoreError::MaxDestinationsPerTenantReached);
        }

        self.upsert_destination(destination).await
    }

    #[tracing::instrument(
        skip(self, destination),
        fields(tenant_id = %destination.tenant_id, destination_id = %destination.id)
    )]
    async fn upsert_destination(&self, mut destination: Destination) -> TenantStoreResult<()> {
        destination.fill_timestamps(Utc::now());
        let ops = serialization::destination_ops(
            &self.keys.destination(&destination.tenant_id, &destination.id),
            &self.keys.destination_summaries(&destination.tenant_id),
            &destination,
            &self.cipher,
        )?;
        self.backend.exec(ops).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_destination(
        &self,
        tenant_id: &str,
        destination_id: &str,
    ) -> TenantStoreResult<()> {
        let key = self.keys.destination(tenant_id, destination_id);
        if !self.backend.exists(&key).await? {
            return Err(TenantStoreError::DestinationNotFound);
        }

        let mut ops = vec![HashOp::hdel(self.keys.destination_summaries(tenant_id), destination_id)];
        ops.extend(self.tombstone(key, Utc::now().timestamp_millis()));
        self.backend.exec(ops).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, event), fields(tenant_id = %event.tenant_id, topic = %event.topic))]
    async fn match_event(&self, event: &Event) -> TenantStoreResult<Vec<String>> {
        Ok(self
            .summaries(&event.tenant_id)
            .await?
            .into_iter()
            .filter(|s| s.matches_event(event))
            .map(|s| s.id)
            .collect())
    }
}
