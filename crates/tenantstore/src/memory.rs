//! In-memory tenant store.
//!
//! This module provides [`MemoryTenantStore`], the reference implementation
//! of [`TenantStore`]. Every other backend is checked against the same
//! conformance suite it passes.
//!
//! # Features
//!
//! - **Thread-safe**: one [`parking_lot::RwLock`] guards all maps; reads share it, writes take
//!   it exclusively
//! - **Soft delete**: records carry a tombstone timestamp instead of being erased
//! - **Tenant index**: a tenant → destination-ID set keeps listing and matching proportional to
//!   the tenant's own destinations
//!
//! # Example
//!
//! ```
//! use fanout_tenantstore::{MemoryTenantStore, Tenant, TenantStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryTenantStore::new();
//!     store.upsert_tenant(Tenant::new("t1")).await.unwrap();
//!
//!     let tenant = store.retrieve_tenant("t1").await.unwrap();
//!     assert_eq!(tenant.map(|t| t.destinations_count), Some(0));
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - Tombstones are never reclaimed
//! - The single lock serializes writers across tenants; throughput-sensitive deployments should
//!   use a backend with per-record concurrency

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::{
    config::{DEFAULT_MAX_DESTINATIONS_PER_TENANT, TenantStoreConfig},
    cursor::{TenantCursorCodec, TenantPosition},
    driver::{
        ListDestinationByTenantOpts, ListTenantRequest, SeekPagination, TenantPaginatedResult,
        TenantStore,
    },
    error::{TenantStoreError, TenantStoreResult},
    models::{Destination, Event, Tenant, aggregate_topics},
    pagination::{self, QueryInput, SortOrder},
};

#[derive(Debug, Clone)]
struct TenantRecord {
    tenant: Tenant,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct DestinationRecord {
    destination: Destination,
    deleted_at: Option<DateTime<Utc>>,
}

type DestinationKey = (String, String);

#[derive(Debug, Default)]
struct State {
    tenants: BTreeMap<String, TenantRecord>,
    destinations: BTreeMap<DestinationKey, DestinationRecord>,
    /// Live destination IDs per tenant.
    dests_by_tenant: BTreeMap<String, BTreeSet<String>>,
}

impl State {
    fn live_destinations<'a>(&'a self, tenant_id: &'a str) -> impl Iterator<Item = &'a Destination> {
        self.dests_by_tenant
            .get(tenant_id)
            .into_iter()
            .flatten()
            .filter_map(move |dest_id| {
                self.destinations.get(&(tenant_id.to_string(), dest_id.clone()))
            })
            .filter(|rec| rec.deleted_at.is_none())
            .map(|rec| &rec.destination)
    }

    fn enrich(&self, mut tenant: Tenant) -> Tenant {
        tenant.destinations_count = self.dests_by_tenant.get(&tenant.id).map_or(0, BTreeSet::len);
        tenant.topics = aggregate_topics(self.live_destinations(&tenant.id).map(|d| &d.topics));
        tenant
    }

    fn upsert_destination(&mut self, mut destination: Destination) {
        destination.fill_timestamps(Utc::now());
        self.dests_by_tenant
            .entry(destination.tenant_id.clone())
            .or_default()
            .insert(destination.id.clone());
        self.destinations.insert(
            (destination.tenant_id.clone(), destination.id.clone()),
            DestinationRecord { destination, deleted_at: None },
        );
    }
}

/// In-memory [`TenantStore`].
///
/// # Cloning
///
/// `MemoryTenantStore` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying maps.
#[derive(Debug, Clone)]
pub struct MemoryTenantStore {
    state: Arc<RwLock<State>>,
    max_destinations_per_tenant: usize,
}

impl MemoryTenantStore {
    /// Creates an empty store with the default destination cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_destinations_per_tenant(DEFAULT_MAX_DESTINATIONS_PER_TENANT)
    }

    /// Creates an empty store with a custom destination cap.
    #[must_use]
    pub fn with_max_destinations_per_tenant(max_destinations_per_tenant: usize) -> Self {
        Self { state: Arc::new(RwLock::new(State::default())), max_destinations_per_tenant }
    }

    /// Creates an empty store from a configuration.
    ///
    /// Only the destination cap applies; the in-memory store holds secrets in
    /// plaintext and has no namespace to isolate.
    #[must_use]
    pub fn from_config(config: &TenantStoreConfig) -> Self {
        Self::with_max_destinations_per_tenant(config.max_destinations_per_tenant())
    }
}

impl Default for MemoryTenantStore {
    fn default() -> Self {
        Self::new()
    }
}

fn fetch_tenants(live: &[Tenant], q: &QueryInput) -> TenantStoreResult<Vec<Tenant>> {
    let cursor = q.cursor_pos.as_deref().map(TenantPosition::parse).transpose()?;

    let mut rows: Vec<(TenantPosition, &Tenant)> = live
        .iter()
        .map(|t| (TenantPosition::of(t), t))
        .filter(|(pos, _)| cursor.as_ref().is_none_or(|c| q.compare.admits(pos, c)))
        .collect();

    match q.sort {
        SortOrder::Asc => rows.sort_by(|a, b| a.0.cmp(&b.0)),
        SortOrder::Desc => rows.sort_by(|a, b| b.0.cmp(&a.0)),
    }
    rows.truncate(q.limit);
    Ok(rows.into_iter().map(|(_, t)| t.clone()).collect())
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    #[tracing::instrument(skip(self))]
    async fn init(&self) -> TenantStoreResult<()> {
        tracing::debug!("in-memory tenant store ready");
        Ok(())
    }

    fn supports_list_tenant(&self) -> bool {
        true
    }

    #[tracing::instrument(skip(self))]
    async fn retrieve_tenant(&self, tenant_id: &str) -> TenantStoreResult<Option<Tenant>> {
        let state = self.state.read();
        let Some(rec) = state.tenants.get(tenant_id) else {
            return Ok(None);
        };
        if rec.deleted_at.is_some() {
            return Err(TenantStoreError::TenantDeleted);
        }
        Ok(Some(state.enrich(rec.tenant.clone())))
    }

    #[tracing::instrument(skip(self, tenant), fields(tenant_id = %tenant.id))]
    async fn upsert_tenant(&self, mut tenant: Tenant) -> TenantStoreResult<()> {
        tenant.fill_timestamps(Utc::now());
        let mut state = self.state.write();
        state.tenants.insert(tenant.id.clone(), TenantRecord { tenant, deleted_at: None });
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_tenant(&self, tenant_id: &str) -> TenantStoreResult<()> {
        let now = Utc::now();
        let mut state = self.state.write();
        let State { tenants, destinations, dests_by_tenant } = &mut *state;

        let rec = tenants.get_mut(tenant_id).ok_or(TenantStoreError::TenantNotFound)?;
        rec.deleted_at = Some(now);

        for dest_id in dests_by_tenant.remove(tenant_id).unwrap_or_default() {
            if let Some(drec) = destinations.get_mut(&(tenant_id.to_string(), dest_id)) {
                drec.deleted_at = Some(now);
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_tenant(
        &self,
        request: ListTenantRequest,
    ) -> TenantStoreResult<TenantPaginatedResult> {
        let page_request = request.to_page_request()?;
        let (limit, dir) = (page_request.limit, page_request.order);

        // Snapshot under the lock; the guard must not live across an await.
        let live: Vec<Tenant> = {
            let state = self.state.read();
            state
                .tenants
                .values()
                .filter(|rec| rec.deleted_at.is_none())
                .map(|rec| state.enrich(rec.tenant.clone()))
                .collect()
        };
        let count = live.len();

        let page = pagination::run(page_request, &TenantCursorCodec, |q| {
            let rows = fetch_tenants(&live, &q);
            async move { rows }
        })
        .await?;

        Ok(TenantPaginatedResult {
            models: page.items,
            pagination: SeekPagination {
                order_by: "created_at".into(),
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
        let state = self.state.read();
        let mut destinations: Vec<Destination> = state
            .live_destinations(tenant_id)
            .filter(|d| opts.includes(&d.destination_type, &d.topics))
            .cloned()
            .collect();
        destinations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(destinations)
    }

    #[tracing::instrument(skip(self))]
    async fn retrieve_destination(
        &self,
        tenant_id: &str,
        destination_id: &str,
    ) -> TenantStoreResult<Option<Destination>> {
        let state = self.state.read();
        let key = (tenant_id.to_string(), destination_id.to_string());
        match state.destinations.get(&key) {
            None => Ok(None),
            Some(rec) if rec.deleted_at.is_some() => Err(TenantStoreError::DestinationDeleted),
            Some(rec) => Ok(Some(rec.destination.clone())),
        }
    }

    #[tracing::instrument(
        skip(self, destination),
        fields(tenant_id = %destination.tenant_id, destination_id = %destination.id)
    )]
    async fn create_destination(&self, destination: Destination) -> TenantStoreResult<()> {
        let mut state = self.state.write();
        let key = (destination.tenant_id.clone(), destination.id.clone());
        if state.destinations.get(&key).is_some_and(|rec| rec.deleted_at.is_none()) {
            return Err(TenantStoreError::DuplicateDestination);
        }

        // Checked under the write lock, so concurrent creates cannot overshoot.
        let live = state.dests_by_tenant.get(&destination.tenant_id).map_or(0, BTreeSet::len);
        if live >= self.max_destinations_per_tenant {
            return Err(TenantStoreError::MaxDestinationsPerTenantReached);
        }

        state.upsert_destination(destination);
        Ok(())
    }

    #[tracing::instrument(
        skip(self, destination),
        fields(tenant_id = %destination.tenant_id, destination_id = %destination.id)
    )]
    async fn upsert_destination(&self, destination: Destination) -> TenantStoreResult<()> {
        self.state.write().upsert_destination(destination);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_destination(
        &self,
        tenant_id: &str,
        destination_id: &str,
    ) -> TenantStoreResult<()> {
        let mut state = self.state.write();
        let key = (tenant_id.to_string(), destination_id.to_string());
        let rec = state.destinations.get_mut(&key).ok_or(TenantStoreError::DestinationNotFound)?;
        rec.deleted_at = Some(Utc::now());

        if let Some(ids) = state.dests_by_tenant.get_mut(tenant_id) {
            ids.remove(destination_id);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, event), fields(tenant_id = %event.tenant_id, topic = %event.topic))]
    async fn match_event(&self, event: &Event) -> TenantStoreResult<Vec<String>> {
        let state = self.state.read();
        Ok(state
            .live_destinations(&event.tenant_id)
            .filter(|d| d.matches_event(event))
            .map(|d| d.id.clone())
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::models::Topics;

    fn dest(tenant: &str, id: &str, topics: Topics) -> Destination {
        Destination {
            id: id.into(),
            tenant_id: tenant.into(),
            destination_type: "webhook".into(),
            topics,
            ..Destination::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_fills_unset_timestamps() {
        let store = MemoryTenantStore::new();
        store.upsert_tenant(Tenant::new("t1")).await.unwrap();
        let tenant = store.retrieve_tenant("t1").await.unwrap().unwrap();
        assert!(!crate::models::is_unset(&tenant.created_at));
        assert_eq!(tenant.created_at, tenant.updated_at);
    }

    #[tokio::test]
    async fn test_tenant_index_tracks_live_destinations() {
        let store = MemoryTenantStore::new();
        store.upsert_destination(dest("t1", "a", Topics::new(["x"]))).await.unwrap();
        store.upsert_destination(dest("t1", "b", Topics::new(["y"]))).await.unwrap();
        store.delete_destination("t1", "a").await.unwrap();

        let state = store.state.read();
        let ids: Vec<_> = state.dests_by_tenant["t1"].iter().cloned().collect();
        assert_eq!(ids, vec!["b"]);
        assert!(state.destinations[&("t1".to_string(), "a".to_string())].deleted_at.is_some());
    }

    #[tokio::test]
    async fn test_delete_tenant_drops_index() {
        let store = MemoryTenantStore::new();
        store.upsert_tenant(Tenant::new("t1")).await.unwrap();
        store.upsert_destination(dest("t1", "a", Topics::wildcard())).await.unwrap();
        store.delete_tenant("t1").await.unwrap();
        assert!(!store.state.read().dests_by_tenant.contains_key("t1"));
        assert!(store.match_event(&Event { tenant_id: "t1".into(), ..Event::default() }).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_creates_respect_cap() {
        let store = MemoryTenantStore::with_max_destinations_per_tenant(3);
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create_destination(dest("t1", &format!("d{i}"), Topics::wildcard())).await
            }));
        }
        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => ok += 1,
                Err(err) => assert!(matches!(err, TenantStoreError::MaxDestinationsPerTenantReached)),
            }
        }
        assert_eq!(ok, 3);
    }

    #[tokio::test]
    async fn test_list_tenant_orders_by_created_at() {
        let store = MemoryTenantStore::new();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for i in 0..3 {
            let created = base + TimeDelta::seconds(i);
            store
                .upsert_tenant(Tenant { created_at: created, updated_at: created, ..Tenant::new(format!("t{i}")) })
                .await
                .unwrap();
        }
        let page = store.list_tenant(ListTenantRequest::default()).await.unwrap();
        let ids: Vec<_> = page.models.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t1", "t0"]);
        assert_eq!(page.count, 3);
        assert_eq!(page.pagination.order_by, "created_at");
        assert_eq!(page.pagination.dir, SortOrder::Desc);
    }

    #[test]
    fn test_fetch_rejects_non_numeric_position() {
        let q = QueryInput {
            limit: 5,
            compare: pagination::Comparison::LessThan,
            sort: SortOrder::Desc,
            cursor_pos: Some("later".into()),
        };
        assert!(matches!(fetch_tenants(&[], &q), Err(TenantStoreError::InvalidCursor)));
    }
}
