//! Conformance test suite for [`TenantStore`] implementations.
//!
//! Every backend runs the same async checks so that callers can swap one
//! store for another without observing a difference. Each function takes a
//! fresh, initialized store (or, for the few checks that need special
//! configuration, the stores they describe) and panics on a contract
//! violation.
//!
//! # Usage
//!
//! Enable the `testutil` feature and call each conformance function with a
//! fresh store:
//!
//! ```no_run
//! use fanout_tenantstore::{MemoryTenantStore, conformance};
//!
//! #[tokio::test]
//! async fn crud_tenant_retrieve_missing_returns_none() {
//!     conformance::crud_tenant_retrieve_missing_returns_none(&MemoryTenantStore::new()).await;
//! }
//! ```
//!
//! # Test Categories
//!
//! | Category | Functions | Contract aspect |
//! |----------|-----------|-----------------|
//! | CRUD | 16 tests | Tenant and destination lifecycle, soft delete, resurrection |
//! | List | 5 tests | Destination listing with type and topic filters |
//! | ListTenant | 11 tests | Keyset pagination, tie-breaking, normalization, enrichment |
//! | Match | 6 tests | Topic, filter, disabled and deleted handling |
//! | Misc | 3 tests | Capacity, deployment isolation, idempotent init |

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{SubsecRound, TimeDelta, Utc};
use serde_json::json;

use crate::{
    assert_tenant_store_error,
    cursor::{self, TenantPosition},
    driver::{DestinationFilter, ListDestinationByTenantOpts, ListTenantRequest, TenantStore},
    models::{Destination, Event, Tenant, Topics, WILDCARD_TOPIC},
    pagination::SortOrder,
    testutil::{
        assert_destination_eq, assert_same_millis, destination_fixture, event_fixture, filter,
        now_millis, string_map, tenant_fixture, unique_id,
    },
};

/// Supplies fresh stores to [`run_all`].
///
/// Every returned store must already be initialized and must not share
/// state with stores returned earlier, except where noted.
#[async_trait]
pub trait StoreHarness: Send + Sync {
    /// The backend under test.
    type Store: TenantStore + 'static;

    /// A fresh store with default configuration.
    async fn store(&self) -> Self::Store;

    /// A fresh store capped at `max` live destinations per tenant.
    async fn store_with_max_destinations(&self, max: usize) -> Self::Store;

    /// Two stores sharing one physical backend under different deployment IDs.
    async fn isolated_pair(&self) -> (Self::Store, Self::Store);
}

fn sorted(ids: impl IntoIterator<Item = String>) -> Vec<String> {
    ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

fn ids_of(destinations: &[Destination]) -> Vec<String> {
    destinations.iter().map(|d| d.id.clone()).collect()
}

async fn match_ids<S: TenantStore>(store: &S, event: &Event) -> Vec<String> {
    sorted(store.match_event(event).await.expect("match_event"))
}

fn event_for(tenant: &Tenant, topic: &str) -> Event {
    event_fixture().tenant_id(tenant.id.clone()).topic(topic).call()
}

/// Creates a tenant with five destinations subscribed to `*`,
/// `user.created`, `user.updated`, `user.deleted` and
/// `user.created,user.updated`, created one second apart, plus a deleted
/// wildcard destination that must never be observed.
async fn setup_multi_destination<S: TenantStore>(store: &S) -> (Tenant, Vec<Destination>) {
    let tenant = tenant_fixture().call();
    store.upsert_tenant(tenant.clone()).await.expect("upsert tenant");

    let base = (Utc::now() - TimeDelta::seconds(10)).trunc_subsecs(0);
    let subscriptions: [&[&str]; 5] = [
        &[WILDCARD_TOPIC],
        &["user.created"],
        &["user.updated"],
        &["user.deleted"],
        &["user.created", "user.updated"],
    ];

    let mut destinations = Vec::new();
    for (i, topics) in subscriptions.into_iter().enumerate() {
        let destination = destination_fixture()
            .tenant_id(tenant.id.clone())
            .topics(Topics::new(topics.iter().copied()))
            .created_at(base + TimeDelta::seconds(i as i64))
            .call();
        store.create_destination(destination.clone()).await.expect("create destination");
        destinations.push(destination);
    }

    let ghost = destination_fixture().tenant_id(tenant.id.clone()).call();
    store.upsert_destination(ghost.clone()).await.expect("upsert ghost");
    store.delete_destination(&tenant.id, &ghost.id).await.expect("delete ghost");

    (tenant, destinations)
}

/// Creates `n` tenants whose `created_at` values are one second apart and
/// all in the past. Returned oldest first.
async fn setup_tenants<S: TenantStore>(store: &S, n: usize) -> Vec<Tenant> {
    let base = (Utc::now() - TimeDelta::seconds(n as i64 + 60)).trunc_subsecs(0);
    let mut tenants = Vec::with_capacity(n);
    for i in 0..n {
        let tenant = tenant_fixture().created_at(base + TimeDelta::seconds(i as i64)).call();
        store.upsert_tenant(tenant.clone()).await.expect("upsert tenant");
        tenants.push(tenant);
    }
    tenants
}

fn newest_first(tenants: &[Tenant]) -> Vec<String> {
    tenants.iter().rev().map(|t| t.id.clone()).collect()
}

// ============================================================================
// CRUD: Tenant and destination lifecycle (16 tests)
// ============================================================================

/// Retrieving a tenant that never existed returns `Ok(None)`.
pub async fn crud_tenant_retrieve_missing_returns_none<S: TenantStore>(store: &S) {
    let result = store.retrieve_tenant(&unique_id("tnt")).await;
    assert!(matches!(result, Ok(None)), "missing tenant should be None: {result:?}");
}

/// An upserted tenant reads back with zero derived counts.
pub async fn crud_tenant_upsert_then_retrieve<S: TenantStore>(store: &S) {
    let tenant = tenant_fixture().call();
    store.upsert_tenant(tenant.clone()).await.expect("upsert");

    let got = store.retrieve_tenant(&tenant.id).await.expect("retrieve").expect("tenant exists");
    assert_eq!(got.id, tenant.id);
    assert_eq!(got.destinations_count, 0);
    assert!(got.topics.is_empty(), "no destinations means no topics: {:?}", got.topics);
    assert_eq!(got.metadata, None);
    assert_same_millis(tenant.created_at, got.created_at, "created_at");
    assert_same_millis(tenant.updated_at, got.updated_at, "updated_at");
}

/// Repeating an identical upsert leaves identical state.
pub async fn crud_tenant_upsert_is_idempotent<S: TenantStore>(store: &S) {
    let tenant = tenant_fixture().metadata(string_map([("env", "prod")])).call();
    store.upsert_tenant(tenant.clone()).await.expect("first upsert");
    let first = store.retrieve_tenant(&tenant.id).await.expect("retrieve").expect("exists");
    store.upsert_tenant(tenant.clone()).await.expect("second upsert");
    let second = store.retrieve_tenant(&tenant.id).await.expect("retrieve").expect("exists");
    assert_eq!(first, second);
}

/// Delete tombstones a tenant, is idempotent, and reports absent tenants.
pub async fn crud_tenant_delete_lifecycle<S: TenantStore>(store: &S) {
    let tenant = tenant_fixture().call();
    store.upsert_tenant(tenant.clone()).await.expect("upsert");
    store.delete_tenant(&tenant.id).await.expect("delete");

    let result = store.retrieve_tenant(&tenant.id).await;
    assert_tenant_store_error!(result, TenantDeleted);

    let again = store.delete_tenant(&tenant.id).await;
    assert!(again.is_ok(), "second delete should succeed: {again:?}");

    let missing = store.delete_tenant(&unique_id("tnt")).await;
    assert_tenant_store_error!(missing, TenantNotFound);
}

/// Upserting a deleted tenant resurrects it.
pub async fn crud_tenant_upsert_resurrects<S: TenantStore>(store: &S) {
    let tenant = tenant_fixture().call();
    store.upsert_tenant(tenant.clone()).await.expect("upsert");
    store.delete_tenant(&tenant.id).await.expect("delete");
    store.upsert_tenant(tenant.clone()).await.expect("resurrect");

    let got = store.retrieve_tenant(&tenant.id).await.expect("retrieve");
    assert_eq!(got.map(|t| t.id), Some(tenant.id));
}

/// Tenant metadata can be set, replaced and cleared.
pub async fn crud_tenant_metadata_lifecycle<S: TenantStore>(store: &S) {
    let mut tenant = tenant_fixture().metadata(string_map([("env", "prod"), ("tier", "gold")])).call();
    store.upsert_tenant(tenant.clone()).await.expect("upsert with metadata");
    let got = store.retrieve_tenant(&tenant.id).await.expect("retrieve").expect("exists");
    assert_eq!(got.metadata, tenant.metadata);

    tenant.metadata = Some(string_map([("env", "staging")]));
    store.upsert_tenant(tenant.clone()).await.expect("update metadata");
    let got = store.retrieve_tenant(&tenant.id).await.expect("retrieve").expect("exists");
    assert_eq!(got.metadata, Some(string_map([("env", "staging")])));

    tenant.metadata = None;
    store.upsert_tenant(tenant.clone()).await.expect("clear metadata");
    let got = store.retrieve_tenant(&tenant.id).await.expect("retrieve").expect("exists");
    assert_eq!(got.metadata, None);
}

/// Retrieving a destination that never existed returns `Ok(None)`.
pub async fn crud_destination_retrieve_missing_returns_none<S: TenantStore>(store: &S) {
    let result = store.retrieve_destination("test-tenant", &unique_id("des")).await;
    assert!(matches!(result, Ok(None)), "missing destination should be None: {result:?}");
}

/// A created destination reads back field for field.
pub async fn crud_destination_create_then_retrieve<S: TenantStore>(store: &S) {
    let tenant = tenant_fixture().call();
    store.upsert_tenant(tenant.clone()).await.expect("upsert tenant");
    let destination = destination_fixture()
        .tenant_id(tenant.id.clone())
        .topics(Topics::new(["user.created", "user.updated"]))
        .credentials(string_map([("secret", "s3cr3t"), ("token", "abc")]))
        .delivery_metadata(string_map([("X-Source", "fanout")]))
        .metadata(string_map([("team", "billing")]))
        .call();
    store.create_destination(destination.clone()).await.expect("create");

    let got = store
        .retrieve_destination(&tenant.id, &destination.id)
        .await
        .expect("retrieve")
        .expect("destination exists");
    assert_destination_eq(&destination, &got);
}

/// Upserting an existing destination replaces its fields.
pub async fn crud_destination_update<S: TenantStore>(store: &S) {
    let mut destination = destination_fixture().tenant_id(unique_id("tnt")).call();
    store.create_destination(destination.clone()).await.expect("create");

    destination.topics = Topics::new(["order.created"]);
    destination.config = string_map([("url", "https://example.com/hook")]);
    destination.delivery_metadata = Some(string_map([("X-Version", "2")]));
    destination.metadata = Some(string_map([("owner", "ops")]));
    destination.updated_at = now_millis();
    store.upsert_destination(destination.clone()).await.expect("update");

    let got = store
        .retrieve_destination(&destination.tenant_id, &destination.id)
        .await
        .expect("retrieve")
        .expect("exists");
    assert_destination_eq(&destination, &got);
}

/// Delete tombstones a destination, is idempotent, and reports absent ones.
pub async fn crud_destination_delete_lifecycle<S: TenantStore>(store: &S) {
    let destination = destination_fixture().tenant_id(unique_id("tnt")).call();
    store.create_destination(destination.clone()).await.expect("create");
    store.delete_destination(&destination.tenant_id, &destination.id).await.expect("delete");

    let result = store.retrieve_destination(&destination.tenant_id, &destination.id).await;
    assert_tenant_store_error!(result, DestinationDeleted);

    let again = store.delete_destination(&destination.tenant_id, &destination.id).await;
    assert!(again.is_ok(), "second delete should succeed: {again:?}");

    let missing = store.delete_destination(&destination.tenant_id, &unique_id("des")).await;
    assert_tenant_store_error!(missing, DestinationNotFound);
}

/// A deleted destination ID can be created again.
pub async fn crud_destination_create_after_delete<S: TenantStore>(store: &S) {
    let destination = destination_fixture().tenant_id(unique_id("tnt")).call();
    store.create_destination(destination.clone()).await.expect("create");
    store.delete_destination(&destination.tenant_id, &destination.id).await.expect("delete");
    store.create_destination(destination.clone()).await.expect("re-create");

    let got = store.retrieve_destination(&destination.tenant_id, &destination.id).await;
    assert!(matches!(got, Ok(Some(_))), "re-created destination should be live: {got:?}");
}

/// Creating over a live destination fails.
pub async fn crud_destination_create_duplicate<S: TenantStore>(store: &S) {
    let destination = destination_fixture().tenant_id(unique_id("tnt")).call();
    store.create_destination(destination.clone()).await.expect("create");
    let result = store.create_destination(destination).await;
    assert_tenant_store_error!(result, DuplicateDestination);
}

/// Unset optional fields stay unset, and `disabled_at` round-trips.
pub async fn crud_destination_optional_fields<S: TenantStore>(store: &S) {
    let mut destination = destination_fixture().tenant_id(unique_id("tnt")).call();
    store.create_destination(destination.clone()).await.expect("create");
    let got = store
        .retrieve_destination(&destination.tenant_id, &destination.id)
        .await
        .expect("retrieve")
        .expect("exists");
    assert_eq!(got.delivery_metadata, None);
    assert_eq!(got.metadata, None);
    assert_eq!(got.disabled_at, None);
    assert!(got.effective_filter().is_none());

    let disabled_at = now_millis();
    destination.disabled_at = Some(disabled_at);
    store.upsert_destination(destination.clone()).await.expect("disable");
    let got = store
        .retrieve_destination(&destination.tenant_id, &destination.id)
        .await
        .expect("retrieve")
        .expect("exists");
    assert_eq!(got.disabled_at.map(|t| t.timestamp_millis()), Some(disabled_at.timestamp_millis()));

    destination.disabled_at = None;
    store.upsert_destination(destination.clone()).await.expect("enable");
    let got = store
        .retrieve_destination(&destination.tenant_id, &destination.id)
        .await
        .expect("retrieve")
        .expect("exists");
    assert_eq!(got.disabled_at, None);
}

/// Content filters persist through set, update and removal.
pub async fn crud_destination_filter_persistence<S: TenantStore>(store: &S) {
    let mut destination = destination_fixture()
        .tenant_id(unique_id("tnt"))
        .filter(filter(json!({"data": {"type": "order.created"}})))
        .call();
    store.create_destination(destination.clone()).await.expect("create");
    let got = store
        .retrieve_destination(&destination.tenant_id, &destination.id)
        .await
        .expect("retrieve")
        .expect("exists");
    assert_eq!(got.effective_filter(), destination.effective_filter());

    destination.filter = Some(filter(json!({"data": {"amount": {"$gte": 100}}})));
    store.upsert_destination(destination.clone()).await.expect("update filter");
    let got = store
        .retrieve_destination(&destination.tenant_id, &destination.id)
        .await
        .expect("retrieve")
        .expect("exists");
    assert_eq!(got.effective_filter(), destination.effective_filter());

    destination.filter = None;
    store.upsert_destination(destination.clone()).await.expect("remove filter");
    let got = store
        .retrieve_destination(&destination.tenant_id, &destination.id)
        .await
        .expect("retrieve")
        .expect("exists");
    assert!(got.effective_filter().is_none(), "filter should be gone: {:?}", got.filter);
}

/// Deleting a tenant deletes every destination it owns.
pub async fn crud_delete_tenant_cascades<S: TenantStore>(store: &S) {
    let (tenant, destinations) = setup_multi_destination(store).await;
    store.delete_tenant(&tenant.id).await.expect("delete tenant");

    for destination in &destinations {
        let result = store.retrieve_destination(&tenant.id, &destination.id).await;
        assert_tenant_store_error!(result, DestinationDeleted, destination.id.as_str());
    }
    let matched = store.match_event(&event_for(&tenant, "user.created")).await.expect("match");
    assert!(matched.is_empty(), "deleted tenant should match nothing: {matched:?}");
}

/// Tenant topics and counts are derived from live destinations.
pub async fn crud_tenant_topics_follow_destinations<S: TenantStore>(store: &S) {
    let (tenant, destinations) = setup_multi_destination(store).await;

    let got = store.retrieve_tenant(&tenant.id).await.expect("retrieve").expect("exists");
    assert_eq!(got.destinations_count, 5);
    assert_eq!(got.topics, vec![WILDCARD_TOPIC.to_string()]);

    let all_three = vec!["user.created", "user.deleted", "user.updated"];
    let expected: [(usize, Vec<&str>); 5] = [
        (4, all_three.clone()),
        (3, all_three.clone()),
        (2, all_three),
        (1, vec!["user.created", "user.updated"]),
        (0, vec![]),
    ];
    for (destination, (count, topics)) in destinations.iter().zip(expected) {
        store.delete_destination(&tenant.id, &destination.id).await.expect("delete destination");
        let got = store.retrieve_tenant(&tenant.id).await.expect("retrieve").expect("exists");
        assert_eq!(got.destinations_count, count, "after deleting {}", destination.id);
        assert_eq!(got.topics, topics, "after deleting {}", destination.id);
    }
}

// ============================================================================
// List: destination listing with filters (5 tests)
// ============================================================================

/// Without a filter every live destination is listed, oldest first.
pub async fn list_destination_all<S: TenantStore>(store: &S) {
    let (tenant, destinations) = setup_multi_destination(store).await;
    let listed = store
        .list_destination_by_tenant(&tenant.id, ListDestinationByTenantOpts::default())
        .await
        .expect("list");
    assert_eq!(ids_of(&listed), ids_of(&destinations));
}

/// Type filters select by provider.
pub async fn list_destination_by_type<S: TenantStore>(store: &S) {
    let (tenant, _) = setup_multi_destination(store).await;
    for (types, expected) in [(vec!["webhook"], 5), (vec!["rabbitmq"], 0)] {
        let opts = ListDestinationByTenantOpts::with_filter(
            DestinationFilter::builder().types(types.iter().map(ToString::to_string).collect()).build(),
        );
        let listed = store.list_destination_by_tenant(&tenant.id, opts).await.expect("list");
        assert_eq!(listed.len(), expected, "types {types:?}");
    }
}

/// Topic filters require every listed topic; wildcard destinations pass.
pub async fn list_destination_by_topics<S: TenantStore>(store: &S) {
    let (tenant, d) = setup_multi_destination(store).await;
    let cases = [
        (vec!["user.created"], vec![&d[0], &d[1], &d[4]]),
        (vec!["user.created", "user.updated"], vec![&d[0], &d[4]]),
    ];
    for (topics, expected) in cases {
        let opts = ListDestinationByTenantOpts::with_filter(
            DestinationFilter::builder().topics(topics.iter().map(ToString::to_string).collect()).build(),
        );
        let listed = store.list_destination_by_tenant(&tenant.id, opts).await.expect("list");
        let expected: Vec<String> = expected.into_iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids_of(&listed), expected, "topics {topics:?}");
    }
}

/// Type and topic filters combine.
pub async fn list_destination_by_type_and_topics<S: TenantStore>(store: &S) {
    let (tenant, _) = setup_multi_destination(store).await;
    let opts = ListDestinationByTenantOpts::with_filter(
        DestinationFilter::builder()
            .types(vec!["rabbitmq".into()])
            .topics(vec!["user.created".into(), "user.updated".into()])
            .build(),
    );
    let listed = store.list_destination_by_tenant(&tenant.id, opts).await.expect("list");
    assert!(listed.is_empty(), "no rabbitmq destinations exist: {listed:?}");
}

/// A `["*"]` topic filter selects only wildcard destinations.
pub async fn list_destination_wildcard_filter<S: TenantStore>(store: &S) {
    let (tenant, d) = setup_multi_destination(store).await;
    let opts = ListDestinationByTenantOpts::with_filter(
        DestinationFilter::builder().topics(vec![WILDCARD_TOPIC.into()]).build(),
    );
    let listed = store.list_destination_by_tenant(&tenant.id, opts).await.expect("list");
    assert_eq!(ids_of(&listed), vec![d[0].id.clone()]);
}

// ============================================================================
// ListTenant: keyset pagination (11 tests)
// ============================================================================

/// Listing either works or reports the capability as missing.
pub async fn list_tenant_reports_capability<S: TenantStore>(store: &S) {
    let result = store.list_tenant(ListTenantRequest::default()).await;
    if store.supports_list_tenant() {
        assert!(result.is_ok(), "supported listing should succeed: {result:?}");
    } else {
        assert_tenant_store_error!(result, ListTenantNotSupported);
    }
}

/// Forward traversal visits every tenant exactly once, newest first.
pub async fn list_tenant_pages_forward<S: TenantStore>(store: &S) {
    if !store.supports_list_tenant() {
        return;
    }
    let tenants = setup_tenants(store, 25).await;

    let mut seen = Vec::new();
    let mut request = ListTenantRequest { limit: 10, ..ListTenantRequest::default() };
    let mut pages = 0;
    loop {
        let page = store.list_tenant(request.clone()).await.expect("list page");
        assert_eq!(page.count, 25, "count is independent of paging");
        if pages == 0 {
            assert_eq!(page.pagination.prev, None, "first page has no prev");
        } else {
            assert!(page.pagination.prev.is_some(), "later pages have prev");
        }
        pages += 1;
        seen.extend(page.models.iter().map(|t| t.id.clone()));
        match page.pagination.next {
            Some(next) => request.next = Some(next),
            None => break,
        }
    }
    assert_eq!(pages, 3);
    assert_eq!(seen, newest_first(&tenants));
}

/// A `prev` cursor reproduces the page before it.
pub async fn list_tenant_pages_backward<S: TenantStore>(store: &S) {
    if !store.supports_list_tenant() {
        return;
    }
    let tenants = setup_tenants(store, 25).await;
    let expected = newest_first(&tenants);

    let first = store
        .list_tenant(ListTenantRequest { limit: 10, ..ListTenantRequest::default() })
        .await
        .expect("page 1");
    let second = store
        .list_tenant(ListTenantRequest { limit: 10, next: first.pagination.next.clone(), ..ListTenantRequest::default() })
        .await
        .expect("page 2");
    let third = store
        .list_tenant(ListTenantRequest { limit: 10, next: second.pagination.next.clone(), ..ListTenantRequest::default() })
        .await
        .expect("page 3");
    assert_eq!(third.models.len(), 5);
    assert_eq!(third.pagination.next, None, "last page has no next");

    let back = store
        .list_tenant(ListTenantRequest { limit: 10, prev: third.pagination.prev.clone(), ..ListTenantRequest::default() })
        .await
        .expect("back to page 2");
    let back_ids: Vec<String> = back.models.iter().map(|t| t.id.clone()).collect();
    assert_eq!(back_ids, expected[10..20].to_vec());
    assert!(back.pagination.next.is_some() && back.pagination.prev.is_some());

    let front = store
        .list_tenant(ListTenantRequest { limit: 10, prev: back.pagination.prev.clone(), ..ListTenantRequest::default() })
        .await
        .expect("back to page 1");
    let front_ids: Vec<String> = front.models.iter().map(|t| t.id.clone()).collect();
    assert_eq!(front_ids, expected[..10].to_vec());
    assert_eq!(front.pagination.prev, None, "first page has no prev");
}

/// Ascending order lists oldest first.
pub async fn list_tenant_ascending<S: TenantStore>(store: &S) {
    if !store.supports_list_tenant() {
        return;
    }
    let tenants = setup_tenants(store, 5).await;
    let page = store
        .list_tenant(ListTenantRequest { dir: Some("asc".into()), ..ListTenantRequest::default() })
        .await
        .expect("list asc");
    let ids: Vec<String> = page.models.iter().map(|t| t.id.clone()).collect();
    assert_eq!(ids, tenants.iter().map(|t| t.id.clone()).collect::<Vec<_>>());
    assert_eq!(page.pagination.dir, SortOrder::Asc);

    let default = store
        .list_tenant(ListTenantRequest { dir: Some(String::new()), ..ListTenantRequest::default() })
        .await
        .expect("list default");
    assert_eq!(default.pagination.dir, SortOrder::Desc);
    assert_eq!(default.models.first().map(|t| t.id.clone()), tenants.last().map(|t| t.id.clone()));
}

/// Limits of zero and above the maximum are normalized.
pub async fn list_tenant_limit_normalization<S: TenantStore>(store: &S) {
    if !store.supports_list_tenant() {
        return;
    }
    setup_tenants(store, 25).await;

    let page = store.list_tenant(ListTenantRequest::default()).await.expect("limit 0");
    assert_eq!(page.models.len(), 20);
    assert_eq!(page.pagination.limit, 20);

    let page = store
        .list_tenant(ListTenantRequest { limit: 1000, ..ListTenantRequest::default() })
        .await
        .expect("limit 1000");
    assert_eq!(page.models.len(), 25);
    assert_eq!(page.pagination.limit, 100);
    assert_eq!(page.pagination.next, None);
}

/// Malformed listing input yields the matching validation error.
pub async fn list_tenant_rejects_invalid_input<S: TenantStore>(store: &S) {
    if !store.supports_list_tenant() {
        return;
    }
    let result = store
        .list_tenant(ListTenantRequest { dir: Some("sideways".into()), ..ListTenantRequest::default() })
        .await;
    assert_tenant_store_error!(result, InvalidOrder);

    let result = store
        .list_tenant(ListTenantRequest {
            next: Some("a".into()),
            prev: Some("b".into()),
            ..ListTenantRequest::default()
        })
        .await;
    assert_tenant_store_error!(result, ConflictingCursors);

    for cursor in ["not-valid-base62!!!", "abc123"] {
        let result = store
            .list_tenant(ListTenantRequest { next: Some(cursor.into()), ..ListTenantRequest::default() })
            .await;
        assert_tenant_store_error!(result, InvalidCursor, cursor);
        let result = store
            .list_tenant(ListTenantRequest { prev: Some(cursor.into()), ..ListTenantRequest::default() })
            .await;
        assert_tenant_store_error!(result, InvalidCursor, cursor);
    }
}

/// A tenant inserted mid-traversal never duplicates a row.
pub async fn list_tenant_insert_during_traversal<S: TenantStore>(store: &S) {
    if !store.supports_list_tenant() {
        return;
    }
    let tenants = setup_tenants(store, 15).await;

    let first = store
        .list_tenant(ListTenantRequest { limit: 10, ..ListTenantRequest::default() })
        .await
        .expect("page 1");

    let late = tenant_fixture().call();
    store.upsert_tenant(late.clone()).await.expect("insert during traversal");

    let second = store
        .list_tenant(ListTenantRequest { limit: 10, next: first.pagination.next.clone(), ..ListTenantRequest::default() })
        .await
        .expect("page 2");

    let mut seen: Vec<String> = first.models.iter().map(|t| t.id.clone()).collect();
    seen.extend(second.models.iter().map(|t| t.id.clone()));
    let unique: BTreeSet<&String> = seen.iter().collect();
    assert_eq!(unique.len(), seen.len(), "duplicate across pages: {seen:?}");
    assert!(!seen.contains(&late.id), "newer tenant belongs before page 1");
    assert_eq!(seen, newest_first(&tenants));
    assert_eq!(second.count, 16);
}

/// Tenants sharing a `created_at` millisecond are ordered by ID and none is
/// skipped at a page boundary, in either order or direction.
pub async fn list_tenant_identical_created_at<S: TenantStore>(store: &S) {
    if !store.supports_list_tenant() {
        return;
    }
    let shared = (Utc::now() - TimeDelta::seconds(120)).trunc_subsecs(0);
    let older = tenant_fixture().created_at(shared - TimeDelta::seconds(1)).call();
    let newer = tenant_fixture().created_at(shared + TimeDelta::seconds(1)).call();
    store.upsert_tenant(older.clone()).await.expect("upsert older");
    store.upsert_tenant(newer.clone()).await.expect("upsert newer");
    let mut tied = Vec::new();
    for _ in 0..5 {
        let tenant = tenant_fixture().created_at(shared).call();
        store.upsert_tenant(tenant.clone()).await.expect("upsert tied");
        tied.push(tenant.id);
    }

    let mut oldest_first = vec![older.id.clone()];
    oldest_first.extend(sorted(tied));
    oldest_first.push(newer.id.clone());
    let mut newest_first = oldest_first.clone();
    newest_first.reverse();

    for (dir, expected) in [("desc", &newest_first), ("asc", &oldest_first)] {
        let mut pages = Vec::new();
        let mut request =
            ListTenantRequest { limit: 2, dir: Some(dir.into()), ..ListTenantRequest::default() };
        loop {
            let page = store.list_tenant(request.clone()).await.expect("list forward");
            let ids: Vec<String> = page.models.iter().map(|t| t.id.clone()).collect();
            pages.push((ids, page.pagination.prev.clone()));
            match page.pagination.next {
                Some(next) => request.next = Some(next),
                None => break,
            }
        }
        let seen: Vec<String> = pages.iter().flat_map(|(ids, _)| ids.clone()).collect();
        assert_eq!(&seen, expected, "{dir} forward traversal");

        // Walk back from the last page; each prev page equals its forward twin.
        for i in (1..pages.len()).rev() {
            let page = store
                .list_tenant(ListTenantRequest {
                    limit: 2,
                    dir: Some(dir.into()),
                    prev: pages[i].1.clone(),
                    ..ListTenantRequest::default()
                })
                .await
                .expect("list backward");
            let ids: Vec<String> = page.models.iter().map(|t| t.id.clone()).collect();
            assert_eq!(ids, pages[i - 1].0, "{dir} backward to page {}", i - 1);
        }
    }
}

/// Well-formed cursors at the ends of the timestamp range yield a full or an
/// empty page, never a failure.
pub async fn list_tenant_extreme_cursor_positions<S: TenantStore>(store: &S) {
    if !store.supports_list_tenant() {
        return;
    }
    let tenants = setup_tenants(store, 3).await;
    let oldest_first: Vec<String> = tenants.iter().map(|t| t.id.clone()).collect();
    let newest_first = newest_first(&tenants);

    let at = |ms: i64| cursor::encode_tenant_cursor(&TenantPosition { created_at_ms: ms, id: "x".into() });
    let (min, max) = (at(i64::MIN), at(i64::MAX));
    let cases = [
        ("desc", Some(&min), None, Vec::new()),
        ("desc", Some(&max), None, newest_first.clone()),
        ("desc", None, Some(&min), newest_first.clone()),
        ("desc", None, Some(&max), Vec::new()),
        ("asc", Some(&min), None, oldest_first.clone()),
        ("asc", Some(&max), None, Vec::new()),
        ("asc", None, Some(&min), Vec::new()),
        ("asc", None, Some(&max), oldest_first.clone()),
    ];
    for (dir, next, prev, expected) in cases {
        let page = store
            .list_tenant(ListTenantRequest {
                dir: Some(dir.into()),
                next: next.cloned(),
                prev: prev.cloned(),
                ..ListTenantRequest::default()
            })
            .await
            .unwrap_or_else(|err| panic!("{dir} next={next:?} prev={prev:?}: {err}"));
        let ids: Vec<String> = page.models.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, expected, "{dir} next={next:?} prev={prev:?}");
    }

    for ms in [i64::MIN, i64::MAX] {
        let stale = cursor::encode(cursor::TENANT_CURSOR_RESOURCE, 1, &ms.to_string());
        let result = store
            .list_tenant(ListTenantRequest { next: Some(stale), ..ListTenantRequest::default() })
            .await;
        assert_tenant_store_error!(result, InvalidCursor, ms);
    }
}

/// Deleted tenants are excluded from results and from the count.
pub async fn list_tenant_excludes_deleted<S: TenantStore>(store: &S) {
    if !store.supports_list_tenant() {
        return;
    }
    let tenants = setup_tenants(store, 5).await;
    store.delete_tenant(&tenants[1].id).await.expect("delete");
    store.delete_tenant(&tenants[3].id).await.expect("delete");

    let page = store.list_tenant(ListTenantRequest::default()).await.expect("list");
    assert_eq!(page.count, 3);
    let ids: Vec<String> = page.models.iter().map(|t| t.id.clone()).collect();
    assert_eq!(ids, vec![tenants[4].id.clone(), tenants[2].id.clone(), tenants[0].id.clone()]);
}

/// Listed tenants carry their derived destination count and topics.
pub async fn list_tenant_enriches_models<S: TenantStore>(store: &S) {
    if !store.supports_list_tenant() {
        return;
    }
    let tenants = setup_tenants(store, 3).await;
    for topic in ["user.created", "user.updated"] {
        let destination = destination_fixture()
            .tenant_id(tenants[1].id.clone())
            .topics(Topics::new([topic]))
            .call();
        store.create_destination(destination).await.expect("create destination");
    }

    let page = store.list_tenant(ListTenantRequest::default()).await.expect("list");
    for tenant in &page.models {
        if tenant.id == tenants[1].id {
            assert_eq!(tenant.destinations_count, 2);
            assert_eq!(tenant.topics, vec!["user.created".to_string(), "user.updated".to_string()]);
        } else {
            assert_eq!(tenant.destinations_count, 0, "tenant {}", tenant.id);
            assert!(tenant.topics.is_empty(), "tenant {}", tenant.id);
        }
    }
}

// ============================================================================
// Match: event routing (6 tests)
// ============================================================================

/// Topic matching covers wildcard, exact and multi-topic subscriptions.
pub async fn match_by_topic<S: TenantStore>(store: &S) {
    let (tenant, d) = setup_multi_destination(store).await;
    let mut event = event_for(&tenant, "user.created");
    event.destination_id = Some(d[3].id.clone());

    let matched = match_ids(store, &event).await;
    assert_eq!(matched, sorted([d[0].id.clone(), d[1].id.clone(), d[4].id.clone()]));
}

/// Changing a destination's topics changes what it matches.
pub async fn match_after_topic_update<S: TenantStore>(store: &S) {
    let (tenant, d) = setup_multi_destination(store).await;
    let mut updated = d[2].clone();
    updated.topics = Topics::new(["user.created"]);
    store.upsert_destination(updated).await.expect("update topics");

    assert_eq!(match_ids(store, &event_for(&tenant, "user.created")).await.len(), 4);
    assert_eq!(
        match_ids(store, &event_for(&tenant, "user.updated")).await,
        sorted([d[0].id.clone(), d[4].id.clone()])
    );
}

/// Content filters narrow topic matches, including nested paths.
pub async fn match_with_filter<S: TenantStore>(store: &S) {
    let tenant = tenant_fixture().call();
    store.upsert_tenant(tenant.clone()).await.expect("upsert tenant");
    let filters = [
        ("dest_no_filter", None),
        ("dest_filter_order_created", Some(json!({"data": {"type": "order.created"}}))),
        ("dest_filter_order_updated", Some(json!({"data": {"type": "order.updated"}}))),
        ("dest_filter_premium", Some(json!({"data": {"customer": {"tier": "premium"}}}))),
    ];
    for (id, schema) in filters {
        let destination = destination_fixture()
            .id(id)
            .tenant_id(tenant.id.clone())
            .maybe_filter(schema.map(filter))
            .call();
        store.create_destination(destination).await.expect("create destination");
    }

    let mut event = event_for(&tenant, "order");
    event.data = filter(json!({"type": "order.created"}));
    assert_eq!(
        match_ids(store, &event).await,
        sorted(["dest_filter_order_created".to_string(), "dest_no_filter".to_string()])
    );

    event.data = filter(json!({"type": "order.created", "customer": {"tier": "premium"}}));
    assert_eq!(
        match_ids(store, &event).await,
        sorted([
            "dest_filter_order_created".to_string(),
            "dest_filter_premium".to_string(),
            "dest_no_filter".to_string(),
        ])
    );

    event.data = filter(json!({"type": "order.refunded"}));
    assert_eq!(match_ids(store, &event).await, vec!["dest_no_filter".to_string()]);
}

/// A topic mismatch excludes a destination even when its filter matches.
pub async fn match_topic_checked_before_filter<S: TenantStore>(store: &S) {
    let tenant = tenant_fixture().call();
    store.upsert_tenant(tenant.clone()).await.expect("upsert tenant");
    let destination = destination_fixture()
        .tenant_id(tenant.id.clone())
        .topics(Topics::new(["user.created"]))
        .filter(filter(json!({"data": {"type": "order.created"}})))
        .call();
    store.create_destination(destination.clone()).await.expect("create");

    let mut event = event_for(&tenant, "order");
    event.data = filter(json!({"type": "order.created"}));
    assert!(match_ids(store, &event).await.is_empty());

    event.topic = "user.created".into();
    assert_eq!(match_ids(store, &event).await, vec![destination.id]);
}

/// Disabled destinations stop matching until re-enabled.
pub async fn match_skips_disabled<S: TenantStore>(store: &S) {
    let (tenant, d) = setup_multi_destination(store).await;
    let event = event_for(&tenant, "user.deleted");
    assert_eq!(match_ids(store, &event).await, sorted([d[0].id.clone(), d[3].id.clone()]));

    let mut wildcard = d[0].clone();
    wildcard.disabled_at = Some(now_millis());
    store.upsert_destination(wildcard.clone()).await.expect("disable");
    assert_eq!(match_ids(store, &event).await, vec![d[3].id.clone()]);

    wildcard.disabled_at = None;
    store.upsert_destination(wildcard).await.expect("enable");
    assert_eq!(match_ids(store, &event).await, sorted([d[0].id.clone(), d[3].id.clone()]));
}

/// Deleted destinations stop matching immediately.
pub async fn match_skips_deleted<S: TenantStore>(store: &S) {
    let (tenant, d) = setup_multi_destination(store).await;
    store.delete_destination(&tenant.id, &d[0].id).await.expect("delete wildcard");
    assert_eq!(
        match_ids(store, &event_for(&tenant, "user.created")).await,
        sorted([d[1].id.clone(), d[4].id.clone()])
    );
}

// ============================================================================
// Misc: capacity, isolation, init (3 tests)
// ============================================================================

/// The cap rejects one create too many and frees up after a delete.
///
/// `store` must be capped at two destinations per tenant.
pub async fn misc_max_destinations_per_tenant<S: TenantStore>(store: &S) {
    let tenant = tenant_fixture().call();
    store.upsert_tenant(tenant.clone()).await.expect("upsert tenant");
    let make = || destination_fixture().tenant_id(tenant.id.clone()).call();

    let first = make();
    store.create_destination(first.clone()).await.expect("first create");
    store.create_destination(make()).await.expect("second create");
    let result = store.create_destination(make()).await;
    assert_tenant_store_error!(result, MaxDestinationsPerTenantReached);

    store.delete_destination(&tenant.id, &first.id).await.expect("delete");
    store.create_destination(make()).await.expect("create after delete");
}

/// Stores under different deployment IDs never see each other's records.
pub async fn misc_deployment_isolation<S: TenantStore>(a: &S, b: &S) {
    let tenant_id = unique_id("tnt");
    let destination_id = unique_id("des");
    let make = |url: &str| {
        destination_fixture()
            .id(destination_id.clone())
            .tenant_id(tenant_id.clone())
            .config(string_map([("url", url)]))
            .call()
    };

    for (store, label) in [(a, "a"), (b, "b")] {
        let tenant = tenant_fixture()
            .id(tenant_id.clone())
            .metadata(string_map([("deployment", label)]))
            .call();
        store.upsert_tenant(tenant).await.expect("upsert tenant");
        store
            .create_destination(make(&format!("https://{label}.example.com")))
            .await
            .expect("create destination");
    }

    for (store, label) in [(a, "a"), (b, "b")] {
        let tenant = store.retrieve_tenant(&tenant_id).await.expect("retrieve").expect("exists");
        assert_eq!(tenant.metadata, Some(string_map([("deployment", label)])));
        assert_eq!(tenant.destinations_count, 1);
        let destination = store
            .retrieve_destination(&tenant_id, &destination_id)
            .await
            .expect("retrieve")
            .expect("exists");
        assert_eq!(destination.config.get("url"), Some(&format!("https://{label}.example.com")));
    }

    a.delete_destination(&tenant_id, &destination_id).await.expect("delete in a");
    let in_b = b.retrieve_destination(&tenant_id, &destination_id).await;
    assert!(matches!(in_b, Ok(Some(_))), "delete in a leaked into b: {in_b:?}");

    b.delete_tenant(&tenant_id).await.expect("delete tenant in b");
    let in_a = a.retrieve_tenant(&tenant_id).await;
    assert!(matches!(in_a, Ok(Some(_))), "delete in b leaked into a: {in_a:?}");
}

/// `init` may be called repeatedly.
pub async fn misc_init_is_idempotent<S: TenantStore>(store: &S) {
    for _ in 0..3 {
        store.init().await.expect("init");
    }
    let tenant = tenant_fixture().call();
    store.upsert_tenant(tenant.clone()).await.expect("upsert after init");
    store.init().await.expect("init with data");
    let got = store.retrieve_tenant(&tenant.id).await.expect("retrieve");
    assert!(got.is_some());
}

// ============================================================================
// Runner
// ============================================================================

/// Runs every conformance check against fresh stores from `harness`.
///
/// ```no_run
/// # use fanout_tenantstore::conformance::{self, StoreHarness};
/// # async fn example<H: StoreHarness>(harness: H) {
/// conformance::run_all(&harness).await;
/// # }
/// ```
pub async fn run_all<H: StoreHarness>(harness: &H) {
    // CRUD
    crud_tenant_retrieve_missing_returns_none(&harness.store().await).await;
    crud_tenant_upsert_then_retrieve(&harness.store().await).await;
    crud_tenant_upsert_is_idempotent(&harness.store().await).await;
    crud_tenant_delete_lifecycle(&harness.store().await).await;
    crud_tenant_upsert_resurrects(&harness.store().await).await;
    crud_tenant_metadata_lifecycle(&harness.store().await).await;
    crud_destination_retrieve_missing_returns_none(&harness.store().await).await;
    crud_destination_create_then_retrieve(&harness.store().await).await;
    crud_destination_update(&harness.store().await).await;
    crud_destination_delete_lifecycle(&harness.store().await).await;
    crud_destination_create_after_delete(&harness.store().await).await;
    crud_destination_create_duplicate(&harness.store().await).await;
    crud_destination_optional_fields(&harness.store().await).await;
    crud_destination_filter_persistence(&harness.store().await).await;
    crud_delete_tenant_cascades(&harness.store().await).await;
    crud_tenant_topics_follow_destinations(&harness.store().await).await;

    // List
    list_destination_all(&harness.store().await).await;
    list_destination_by_type(&harness.store().await).await;
    list_destination_by_topics(&harness.store().await).await;
    list_destination_by_type_and_topics(&harness.store().await).await;
    list_destination_wildcard_filter(&harness.store().await).await;

    // ListTenant
    list_tenant_reports_capability(&harness.store().await).await;
    list_tenant_pages_forward(&harness.store().await).await;
    list_tenant_pages_backward(&harness.store().await).await;
    list_tenant_ascending(&harness.store().await).await;
    list_tenant_limit_normalization(&harness.store().await).await;
    list_tenant_rejects_invalid_input(&harness.store().await).await;
    list_tenant_insert_during_traversal(&harness.store().await).await;
    list_tenant_identical_created_at(&harness.store().await).await;
    list_tenant_extreme_cursor_positions(&harness.store().await).await;
    list_tenant_excludes_deleted(&harness.store().await).await;
    list_tenant_enriches_models(&harness.store().await).await;

    // Match
    match_by_topic(&harness.store().await).await;
    match_after_topic_update(&harness.store().await).await;
    match_with_filter(&harness.store().await).await;
    match_topic_checked_before_filter(&harness.store().await).await;
    match_skips_disabled(&harness.store().await).await;
    match_skips_deleted(&harness.store().await).await;

    // Misc
    misc_max_destinations_per_tenant(&harness.store_with_max_destinations(2).await).await;
    let (a, b) = harness.isolated_pair().await;
    misc_deployment_isolation(&a, &b).await;
    misc_init_is_idempotent(&harness.store().await).await;
}
