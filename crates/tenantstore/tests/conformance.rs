//! Conformance test suite for `MemoryTenantStore`.
//!
//! Each test function corresponds to a single conformance check, providing
//! fine-grained failure reporting. The `run_all` test exercises the full
//! suite as a one-liner to verify no tests are accidentally omitted.

#![allow(clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use fanout_tenantstore::{
    MemoryTenantStore,
    conformance::{self, StoreHarness},
};

struct MemoryHarness;

#[async_trait]
impl StoreHarness for MemoryHarness {
    type Store = MemoryTenantStore;

    async fn store(&self) -> MemoryTenantStore {
        MemoryTenantStore::new()
    }

    async fn store_with_max_destinations(&self, max: usize) -> MemoryTenantStore {
        MemoryTenantStore::with_max_destinations_per_tenant(max)
    }

    // Separate instances share nothing.
    async fn isolated_pair(&self) -> (MemoryTenantStore, MemoryTenantStore) {
        (MemoryTenantStore::new(), MemoryTenantStore::new())
    }
}

macro_rules! conformance_tests {
    ($($name:ident),* $(,)?) => {
        $(
            #[tokio::test]
            async fn $name() {
                conformance::$name(&MemoryTenantStore::new()).await;
            }
        )*
    };
}

// ============================================================================
// CRUD (16 tests)
// ============================================================================

conformance_tests!(
    crud_tenant_retrieve_missing_returns_none,
    crud_tenant_upsert_then_retrieve,
    crud_tenant_upsert_is_idempotent,
    crud_tenant_delete_lifecycle,
    crud_tenant_upsert_resurrects,
    crud_tenant_metadata_lifecycle,
    crud_destination_retrieve_missing_returns_none,
    crud_destination_create_then_retrieve,
    crud_destination_update,
    crud_destination_delete_lifecycle,
    crud_destination_create_after_delete,
    crud_destination_create_duplicate,
    crud_destination_optional_fields,
    crud_destination_filter_persistence,
    crud_delete_tenant_cascades,
    crud_tenant_topics_follow_destinations,
);

// ============================================================================
// List (5 tests)
// ============================================================================

conformance_tests!(
    list_destination_all,
    list_destination_by_type,
    list_destination_by_topics,
    list_destination_by_type_and_topics,
    list_destination_wildcard_filter,
);

// ============================================================================
// ListTenant (11 tests)
// ============================================================================

conformance_tests!(
    list_tenant_reports_capability,
    list_tenant_pages_forward,
    list_tenant_pages_backward,
    list_tenant_ascending,
    list_tenant_limit_normalization,
    list_tenant_rejects_invalid_input,
    list_tenant_insert_during_traversal,
    list_tenant_identical_created_at,
    list_tenant_extreme_cursor_positions,
    list_tenant_excludes_deleted,
    list_tenant_enriches_models,
);

// ============================================================================
// Match (6 tests)
// ============================================================================

conformance_tests!(
    match_by_topic,
    match_after_topic_update,
    match_with_filter,
    match_topic_checked_before_filter,
    match_skips_disabled,
    match_skips_deleted,
);

// ============================================================================
// Misc (3 tests)
// ============================================================================

#[tokio::test]
async fn misc_max_destinations_per_tenant() {
    conformance::misc_max_destinations_per_tenant(&MemoryTenantStore::with_max_destinations_per_tenant(2))
        .await;
}

#[tokio::test]
async fn misc_deployment_isolation() {
    let (a, b) = MemoryHarness.isolated_pair().await;
    conformance::misc_deployment_isolation(&a, &b).await;
}

conformance_tests!(misc_init_is_idempotent);

// ============================================================================
// Full suite
// ============================================================================

#[tokio::test]
async fn run_all() {
    conformance::run_all(&MemoryHarness).await;
}
