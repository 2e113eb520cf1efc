//! Integration test verifying that `#[instrument]` annotations produce
//! spans for `HashTenantStore` operations.

#![allow(clippy::expect_used)]

use std::sync::Arc;

use fanout_tenantstore::{
    ListTenantRequest, TenantStore, TenantStoreConfig,
    testutil::{destination_fixture, event_fixture, tenant_fixture},
};
use fanout_tenantstore_hash::{HashTenantStore, MemoryHashBackend};
use parking_lot::Mutex;
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer, records span names as they are created
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().push(span.name().to_owned());
        }
    }
}

fn store() -> HashTenantStore<MemoryHashBackend> {
    let config = TenantStoreConfig::builder()
        .secret("span-secret")
        .deployment_id("dp_trace")
        .build()
        .expect("valid config");
    HashTenantStore::new(MemoryHashBackend::new(), &config)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tenant_operations_create_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let store = store();
    store.init().await.expect("init should succeed");
    let tenant = tenant_fixture().call();
    store.upsert_tenant(tenant.clone()).await.expect("upsert should succeed");
    store.retrieve_tenant(&tenant.id).await.expect("retrieve should succeed");
    store.list_tenant(ListTenantRequest::default()).await.expect("list should succeed");
    store.delete_tenant(&tenant.id).await.expect("delete should succeed");

    let recorded = spans.lock();
    for expected in ["init", "upsert_tenant", "retrieve_tenant", "list_tenant", "delete_tenant"] {
        assert!(recorded.iter().any(|s| s == expected), "expected a '{expected}' span, got: {recorded:?}");
    }
}

#[tokio::test]
async fn destination_operations_create_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let store = store();
    let tenant = tenant_fixture().call();
    store.upsert_tenant(tenant.clone()).await.expect("upsert tenant should succeed");
    let destination = destination_fixture().tenant_id(tenant.id.clone()).call();
    store.create_destination(destination.clone()).await.expect("create should succeed");
    store
        .list_destination_by_tenant(&tenant.id, Default::default())
        .await
        .expect("list should succeed");
    store
        .match_event(&event_fixture().tenant_id(tenant.id.clone()).call())
        .await
        .expect("match should succeed");
    store.delete_destination(&tenant.id, &destination.id).await.expect("delete should succeed");

    let recorded = spans.lock();
    for expected in [
        "create_destination",
        "upsert_destination",
        "list_destination_by_tenant",
        "match_event",
        "delete_destination",
    ] {
        assert!(recorded.iter().any(|s| s == expected), "expected a '{expected}' span, got: {recorded:?}");
    }
}
