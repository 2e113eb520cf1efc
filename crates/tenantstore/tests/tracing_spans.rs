//! Integration test verifying that every `MemoryTenantStore` operation,
//! including `init`, runs inside a span named after it.

#![allow(clippy::expect_used)]

use std::sync::Arc;

use fanout_tenantstore::{
    ListTenantRequest, MemoryTenantStore, TenantStore,
    testutil::{destination_fixture, event_fixture, tenant_fixture},
};
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

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn init_creates_span() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    MemoryTenantStore::new().init().await.expect("init should succeed");

    let recorded = spans.lock();
    assert_eq!(recorded.as_slice(), ["init"], "got: {recorded:?}");
}

#[tokio::test]
async fn store_operations_create_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let store = MemoryTenantStore::new();
    let tenant = tenant_fixture().call();
    store.upsert_tenant(tenant.clone()).await.expect("upsert tenant should succeed");
    store.retrieve_tenant(&tenant.id).await.expect("retrieve should succeed");
    store.list_tenant(ListTenantRequest::default()).await.expect("list should succeed");
    let destination = destination_fixture().tenant_id(tenant.id.clone()).call();
    store.create_destination(destination.clone()).await.expect("create should succeed");
    store
        .match_event(&event_fixture().tenant_id(tenant.id.clone()).call())
        .await
        .expect("match should succeed");
    store.delete_destination(&tenant.id, &destination.id).await.expect("delete should succeed");
    store.delete_tenant(&tenant.id).await.expect("delete tenant should succeed");

    let recorded = spans.lock();
    for expected in [
        "upsert_tenant",
        "retrieve_tenant",
        "list_tenant",
        "create_destination",
        "match_event",
        "delete_destination",
        "delete_tenant",
    ] {
        assert!(recorded.iter().any(|s| s == expected), "expected a '{expected}' span, got: {recorded:?}");
    }
}
