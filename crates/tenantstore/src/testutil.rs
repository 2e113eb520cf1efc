//! Shared test utilities for tenant store testing.
//!
//! Fixture builders, unique ID generators and assertion macros used by the
//! conformance suite and by backend crates' own tests. Feature-gated behind
//! `testutil` to keep it out of production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! fanout-tenantstore = { path = "../tenantstore", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use fanout_tenantstore::testutil::{destination_fixture, tenant_fixture};
//!
//! let tenant = tenant_fixture().call();
//! let destination = destination_fixture().tenant_id(tenant.id.clone()).call();
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::{Map, Value};

use crate::{
    error::TenantStoreError,
    models::{Destination, Event, Filter, StringMap, Tenant, Topics},
};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Returns an ID unique within the process and very likely across processes.
///
/// Produces IDs like `"des_5f3a9c1e0b7d4a22_000017"`.
#[must_use]
pub fn unique_id(prefix: &str) -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{:016x}_{seq:06}", rand::random::<u64>())
}

/// The current time truncated to millisecond precision, the resolution every
/// backend preserves.
#[must_use]
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Builds a tenant. Unset fields get a fresh ID and the current time.
#[bon::builder]
pub fn tenant_fixture(
    #[builder(into, default = unique_id("tnt"))] id: String,
    metadata: Option<StringMap>,
    #[builder(default = now_millis())] created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
) -> Tenant {
    Tenant {
        id,
        destinations_count: 0,
        topics: Vec::new(),
        metadata,
        created_at,
        updated_at: updated_at.unwrap_or(created_at),
    }
}

/// Builds a webhook destination subscribed to every topic unless told otherwise.
#[bon::builder]
pub fn destination_fixture(
    #[builder(into, default = unique_id("des"))] id: String,
    #[builder(into, default = "test-tenant".to_string())] tenant_id: String,
    #[builder(into, default = "webhook".to_string())] destination_type: String,
    #[builder(default = Topics::wildcard())] topics: Topics,
    filter: Option<Filter>,
    #[builder(default = StringMap::from([("url".to_string(), "http://localhost:4444".to_string())]))]
    config: StringMap,
    #[builder(default)] credentials: StringMap,
    delivery_metadata: Option<StringMap>,
    metadata: Option<StringMap>,
    #[builder(default = now_millis())] created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    disabled_at: Option<DateTime<Utc>>,
) -> Destination {
    Destination {
        id,
        tenant_id,
        destination_type,
        topics,
        filter,
        config,
        credentials,
        delivery_metadata,
        metadata,
        created_at,
        updated_at: updated_at.unwrap_or(created_at),
        disabled_at,
    }
}

/// Builds an event on topic `user.created` with a small payload.
#[bon::builder]
pub fn event_fixture(
    #[builder(into, default = unique_id("evt"))] id: String,
    #[builder(into, default = "test-tenant".to_string())] tenant_id: String,
    #[builder(into)] destination_id: Option<String>,
    #[builder(into, default = "user.created".to_string())] topic: String,
    #[builder(default = now_millis())] time: DateTime<Utc>,
    #[builder(default = StringMap::from([("metadatakey".to_string(), "metadatavalue".to_string())]))]
    metadata: StringMap,
    #[builder(default = Map::from_iter([("mykey".to_string(), Value::from("myvalue"))]))]
    data: Map<String, Value>,
) -> Event {
    Event { id, tenant_id, destination_id, topic, time, metadata, data }
}

/// Converts a `serde_json::json!` object literal into a [`Filter`].
///
/// # Panics
///
/// Panics if `value` is not a JSON object.
#[must_use]
pub fn filter(value: Value) -> Filter {
    match value {
        Value::Object(map) => map,
        other => panic!("filter must be a JSON object, got {other}"),
    }
}

/// Converts string pairs into a [`StringMap`].
#[must_use]
pub fn string_map<const N: usize>(pairs: [(&str, &str); N]) -> StringMap {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Returns `true` for [`TenantStoreError::TenantDeleted`] and
/// [`TenantStoreError::DestinationDeleted`].
#[must_use]
pub fn is_deleted(err: &TenantStoreError) -> bool {
    err.is_deleted()
}

/// Returns `true` for [`TenantStoreError::TenantNotFound`] and
/// [`TenantStoreError::DestinationNotFound`].
#[must_use]
pub fn is_not_found(err: &TenantStoreError) -> bool {
    err.is_not_found()
}

/// Asserts two timestamps agree to the millisecond.
///
/// # Panics
///
/// Panics if they differ.
pub fn assert_same_millis(expected: DateTime<Utc>, actual: DateTime<Utc>, field: &str) {
    assert_eq!(
        expected.timestamp_millis(),
        actual.timestamp_millis(),
        "{field}: expected {expected}, got {actual}"
    );
}

/// Asserts two destinations are equal field by field, timestamps to the
/// millisecond.
///
/// # Panics
///
/// Panics on the first differing field.
pub fn assert_destination_eq(expected: &Destination, actual: &Destination) {
    assert_eq!(expected.id, actual.id, "id");
    assert_eq!(expected.tenant_id, actual.tenant_id, "tenant_id");
    assert_eq!(expected.destination_type, actual.destination_type, "type");
    assert_eq!(expected.topics, actual.topics, "topics");
    assert_eq!(expected.effective_filter(), actual.effective_filter(), "filter");
    assert_eq!(expected.config, actual.config, "config");
    assert_eq!(expected.credentials, actual.credentials, "credentials");
    assert_eq!(expected.delivery_metadata, actual.delivery_metadata, "delivery_metadata");
    assert_eq!(expected.metadata, actual.metadata, "metadata");
    assert_same_millis(expected.created_at, actual.created_at, "created_at");
    assert_same_millis(expected.updated_at, actual.updated_at, "updated_at");
    assert_eq!(
        expected.disabled_at.map(|t| t.timestamp_millis()),
        actual.disabled_at.map(|t| t.timestamp_millis()),
        "disabled_at"
    );
}

/// Assert that a [`TenantStoreResult`](crate::TenantStoreResult) is the
/// given unit [`TenantStoreError`] variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use fanout_tenantstore::{assert_tenant_store_error, TenantStoreError, TenantStoreResult};
///
/// let result: TenantStoreResult<()> = Err(TenantStoreError::TenantDeleted);
/// assert_tenant_store_error!(result, TenantDeleted);
/// ```
#[macro_export]
macro_rules! assert_tenant_store_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::TenantStoreError::$variant)),
            "expected TenantStoreError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::TenantStoreError::$variant)),
            "{}: expected TenantStoreError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::TenantStoreResult;

    #[test]
    fn test_unique_ids_differ() {
        assert_ne!(unique_id("des"), unique_id("des"));
        assert!(unique_id("tnt").starts_with("tnt_"));
    }

    #[test]
    fn test_fixture_defaults() {
        let dest = destination_fixture().call();
        assert!(dest.topics.matches_all());
        assert_eq!(dest.destination_type, "webhook");
        assert_eq!(dest.created_at, dest.updated_at);
        assert!(dest.delivery_metadata.is_none());

        let tenant = tenant_fixture().id("t1").call();
        assert_eq!(tenant.id, "t1");
        assert_eq!(tenant.created_at.timestamp_subsec_micros() % 1000, 0);
    }

    #[test]
    fn test_assert_macro_accepts_matching_variant() {
        let result: TenantStoreResult<()> = Err(TenantStoreError::DestinationDeleted);
        assert_tenant_store_error!(result, DestinationDeleted);
        assert!(is_deleted(&TenantStoreError::TenantDeleted));
        assert!(is_not_found(&TenantStoreError::DestinationNotFound));
    }

    #[test]
    #[should_panic(expected = "expected TenantStoreError::TenantDeleted")]
    fn test_assert_macro_rejects_other_variant() {
        let result: TenantStoreResult<()> = Err(TenantStoreError::TenantNotFound);
        assert_tenant_store_error!(result, TenantDeleted);
    }
}
