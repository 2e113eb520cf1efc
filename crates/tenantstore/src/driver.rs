//! The [`TenantStore`] trait and its request/response types.
//!
//! Every backend implements the same operations and reports domain
//! conditions through the shared [`TenantStoreError`] vocabulary, so callers
//! can swap backends without changing error handling.
//!
//! # Soft deletes
//!
//! Deleting a tenant or destination leaves a tombstone behind. Retrieval of
//! a tombstoned record returns the `*Deleted` error, retrieval of a record
//! that never existed returns `Ok(None)`, and an upsert or create on a
//! tombstoned ID resurrects it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::{TenantStoreError, TenantStoreResult},
    models::{Destination, Event, Tenant, Topics, WILDCARD_TOPIC},
    pagination::{PageRequest, SortOrder},
};

/// Page size used when a listing request specifies none.
pub const DEFAULT_LIST_TENANT_LIMIT: usize = 20;

/// Largest accepted page size; larger requests are clamped.
pub const MAX_LIST_TENANT_LIMIT: usize = 100;

/// Storage for tenants and their destinations.
///
/// Implementations must be safe to share across tasks; all methods take
/// `&self`. Cancellation follows the usual async rule: dropping a returned
/// future abandons the operation.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Prepares the backend. Idempotent; may be called any number of times.
    ///
    /// Backends that need a secondary index for [`list_tenant`](Self::list_tenant)
    /// probe for it here and record the result in
    /// [`supports_list_tenant`](Self::supports_list_tenant).
    async fn init(&self) -> TenantStoreResult<()>;

    /// Whether [`list_tenant`](Self::list_tenant) is available.
    fn supports_list_tenant(&self) -> bool;

    /// Retrieves a tenant with its derived destination count and topics.
    ///
    /// Returns `Ok(None)` if the tenant never existed and
    /// [`TenantStoreError::TenantDeleted`] if it was deleted.
    async fn retrieve_tenant(&self, tenant_id: &str) -> TenantStoreResult<Option<Tenant>>;

    /// Creates or replaces a tenant, clearing any tombstone.
    async fn upsert_tenant(&self, tenant: Tenant) -> TenantStoreResult<()>;

    /// Soft-deletes a tenant and every destination it owns.
    ///
    /// Deleting an already-deleted tenant succeeds. Returns
    /// [`TenantStoreError::TenantNotFound`] if the tenant never existed.
    async fn delete_tenant(&self, tenant_id: &str) -> TenantStoreResult<()>;

    /// Lists live tenants by creation time.
    ///
    /// Returns [`TenantStoreError::ListTenantNotSupported`] when the backend
    /// lacks the required index.
    async fn list_tenant(&self, request: ListTenantRequest)
    -> TenantStoreResult<TenantPaginatedResult>;

    /// Lists a tenant's live destinations, oldest first.
    async fn list_destination_by_tenant(
        &self,
        tenant_id: &str,
        opts: ListDestinationByTenantOpts,
    ) -> TenantStoreResult<Vec<Destination>>;

    /// Retrieves a destination.
    ///
    /// Returns `Ok(None)` if it never existed and
    /// [`TenantStoreError::DestinationDeleted`] if it was deleted.
    async fn retrieve_destination(
        &self,
        tenant_id: &str,
        destination_id: &str,
    ) -> TenantStoreResult<Option<Destination>>;

    /// Creates a destination.
    ///
    /// Fails with [`TenantStoreError::DuplicateDestination`] if a live
    /// destination with the same ID exists and with
    /// [`TenantStoreError::MaxDestinationsPerTenantReached`] at the cap.
    async fn create_destination(&self, destination: Destination) -> TenantStoreResult<()>;

    /// Creates or replaces a destination without duplicate or cap checks.
    async fn upsert_destination(&self, destination: Destination) -> TenantStoreResult<()>;

    /// Soft-deletes a destination. It stops matching events immediately.
    ///
    /// Deleting an already-deleted destination succeeds. Returns
    /// [`TenantStoreError::DestinationNotFound`] if it never existed.
    async fn delete_destination(&self, tenant_id: &str, destination_id: &str)
    -> TenantStoreResult<()>;

    /// Returns the IDs of the tenant's destinations that should receive `event`.
    ///
    /// `event.destination_id` is ignored; matching is by topic, then filter.
    async fn match_event(&self, event: &Event) -> TenantStoreResult<Vec<String>>;
}

/// Parameters of a tenant listing.
///
/// Empty strings are treated like absent values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListTenantRequest {
    /// Page size. Non-positive means default, large values are clamped.
    #[serde(default)]
    pub limit: i64,
    /// Cursor from a previous page's `next`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    /// Cursor from a previous page's `prev`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    /// `asc` or `desc`; defaults to `desc`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

impl ListTenantRequest {
    /// Validates the request and converts it into a pagination request.
    ///
    /// # Errors
    ///
    /// Returns [`TenantStoreError::ConflictingCursors`] if both cursors are
    /// set and [`TenantStoreError::InvalidOrder`] for an unknown direction.
    pub fn to_page_request(&self) -> TenantStoreResult<PageRequest> {
        let next = self.next.clone().filter(|c| !c.is_empty());
        let prev = self.prev.clone().filter(|c| !c.is_empty());
        if next.is_some() && prev.is_some() {
            return Err(TenantStoreError::ConflictingCursors);
        }

        let order = match self.dir.as_deref() {
            None | Some("") => SortOrder::Desc,
            Some(dir) => dir.parse()?,
        };

        let limit = match usize::try_from(self.limit) {
            Ok(0) | Err(_) => DEFAULT_LIST_TENANT_LIMIT,
            Ok(limit) => limit.min(MAX_LIST_TENANT_LIMIT),
        };

        Ok(PageRequest { limit, order, next, prev })
    }
}

/// Cursor pagination metadata of a listing response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekPagination {
    /// Sort key; always `created_at` for tenants.
    pub order_by: String,
    /// Effective sort direction.
    pub dir: SortOrder,
    /// Effective page size.
    pub limit: usize,
    /// Cursor to the following page.
    pub next: Option<String>,
    /// Cursor to the preceding page.
    pub prev: Option<String>,
}

/// One page of tenants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantPaginatedResult {
    /// Tenants on this page, with derived fields populated.
    pub models: Vec<Tenant>,
    /// Cursors and effective parameters.
    pub pagination: SeekPagination,
    /// Total number of live tenants, independent of paging.
    pub count: usize,
}

/// Options for [`TenantStore::list_destination_by_tenant`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListDestinationByTenantOpts {
    /// Restricts the listing when set.
    pub filter: Option<DestinationFilter>,
}

impl ListDestinationByTenantOpts {
    /// Options with the given filter.
    #[must_use]
    pub fn with_filter(filter: DestinationFilter) -> Self {
        Self { filter: Some(filter) }
    }

    /// Returns `true` if a destination of this type and topics is listed.
    #[must_use]
    pub fn includes(&self, destination_type: &str, topics: &Topics) -> bool {
        self.filter.as_ref().is_none_or(|f| f.matches(destination_type, topics))
    }
}

/// Listing filter over destination type and topics.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct DestinationFilter {
    /// Accepted types; empty accepts all.
    #[builder(default)]
    pub types: Vec<String>,
    /// Topics every listed destination must subscribe to; empty accepts all.
    #[builder(default)]
    pub topics: Vec<String>,
}

impl DestinationFilter {
    /// Returns `true` if a destination with this type and topics passes.
    ///
    /// Wildcard destinations pass any topic filter. A filter of exactly
    /// `["*"]` selects only wildcard destinations.
    #[must_use]
    pub fn matches(&self, destination_type: &str, topics: &Topics) -> bool {
        if !self.types.is_empty() && !self.types.iter().any(|t| t == destination_type) {
            return false;
        }
        if self.topics.is_empty() || topics.matches_all() {
            return true;
        }
        let wants_wildcard = self.topics.len() == 1 && self.topics[0] == WILDCARD_TOPIC;
        !wants_wildcard && self.topics.iter().all(|t| topics.contains(t))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request(limit: i64, next: Option<&str>, prev: Option<&str>, dir: Option<&str>) -> ListTenantRequest {
        ListTenantRequest {
            limit,
            next: next.map(Into::into),
            prev: prev.map(Into::into),
            dir: dir.map(Into::into),
        }
    }

    #[test]
    fn test_defaults() {
        let page = ListTenantRequest::default().to_page_request().unwrap();
        assert_eq!(page.limit, DEFAULT_LIST_TENANT_LIMIT);
        assert_eq!(page.order, SortOrder::Desc);
        assert_eq!((page.next, page.prev), (None, None));
    }

    #[test]
    fn test_limit_normalization() {
        assert_eq!(request(-5, None, None, None).to_page_request().unwrap().limit, 20);
        assert_eq!(request(1000, None, None, None).to_page_request().unwrap().limit, 100);
        assert_eq!(request(7, None, None, None).to_page_request().unwrap().limit, 7);
    }

    #[test]
    fn test_direction_validation() {
        assert_eq!(request(0, None, None, Some("asc")).to_page_request().unwrap().order, SortOrder::Asc);
        assert_eq!(request(0, None, None, Some("")).to_page_request().unwrap().order, SortOrder::Desc);
        assert!(matches!(
            request(0, None, None, Some("sideways")).to_page_request(),
            Err(TenantStoreError::InvalidOrder)
        ));
    }

    #[test]
    fn test_conflicting_cursors_checked_first() {
        let result = request(0, Some("a"), Some("b"), Some("sideways")).to_page_request();
        assert!(matches!(result, Err(TenantStoreError::ConflictingCursors)));
    }

    #[test]
    fn test_empty_cursors_are_absent() {
        let page = request(0, Some(""), Some("b"), None).to_page_request().unwrap();
        assert_eq!(page.next, None);
        assert_eq!(page.prev.as_deref(), Some("b"));
    }

    #[test]
    fn test_destination_filter_by_type() {
        let filter = DestinationFilter::builder().types(vec!["webhook".into()]).build();
        assert!(filter.matches("webhook", &Topics::wildcard()));
        assert!(!filter.matches("rabbitmq", &Topics::wildcard()));
    }

    #[test]
    fn test_destination_filter_by_topics() {
        let created = Topics::new(["user.created"]);
        let both = Topics::new(["user.created", "user.updated"]);
        let wildcard = Topics::wildcard();

        let one = DestinationFilter::builder().topics(vec!["user.created".into()]).build();
        assert!(one.matches("webhook", &created));
        assert!(one.matches("webhook", &both));
        assert!(one.matches("webhook", &wildcard));

        let two = DestinationFilter::builder()
            .topics(vec!["user.created".into(), "user.updated".into()])
            .build();
        assert!(!two.matches("webhook", &created));
        assert!(two.matches("webhook", &both));

        let star = DestinationFilter::builder().topics(vec!["*".into()]).build();
        assert!(star.matches("webhook", &wildcard));
        assert!(!star.matches("webhook", &both));
    }

    #[test]
    fn test_opts_without_filter_include_everything() {
        assert!(ListDestinationByTenantOpts::default().includes("any", &Topics::default()));
    }
}
