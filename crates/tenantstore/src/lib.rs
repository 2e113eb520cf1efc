//! Tenant and destination storage for a multi-tenant event fan-out platform.
//!
//! This crate provides the [`TenantStore`] trait and the types that every
//! backend shares: the tenant and destination models, the content filter
//! engine used for event matching, the keyset pagination engine, the
//! credential cipher and the fixed error vocabulary.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Service Layer                            │
//! │        (API handlers, event ingestion, delivery queue)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 fanout-tenantstore                          │
//! │                  TenantStore trait                          │
//! │   (tenant/destination CRUD, list_tenant, match_event)       │
//! ├──────────────────┬──────────────────────────────────────────┤
//! │ MemoryTenantStore│        HashTenantStore                   │
//! │    (reference)   │ (in `fanout-tenantstore-hash`)           │
//! └──────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use fanout_tenantstore::{Destination, Event, MemoryTenantStore, Tenant, TenantStore, Topics};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryTenantStore::new();
//!     store.upsert_tenant(Tenant::new("t1")).await?;
//!
//!     store
//!         .create_destination(Destination {
//!             id: "d1".into(),
//!             tenant_id: "t1".into(),
//!             destination_type: "webhook".into(),
//!             topics: Topics::new(["user.created"]),
//!             ..Destination::default()
//!         })
//!         .await?;
//!
//!     let event = Event { tenant_id: "t1".into(), topic: "user.created".into(), ..Event::default() };
//!     assert_eq!(store.match_event(&event).await?, vec!["d1".to_string()]);
//!     Ok(())
//! }
//! ```
//!
//! # Available Backends
//!
//! | Backend | Use Case | Persistence |
//! |---------|----------|-------------|
//! | [`MemoryTenantStore`] | Testing, low-scale deployments | No |
//! | `HashTenantStore` (in `fanout-tenantstore-hash`) | Production | Backend-dependent |
//!
//! # Implementing a Backend
//!
//! 1. Implement the [`TenantStore`] trait
//! 2. Report domain conditions with the unit [`TenantStoreError`] variants
//! 3. Fold everything else into [`TenantStoreError::Internal`]
//! 4. Run the [`conformance`] suite against it
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (fixtures, ID generators, assertion macros) and
//!   the `conformance` suite. Enable this in `[dev-dependencies]` for integration tests.

#![deny(unsafe_code)]

pub mod cipher;
pub mod config;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod cursor;
pub mod driver;
pub mod error;
pub mod filter;
pub mod memory;
pub mod models;
pub mod pagination;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;

// Re-export primary types at crate root for convenience
pub use cipher::{Cipher, CipherError};
pub use config::{DEFAULT_MAX_DESTINATIONS_PER_TENANT, DEFAULT_TOMBSTONE_TTL, TenantStoreConfig};
pub use cursor::{CursorError, TenantCursorCodec, TenantPosition};
pub use driver::{
    DEFAULT_LIST_TENANT_LIMIT, DestinationFilter, ListDestinationByTenantOpts, ListTenantRequest,
    MAX_LIST_TENANT_LIMIT, SeekPagination, TenantPaginatedResult, TenantStore,
};
pub use error::{BoxError, ConfigError, TenantStoreError, TenantStoreResult};
pub use memory::MemoryTenantStore;
pub use models::{
    Destination, DestinationSummary, Event, Filter, StringMap, Tenant, Topics, WILDCARD_TOPIC,
    aggregate_topics,
};
pub use pagination::{CursorCodec, Page, PageRequest, QueryInput, SortOrder};
pub use zeroize::Zeroizing;
