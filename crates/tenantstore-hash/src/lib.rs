//! Hash-record backend for `fanout-tenantstore`.
//!
//! [`HashTenantStore`] implements [`TenantStore`](fanout_tenantstore::TenantStore)
//! on top of any [`HashBackend`]: a key-value service that stores one hash
//! (field → bytes) per key, supports key expiry and atomic command batches,
//! and optionally maintains a secondary index for tenant listing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  HashTenantStore                            │
//! │   key layout (KeySpace) · record encoding · credential      │
//! │   encryption · summary hash · soft delete with TTL          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  HashBackend trait                          │
//! │  hgetall · hset · hdel · exists · expire · exec · search    │
//! ├──────────────────────┬──────────────────────────────────────┤
//! │  MemoryHashBackend   │   RedisHashBackend                   │
//! │  (tests, embedding)  │   (`redis` feature)                  │
//! └──────────────────────┴──────────────────────────────────────┘
//! ```
//!
//! # Deployment Namespacing
//!
//! With a deployment ID configured, every key is prefixed with
//! `<deployment_id>:`, so several deployments can share one backend without
//! seeing each other's records. See [`KeySpace`] for the full layout.
//!
//! # Quick Start
//!
//! ```
//! use fanout_tenantstore::{Destination, Event, Tenant, TenantStore, TenantStoreConfig, Topics};
//! use fanout_tenantstore_hash::{HashTenantStore, MemoryHashBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TenantStoreConfig::builder().secret("0123456789abcdef").build()?;
//!     let store = HashTenantStore::new(MemoryHashBackend::new(), &config);
//!     store.init().await?;
//!
//!     store.upsert_tenant(Tenant::new("t1")).await?;
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

#![deny(unsafe_code)]

pub mod backend;
pub mod error;
pub mod keys;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_backend;
mod serialization;
pub mod store;

pub use backend::{
    HashBackend, HashFields, HashOp, IndexDefinition, NumericRange, SearchQuery, SearchResult,
};
pub use error::{HashStoreError, Result};
pub use keys::KeySpace;
pub use memory::MemoryHashBackend;
#[cfg(feature = "redis")]
pub use redis_backend::RedisHashBackend;
pub use store::HashTenantStore;
