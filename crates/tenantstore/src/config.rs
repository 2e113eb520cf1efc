//! Tenant store configuration.
//!
//! [`TenantStoreConfig`] carries everything a backend needs at construction:
//! the encryption secret, the per-tenant destination cap, the deployment
//! namespace and the tombstone retention window.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::ConfigError;

/// Default cap on live destinations per tenant.
pub const DEFAULT_MAX_DESTINATIONS_PER_TENANT: usize = 20;

/// Default retention of soft-deleted records (seven days).
pub const DEFAULT_TOMBSTONE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Minimum tombstone retention.
pub const MIN_TOMBSTONE_TTL: Duration = Duration::from_secs(1);

/// Characters a deployment ID may not contain. Backends use them as key
/// separators and hash-slot tags.
pub const RESERVED_DEPLOYMENT_ID_CHARS: [char; 3] = [':', '{', '}'];

fn default_max_destinations_per_tenant() -> usize {
    DEFAULT_MAX_DESTINATIONS_PER_TENANT
}

fn default_tombstone_ttl() -> Duration {
    DEFAULT_TOMBSTONE_TTL
}

/// Configuration shared by all [`TenantStore`](crate::TenantStore) backends.
///
/// # Example
///
/// ```
/// use fanout_tenantstore::TenantStoreConfig;
///
/// let config = TenantStoreConfig::builder()
///     .secret("0123456789abcdef")
///     .max_destinations_per_tenant(5)
///     .deployment_id("dp_001")
///     .build()?;
/// assert_eq!(config.deployment_id(), Some("dp_001"));
/// # Ok::<(), fanout_tenantstore::ConfigError>(())
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantStoreConfig {
    /// Secret the credential cipher key is derived from.
    #[serde(skip_serializing)]
    pub(crate) secret: Zeroizing<String>,

    /// Topics the platform accepts. Informational; callers validate.
    #[serde(default)]
    pub(crate) available_topics: Vec<String>,

    /// Maximum number of live destinations per tenant.
    #[serde(default = "default_max_destinations_per_tenant")]
    pub(crate) max_destinations_per_tenant: usize,

    /// Namespace prefix isolating deployments that share a backend.
    #[serde(default)]
    pub(crate) deployment_id: Option<String>,

    /// How long soft-deleted records are retained.
    #[serde(with = "humantime_serde", default = "default_tombstone_ttl")]
    pub(crate) tombstone_ttl: Duration,
}

#[bon::bon]
impl TenantStoreConfig {
    /// Creates a validated configuration.
    ///
    /// # Optional Fields
    ///
    /// * `available_topics` - Accepted topics (default: empty).
    /// * `max_destinations_per_tenant` - Destination cap (default: 20).
    /// * `deployment_id` - Namespace prefix (default: none). An empty string means none.
    /// * `tombstone_ttl` - Tombstone retention (default: 7 days).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if the destination cap is zero
    /// or the tombstone TTL is under one second, and [`ConfigError::Invalid`]
    /// if the deployment ID contains a reserved character.
    #[builder]
    pub fn new(
        #[builder(into)] secret: String,
        #[builder(default)] available_topics: Vec<String>,
        #[builder(default = DEFAULT_MAX_DESTINATIONS_PER_TENANT)] max_destinations_per_tenant: usize,
        #[builder(into)] deployment_id: Option<String>,
        #[builder(default = DEFAULT_TOMBSTONE_TTL)] tombstone_ttl: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            secret: Zeroizing::new(secret),
            available_topics,
            max_destinations_per_tenant,
            deployment_id: deployment_id.filter(|id| !id.is_empty()),
            tombstone_ttl,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants. Call after deserializing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] for out-of-range values and
    /// [`ConfigError::Invalid`] for a malformed deployment ID.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_destinations_per_tenant < 1 {
            return Err(ConfigError::BelowMinimum {
                field: "max_destinations_per_tenant",
                min: "1".into(),
                value: self.max_destinations_per_tenant.to_string(),
            });
        }
        if self.tombstone_ttl < MIN_TOMBSTONE_TTL {
            return Err(ConfigError::BelowMinimum {
                field: "tombstone_ttl",
                min: format!("{MIN_TOMBSTONE_TTL:?}"),
                value: format!("{:?}", self.tombstone_ttl),
            });
        }
        if let Some(reserved) = self
            .deployment_id
            .as_deref()
            .and_then(|id| id.chars().find(|c| RESERVED_DEPLOYMENT_ID_CHARS.contains(c)))
        {
            return Err(ConfigError::Invalid {
                field: "deployment_id",
                reason: format!("must not contain '{reserved}'"),
            });
        }
        Ok(())
    }

    /// Returns the encryption secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Returns the accepted topics.
    #[must_use]
    pub fn available_topics(&self) -> &[String] {
        &self.available_topics
    }

    /// Returns the per-tenant destination cap.
    #[must_use]
    pub fn max_destinations_per_tenant(&self) -> usize {
        self.max_destinations_per_tenant
    }

    /// Returns the deployment namespace, if any.
    #[must_use]
    pub fn deployment_id(&self) -> Option<&str> {
        self.deployment_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Returns the tombstone retention window.
    #[must_use]
    pub fn tombstone_ttl(&self) -> Duration {
        self.tombstone_ttl
    }
}

impl std::fmt::Debug for TenantStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantStoreConfig")
            .field("secret", &"[REDACTED]")
            .field("available_topics", &self.available_topics)
            .field("max_destinations_per_tenant", &self.max_destinations_per_tenant)
            .field("deployment_id", &self.deployment_id)
            .field("tombstone_ttl", &self.tombstone_ttl)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TenantStoreConfig::builder().secret("s").build().unwrap();
        assert_eq!(config.max_destinations_per_tenant(), 20);
        assert_eq!(config.tombstone_ttl(), Duration::from_secs(604_800));
        assert!(config.deployment_id().is_none());
        assert!(config.available_topics().is_empty());
    }

    #[test]
    fn test_empty_deployment_id_is_none() {
        let config = TenantStoreConfig::builder().secret("s").deployment_id("").build().unwrap();
        assert!(config.deployment_id().is_none());
    }

    #[test]
    fn test_zero_cap_rejected() {
        let err = TenantStoreConfig::builder()
            .secret("s")
            .max_destinations_per_tenant(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "max_destinations_per_tenant", .. }));
    }

    #[test]
    fn test_short_ttl_rejected() {
        let err = TenantStoreConfig::builder()
            .secret("s")
            .tombstone_ttl(Duration::from_millis(10))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "tombstone_ttl", .. }));
    }

    #[test]
    fn test_deployment_id_with_key_separators_rejected() {
        for id in ["dp:1", "{dp}", "dp}", "tenant:{x}"] {
            let err = TenantStoreConfig::builder().secret("s").deployment_id(id).build().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { field: "deployment_id", .. }), "{id}: {err}");
        }
        let config = TenantStoreConfig::builder().secret("s").deployment_id("dp_001-eu.2").build().unwrap();
        assert_eq!(config.deployment_id(), Some("dp_001-eu.2"));
    }

    #[test]
    fn test_deserialized_deployment_id_is_validated() {
        let config: TenantStoreConfig =
            serde_json::from_str(r#"{"secret":"s","deployment_id":"a:b"}"#).unwrap();
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid deployment_id: must not contain ':'");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = TenantStoreConfig::builder().secret("hunter2").build().unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_deserialize_with_humantime() {
        let config: TenantStoreConfig = serde_json::from_str(
            r#"{"secret":"s","deployment_id":"dp","tombstone_ttl":"2days","available_topics":["a"]}"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.tombstone_ttl(), Duration::from_secs(2 * 86_400));
        assert_eq!(config.deployment_id(), Some("dp"));
        assert_eq!(config.max_destinations_per_tenant(), 20);
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let result = serde_json::from_str::<TenantStoreConfig>(r#"{"secret":"s","bogus":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_omits_secret() {
        let config = TenantStoreConfig::builder().secret("hunter2").build().unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
    }
}
