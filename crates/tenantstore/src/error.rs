//! Tenant store error types and result alias.
//!
//! Every backend reports domain conditions through the same fixed set of
//! [`TenantStoreError`] variants so that callers branch on error identity
//! rather than on backend-specific messages. Anything that is not a domain
//! condition (network, decoding, cipher failures) is folded into the opaque
//! [`TenantStoreError::Internal`] or [`TenantStoreError::Serialization`]
//! variants, which keep their source chain for logging.
//!
//! # Example
//!
//! ```
//! use fanout_tenantstore::{TenantStoreError, TenantStoreResult};
//!
//! fn lookup(found: bool) -> TenantStoreResult<()> {
//!     if found { Ok(()) } else { Err(TenantStoreError::TenantNotFound) }
//! }
//!
//! let err = lookup(false).unwrap_err();
//! assert!(err.is_not_found());
//! assert_eq!(err.to_string(), "tenant does not exist");
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for tenant store operations.
pub type TenantStoreResult<T> = Result<T, TenantStoreError>;

/// Errors returned by [`TenantStore`](crate::TenantStore) implementations.
///
/// The unit variants form the fixed domain vocabulary. Their `Display`
/// strings are stable and identical across backends.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TenantStoreError {
    /// The tenant was never created.
    #[error("tenant does not exist")]
    TenantNotFound,

    /// The tenant exists but carries a tombstone.
    #[error("tenant has been deleted")]
    TenantDeleted,

    /// A live destination with the same ID already exists for the tenant.
    #[error("destination already exists")]
    DuplicateDestination,

    /// The destination was never created.
    #[error("destination does not exist")]
    DestinationNotFound,

    /// The destination exists but carries a tombstone.
    #[error("destination has been deleted")]
    DestinationDeleted,

    /// Creating another destination would exceed the per-tenant cap.
    #[error("maximum number of destinations per tenant reached")]
    MaxDestinationsPerTenantReached,

    /// The backend lacks the secondary index needed for tenant listing.
    #[error("list tenant feature is not enabled")]
    ListTenantNotSupported,

    /// A pagination cursor could not be decoded.
    #[error("invalid cursor")]
    InvalidCursor,

    /// The requested sort direction is neither `asc` nor `desc`.
    #[error("invalid order: must be 'asc' or 'desc'")]
    InvalidOrder,

    /// Both `next` and `prev` cursors were supplied.
    #[error("cannot specify both next and prev cursors")]
    ConflictingCursors,

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// Backend-internal failure.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },
}

impl TenantStoreError {
    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` for the "never existed" variants.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TenantNotFound | Self::DestinationNotFound)
    }

    /// Returns `true` for the soft-deleted variants.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::TenantDeleted | Self::DestinationDeleted)
    }

    /// Returns `true` for errors caused by malformed listing input.
    #[must_use]
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidCursor | Self::InvalidOrder | Self::ConflictingCursors)
    }

    /// Returns `true` for opaque backend failures.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. } | Self::Serialization { .. })
    }
}

impl From<serde_json::Error> for TenantStoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_with_source("json", err)
    }
}

/// Errors produced while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric or duration field is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// Minimum accepted value, rendered for display.
        min: String,
        /// Value that was supplied, rendered for display.
        value: String,
    },

    /// A field holds a value that is not accepted.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_messages_are_stable() {
        let cases = [
            (TenantStoreError::TenantNotFound, "tenant does not exist"),
            (TenantStoreError::TenantDeleted, "tenant has been deleted"),
            (TenantStoreError::DuplicateDestination, "destination already exists"),
            (TenantStoreError::DestinationNotFound, "destination does not exist"),
            (TenantStoreError::DestinationDeleted, "destination has been deleted"),
            (
                TenantStoreError::MaxDestinationsPerTenantReached,
                "maximum number of destinations per tenant reached",
            ),
            (TenantStoreError::ListTenantNotSupported, "list tenant feature is not enabled"),
            (TenantStoreError::InvalidCursor, "invalid cursor"),
            (TenantStoreError::InvalidOrder, "invalid order: must be 'asc' or 'desc'"),
            (TenantStoreError::ConflictingCursors, "cannot specify both next and prev cursors"),
        ];
        for (err, expected) in cases {
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn test_classification_helpers() {
        assert!(TenantStoreError::TenantNotFound.is_not_found());
        assert!(TenantStoreError::DestinationNotFound.is_not_found());
        assert!(!TenantStoreError::TenantDeleted.is_not_found());
        assert!(TenantStoreError::DestinationDeleted.is_deleted());
        assert!(TenantStoreError::ConflictingCursors.is_invalid_input());
        assert!(TenantStoreError::internal("boom").is_internal());
        assert!(!TenantStoreError::InvalidOrder.is_internal());
    }

    #[test]
    fn test_internal_with_source_preserves_chain() {
        let io = std::io::Error::other("socket closed");
        let err = TenantStoreError::internal_with_source("hgetall failed", io);
        let source = std::error::Error::source(&err);
        assert!(source.is_some());
        assert_eq!(source.map(ToString::to_string), Some("socket closed".to_string()));
    }

    #[test]
    fn test_json_error_maps_to_serialization() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: TenantStoreError = json_err.into();
        assert!(matches!(err, TenantStoreError::Serialization { .. }));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::BelowMinimum {
            field: "max_destinations_per_tenant",
            min: "1".into(),
            value: "0".into(),
        };
        assert_eq!(err.to_string(), "max_destinations_per_tenant must be at least 1, got 0");
    }
}
