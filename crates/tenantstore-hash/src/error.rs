//! Error types for the hash-record backend.
//!
//! Failures of the underlying [`HashBackend`](crate::HashBackend) and of
//! record decoding are collected in [`HashStoreError`]. None of them is a
//! domain condition, so they all surface to callers as the opaque
//! [`TenantStoreError::Internal`] or [`TenantStoreError::Serialization`].

use std::sync::Arc;

use fanout_tenantstore::{BoxError, CipherError, TenantStoreError};
use thiserror::Error;

/// Result type alias for hash backend operations.
pub type Result<T> = std::result::Result<T, HashStoreError>;

/// Errors specific to the hash-record backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HashStoreError {
    /// The storage backend failed to execute a command.
    #[error("Backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The backend has no search capability.
    #[error("search is not supported by this backend")]
    SearchUnsupported,

    /// A search named an index that was never created.
    #[error("unknown index: {0}")]
    UnknownIndex(String),

    /// A stored field could not be decoded.
    #[error("Corrupt record {key}: invalid {field}: {reason}")]
    Corrupt {
        /// Key of the offending record.
        key: String,
        /// Name of the offending field.
        field: &'static str,
        /// Why decoding failed.
        reason: String,
    },

    /// A secret field could not be encrypted or decrypted.
    #[error("Cipher error on {field}: {source}")]
    Cipher {
        /// Name of the offending field.
        field: &'static str,
        /// The underlying error.
        #[source]
        source: CipherError,
    },

    /// A field could not be encoded as JSON.
    #[error("Encoding error on {field}: {source}")]
    Encode {
        /// Name of the offending field.
        field: &'static str,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl HashStoreError {
    /// Creates a new `Backend` error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into(), source: None }
    }

    /// Creates a new `Backend` error with a message and source error.
    #[must_use]
    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend { message: message.into(), source: Some(Arc::new(source)) }
    }

    pub(crate) fn corrupt(key: &str, field: &'static str, reason: impl ToString) -> Self {
        Self::Corrupt { key: key.to_string(), field, reason: reason.to_string() }
    }
}

impl From<HashStoreError> for TenantStoreError {
    fn from(err: HashStoreError) -> Self {
        tracing::warn!(error = %err, "hash backend failure");
        match err {
            HashStoreError::Corrupt { .. } | HashStoreError::Encode { .. } => {
                TenantStoreError::serialization_with_source("hash record", err)
            },
            other => TenantStoreError::internal_with_source("hash backend", other),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_maps_to_internal() {
        let err: TenantStoreError = HashStoreError::backend("connection reset").into();
        assert!(matches!(err, TenantStoreError::Internal { .. }));
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("Backend error: connection reset"));
    }

    #[test]
    fn test_corrupt_record_maps_to_serialization() {
        let err: TenantStoreError =
            HashStoreError::corrupt("tenant:{t1}:tenant", "created_at", "not a timestamp").into();
        assert!(matches!(err, TenantStoreError::Serialization { .. }));
    }

    #[test]
    fn test_cipher_error_is_internal() {
        let err: TenantStoreError =
            HashStoreError::Cipher { field: "credentials", source: CipherError::Decrypt }.into();
        assert!(err.is_internal());
        assert!(!err.is_not_found());
    }
}
