//! Opaque, versioned pagination cursors.
//!
//! A cursor's raw form is `{resource}v{version:02}:{data}`, for example
//! `tntv02:1714557600000:t_01`. The raw bytes are read as one big-endian integer
//! and written in base62 (`0-9a-zA-Z`), so cursors are URL-safe and carry no
//! visible structure.
//!
//! Decoding checks the resource tag and version: a cursor issued for another
//! resource is [`CursorError::Invalid`], one issued by another version of the
//! same resource is [`CursorError::VersionMismatch`]. Cursors longer than
//! [`MAX_CURSOR_LEN`] are rejected before decoding.

use std::fmt;

use thiserror::Error;

use crate::{error::TenantStoreError, models::Tenant, pagination::CursorCodec};

const ALPHABET: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Resource tag of tenant listing cursors.
pub const TENANT_CURSOR_RESOURCE: &str = "tnt";

/// Current version of tenant listing cursors.
///
/// Version 1 carried only the creation time and could not order tenants
/// created in the same millisecond.
pub const TENANT_CURSOR_VERSION: u32 = 2;

/// Longest encoded cursor accepted by [`decode`].
pub const MAX_CURSOR_LEN: usize = 256;

/// Errors produced while decoding a cursor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CursorError {
    /// The cursor is malformed or belongs to another resource.
    #[error("invalid cursor")]
    Invalid,

    /// The cursor was issued by a different version of this resource.
    #[error("cursor version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version this codec accepts.
        expected: u32,
        /// Version found in the cursor.
        actual: u32,
    },
}

impl From<CursorError> for TenantStoreError {
    fn from(err: CursorError) -> Self {
        tracing::debug!(error = %err, "rejected pagination cursor");
        Self::InvalidCursor
    }
}

/// Encodes `data` into a cursor for `resource` at `version`.
///
/// Empty data encodes to the empty string.
#[must_use]
pub fn encode(resource: &str, version: u32, data: &str) -> String {
    if data.is_empty() {
        return String::new();
    }
    base62_encode(format!("{resource}v{version:02}:{data}").as_bytes())
}

/// Decodes a cursor issued for `resource` at `version`, returning its data.
///
/// The empty string decodes to empty data.
///
/// # Errors
///
/// Returns [`CursorError::Invalid`] for malformed, oversized or foreign
/// cursors and [`CursorError::VersionMismatch`] when only the version
/// differs.
pub fn decode(encoded: &str, resource: &str, version: u32) -> Result<String, CursorError> {
    if encoded.is_empty() {
        return Ok(String::new());
    }
    if encoded.len() > MAX_CURSOR_LEN {
        return Err(CursorError::Invalid);
    }
    let raw = base62_decode(encoded).ok_or(CursorError::Invalid)?;
    let raw = String::from_utf8(raw).map_err(|_| CursorError::Invalid)?;

    let rest = raw.strip_prefix(resource).ok_or(CursorError::Invalid)?;
    let rest = rest.strip_prefix('v').ok_or(CursorError::Invalid)?;
    let (ver, data) = rest.split_once(':').ok_or(CursorError::Invalid)?;
    if ver.is_empty() || !ver.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CursorError::Invalid);
    }
    let actual: u32 = ver.parse().map_err(|_| CursorError::Invalid)?;
    if actual != version {
        return Err(CursorError::VersionMismatch { expected: version, actual });
    }
    Ok(data.to_string())
}

/// Position of a tenant in a listing.
///
/// Tenants are ordered by creation time, then by ID, so two tenants created
/// in the same millisecond still have distinct positions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TenantPosition {
    /// `created_at` in Unix milliseconds.
    pub created_at_ms: i64,
    /// Tenant ID.
    pub id: String,
}

impl TenantPosition {
    /// The position of `tenant`.
    #[must_use]
    pub fn of(tenant: &Tenant) -> Self {
        Self { created_at_ms: tenant.created_at.timestamp_millis(), id: tenant.id.clone() }
    }

    /// Parses the `{created_at_ms}:{id}` form produced by `Display`.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError::Invalid`] if the timestamp is not an integer
    /// or the ID is missing.
    pub fn parse(data: &str) -> Result<Self, CursorError> {
        let (ms, id) = data.split_once(':').ok_or(CursorError::Invalid)?;
        if id.is_empty() {
            return Err(CursorError::Invalid);
        }
        let created_at_ms = ms.parse().map_err(|_| CursorError::Invalid)?;
        Ok(Self { created_at_ms, id: id.to_string() })
    }
}

impl fmt::Display for TenantPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.created_at_ms, self.id)
    }
}

/// Encodes a tenant listing position.
#[must_use]
pub fn encode_tenant_cursor(position: &TenantPosition) -> String {
    encode(TENANT_CURSOR_RESOURCE, TENANT_CURSOR_VERSION, &position.to_string())
}

/// Decodes a tenant listing cursor.
///
/// Returns `Ok(None)` for the empty cursor.
///
/// # Errors
///
/// Returns a [`CursorError`] if the cursor is not a valid tenant cursor.
pub fn decode_tenant_cursor(encoded: &str) -> Result<Option<TenantPosition>, CursorError> {
    let data = decode(encoded, TENANT_CURSOR_RESOURCE, TENANT_CURSOR_VERSION)?;
    if data.is_empty() {
        return Ok(None);
    }
    TenantPosition::parse(&data).map(Some)
}

/// Cursor codec for tenant listings, keyed by `(created_at, id)`.
///
/// The decoded position is the `Display` form of [`TenantPosition`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantCursorCodec;

impl CursorCodec<Tenant> for TenantCursorCodec {
    type Error = CursorError;

    fn encode(&self, tenant: &Tenant) -> String {
        encode_tenant_cursor(&TenantPosition::of(tenant))
    }

    fn decode(&self, cursor: &str) -> Result<String, Self::Error> {
        let position = decode_tenant_cursor(cursor)?.ok_or(CursorError::Invalid)?;
        Ok(position.to_string())
    }
}

fn base62_encode(bytes: &[u8]) -> String {
    // Repeated division of a big-endian base-256 number by 62.
    let mut number: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
    let mut digits = Vec::new();
    while !number.is_empty() {
        let mut quotient = Vec::with_capacity(number.len());
        let mut remainder: u32 = 0;
        for byte in &number {
            let acc = (remainder << 8) | u32::from(*byte);
            let q = acc / 62;
            remainder = acc % 62;
            if !quotient.is_empty() || q != 0 {
                // acc < 62 * 256, so q fits in a byte
                quotient.push(q as u8);
            }
        }
        digits.push(ALPHABET[remainder as usize]);
        number = quotient;
    }
    if digits.is_empty() {
        digits.push(ALPHABET[0]);
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

fn base62_decode(encoded: &str) -> Option<Vec<u8>> {
    let mut bytes: Vec<u8> = Vec::new();
    for ch in encoded.bytes() {
        let digit = match ch {
            b'0'..=b'9' => ch - b'0',
            b'a'..=b'z' => ch - b'a' + 10,
            b'A'..=b'Z' => ch - b'A' + 36,
            _ => return None,
        };
        // bytes = bytes * 62 + digit, little-endian accumulation
        let mut carry = u32::from(digit);
        for byte in &mut bytes {
            let acc = u32::from(*byte) * 62 + carry;
            *byte = (acc & 0xff) as u8;
            carry = acc >> 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    bytes.reverse();
    Some(bytes)
}
