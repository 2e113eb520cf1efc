//! Field encoding of tenant and destination hash records.
//!
//! Timestamps are stored as Unix milliseconds; RFC 3339 strings written by
//! older deployments are still accepted on read. Maps and filters are JSON,
//! topics are comma-joined. `credentials` and `delivery_metadata` are JSON
//! encrypted with the store's [`Cipher`]; nothing else is encrypted.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use fanout_tenantstore::{Cipher, Destination, DestinationSummary, StringMap, Tenant, Topics};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    backend::{HashFields, HashOp},
    error::{HashStoreError, Result},
};

pub(crate) const ID: &str = "id";
pub(crate) const ENTITY: &str = "entity";
pub(crate) const TYPE: &str = "type";
pub(crate) const TOPICS: &str = "topics";
pub(crate) const FILTER: &str = "filter";
pub(crate) const CONFIG: &str = "config";
pub(crate) const CREDENTIALS: &str = "credentials";
pub(crate) const DELIVERY_METADATA: &str = "delivery_metadata";
pub(crate) const METADATA: &str = "metadata";
pub(crate) const CREATED_AT: &str = "created_at";
pub(crate) const UPDATED_AT: &str = "updated_at";
pub(crate) const DISABLED_AT: &str = "disabled_at";
pub(crate) const DELETED_AT: &str = "deleted_at";

pub(crate) const TENANT_ENTITY: &str = "tenant";
pub(crate) const DESTINATION_ENTITY: &str = "destination";

/// Encodes a timestamp as Unix milliseconds.
pub(crate) fn encode_timestamp(ts: DateTime<Utc>) -> Bytes {
    Bytes::from(ts.timestamp_millis().to_string())
}

/// Parses Unix milliseconds or an RFC 3339 timestamp.
pub(crate) fn parse_timestamp(raw: &[u8]) -> std::result::Result<DateTime<Utc>, String> {
    let text = std::str::from_utf8(raw).map_err(|e| e.to_string())?;
    if text.is_empty() {
        return Err("missing timestamp".into());
    }
    if let Ok(millis) = text.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis).ok_or_else(|| format!("out of range: {millis}"));
    }
    DateTime::parse_from_rfc3339(text).map(|ts| ts.with_timezone(&Utc)).map_err(|e| e.to_string())
}

fn to_json<T: Serialize>(field: &'static str, value: &T) -> Result<Bytes> {
    serde_json::to_vec(value).map(Bytes::from).map_err(|source| HashStoreError::Encode { field, source })
}

fn from_json<T: DeserializeOwned>(key: &str, field: &'static str, raw: &[u8]) -> Result<T> {
    serde_json::from_slice(raw).map_err(|e| HashStoreError::corrupt(key, field, e))
}

fn required<'a>(key: &str, fields: &'a HashFields, field: &'static str) -> Result<&'a Bytes> {
    fields.get(field).ok_or_else(|| HashStoreError::corrupt(key, field, "missing"))
}

fn non_empty<'a>(fields: &'a HashFields, field: &str) -> Option<&'a Bytes> {
    fields.get(field).filter(|raw| !raw.is_empty())
}

fn timestamps(key: &str, fields: &HashFields) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let created_at = parse_timestamp(required(key, fields, CREATED_AT)?)
        .map_err(|e| HashStoreError::corrupt(key, CREATED_AT, e))?;
    let updated_at = non_empty(fields, UPDATED_AT)
        .and_then(|raw| parse_timestamp(raw).ok())
        .unwrap_or(created_at);
    Ok((created_at, updated_at))
}

fn text(key: &str, field: &'static str, raw: &[u8]) -> Result<String> {
    String::from_utf8(raw.to_vec()).map_err(|e| HashStoreError::corrupt(key, field, e))
}

/// Returns `true` if the record carries a tombstone.
pub(crate) fn is_deleted(fields: &HashFields) -> bool {
    fields.contains_key(DELETED_AT)
}

/// Commands that write a tenant record, clearing any tombstone.
pub(crate) fn tenant_ops(key: &str, tenant: &Tenant) -> Result<Vec<HashOp>> {
    let mut ops = vec![
        HashOp::Persist { key: key.to_string() },
        HashOp::hdel(key, DELETED_AT),
        HashOp::HSet {
            key: key.to_string(),
            fields: vec![
                (ID.into(), Bytes::from(tenant.id.clone())),
                (ENTITY.into(), Bytes::from_static(TENANT_ENTITY.as_bytes())),
                (CREATED_AT.into(), encode_timestamp(tenant.created_at)),
                (UPDATED_AT.into(), encode_timestamp(tenant.updated_at)),
            ],
        },
    ];
    ops.push(match &tenant.metadata {
        Some(metadata) => HashOp::hset(key, METADATA, to_json(METADATA, metadata)?),
        None => HashOp::hdel(key, METADATA),
    });
    Ok(ops)
}

/// Decodes a live tenant record. Derived fields are left empty.
pub(crate) fn decode_tenant(key: &str, fields: &HashFields) -> Result<Tenant> {
    let id = text(key, ID, required(key, fields, ID)?)?;
    if id.is_empty() {
        return Err(HashStoreError::corrupt(key, ID, "empty"));
    }
    let (created_at, updated_at) = timestamps(key, fields)?;
    let metadata = non_empty(fields, METADATA).map(|raw| from_json(key, METADATA, raw)).transpose()?;
    Ok(Tenant { id, destinations_count: 0, topics: Vec::new(), metadata, created_at, updated_at })
}

/// Commands that write a destination record and its summary in one batch,
/// clearing any tombstone.
pub(crate) fn destination_ops(
    key: &str,
    summary_key: &str,
    destination: &Destination,
    cipher: &Cipher,
) -> Result<Vec<HashOp>> {
    let credentials = cipher
        .encrypt(&to_json(CREDENTIALS, &destination.credentials)?)
        .map_err(|source| HashStoreError::Cipher { field: CREDENTIALS, source })?;

    let mut ops = vec![
        HashOp::Persist { key: key.to_string() },
        HashOp::hdel(key, DELETED_AT),
        HashOp::HSet {
            key: key.to_string(),
            fields: vec![
                (ID.into(), Bytes::from(destination.id.clone())),
                (ENTITY.into(), Bytes::from_static(DESTINATION_ENTITY.as_bytes())),
                (TYPE.into(), Bytes::from(destination.destination_type.clone())),
                (TOPICS.into(), Bytes::from(destination.topics.to_joined())),
                (CONFIG.into(), to_json(CONFIG, &destination.config)?),
                (CREDENTIALS.into(), Bytes::from(credentials)),
                (CREATED_AT.into(), encode_timestamp(destination.created_at)),
                (UPDATED_AT.into(), encode_timestamp(destination.updated_at)),
            ],
        },
    ];

    ops.push(match destination.disabled_at {
        Some(ts) => HashOp::hset(key, DISABLED_AT, encode_timestamp(ts)),
        None => HashOp::hdel(key, DISABLED_AT),
    });
    ops.push(match &destination.delivery_metadata {
        Some(delivery_metadata) => {
            let sealed = cipher
                .encrypt(&to_json(DELIVERY_METADATA, delivery_metadata)?)
                .map_err(|source| HashStoreError::Cipher { field: DELIVERY_METADATA, source })?;
            HashOp::hset(key, DELIVERY_METADATA, sealed)
        },
        None => HashOp::hdel(key, DELIVERY_METADATA),
    });
    ops.push(match &destination.metadata {
        Some(metadata) => HashOp::hset(key, METADATA, to_json(METADATA, metadata)?),
        None => HashOp::hdel(key, METADATA),
    });
    ops.push(match destination.effective_filter() {
        Some(filter) => HashOp::hset(key, FILTER, to_json(FILTER, filter)?),
        None => HashOp::hdel(key, FILTER),
    });
    ops.push(HashOp::hset(
        summary_key,
        destination.id.clone(),
        to_json("summary", &destination.to_summary())?,
    ));
    Ok(ops)
}

/// Decodes a live destination record, decrypting its secret fields.
pub(crate) fn decode_destination(
    key: &str,
    tenant_id: &str,
    fields: &HashFields,
    cipher: &Cipher,
) -> Result<Destination> {
    let (created_at, updated_at) = timestamps(key, fields)?;

    let credentials_raw = required(key, fields, CREDENTIALS)?;
    let credentials: StringMap = if credentials_raw.is_empty() {
        StringMap::new()
    } else {
        let plain = cipher
            .decrypt(credentials_raw)
            .map_err(|source| HashStoreError::Cipher { field: CREDENTIALS, source })?;
        from_json(key, CREDENTIALS, &plain)?
    };

    let delivery_metadata = match non_empty(fields, DELIVERY_METADATA) {
        Some(sealed) => {
            let plain = cipher
                .decrypt(sealed)
                .map_err(|source| HashStoreError::Cipher { field: DELIVERY_METADATA, source })?;
            Some(from_json(key, DELIVERY_METADATA, &plain)?)
        },
        None => None,
    };

    Ok(Destination {
        id: fields.get(ID).map(|raw| text(key, ID, raw)).transpose()?.unwrap_or_default(),
        tenant_id: tenant_id.to_string(),
        destination_type: fields.get(TYPE).map(|raw| text(key, TYPE, raw)).transpose()?.unwrap_or_default(),
        topics: Topics::from_joined(&text(key, TOPICS, required(key, fields, TOPICS)?)?),
        filter: non_empty(fields, FILTER).map(|raw| from_json(key, FILTER, raw)).transpose()?,
        config: non_empty(fields, CONFIG)
            .map(|raw| from_json(key, CONFIG, raw))
            .transpose()?
            .unwrap_or_default(),
        credentials,
        delivery_metadata,
        metadata: non_empty(fields, METADATA).map(|raw| from_json(key, METADATA, raw)).transpose()?,
        created_at,
        updated_at,
        disabled_at: non_empty(fields, DISABLED_AT).and_then(|raw| parse_timestamp(raw).ok()),
    })
}

/// Decodes every entry of a destination summary hash.
pub(crate) fn decode_summaries(key: &str, fields: &HashFields) -> Result<Vec<DestinationSummary>> {
    fields.values().map(|raw| from_json(key, "summary", raw)).collect()
}
