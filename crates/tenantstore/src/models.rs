//! Tenant, destination and event models.
//!
//! These are the records every [`TenantStore`](crate::TenantStore) backend
//! reads and writes. Two fields on [`Tenant`] are derived rather than stored:
//! `destinations_count` and `topics` are recomputed from the tenant's live
//! destinations on every read.
//!
//! Timestamps use [`chrono::DateTime<Utc>`]. The `Default` value (the Unix
//! epoch) means "unset"; stores replace unset timestamps with the current time
//! on upsert.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use serde_json::{Map, Value};

use crate::filter;

/// Topic that subscribes a destination to every event.
pub const WILDCARD_TOPIC: &str = "*";

/// Free-form string key/value map.
pub type StringMap = BTreeMap<String, String>;

/// A content filter: a JSON object evaluated by the [`filter`] engine.
pub type Filter = Map<String, Value>;

/// Returns `true` if `ts` carries no value.
#[must_use]
pub fn is_unset(ts: &DateTime<Utc>) -> bool {
    *ts == DateTime::<Utc>::UNIX_EPOCH
}

/// An isolated customer namespace that owns destinations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant identifier.
    pub id: String,
    /// Number of live destinations. Derived at read time.
    #[serde(default)]
    pub destinations_count: usize,
    /// Sorted union of live destination topics, or `["*"]`. Derived at read time.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Opaque caller-supplied metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<StringMap>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Creates a tenant with the given ID and unset timestamps.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Self::default() }
    }

    /// Replaces unset timestamps with `now`.
    pub fn fill_timestamps(&mut self, now: DateTime<Utc>) {
        if is_unset(&self.created_at) {
            self.created_at = now;
        }
        if is_unset(&self.updated_at) {
            self.updated_at = now;
        }
    }
}

/// The topics a destination subscribes to.
///
/// Serializes as a JSON array. Deserializes from an array or from the bare
/// string `"*"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Topics(Vec<String>);

impl Topics {
    /// Creates a topic list.
    #[must_use]
    pub fn new<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(topics.into_iter().map(Into::into).collect())
    }

    /// The wildcard subscription `["*"]`.
    #[must_use]
    pub fn wildcard() -> Self {
        Self(vec![WILDCARD_TOPIC.to_string()])
    }

    /// Returns `true` if this subscription is exactly the wildcard.
    #[must_use]
    pub fn matches_all(&self) -> bool {
        self.0.len() == 1 && self.0[0] == WILDCARD_TOPIC
    }

    /// Returns `true` if an event with `topic` is delivered under this subscription.
    ///
    /// An empty or wildcard event topic matches every subscription.
    #[must_use]
    pub fn matches_topic(&self, topic: &str) -> bool {
        topic.is_empty()
            || topic == WILDCARD_TOPIC
            || self.matches_all()
            || self.0.iter().any(|t| t == topic)
    }

    /// Returns `true` if `topic` appears literally in the list.
    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.0.iter().any(|t| t == topic)
    }

    /// Topics in subscription order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Iterates over the topics.
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    /// Returns `true` if there are no topics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Comma-joined storage form.
    #[must_use]
    pub fn to_joined(&self) -> String {
        self.0.join(",")
    }

    /// Parses the comma-joined storage form.
    #[must_use]
    pub fn from_joined(joined: &str) -> Self {
        if joined.is_empty() {
            return Self::default();
        }
        Self(joined.split(',').map(str::to_string).collect())
    }
}

impl<'a> IntoIterator for &'a Topics {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<Vec<String>> for Topics {
    fn from(topics: Vec<String>) -> Self {
        Self(topics)
    }
}

impl Serialize for Topics {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.0)
    }
}

impl<'de> Deserialize<'de> for Topics {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(String),
            Many(Vec<String>),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Many(topics) => Ok(Self(topics)),
            Repr::One(topic) if topic == WILDCARD_TOPIC => Ok(Self::wildcard()),
            Repr::One(topic) => Err(de::Error::invalid_value(
                de::Unexpected::Str(&topic),
                &"an array of topics or \"*\"",
            )),
        }
    }
}

/// A delivery endpoint owned by a tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    /// Destination identifier, unique within the tenant.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Provider type, e.g. `webhook`.
    #[serde(rename = "type")]
    pub destination_type: String,
    /// Subscribed topics.
    pub topics: Topics,
    /// Optional content filter. An empty filter behaves like no filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    /// Plaintext provider configuration.
    #[serde(default, deserialize_with = "lenient_string_map")]
    pub config: StringMap,
    /// Secret provider credentials. Encrypted at rest.
    #[serde(default, deserialize_with = "lenient_string_map")]
    pub credentials: StringMap,
    /// Extra values attached to each delivery. Encrypted at rest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_metadata: Option<StringMap>,
    /// Opaque caller-supplied metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<StringMap>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Set while the destination is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_at: Option<DateTime<Utc>>,
}

impl Destination {
    /// Replaces unset timestamps with `now`.
    pub fn fill_timestamps(&mut self, now: DateTime<Utc>) {
        if is_unset(&self.created_at) {
            self.created_at = now;
        }
        if is_unset(&self.updated_at) {
            self.updated_at = now;
        }
    }

    /// The filter, if present and non-empty.
    #[must_use]
    pub fn effective_filter(&self) -> Option<&Filter> {
        self.filter.as_ref().filter(|f| !f.is_empty())
    }

    /// The lightweight projection used for matching.
    #[must_use]
    pub fn to_summary(&self) -> DestinationSummary {
        DestinationSummary {
            id: self.id.clone(),
            destination_type: self.destination_type.clone(),
            topics: self.topics.clone(),
            filter: self.effective_filter().cloned(),
            disabled: self.disabled_at.is_some(),
        }
    }

    /// Returns `true` if `event` should be delivered to this destination.
    #[must_use]
    pub fn matches_event(&self, event: &Event) -> bool {
        event_matches(self.disabled_at.is_some(), &self.topics, self.effective_filter(), event)
    }
}

/// Projection of a destination kept alongside every write and used for matching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DestinationSummary {
    /// Destination identifier.
    pub id: String,
    /// Provider type.
    #[serde(rename = "type")]
    pub destination_type: String,
    /// Subscribed topics.
    pub topics: Topics,
    /// Content filter, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    /// Whether the destination is disabled.
    #[serde(default)]
    pub disabled: bool,
}

impl DestinationSummary {
    /// Returns `true` if `event` should be delivered to this destination.
    #[must_use]
    pub fn matches_event(&self, event: &Event) -> bool {
        let filter = self.filter.as_ref().filter(|f| !f.is_empty());
        event_matches(self.disabled, &self.topics, filter, event)
    }
}

// Topic is checked before the filter and short-circuits it.
fn event_matches(disabled: bool, topics: &Topics, filter: Option<&Filter>, event: &Event) -> bool {
    if disabled || !topics.matches_topic(&event.topic) {
        return false;
    }
    match filter {
        Some(filter) => filter::matches_filter(&event.filter_input(), filter),
        None => true,
    }
}

/// An inbound event to be routed to destinations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier.
    pub id: String,
    /// Tenant the event belongs to.
    pub tenant_id: String,
    /// Set when the event targets a single destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<String>,
    /// Event topic.
    #[serde(default)]
    pub topic: String,
    /// Event time.
    pub time: DateTime<Utc>,
    /// Event metadata.
    #[serde(default)]
    pub metadata: StringMap,
    /// Event payload.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Event {
    /// The JSON document content filters are evaluated against.
    #[must_use]
    pub fn filter_input(&self) -> Value {
        let metadata: Map<String, Value> =
            self.metadata.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
        let mut input = Map::new();
        input.insert("id".into(), Value::String(self.id.clone()));
        input.insert("topic".into(), Value::String(self.topic.clone()));
        input.insert(
            "time".into(),
            Value::String(self.time.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        input.insert("metadata".into(), Value::Object(metadata));
        input.insert("data".into(), Value::Object(self.data.clone()));
        Value::Object(input)
    }
}

/// Aggregates the topics of a tenant's destinations.
///
/// Returns the sorted union of all topics, or `["*"]` as soon as any
/// destination subscribes to the wildcard. Computed fresh on every read.
#[must_use]
pub fn aggregate_topics<'a, I>(subscriptions: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Topics>,
{
    let mut all = BTreeSet::new();
    for topics in subscriptions {
        for topic in topics {
            if topic == WILDCARD_TOPIC {
                return vec![WILDCARD_TOPIC.to_string()];
            }
            all.insert(topic.clone());
        }
    }
    all.into_iter().collect()
}

/// Accepts a JSON object whose values are strings, numbers or booleans and
/// stringifies the non-string ones.
fn lenient_string_map<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StringMap, D::Error> {
    let raw = Option::<Map<String, Value>>::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(StringMap::new());
    };
    raw.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(de::Error::custom(format!(
                        "unsupported value for key {key:?}: {other}"
                    )));
                },
            };
            Ok((key, value))
        })
        .collect()
}
