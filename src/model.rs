//! Typed records decoded from store documents.
//!
//! Remote documents are loosely shaped: older records store `assignedTo` as a
//! bare id, keep timestamps as epoch millis or `{seconds, nanoseconds}`
//! objects, and sometimes embed `{id, name}` objects where a foreign key is
//! expected. Decoding here is lenient: malformed fields fall back to empty
//! values (and are logged) rather than rejecting the whole record.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::store::Document;

/// A record that can be decoded from a store document.
pub trait Record: DeserializeOwned + Clone {
    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);

    /// Fold legacy field names into their current names before decoding.
    fn normalize(_data: &mut Map<String, Value>) {}
}

/// Decode a document, taking the id from the document envelope.
pub fn decode<T: Record>(doc: &Document) -> Result<T> {
    let mut data = doc.data.clone();
    T::normalize(&mut data);
    let mut record: T = serde_json::from_value(Value::Object(data))?;
    record.set_id(doc.id.clone());
    Ok(record)
}

/// `(legacy, current)` field names. Earlier legacy names win over later ones.
type LegacyKeys = &'static [(&'static str, &'static str)];

const TASK_LEGACY_KEYS: LegacyKeys = &[
    ("priority", "urgency"),
    ("projectId", "project"),
    ("customerIds", "customers"),
    ("customer", "customers"),
    ("deleted", "isDeleted"),
];
const SUBTASK_LEGACY_KEYS: LegacyKeys = &[("priority", "urgency")];
const COMMENT_LEGACY_KEYS: LegacyKeys = &[
    ("userName", "author"),
    ("createdBy", "author"),
    ("content", "text"),
];
const CUSTOMER_LEGACY_KEYS: LegacyKeys = &[("firstName", "name"), ("deleted", "isDeleted")];
const PROJECT_LEGACY_KEYS: LegacyKeys = &[("title", "name")];
const USER_LEGACY_KEYS: LegacyKeys = &[("name", "displayName"), ("fullName", "displayName")];

/// Move each legacy key onto its current name. A non-null current value is kept.
fn fold_legacy_keys(data: &mut Map<String, Value>, keys: LegacyKeys) {
    for (legacy, current) in keys {
        let Some(value) = data.remove(*legacy) else {
            continue;
        };
        if data.get(*current).map_or(true, Value::is_null) {
            data.insert((*current).to_string(), value);
        }
    }
}

fn fold_nested_legacy_keys(data: &mut Map<String, Value>, field: &str, keys: LegacyKeys) {
    if let Some(Value::Array(items)) = data.get_mut(field) {
        for item in items {
            if let Value::Object(entry) = item {
                fold_legacy_keys(entry, keys);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub title: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub description: String,
    /// Raw stored label; may be canonical, localized or legacy.
    #[serde(default, deserialize_with = "optional_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "optional_string")]
    pub urgency: Option<String>,
    #[serde(default, deserialize_with = "timestamp")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp")]
    pub completed_at: Option<DateTime<Utc>>,
    /// User ids, de-duplicated, never a bare scalar.
    #[serde(default, deserialize_with = "string_list")]
    pub assigned_to: Vec<String>,
    #[serde(default, deserialize_with = "optional_string")]
    pub project: Option<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub customers: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub subtasks: Vec<Subtask>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub comments: Vec<Comment>,
    #[serde(default, deserialize_with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_string")]
    pub created_by: Option<String>,
    #[serde(default, deserialize_with = "optional_string")]
    pub updated_by: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_deleted: bool,
}

impl Record for TaskRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn normalize(data: &mut Map<String, Value>) {
        fold_legacy_keys(data, TASK_LEGACY_KEYS);
        fold_nested_legacy_keys(data, "subtasks", SUBTASK_LEGACY_KEYS);
        fold_nested_legacy_keys(data, "comments", COMMENT_LEGACY_KEYS);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    #[serde(default, deserialize_with = "nullable_string")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub title: String,
    #[serde(default, deserialize_with = "optional_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "optional_string")]
    pub urgency: Option<String>,
    #[serde(default, deserialize_with = "timestamp")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(default, deserialize_with = "nullable_string")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub author: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub text: String,
    #[serde(default, deserialize_with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRecord {
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub last_name: String,
    #[serde(default, deserialize_with = "optional_string")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "optional_string")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_deleted: bool,
}

impl Record for CustomerRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn normalize(data: &mut Map<String, Value>) {
        fold_legacy_keys(data, CUSTOMER_LEGACY_KEYS);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub name: String,
    #[serde(default, deserialize_with = "optional_string")]
    pub status: Option<String>,
}

impl Record for ProjectRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn normalize(data: &mut Map<String, Value>) {
        fold_legacy_keys(data, PROJECT_LEGACY_KEYS);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(default, deserialize_with = "optional_string")]
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "optional_string")]
    pub email: Option<String>,
}

impl UserRecord {
    /// Best available label: display name, then email, then id.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}

impl Record for UserRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn normalize(data: &mut Map<String, Value>) {
        fold_legacy_keys(data, USER_LEGACY_KEYS);
    }
}

/// Parse the timestamp shapes the store has used over time.
pub fn parse_timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => parse_timestamp(raw),
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64))
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            Utc.timestamp_opt(seconds, u32::try_from(nanos).ok()?).single()
        }
        _ => None,
    }
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}

fn timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(Value::Null) => None,
        Some(value) => {
            let parsed = parse_timestamp_value(&value);
            if parsed.is_none() {
                tracing::warn!(%value, "dropping malformed timestamp");
            }
            parsed
        }
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn nullable_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(scalar_text).unwrap_or_default())
}

/// Reference id: a string, or an embedded object carrying `id`.
fn reference_id(value: &Value) -> Option<String> {
    let id = match value {
        Value::Object(map) => map.get("id").and_then(scalar_text),
        other => scalar_text(other),
    }?;
    let trimmed = id.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn optional_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(reference_id))
}

fn string_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    let candidates: Vec<String> = match raw {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter_map(reference_id).collect(),
        Some(other) => reference_id(&other).into_iter().collect(),
    };
    Ok(dedup_ids(candidates))
}

/// De-duplicate ids, keeping first occurrence order.
pub fn dedup_ids<I>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = std::collections::HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

fn lenient_list<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Array(items)) = raw else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(%err, "skipping malformed nested entry");
                None
            }
        })
        .collect())
}

fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Bool(flag)) => flag,
        Some(Value::String(text)) => text.trim().eq_ignore_ascii_case("true"),
        Some(Value::Number(number)) => number.as_i64().unwrap_or(0) != 0,
        _ => false,
    })
}
