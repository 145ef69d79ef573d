//! Document store boundary.
//!
//! Persistence, querying and change delivery are external. The board only
//! needs to read a collection, subscribe to full-collection snapshots, and
//! request writes. [`DocumentStore`] is that contract; [`memory::MemoryStore`]
//! and [`json_dir::JsonDirStore`] implement it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

pub mod json_dir;
pub mod memory;

pub use json_dir::JsonDirStore;
pub use memory::MemoryStore;

/// Field holding the soft-delete flag on every collection.
pub const DELETED_FIELD: &str = "isDeleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Tasks,
    Customers,
    Projects,
    Users,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Tasks,
        Collection::Customers,
        Collection::Projects,
        Collection::Users,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Tasks => "tasks",
            Collection::Customers => "customers",
            Collection::Projects => "projects",
            Collection::Users => "users",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored document: id plus free-form fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.data.get(DELETED_FIELD), Some(Value::Bool(true)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    /// Missing fields satisfy `NotEq`, so records written before a flag
    /// existed still match "not deleted".
    NotEq,
    /// Array field contains the value; a scalar field equal to the value also
    /// matches (legacy single-id fields).
    ArrayContains,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn not_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::NotEq,
            value: value.into(),
        }
    }

    pub fn array_contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::ArrayContains,
            value: value.into(),
        }
    }

    pub fn matches(&self, data: &Map<String, Value>) -> bool {
        let current = data.get(&self.field);
        match self.op {
            FilterOp::Eq => current == Some(&self.value),
            FilterOp::NotEq => current != Some(&self.value),
            FilterOp::ArrayContains => match current {
                Some(Value::Array(items)) => items.contains(&self.value),
                Some(other) => other == &self.value,
                None => false,
            },
        }
    }
}

pub fn matches_all(filters: &[Filter], data: &Map<String, Value>) -> bool {
    filters.iter().all(|filter| filter.matches(data))
}

/// Full point-in-time copy of a (filtered) collection as the store sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSnapshot {
    pub collection: Collection,
    /// Monotonic per-collection write counter.
    pub revision: u64,
    pub documents: Vec<Document>,
}

/// Typed, immutable snapshot shared between the watcher and the view model.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub collection: Collection,
    pub revision: u64,
    pub records: Arc<[T]>,
}

impl<T> Snapshot<T> {
    pub fn new(collection: Collection, revision: u64, records: Vec<T>) -> Self {
        Self {
            collection,
            revision,
            records: Arc::from(records),
        }
    }

    pub fn empty(collection: Collection) -> Self {
        Self::new(collection, 0, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.records.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Receives every snapshot (or failure) of one subscription. May be invoked
/// from a store-owned thread.
pub type SnapshotCallback = Box<dyn Fn(Result<RawSnapshot>) + Send + Sync + 'static>;

/// Read, subscribe and write access to a remote document store.
pub trait DocumentStore {
    /// One-shot read of a filtered collection.
    fn query(
        &self,
        collection: Collection,
        filters: &[Filter],
    ) -> impl Future<Output = Result<RawSnapshot>>;

    /// Start delivering snapshots of `collection` to `callback`. The current
    /// snapshot is delivered first, then one per upstream change.
    fn subscribe(
        &self,
        collection: Collection,
        filters: Vec<Filter>,
        callback: SnapshotCallback,
    ) -> Result<SubscriptionId>;

    /// Stop a subscription. Unknown or already-released ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    fn create_document(
        &self,
        collection: Collection,
        data: Map<String, Value>,
    ) -> impl Future<Output = Result<String>>;

    /// Shallow-merge `partial` into an existing document.
    fn update_document(
        &self,
        collection: Collection,
        id: &str,
        partial: Map<String, Value>,
    ) -> impl Future<Output = Result<()>>;

    /// Flag a document as deleted. Never removes it.
    fn soft_delete_document(
        &self,
        collection: Collection,
        id: &str,
    ) -> impl Future<Output = Result<()>> {
        let mut partial = Map::new();
        partial.insert(DELETED_FIELD.to_string(), Value::Bool(true));
        self.update_document(collection, id, partial)
    }
}

/// Supplies the id of the acting user.
pub trait IdentityProvider {
    fn current_actor_id(&self) -> String;
}

/// Fixed actor id, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIdentity(pub String);

impl IdentityProvider for StaticIdentity {
    fn current_actor_id(&self) -> String {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn not_eq_matches_missing_field() {
        let filter = Filter::not_eq(DELETED_FIELD, true);
        assert!(filter.matches(&data(json!({ "title": "x" }))));
        assert!(filter.matches(&data(json!({ "isDeleted": false }))));
        assert!(!filter.matches(&data(json!({ "isDeleted": true }))));
    }

    #[test]
    fn array_contains_accepts_legacy_scalar() {
        let filter = Filter::array_contains("assignedTo", "u1");
        assert!(filter.matches(&data(json!({ "assignedTo": ["u2", "u1"] }))));
        assert!(filter.matches(&data(json!({ "assignedTo": "u1" }))));
        assert!(!filter.matches(&data(json!({ "assignedTo": ["u2"] }))));
        assert!(!filter.matches(&data(json!({}))));
    }

    #[test]
    fn document_flattens_fields() {
        let doc: Document =
            serde_json::from_value(json!({ "id": "t1", "title": "Call" })).expect("doc");
        assert_eq!(doc.id, "t1");
        assert_eq!(doc.data.get("title"), Some(&json!("Call")));
        assert!(!doc.data.contains_key("id"));
    }
}
