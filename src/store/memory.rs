//! In-process document store.
//!
//! Delivers snapshots synchronously on every write, which makes it the store
//! of choice for tests. Write failures and subscription errors can be
//! injected to drive the revert and stale-stream paths.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};
use ulid::Ulid;

use super::{
    matches_all, Collection, Document, DocumentStore, Filter, RawSnapshot, SnapshotCallback,
    SubscriptionId,
};
use crate::error::{Error, Result};

struct Subscriber {
    id: SubscriptionId,
    collection: Collection,
    filters: Vec<Filter>,
    callback: Arc<SnapshotCallback>,
}

#[derive(Default)]
struct MemoryState {
    documents: HashMap<Collection, Vec<Document>>,
    revisions: HashMap<Collection, u64>,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,
    queued_failures: VecDeque<String>,
    writes: Vec<(Collection, String)>,
}

impl MemoryState {
    fn snapshot(&self, collection: Collection, filters: &[Filter]) -> RawSnapshot {
        let documents = self
            .documents
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches_all(filters, &doc.data))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        RawSnapshot {
            collection,
            revision: self.revisions.get(&collection).copied().unwrap_or(0),
            documents,
        }
    }

    fn bump(&mut self, collection: Collection) {
        *self.revisions.entry(collection).or_insert(0) += 1;
    }

    fn take_failure(&mut self) -> Option<String> {
        self.queued_failures.pop_front()
    }

    fn pending_deliveries(&self, collection: Collection) -> Vec<(Arc<SnapshotCallback>, RawSnapshot)> {
        self.subscribers
            .iter()
            .filter(|sub| sub.collection == collection)
            .map(|sub| (Arc::clone(&sub.callback), self.snapshot(collection, &sub.filters)))
            .collect()
    }
}

/// Shared in-memory store. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // Poisoned state is still consistent between writes.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or replace a document and notify subscribers.
    pub fn put(&self, collection: Collection, id: &str, data: Value) {
        let fields = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let deliveries = {
            let mut state = self.state();
            let docs = state.documents.entry(collection).or_default();
            match docs.iter_mut().find(|doc| doc.id == id) {
                Some(doc) => doc.data = fields,
                None => docs.push(Document::new(id, fields)),
            }
            state.bump(collection);
            state.pending_deliveries(collection)
        };
        deliver(deliveries);
    }

    /// Fail the next write with `message`.
    pub fn fail_next_write(&self, message: impl Into<String>) {
        self.state().queued_failures.push_back(message.into());
    }

    /// Report an error to every subscriber of `collection`.
    pub fn emit_error(&self, collection: Collection, message: &str) {
        let callbacks: Vec<Arc<SnapshotCallback>> = self
            .state()
            .subscribers
            .iter()
            .filter(|sub| sub.collection == collection)
            .map(|sub| Arc::clone(&sub.callback))
            .collect();
        for callback in callbacks {
            callback(Err(Error::Subscription {
                collection,
                message: message.to_string(),
            }));
        }
    }

    /// Current contents of a document.
    pub fn get(&self, collection: Collection, id: &str) -> Option<Document> {
        self.state()
            .documents
            .get(&collection)
            .and_then(|docs| docs.iter().find(|doc| doc.id == id).cloned())
    }

    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }

    /// Writes that reached the store, in order.
    pub fn writes(&self) -> Vec<(Collection, String)> {
        self.state().writes.clone()
    }

    fn write(
        &self,
        collection: Collection,
        id: &str,
        apply: impl FnOnce(&mut Vec<Document>) -> Result<()>,
    ) -> Result<()> {
        let deliveries = {
            let mut state = self.state();
            if let Some(message) = state.take_failure() {
                return Err(Error::Store(message));
            }
            let docs = state.documents.entry(collection).or_default();
            apply(docs)?;
            state.writes.push((collection, id.to_string()));
            state.bump(collection);
            state.pending_deliveries(collection)
        };
        deliver(deliveries);
        Ok(())
    }
}

fn deliver(deliveries: Vec<(Arc<SnapshotCallback>, RawSnapshot)>) {
    for (callback, snapshot) in deliveries {
        callback(Ok(snapshot));
    }
}

impl DocumentStore for MemoryStore {
    async fn query(&self, collection: Collection, filters: &[Filter]) -> Result<RawSnapshot> {
        Ok(self.state().snapshot(collection, filters))
    }

    fn subscribe(
        &self,
        collection: Collection,
        filters: Vec<Filter>,
        callback: SnapshotCallback,
    ) -> Result<SubscriptionId> {
        let callback = Arc::new(callback);
        let (id, initial) = {
            let mut state = self.state();
            state.next_subscription += 1;
            let id = SubscriptionId(state.next_subscription);
            let initial = state.snapshot(collection, &filters);
            state.subscribers.push(Subscriber {
                id,
                collection,
                filters,
                callback: Arc::clone(&callback),
            });
            (id, initial)
        };
        callback(Ok(initial));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.state().subscribers.retain(|sub| sub.id != id);
    }

    async fn create_document(
        &self,
        collection: Collection,
        data: Map<String, Value>,
    ) -> Result<String> {
        let id = Ulid::new().to_string().to_ascii_lowercase();
        self.write(collection, &id, |docs| {
            docs.push(Document::new(id.clone(), data));
            Ok(())
        })?;
        Ok(id)
    }

    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        partial: Map<String, Value>,
    ) -> Result<()> {
        self.write(collection, id, |docs| {
            let doc = docs
                .iter_mut()
                .find(|doc| doc.id == id)
                .ok_or_else(|| Error::NotFound {
                    collection,
                    id: id.to_string(),
                })?;
            for (key, value) in partial {
                doc.data.insert(key, value);
            }
            Ok(())
        })
    }
}
