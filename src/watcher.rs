//! Remote collection watcher.
//!
//! Keeps three live subscriptions (tasks assigned to the actor, customers,
//! projects) and hands each handler a full typed snapshot on every upstream
//! change. Within one stream a snapshot older than the last delivered one is
//! dropped; across streams there is no ordering. A failing stream reports
//! through `on_error` and leaves the other two running. Retrying is the
//! caller's business.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::{decode, CustomerRecord, ProjectRecord, Record, TaskRecord, UserRecord};
use crate::store::{
    Collection, DocumentStore, Filter, RawSnapshot, Snapshot, SnapshotCallback, SubscriptionId,
    DELETED_FIELD,
};

pub type SnapshotHandler<T> = Box<dyn Fn(Snapshot<T>) + Send + Sync + 'static>;
pub type ErrorHandler = Arc<dyn Fn(Collection, Error) + Send + Sync + 'static>;

/// Callbacks for the three streams plus the shared error callback.
pub struct WatchHandlers {
    pub on_tasks: SnapshotHandler<TaskRecord>,
    pub on_customers: SnapshotHandler<CustomerRecord>,
    pub on_projects: SnapshotHandler<ProjectRecord>,
    pub on_error: ErrorHandler,
}

/// Filters scoping the task stream to one actor's live tasks.
pub fn task_filters(actor_id: &str) -> Vec<Filter> {
    vec![
        Filter::array_contains("assignedTo", actor_id),
        Filter::not_eq(DELETED_FIELD, true),
    ]
}

pub fn customer_filters() -> Vec<Filter> {
    vec![Filter::not_eq(DELETED_FIELD, true)]
}

/// Releases every subscription it holds when unsubscribed or dropped.
pub struct WatchHandle<S: DocumentStore> {
    store: S,
    subscriptions: Vec<(Collection, SubscriptionId)>,
}

impl<S: DocumentStore> WatchHandle<S> {
    /// Release all subscriptions. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        for (collection, id) in self.subscriptions.drain(..) {
            self.store.unsubscribe(id);
            tracing::debug!(collection = collection.as_str(), "released subscription");
        }
    }

    pub fn is_active(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Collections with a live subscription.
    pub fn collections(&self) -> Vec<Collection> {
        self.subscriptions.iter().map(|(collection, _)| *collection).collect()
    }
}

impl<S: DocumentStore> Drop for WatchHandle<S> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Subscribe to tasks, customers and projects for `actor_id`.
///
/// A stream that cannot be opened is reported through `on_error`; the
/// returned handle holds the streams that did open.
pub fn subscribe<S>(store: &S, actor_id: &str, handlers: WatchHandlers) -> WatchHandle<S>
where
    S: DocumentStore + Clone,
{
    let WatchHandlers {
        on_tasks,
        on_customers,
        on_projects,
        on_error,
    } = handlers;

    let mut subscriptions = Vec::with_capacity(3);
    let streams = [
        open_stream(
            store,
            Collection::Tasks,
            task_filters(actor_id),
            on_tasks,
            Arc::clone(&on_error),
        ),
        open_stream(
            store,
            Collection::Customers,
            customer_filters(),
            on_customers,
            Arc::clone(&on_error),
        ),
        open_stream(
            store,
            Collection::Projects,
            Vec::new(),
            on_projects,
            Arc::clone(&on_error),
        ),
    ];
    for (collection, opened) in streams {
        match opened {
            Ok(id) => subscriptions.push((collection, id)),
            Err(err) => on_error(collection, as_subscription_error(collection, err)),
        }
    }

    tracing::info!(actor = actor_id, streams = subscriptions.len(), "watching board collections");
    WatchHandle {
        store: store.clone(),
        subscriptions,
    }
}

fn open_stream<S, T>(
    store: &S,
    collection: Collection,
    filters: Vec<Filter>,
    deliver: SnapshotHandler<T>,
    on_error: ErrorHandler,
) -> (Collection, Result<SubscriptionId>)
where
    S: DocumentStore,
    T: Record + Send + Sync + 'static,
{
    let latest = AtomicU64::new(0);
    let callback: SnapshotCallback = Box::new(move |result| match result {
        Ok(raw) => {
            let previous = latest.fetch_max(raw.revision, Ordering::SeqCst);
            if raw.revision < previous {
                tracing::debug!(
                    collection = collection.as_str(),
                    revision = raw.revision,
                    latest = previous,
                    "dropping stale snapshot"
                );
                return;
            }
            deliver(decode_snapshot(raw));
        }
        Err(err) => on_error(collection, as_subscription_error(collection, err)),
    });
    (collection, store.subscribe(collection, filters, callback))
}

fn as_subscription_error(collection: Collection, err: Error) -> Error {
    match err {
        Error::Subscription { .. } => err,
        other => Error::Subscription {
            collection,
            message: other.to_string(),
        },
    }
}

/// Decode every document, skipping (and logging) the ones that fail.
pub fn decode_snapshot<T: Record>(raw: RawSnapshot) -> Snapshot<T> {
    let records = raw
        .documents
        .iter()
        .filter_map(|doc| match decode::<T>(doc) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(
                    collection = raw.collection.as_str(),
                    id = doc.id.as_str(),
                    %err,
                    "skipping undecodable document"
                );
                None
            }
        })
        .collect();
    Snapshot::new(raw.collection, raw.revision, records)
}

/// One-shot read of the user directory.
pub async fn load_users<S: DocumentStore>(store: &S) -> Result<Snapshot<UserRecord>> {
    let raw = store.query(Collection::Users, &[]).await?;
    Ok(decode_snapshot(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::{json, Map, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded {
        tasks: Vec<Snapshot<TaskRecord>>,
        customers: Vec<Snapshot<CustomerRecord>>,
        projects: Vec<Snapshot<ProjectRecord>>,
        errors: Vec<(Collection, String)>,
    }

    fn recording_handlers() -> (WatchHandlers, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let tasks = Arc::clone(&recorded);
        let customers = Arc::clone(&recorded);
        let projects = Arc::clone(&recorded);
        let errors = Arc::clone(&recorded);
        let handlers = WatchHandlers {
            on_tasks: Box::new(move |snap| tasks.lock().unwrap().tasks.push(snap)),
            on_customers: Box::new(move |snap| customers.lock().unwrap().customers.push(snap)),
            on_projects: Box::new(move |snap| projects.lock().unwrap().projects.push(snap)),
            on_error: Arc::new(move |collection, err| {
                errors.lock().unwrap().errors.push((collection, err.to_string()))
            }),
        };
        (handlers, recorded)
    }

    /// Store double that hands callbacks back to the test.
    #[derive(Clone, Default)]
    struct ManualStore {
        callbacks: Arc<Mutex<HashMap<Collection, Arc<SnapshotCallback>>>>,
        released: Arc<Mutex<Vec<SubscriptionId>>>,
        refuse: Option<Collection>,
    }

    impl ManualStore {
        fn push(&self, collection: Collection, revision: u64, ids: &[&str]) {
            let callback = self.callbacks.lock().unwrap().get(&collection).cloned();
            let documents = ids
                .iter()
                .map(|id| crate::store::Document::new(*id, Map::new()))
                .collect();
            if let Some(callback) = callback {
                callback(Ok(RawSnapshot {
                    collection,
                    revision,
                    documents,
                }));
            }
        }
    }

    impl DocumentStore for ManualStore {
        async fn query(&self, collection: Collection, _filters: &[Filter]) -> Result<RawSnapshot> {
            Ok(RawSnapshot {
                collection,
                revision: 0,
                documents: Vec::new(),
            })
        }

        fn subscribe(
            &self,
            collection: Collection,
            _filters: Vec<Filter>,
            callback: SnapshotCallback,
        ) -> Result<SubscriptionId> {
            if self.refuse == Some(collection) {
                return Err(Error::Store("permission denied".to_string()));
            }
            self.callbacks
                .lock()
                .unwrap()
                .insert(collection, Arc::new(callback));
            Ok(SubscriptionId(collection as u64 + 1))
        }

        fn unsubscribe(&self, id: SubscriptionId) {
            self.released.lock().unwrap().push(id);
        }

        async fn create_document(
            &self,
            _collection: Collection,
            _data: Map<String, Value>,
        ) -> Result<String> {
            Ok("new".to_string())
        }

        async fn update_document(
            &self,
            _collection: Collection,
            _id: &str,
            _partial: Map<String, Value>,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn task_stream_is_scoped_to_actor_and_live_records() {
        let store = MemoryStore::new();
        store.put(Collection::Tasks, "mine", json!({ "title": "a", "assignedTo": ["u1"] }));
        store.put(Collection::Tasks, "legacy", json!({ "title": "b", "assignedTo": "u1" }));
        store.put(Collection::Tasks, "theirs", json!({ "title": "c", "assignedTo": ["u2"] }));
        store.put(
            Collection::Tasks,
            "gone",
            json!({ "title": "d", "assignedTo": ["u1"], "isDeleted": true }),
        );
        store.put(Collection::Customers, "c1", json!({ "name": "Dana" }));
        store.put(Collection::Customers, "c2", json!({ "name": "Old", "isDeleted": true }));

        let (handlers, recorded) = recording_handlers();
        let _handle = subscribe(&store, "u1", handlers);

        let recorded = recorded.lock().unwrap();
        let tasks = recorded.tasks.last().expect("task snapshot");
        let mut ids: Vec<&str> = tasks.iter().map(|task| task.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["legacy", "mine"]);

        let customers = recorded.customers.last().expect("customer snapshot");
        assert_eq!(customers.len(), 1);
        assert_eq!(recorded.projects.len(), 1);
    }

    #[test]
    fn stale_snapshots_are_dropped_per_stream() {
        let store = ManualStore::default();
        let (handlers, recorded) = recording_handlers();
        let _handle = subscribe(&store, "u1", handlers);

        store.push(Collection::Tasks, 5, &["a", "b"]);
        store.push(Collection::Tasks, 3, &["a"]);
        store.push(Collection::Tasks, 5, &["a", "b"]);
        store.push(Collection::Projects, 1, &["p"]);
        store.push(Collection::Tasks, 6, &["b"]);

        let recorded = recorded.lock().unwrap();
        let revisions: Vec<u64> = recorded.tasks.iter().map(|snap| snap.revision).collect();
        assert_eq!(revisions, vec![5, 5, 6]);
        assert_eq!(recorded.projects.len(), 1);
    }

    #[test]
    fn failing_stream_does_not_block_others() {
        let store = ManualStore {
            refuse: Some(Collection::Customers),
            ..ManualStore::default()
        };
        let (handlers, recorded) = recording_handlers();
        let handle = subscribe(&store, "u1", handlers);
        assert_eq!(
            handle.collections(),
            vec![Collection::Tasks, Collection::Projects]
        );

        store.push(Collection::Tasks, 1, &["a"]);
        store.push(Collection::Projects, 1, &["p"]);

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.errors.len(), 1);
        assert_eq!(recorded.errors[0].0, Collection::Customers);
        assert_eq!(recorded.tasks.len(), 1);
        assert_eq!(recorded.projects.len(), 1);
    }

    #[test]
    fn runtime_errors_reach_error_callback() {
        let store = MemoryStore::new();
        let (handlers, recorded) = recording_handlers();
        let _handle = subscribe(&store, "u1", handlers);

        store.emit_error(Collection::Projects, "connection lost");
        store.put(Collection::Tasks, "t1", json!({ "title": "a", "assignedTo": ["u1"] }));

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.errors.len(), 1);
        assert!(recorded.errors[0].1.contains("connection lost"));
        assert_eq!(recorded.tasks.last().map(|snap| snap.len()), Some(1));
    }

    #[test]
    fn unsubscribe_is_idempotent_and_releases_all() {
        let store = ManualStore::default();
        let (handlers, _recorded) = recording_handlers();
        let mut handle = subscribe(&store, "u1", handlers);
        assert!(handle.is_active());

        handle.unsubscribe();
        handle.unsubscribe();
        drop(handle);

        assert_eq!(store.released.lock().unwrap().len(), 3);
    }

    #[test]
    fn odd_documents_decode_leniently() {
        let raw = RawSnapshot {
            collection: Collection::Tasks,
            revision: 2,
            documents: vec![
                crate::store::Document::new("ok", Map::new()),
                crate::store::Document::new(
                    "bad",
                    json!({ "subtasks": 7, "title": ["not", "text"] })
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                ),
            ],
        };
        let snapshot: Snapshot<TaskRecord> = decode_snapshot(raw);
        assert_eq!(snapshot.revision, 2);
        assert_eq!(snapshot.len(), 2);
        let bad = snapshot.iter().find(|task| task.id == "bad").expect("bad");
        assert!(bad.title.is_empty());
        assert!(bad.subtasks.is_empty());
    }
}
