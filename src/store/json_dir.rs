//! Document store backed by a directory of JSON files.
//!
//! Layout: one `<collection>.json` per collection holding
//! `{ "revision": n, "documents": [{ "id": ..., ...fields }] }`. Writes hold
//! `.crmboard.lock` and replace the file atomically. Subscriptions run a
//! `notify` watcher on the directory and re-read the collection file after a
//! debounce window, delivering only when its revision moved.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use notify::{PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

use super::{
    matches_all, Collection, Document, DocumentStore, Filter, RawSnapshot, SnapshotCallback,
    SubscriptionId,
};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::lock::{read_json, write_json_atomic, FileLock};

const LOCK_FILE: &str = ".crmboard.lock";
const STOP_POLL_MS: u64 = 100;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionFile {
    #[serde(default)]
    revision: u64,
    #[serde(default)]
    documents: Vec<Document>,
}

struct Inner {
    root: PathBuf,
    lock_timeout_ms: u64,
    debounce: Duration,
    next_subscription: AtomicU64,
    stops: Mutex<HashMap<SubscriptionId, Arc<AtomicBool>>>,
}

impl Inner {
    fn collection_path(&self, collection: Collection) -> PathBuf {
        self.root.join(format!("{}.json", collection.as_str()))
    }

    fn load(&self, collection: Collection) -> Result<CollectionFile> {
        Ok(read_json(self.collection_path(collection))?.unwrap_or_default())
    }

    fn snapshot(&self, collection: Collection, filters: &[Filter]) -> Result<RawSnapshot> {
        let file = self.load(collection)?;
        Ok(RawSnapshot {
            collection,
            revision: file.revision,
            documents: file
                .documents
                .into_iter()
                .filter(|doc| matches_all(filters, &doc.data))
                .collect(),
        })
    }

    /// Read-modify-write a collection under the directory lock.
    fn modify<T>(
        &self,
        collection: Collection,
        apply: impl FnOnce(&mut Vec<Document>) -> Result<T>,
    ) -> Result<T> {
        let _lock = FileLock::acquire(self.root.join(LOCK_FILE), self.lock_timeout_ms)?;
        let mut file = self.load(collection)?;
        let output = apply(&mut file.documents)?;
        file.revision += 1;
        write_json_atomic(self.collection_path(collection), &file)?;
        tracing::debug!(
            collection = collection.as_str(),
            revision = file.revision,
            "collection written"
        );
        Ok(output)
    }

    fn stop_flag(&self, id: SubscriptionId) -> Option<Arc<AtomicBool>> {
        self.stops
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id)
    }
}

/// JSON directory store. Clones share subscriptions.
#[derive(Clone)]
pub struct JsonDirStore {
    inner: Arc<Inner>,
}

impl JsonDirStore {
    pub fn open(root: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            inner: Arc::new(Inner {
                root,
                lock_timeout_ms: config.lock_timeout_ms,
                debounce: Duration::from_millis(config.watch_debounce_ms),
                next_subscription: AtomicU64::new(0),
                stops: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Insert or replace a document directly, bypassing the async API.
    pub fn put(&self, collection: Collection, id: &str, data: Map<String, Value>) -> Result<()> {
        self.inner.modify(collection, |docs| {
            match docs.iter_mut().find(|doc| doc.id == id) {
                Some(doc) => doc.data = data,
                None => docs.push(Document::new(id, data)),
            }
            Ok(())
        })
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || work(&inner))
            .await
            .map_err(|err| Error::Store(format!("store worker failed: {err}")))?
    }
}

type EventSender = mpsc::Sender<notify::Result<notify::Event>>;

/// Native watcher on `root`, or a polling one where the platform refuses.
fn open_watcher(
    root: &Path,
    interval: Duration,
    events: EventSender,
) -> Result<Box<dyn Watcher + Send>> {
    let native_events = events.clone();
    let native = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let _ = native_events.send(res);
    })
    .and_then(|mut watcher: RecommendedWatcher| {
        watcher.watch(root, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    });
    match native {
        Ok(watcher) => return Ok(Box::new(watcher)),
        Err(err) => {
            tracing::warn!(root = %root.display(), %err, "native watch unavailable; polling");
        }
    }

    let config = notify::Config::default().with_poll_interval(interval);
    let mut poller = PollWatcher::new(
        move |res: notify::Result<notify::Event>| {
            let _ = events.send(res);
        },
        config,
    )?;
    poller.watch(root, RecursiveMode::NonRecursive)?;
    Ok(Box::new(poller))
}

impl DocumentStore for JsonDirStore {
    async fn query(&self, collection: Collection, filters: &[Filter]) -> Result<RawSnapshot> {
        let filters = filters.to_vec();
        self.blocking(move |inner| inner.snapshot(collection, &filters))
            .await
    }

    fn subscribe(
        &self,
        collection: Collection,
        filters: Vec<Filter>,
        callback: SnapshotCallback,
    ) -> Result<SubscriptionId> {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::SeqCst) + 1);
        let stop = Arc::new(AtomicBool::new(false));

        let (event_tx, event_rx) = mpsc::channel();
        let watcher = open_watcher(&self.inner.root, self.inner.debounce, event_tx)?;

        let initial = self.inner.snapshot(collection, &filters)?;
        let mut last_revision = initial.revision;
        callback(Ok(initial));

        self.inner
            .stops
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, Arc::clone(&stop));

        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            // Owned by the thread so the OS watch lives until stop.
            let _watcher = watcher;
            let target = inner.collection_path(collection);
            let poll = Duration::from_millis(STOP_POLL_MS);
            let mut pending: Option<Instant> = None;

            while !stop.load(Ordering::SeqCst) {
                let timeout = pending
                    .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                    .unwrap_or(poll)
                    .min(poll);
                match event_rx.recv_timeout(timeout) {
                    Ok(Ok(event)) => {
                        if event.paths.is_empty() || event.paths.iter().any(|path| path == &target)
                        {
                            pending = Some(Instant::now() + inner.debounce);
                        }
                    }
                    Ok(Err(err)) => callback(Err(Error::Subscription {
                        collection,
                        message: err.to_string(),
                    })),
                    Err(RecvTimeoutError::Timeout) => {
                        let due = pending.is_some_and(|deadline| Instant::now() >= deadline);
                        if !due {
                            continue;
                        }
                        pending = None;
                        match inner.snapshot(collection, &filters) {
                            Ok(snapshot) if snapshot.revision != last_revision => {
                                last_revision = snapshot.revision;
                                callback(Ok(snapshot));
                            }
                            Ok(_) => {}
                            Err(err) => callback(Err(Error::Subscription {
                                collection,
                                message: err.to_string(),
                            })),
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::debug!(collection = collection.as_str(), "watch thread stopped");
        });

        tracing::info!(collection = collection.as_str(), id = id.0, "subscribed");
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(stop) = self.inner.stop_flag(id) {
            stop.store(true, Ordering::SeqCst);
            tracing::info!(id = id.0, "unsubscribed");
        }
    }

    async fn create_document(
        &self,
        collection: Collection,
        data: Map<String, Value>,
    ) -> Result<String> {
        self.blocking(move |inner| {
            let id = Ulid::new().to_string().to_ascii_lowercase();
            inner.modify(collection, |docs| {
                docs.push(Document::new(id.clone(), data));
                Ok(())
            })?;
            Ok(id)
        })
        .await
    }

    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        partial: Map<String, Value>,
    ) -> Result<()> {
        let id = id.to_string();
        self.blocking(move |inner| {
            inner.modify(collection, |docs| {
                let doc = docs
                    .iter_mut()
                    .find(|doc| doc.id == id)
                    .ok_or_else(|| Error::NotFound {
                        collection,
                        id: id.clone(),
                    })?;
                for (key, value) in partial {
                    doc.data.insert(key, value);
                }
                Ok(())
            })
        })
        .await
    }
}
