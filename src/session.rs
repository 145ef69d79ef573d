//! Single-threaded board session.
//!
//! Glues the watcher, the view model and the coordinator together. Store
//! callbacks may fire on any thread, so they only enqueue [`BoardEvent`]s;
//! all state changes happen in [`BoardSession::handle_event`] on the session
//! thread. Remote writes run as local tasks and report back through the same
//! queue, so a session must be driven from inside a [`tokio::task::LocalSet`].

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use ulid::Ulid;

use crate::config::BoardConfig;
use crate::coordinator::{FieldEdit, MutationId, NewTask, Notice, PendingMutation};
use crate::error::{Error, Result};
use crate::model::{Comment, CustomerRecord, ProjectRecord, Subtask, TaskRecord};
use crate::store::{Collection, DocumentStore, IdentityProvider, Snapshot};
use crate::taxonomy::{Canonical, CanonicalStatus, CanonicalUrgency, Taxonomy};
use crate::view::BoardViewModel;
use crate::watcher::{self, WatchHandle, WatchHandlers};

#[derive(Debug)]
pub enum BoardEvent {
    Tasks(Snapshot<TaskRecord>),
    Customers(Snapshot<CustomerRecord>),
    Projects(Snapshot<ProjectRecord>),
    StreamFailed { collection: Collection, error: Error },
    MutationSettled { id: MutationId, outcome: Result<()> },
}

pub struct BoardSession<S: DocumentStore + Clone + 'static> {
    store: S,
    actor: String,
    view: BoardViewModel,
    events_tx: UnboundedSender<BoardEvent>,
    events_rx: UnboundedReceiver<BoardEvent>,
    watch: Option<WatchHandle<S>>,
}

impl<S: DocumentStore + Clone + 'static> BoardSession<S> {
    pub fn new(
        store: S,
        identity: &impl IdentityProvider,
        taxonomy: Taxonomy,
        board: &BoardConfig,
    ) -> Self {
        let actor = identity.current_actor_id();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            store,
            view: BoardViewModel::new(taxonomy, board, actor.clone()),
            actor,
            events_tx,
            events_rx,
            watch: None,
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn view(&mut self) -> &mut BoardViewModel {
        &mut self.view
    }

    /// Load the user directory and open the three change feeds.
    pub async fn start(&mut self) -> Result<()> {
        if self.watch.is_some() {
            return Ok(());
        }
        if let Err(err) = self.refresh_users().await {
            self.view.mark_stale(Collection::Users, &err);
        }

        let tasks_tx = self.events_tx.clone();
        let customers_tx = self.events_tx.clone();
        let projects_tx = self.events_tx.clone();
        let error_tx = self.events_tx.clone();
        let handlers = WatchHandlers {
            on_tasks: Box::new(move |snapshot| {
                let _ = tasks_tx.send(BoardEvent::Tasks(snapshot));
            }),
            on_customers: Box::new(move |snapshot| {
                let _ = customers_tx.send(BoardEvent::Customers(snapshot));
            }),
            on_projects: Box::new(move |snapshot| {
                let _ = projects_tx.send(BoardEvent::Projects(snapshot));
            }),
            on_error: std::sync::Arc::new(move |collection, error| {
                let _ = error_tx.send(BoardEvent::StreamFailed { collection, error });
            }),
        };
        self.watch = Some(watcher::subscribe(&self.store, &self.actor, handlers));
        self.pump();
        Ok(())
    }

    /// Release every subscription. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(mut watch) = self.watch.take() {
            watch.unsubscribe();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watch.as_ref().is_some_and(WatchHandle::is_active)
    }

    pub async fn refresh_users(&mut self) -> Result<()> {
        let users = watcher::load_users(&self.store).await?;
        self.view.apply_users(users);
        Ok(())
    }

    pub fn handle_event(&mut self, event: BoardEvent) {
        match event {
            BoardEvent::Tasks(snapshot) => self.view.apply_tasks(snapshot),
            BoardEvent::Customers(snapshot) => self.view.apply_customers(snapshot),
            BoardEvent::Projects(snapshot) => self.view.apply_projects(snapshot),
            BoardEvent::StreamFailed { collection, error } => {
                self.view.mark_stale(collection, &error);
            }
            BoardEvent::MutationSettled { id, outcome } => {
                self.view.coordinator_mut().settle(id, outcome);
                for pending in self.view.coordinator_mut().take_released() {
                    self.dispatch(pending);
                }
            }
        }
    }

    /// Handle every queued event without waiting. Returns how many ran.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Wait for the next event and handle it, plus anything queued behind it.
    pub async fn next(&mut self) -> usize {
        match self.events_rx.recv().await {
            Some(event) => {
                self.handle_event(event);
                1 + self.pump()
            }
            None => 0,
        }
    }

    /// Drive the queue until no mutation is pending.
    pub async fn wait_for_pending(&mut self) {
        self.pump();
        while self.view.coordinator().pending_count() > 0 {
            if self.next().await == 0 {
                break;
            }
        }
    }

    /// Optimistically apply `edit` to `task_id` and dispatch it.
    pub fn edit_field(&mut self, task_id: &str, edit: FieldEdit) -> Result<MutationId> {
        self.current_record(task_id)?;
        let pending = self.view.coordinator_mut().begin(task_id, edit)?;
        Ok(self.dispatch_unless_held(pending))
    }

    /// Replace a subtask or comment array that was built from `base`.
    fn edit_array(&mut self, task_id: &str, edit: FieldEdit, base: FieldEdit) -> Result<MutationId> {
        let pending = self.view.coordinator_mut().begin_array(task_id, edit, base)?;
        Ok(self.dispatch_unless_held(pending))
    }

    fn dispatch_unless_held(&mut self, pending: PendingMutation) -> MutationId {
        let id = pending.id;
        if self.view.coordinator().is_held(id) {
            tracing::debug!(mutation = %id, "waiting for earlier array write");
        } else {
            self.dispatch(pending);
        }
        id
    }

    /// Drag a task to another column.
    pub fn move_task(&mut self, task_id: &str, status: CanonicalStatus) -> Result<MutationId> {
        self.edit_field(task_id, FieldEdit::Status(status))
    }

    pub fn delete_task(&mut self, task_id: &str) -> Result<MutationId> {
        self.edit_field(task_id, FieldEdit::Deleted)
    }

    pub fn add_comment(&mut self, task_id: &str, text: &str) -> Result<MutationId> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::validation("comments", "comment text required"));
        }
        let base = self.current_record(task_id)?.comments;
        let mut comments = base.clone();
        comments.push(Comment {
            id: new_id(),
            author: self.actor.clone(),
            text: text.to_string(),
            created_at: Some(Utc::now()),
        });
        self.edit_array(
            task_id,
            FieldEdit::Comments(comments),
            FieldEdit::Comments(base),
        )
    }

    pub fn add_subtask(
        &mut self,
        task_id: &str,
        title: &str,
        urgency: Option<CanonicalUrgency>,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<MutationId> {
        let base = self.current_record(task_id)?.subtasks;
        let mut subtasks = base.clone();
        subtasks.push(Subtask {
            id: new_id(),
            title: title.trim().to_string(),
            status: Some(CanonicalStatus::Todo.code().to_string()),
            urgency: Some(urgency.unwrap_or(CanonicalUrgency::Medium).code().to_string()),
            due_date,
            completed: false,
        });
        self.edit_array(
            task_id,
            FieldEdit::Subtasks(subtasks),
            FieldEdit::Subtasks(base),
        )
    }

    /// Flip a subtask between open and completed.
    pub fn toggle_subtask(&mut self, task_id: &str, subtask_id: &str) -> Result<MutationId> {
        let base = self.current_record(task_id)?.subtasks;
        let mut subtasks = base.clone();
        let subtask = subtasks
            .iter_mut()
            .find(|subtask| subtask.id == subtask_id)
            .ok_or_else(|| Error::InvalidArgument(format!("no subtask '{subtask_id}' on task {task_id}")))?;
        subtask.completed = !subtask.completed;
        let status = if subtask.completed {
            CanonicalStatus::Done
        } else {
            CanonicalStatus::Todo
        };
        subtask.status = Some(status.code().to_string());
        self.edit_array(
            task_id,
            FieldEdit::Subtasks(subtasks),
            FieldEdit::Subtasks(base),
        )
    }

    /// Validate and create a task. It shows up with the next snapshot.
    pub async fn create_task(&mut self, input: NewTask) -> Result<String> {
        let data = self.view.coordinator().create_task(input)?;
        let id = self
            .store
            .create_document(Collection::Tasks, data)
            .await
            .map_err(|err| err.into_dispatch("new"))?;
        tracing::info!(task = id.as_str(), "task created");
        Ok(id)
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.view.coordinator_mut().drain_notices()
    }

    fn current_record(&mut self, task_id: &str) -> Result<TaskRecord> {
        self.view.record(task_id).ok_or_else(|| Error::NotFound {
            collection: Collection::Tasks,
            id: task_id.to_string(),
        })
    }

    fn dispatch(&self, pending: PendingMutation) {
        let store = self.store.clone();
        let events = self.events_tx.clone();
        tokio::task::spawn_local(async move {
            let PendingMutation {
                id,
                task_id,
                payload,
                ..
            } = pending;
            tracing::debug!(mutation = %id, task = task_id.as_str(), "dispatching");
            let outcome = store
                .update_document(Collection::Tasks, &task_id, payload)
                .await
                .map_err(|err| err.into_dispatch(&task_id));
            let _ = events.send(BoardEvent::MutationSettled { id, outcome });
        });
    }
}

impl<S: DocumentStore + Clone + 'static> Drop for BoardSession<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn new_id() -> String {
    Ulid::new().to_string().to_ascii_lowercase()
}
