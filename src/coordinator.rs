//! Optimistic mutation coordinator.
//!
//! Every user edit goes through [`MutationCoordinator::begin`], which
//! validates it, records it as `Pending` and layers its value over the task
//! snapshot until the store answers. [`MutationCoordinator::settle`] moves it
//! to `Confirmed` or `Reverted`; a revert drops the overlay and leaves a
//! [`Notice`]. Nothing is retried.
//!
//! Overlays are kept per `(task, field)` as a stack, so two edits of the same
//! field race locally by recency: the displayed value is the newest edit that
//! has not been reverted. Confirmed edits stay on the stack until a tasks
//! snapshot newer than the one current at confirmation arrives.
//!
//! Subtasks and comments are written as whole arrays, so only one write per
//! `(task, array)` is in flight at a time. Later edits are held and sent once
//! the earlier write settles; if it was rejected, the held arrays are rebased
//! to drop what the rejected edit added before they go out.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::error::{Error, ErrorCategory, Result};
use crate::model::{dedup_ids, Comment, Subtask, TaskRecord};
use crate::store::DELETED_FIELD;
use crate::taxonomy::{Canonical, CanonicalStatus, CanonicalUrgency};

const MIN_YEAR: i32 = 1970;
const MAX_YEAR: i32 = 2200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(Ulid);

impl MutationId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Editable task field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    Status,
    Urgency,
    Title,
    Description,
    DueDate,
    Assignees,
    Customers,
    Project,
    Deleted,
    Subtasks,
    Comments,
}

impl FieldKey {
    pub const ALL: &'static [FieldKey] = &[
        FieldKey::Status,
        FieldKey::Urgency,
        FieldKey::Title,
        FieldKey::Description,
        FieldKey::DueDate,
        FieldKey::Assignees,
        FieldKey::Customers,
        FieldKey::Project,
        FieldKey::Deleted,
        FieldKey::Subtasks,
        FieldKey::Comments,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKey::Status => "status",
            FieldKey::Urgency => "urgency",
            FieldKey::Title => "title",
            FieldKey::Description => "description",
            FieldKey::DueDate => "due_date",
            FieldKey::Assignees => "assignees",
            FieldKey::Customers => "customers",
            FieldKey::Project => "project",
            FieldKey::Deleted => "deleted",
            FieldKey::Subtasks => "subtasks",
            FieldKey::Comments => "comments",
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKey {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let wanted = value.trim().replace('-', "_").to_ascii_lowercase();
        let wanted = match wanted.as_str() {
            "due" => "due_date",
            "assignee" | "assigned_to" => "assignees",
            "customer" => "customers",
            "priority" => "urgency",
            other => other,
        };
        FieldKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == wanted)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown field '{value}'")))
    }
}

/// A single-field change to a task.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldEdit {
    Status(CanonicalStatus),
    Urgency(CanonicalUrgency),
    Title(String),
    Description(String),
    DueDate(Option<DateTime<Utc>>),
    Assignees(Vec<String>),
    Customers(Vec<String>),
    Project(Option<String>),
    /// Soft delete.
    Deleted,
    /// Full replacement array.
    Subtasks(Vec<Subtask>),
    /// Full replacement array.
    Comments(Vec<Comment>),
}

impl FieldEdit {
    pub fn key(&self) -> FieldKey {
        match self {
            FieldEdit::Status(_) => FieldKey::Status,
            FieldEdit::Urgency(_) => FieldKey::Urgency,
            FieldEdit::Title(_) => FieldKey::Title,
            FieldEdit::Description(_) => FieldKey::Description,
            FieldEdit::DueDate(_) => FieldKey::DueDate,
            FieldEdit::Assignees(_) => FieldKey::Assignees,
            FieldEdit::Customers(_) => FieldKey::Customers,
            FieldEdit::Project(_) => FieldKey::Project,
            FieldEdit::Deleted => FieldKey::Deleted,
            FieldEdit::Subtasks(_) => FieldKey::Subtasks,
            FieldEdit::Comments(_) => FieldKey::Comments,
        }
    }

    /// Check the edit and return its normalized form.
    pub fn validate(self) -> Result<Self> {
        match self {
            FieldEdit::Title(title) => Ok(FieldEdit::Title(validate_title(&title)?)),
            FieldEdit::DueDate(Some(due)) => {
                validate_due(due)?;
                Ok(FieldEdit::DueDate(Some(due)))
            }
            FieldEdit::Assignees(ids) => Ok(FieldEdit::Assignees(clean_ids(ids))),
            FieldEdit::Customers(ids) => Ok(FieldEdit::Customers(clean_ids(ids))),
            FieldEdit::Project(project) => Ok(FieldEdit::Project(
                project
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty()),
            )),
            FieldEdit::Subtasks(subtasks) => {
                for subtask in &subtasks {
                    if subtask.title.trim().is_empty() {
                        return Err(Error::validation("subtasks", "subtask title required"));
                    }
                    if let Some(due) = subtask.due_date {
                        validate_due(due)?;
                    }
                }
                Ok(FieldEdit::Subtasks(subtasks))
            }
            FieldEdit::Comments(comments) => {
                if comments.iter().any(|comment| comment.text.trim().is_empty()) {
                    return Err(Error::validation("comments", "comment text required"));
                }
                Ok(FieldEdit::Comments(comments))
            }
            other => Ok(other),
        }
    }

    /// Partial update for the store, in remote field names.
    pub fn payload(&self, at: DateTime<Utc>, actor: &str) -> Result<Map<String, Value>> {
        let mut partial = Map::new();
        match self {
            FieldEdit::Status(status) => {
                partial.insert("status".into(), Value::from(status.code()));
                let completed = match status {
                    CanonicalStatus::Done => Value::from(at.to_rfc3339()),
                    _ => Value::Null,
                };
                partial.insert("completedAt".into(), completed);
            }
            FieldEdit::Urgency(urgency) => {
                partial.insert("urgency".into(), Value::from(urgency.code()));
            }
            FieldEdit::Title(title) => {
                partial.insert("title".into(), Value::from(title.as_str()));
            }
            FieldEdit::Description(description) => {
                partial.insert("description".into(), Value::from(description.as_str()));
            }
            FieldEdit::DueDate(due) => {
                partial.insert(
                    "dueDate".into(),
                    due.map_or(Value::Null, |due| Value::from(due.to_rfc3339())),
                );
            }
            FieldEdit::Assignees(ids) => {
                partial.insert("assignedTo".into(), serde_json::to_value(ids)?);
            }
            FieldEdit::Customers(ids) => {
                partial.insert("customers".into(), serde_json::to_value(ids)?);
            }
            FieldEdit::Project(project) => {
                partial.insert(
                    "project".into(),
                    project.as_deref().map_or(Value::Null, Value::from),
                );
            }
            FieldEdit::Deleted => {
                partial.insert(DELETED_FIELD.into(), Value::Bool(true));
            }
            FieldEdit::Subtasks(subtasks) => {
                partial.insert("subtasks".into(), serde_json::to_value(subtasks)?);
            }
            FieldEdit::Comments(comments) => {
                partial.insert("comments".into(), serde_json::to_value(comments)?);
            }
        }
        partial.insert("updatedAt".into(), Value::from(at.to_rfc3339()));
        partial.insert("updatedBy".into(), Value::from(actor));
        Ok(partial)
    }

    /// Subtasks and comments replace the whole stored array.
    pub fn is_whole_array(&self) -> bool {
        matches!(self, FieldEdit::Subtasks(_) | FieldEdit::Comments(_))
    }

    /// Undo inside this array what `undone`, built on `base`, changed.
    fn rebase(&mut self, undone: &FieldEdit, base: &FieldEdit) {
        match (self, undone, base) {
            (FieldEdit::Subtasks(items), FieldEdit::Subtasks(undone), FieldEdit::Subtasks(base)) => {
                *items = rebase_items(items, undone, base, subtask_id);
            }
            (FieldEdit::Comments(items), FieldEdit::Comments(undone), FieldEdit::Comments(base)) => {
                *items = rebase_items(items, undone, base, comment_id);
            }
            _ => {}
        }
    }

    /// Apply the edit to a local copy of the record.
    pub fn apply(&self, record: &mut TaskRecord, at: DateTime<Utc>) {
        match self {
            FieldEdit::Status(status) => {
                record.status = Some(status.code().to_string());
                record.completed_at = (*status == CanonicalStatus::Done).then_some(at);
            }
            FieldEdit::Urgency(urgency) => record.urgency = Some(urgency.code().to_string()),
            FieldEdit::Title(title) => record.title = title.clone(),
            FieldEdit::Description(description) => record.description = description.clone(),
            FieldEdit::DueDate(due) => record.due_date = *due,
            FieldEdit::Assignees(ids) => record.assigned_to = ids.clone(),
            FieldEdit::Customers(ids) => record.customers = ids.clone(),
            FieldEdit::Project(project) => record.project = project.clone(),
            FieldEdit::Deleted => record.is_deleted = true,
            FieldEdit::Subtasks(subtasks) => record.subtasks = subtasks.clone(),
            FieldEdit::Comments(comments) => record.comments = comments.clone(),
        }
    }
}

fn subtask_id(subtask: &Subtask) -> &str {
    &subtask.id
}

fn comment_id(comment: &Comment) -> &str {
    &comment.id
}

/// Items `undone` added are dropped and items it changed go back to `base`,
/// unless a later edit touched them again.
fn rebase_items<T: Clone + PartialEq>(
    items: &[T],
    undone: &[T],
    base: &[T],
    id: fn(&T) -> &str,
) -> Vec<T> {
    items
        .iter()
        .filter_map(|item| {
            let key = id(item);
            let rejected = undone.iter().find(|other| id(other) == key);
            let before = base.iter().find(|other| id(other) == key);
            match (rejected, before) {
                (Some(rejected), None) if rejected == item => None,
                (Some(rejected), Some(before)) if rejected == item => Some(before.clone()),
                _ => Some(item.clone()),
            }
        })
        .collect()
}

fn validate_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("title", "title required"));
    }
    Ok(trimmed.to_string())
}

fn validate_due(due: DateTime<Utc>) -> Result<()> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&due.year()) {
        return Err(Error::validation("due_date", "malformed date"));
    }
    Ok(())
}

fn clean_ids(ids: Vec<String>) -> Vec<String> {
    dedup_ids(
        ids.into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty()),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationState {
    Pending,
    Confirmed,
    Reverted,
}

/// A validated edit ready to be dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation {
    pub id: MutationId,
    pub task_id: String,
    pub edit: FieldEdit,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub id: MutationId,
    pub task_id: String,
    pub edit: FieldEdit,
    pub state: MutationState,
    pub started_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// User-visible, non-blocking message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub task_id: Option<String>,
    pub field: Option<FieldKey>,
    pub category: NoticeKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Validation,
    Subscription,
    Dispatch,
    Internal,
}

impl From<ErrorCategory> for NoticeKind {
    fn from(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Validation => NoticeKind::Validation,
            ErrorCategory::Subscription => NoticeKind::Subscription,
            ErrorCategory::Dispatch => NoticeKind::Dispatch,
            ErrorCategory::Resolution | ErrorCategory::Internal => NoticeKind::Internal,
        }
    }
}

impl Notice {
    pub fn from_error(task_id: Option<&str>, field: Option<FieldKey>, err: &Error) -> Self {
        Self {
            task_id: task_id.map(str::to_string),
            field,
            category: err.category().into(),
            message: err.to_string(),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
struct OverlayEntry {
    id: MutationId,
    edit: FieldEdit,
    at: DateTime<Utc>,
    /// Tasks revision current when the write was confirmed.
    confirmed_at: Option<u64>,
    /// Array value the edit was built on, for rebasing later edits.
    base: Option<FieldEdit>,
    /// Waiting for an earlier write to the same array.
    held: bool,
}

/// Input for a new task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub status: Option<CanonicalStatus>,
    pub urgency: Option<CanonicalUrgency>,
    pub due_date: Option<DateTime<Utc>>,
    pub assigned_to: Vec<String>,
    pub customers: Vec<String>,
    pub project: Option<String>,
}

pub struct MutationCoordinator {
    actor: String,
    history_limit: usize,
    records: HashMap<MutationId, MutationRecord>,
    settled: VecDeque<MutationId>,
    overlays: HashMap<String, BTreeMap<FieldKey, Vec<OverlayEntry>>>,
    notices: Vec<Notice>,
    released: Vec<PendingMutation>,
    tasks_revision: u64,
    generation: u64,
}

impl MutationCoordinator {
    pub fn new(actor: impl Into<String>, history_limit: usize) -> Self {
        Self {
            actor: actor.into(),
            history_limit: history_limit.max(1),
            records: HashMap::new(),
            settled: VecDeque::new(),
            overlays: HashMap::new(),
            notices: Vec::new(),
            released: Vec::new(),
            tasks_revision: 0,
            generation: 0,
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Validate `edit`, apply it optimistically and return what to dispatch.
    /// Validation failures leave no trace besides the returned error.
    /// A held array edit must not be dispatched; see [`Self::is_held`].
    pub fn begin(&mut self, task_id: &str, edit: FieldEdit) -> Result<PendingMutation> {
        self.begin_entry(task_id, edit, None)
    }

    /// Like [`Self::begin`] for a whole-array edit built on `base`, so that
    /// later edits can be rebased if this one is rejected.
    pub fn begin_array(
        &mut self,
        task_id: &str,
        edit: FieldEdit,
        base: FieldEdit,
    ) -> Result<PendingMutation> {
        self.begin_entry(task_id, edit, Some(base))
    }

    fn begin_entry(
        &mut self,
        task_id: &str,
        edit: FieldEdit,
        base: Option<FieldEdit>,
    ) -> Result<PendingMutation> {
        let edit = edit.validate()?;
        let at = Utc::now();
        let payload = edit.payload(at, &self.actor)?;
        let id = MutationId::new();
        let held = edit.is_whole_array() && self.in_flight(task_id, edit.key()).is_some();

        self.overlays
            .entry(task_id.to_string())
            .or_default()
            .entry(edit.key())
            .or_default()
            .push(OverlayEntry {
                id,
                edit: edit.clone(),
                at,
                confirmed_at: None,
                base,
                held,
            });
        self.records.insert(
            id,
            MutationRecord {
                id,
                task_id: task_id.to_string(),
                edit: edit.clone(),
                state: MutationState::Pending,
                started_at: at,
                settled_at: None,
                error: None,
            },
        );
        self.generation += 1;
        tracing::debug!(
            mutation = %id,
            task = task_id,
            field = edit.key().as_str(),
            held,
            "mutation pending"
        );

        Ok(PendingMutation {
            id,
            task_id: task_id.to_string(),
            edit,
            payload,
        })
    }

    /// Record the store's answer. Returns the notice produced by a revert.
    pub fn settle(&mut self, id: MutationId, outcome: Result<()>) -> Option<Notice> {
        let Some(record) = self.records.get_mut(&id) else {
            tracing::warn!(mutation = %id, "settling unknown mutation");
            return None;
        };
        if record.state != MutationState::Pending {
            tracing::warn!(mutation = %id, state = ?record.state, "mutation already settled");
            return None;
        }
        record.settled_at = Some(Utc::now());
        let task_id = record.task_id.clone();
        let field = record.edit.key();

        let notice = match outcome {
            Ok(()) => {
                record.state = MutationState::Confirmed;
                let revision = self.tasks_revision;
                if let Some(entry) = self.entry_mut(&task_id, field, id) {
                    entry.confirmed_at = Some(revision);
                }
                tracing::debug!(mutation = %id, task = task_id.as_str(), "mutation confirmed");
                None
            }
            Err(err) => {
                let err = err.into_dispatch(&task_id);
                record.state = MutationState::Reverted;
                record.error = Some(match &err {
                    Error::Dispatch { message, .. } => message.clone(),
                    other => other.to_string(),
                });
                self.rebase_later_entries(&task_id, field, id);
                self.remove_entry(&task_id, field, id);
                tracing::warn!(
                    mutation = %id,
                    task = task_id.as_str(),
                    field = field.as_str(),
                    %err,
                    "mutation reverted"
                );
                let notice = Notice::from_error(Some(task_id.as_str()), Some(field), &err);
                self.notices.push(notice.clone());
                Some(notice)
            }
        };

        self.generation += 1;
        self.settled.push_back(id);
        while self.settled.len() > self.history_limit {
            if let Some(oldest) = self.settled.pop_front() {
                self.records.remove(&oldest);
            }
        }
        self.release_next(&task_id, field);
        notice
    }

    /// Held edits that became ready to dispatch, oldest first.
    pub fn take_released(&mut self) -> Vec<PendingMutation> {
        std::mem::take(&mut self.released)
    }

    pub fn is_held(&self, id: MutationId) -> bool {
        self.records.get(&id).is_some_and(|record| {
            self.overlays
                .get(&record.task_id)
                .and_then(|fields| fields.get(&record.edit.key()))
                .and_then(|stack| stack.iter().find(|entry| entry.id == id))
                .is_some_and(|entry| entry.held)
        })
    }

    /// Dispatched write on `(task_id, field)` still waiting for the store.
    fn in_flight(&self, task_id: &str, field: FieldKey) -> Option<MutationId> {
        self.overlays
            .get(task_id)?
            .get(&field)?
            .iter()
            .find(|entry| !entry.held && self.state(entry.id) == Some(MutationState::Pending))
            .map(|entry| entry.id)
    }

    /// Strip what the rejected edit `id` did from every edit stacked above it.
    fn rebase_later_entries(&mut self, task_id: &str, field: FieldKey, id: MutationId) {
        let Some(stack) = self
            .overlays
            .get_mut(task_id)
            .and_then(|fields| fields.get_mut(&field))
        else {
            return;
        };
        let Some(position) = stack.iter().position(|entry| entry.id == id) else {
            return;
        };
        let (rejected, base) = match &stack[position] {
            OverlayEntry {
                edit,
                base: Some(base),
                ..
            } if edit.is_whole_array() => (edit.clone(), base.clone()),
            _ => return,
        };
        for entry in stack.iter_mut().skip(position + 1) {
            entry.edit.rebase(&rejected, &base);
            if let Some(later_base) = entry.base.as_mut() {
                later_base.rebase(&rejected, &base);
            }
            if let Some(record) = self.records.get_mut(&entry.id) {
                record.edit = entry.edit.clone();
            }
        }
    }

    /// Send the oldest held edit on `(task_id, field)` once nothing is in flight.
    fn release_next(&mut self, task_id: &str, field: FieldKey) {
        if self.in_flight(task_id, field).is_some() {
            return;
        }
        let Some(entry) = self
            .overlays
            .get_mut(task_id)
            .and_then(|fields| fields.get_mut(&field))
            .and_then(|stack| stack.iter_mut().find(|entry| entry.held))
        else {
            return;
        };
        entry.held = false;
        let (id, edit) = (entry.id, entry.edit.clone());
        match edit.payload(Utc::now(), &self.actor) {
            Ok(payload) => {
                tracing::debug!(mutation = %id, task = task_id, "held mutation released");
                self.released.push(PendingMutation {
                    id,
                    task_id: task_id.to_string(),
                    edit,
                    payload,
                });
            }
            Err(err) => {
                self.settle(id, Err(err));
            }
        }
    }

    /// Note a new tasks snapshot; confirmed overlays older than it retire.
    pub fn observe_tasks_revision(&mut self, revision: u64) {
        if revision <= self.tasks_revision {
            return;
        }
        self.tasks_revision = revision;
        let mut retired = 0usize;
        for fields in self.overlays.values_mut() {
            for stack in fields.values_mut() {
                let before = stack.len();
                stack.retain(|entry| entry.confirmed_at.map_or(true, |at| at >= revision));
                retired += before - stack.len();
            }
            fields.retain(|_, stack| !stack.is_empty());
        }
        self.overlays.retain(|_, fields| !fields.is_empty());
        if retired > 0 {
            self.generation += 1;
            tracing::debug!(retired, revision, "confirmed overlays retired");
        }
    }

    /// Snapshot records with every live overlay applied.
    pub fn apply_overlays(&self, records: &[TaskRecord]) -> Vec<TaskRecord> {
        records
            .iter()
            .map(|record| {
                let mut record = record.clone();
                if let Some(fields) = self.overlays.get(&record.id) {
                    for stack in fields.values() {
                        if let Some(top) = stack.last() {
                            top.edit.apply(&mut record, top.at);
                        }
                    }
                }
                record
            })
            .collect()
    }

    /// Build the create payload for a new task. No optimistic insert.
    pub fn create_task(&self, input: NewTask) -> Result<Map<String, Value>> {
        let title = validate_title(&input.title)?;
        if let Some(due) = input.due_date {
            validate_due(due)?;
        }
        let status = input.status.unwrap_or(CanonicalStatus::Todo);
        let urgency = input.urgency.unwrap_or(CanonicalUrgency::Medium);
        let mut assigned_to = clean_ids(input.assigned_to);
        if assigned_to.is_empty() {
            assigned_to.push(self.actor.clone());
        }
        let now = Utc::now().to_rfc3339();

        let mut data = Map::new();
        data.insert("title".into(), Value::from(title));
        data.insert("description".into(), Value::from(input.description.trim()));
        data.insert("status".into(), Value::from(status.code()));
        data.insert("urgency".into(), Value::from(urgency.code()));
        data.insert(
            "dueDate".into(),
            input.due_date.map_or(Value::Null, |due| Value::from(due.to_rfc3339())),
        );
        data.insert(
            "completedAt".into(),
            match status {
                CanonicalStatus::Done => Value::from(now.clone()),
                _ => Value::Null,
            },
        );
        data.insert("assignedTo".into(), serde_json::to_value(assigned_to)?);
        data.insert(
            "customers".into(),
            serde_json::to_value(clean_ids(input.customers))?,
        );
        data.insert(
            "project".into(),
            input
                .project
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .map_or(Value::Null, Value::from),
        );
        data.insert("subtasks".into(), Value::Array(Vec::new()));
        data.insert("comments".into(), Value::Array(Vec::new()));
        data.insert("createdAt".into(), Value::from(now.clone()));
        data.insert("updatedAt".into(), Value::from(now));
        data.insert("createdBy".into(), Value::from(self.actor.as_str()));
        data.insert("updatedBy".into(), Value::from(self.actor.as_str()));
        data.insert(DELETED_FIELD.into(), Value::Bool(false));
        Ok(data)
    }

    pub fn record(&self, id: MutationId) -> Option<&MutationRecord> {
        self.records.get(&id)
    }

    pub fn state(&self, id: MutationId) -> Option<MutationState> {
        self.records.get(&id).map(|record| record.state)
    }

    pub fn pending(&self) -> impl Iterator<Item = &MutationRecord> {
        self.records
            .values()
            .filter(|record| record.state == MutationState::Pending)
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    /// Settled records still held, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &MutationRecord> {
        self.settled.iter().filter_map(|id| self.records.get(id))
    }

    pub fn has_overlay(&self, task_id: &str, field: FieldKey) -> bool {
        self.overlays
            .get(task_id)
            .is_some_and(|fields| fields.contains_key(&field))
    }

    /// Bumped on every overlay change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn push_notice(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn entry_mut(&mut self, task_id: &str, field: FieldKey, id: MutationId) -> Option<&mut OverlayEntry> {
        self.overlays
            .get_mut(task_id)?
            .get_mut(&field)?
            .iter_mut()
            .find(|entry| entry.id == id)
    }

    fn remove_entry(&mut self, task_id: &str, field: FieldKey, id: MutationId) {
        if let Some(fields) = self.overlays.get_mut(task_id) {
            if let Some(stack) = fields.get_mut(&field) {
                stack.retain(|entry| entry.id != id);
                if stack.is_empty() {
                    fields.remove(&field);
                }
            }
            if fields.is_empty() {
                self.overlays.remove(task_id);
            }
        }
    }
}
