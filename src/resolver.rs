//! Reference resolution.
//!
//! Joins each task's foreign keys against the latest customer, project and
//! user snapshots and maps its labels through the taxonomy. The join is a
//! full recomputation over an immutable snapshot set; [`Resolver`] skips it
//! when the set is the same one it saw last time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{
    dedup_ids, Comment, CustomerRecord, ProjectRecord, Subtask, TaskRecord, UserRecord,
};
use crate::store::{Collection, Snapshot};
use crate::taxonomy::{CanonicalStatus, CanonicalUrgency, Mapped, Taxonomy};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssigneeSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProjectRef {
    Unset,
    Resolved(ProjectSummary),
    NotFound { id: String },
}

impl ProjectRef {
    pub fn id(&self) -> Option<&str> {
        match self {
            ProjectRef::Unset => None,
            ProjectRef::Resolved(summary) => Some(summary.id.as_str()),
            ProjectRef::NotFound { id } => Some(id.as_str()),
        }
    }

    /// Display name, or `None` when unset or missing.
    pub fn name(&self) -> Option<&str> {
        match self {
            ProjectRef::Resolved(summary) => Some(summary.name.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerSummary {
    pub id: String,
    pub name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl CustomerSummary {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.name, self.last_name).trim().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CustomerRef {
    Resolved(CustomerSummary),
    NotFound { id: String },
}

impl CustomerRef {
    pub fn id(&self) -> &str {
        match self {
            CustomerRef::Resolved(summary) => summary.id.as_str(),
            CustomerRef::NotFound { id } => id.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSubtask {
    pub id: String,
    pub title: String,
    pub status: Mapped<CanonicalStatus>,
    pub urgency: Mapped<CanonicalUrgency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub completed: bool,
}

/// A task with every reference joined and every label canonicalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: Mapped<CanonicalStatus>,
    pub urgency: Mapped<CanonicalUrgency>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Raw assignee ids, including ones with no user record.
    pub assigned_to: Vec<String>,
    /// Assignees found in the user directory.
    pub assignees: Vec<AssigneeSummary>,
    pub project: ProjectRef,
    pub customers: Vec<CustomerRef>,
    pub subtasks: Vec<ResolvedSubtask>,
    pub comments: Vec<Comment>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

/// The four inputs of one resolution pass.
#[derive(Debug, Clone)]
pub struct SnapshotSet {
    pub tasks: Snapshot<TaskRecord>,
    pub customers: Snapshot<CustomerRecord>,
    pub projects: Snapshot<ProjectRecord>,
    pub users: Snapshot<UserRecord>,
}

impl Default for SnapshotSet {
    fn default() -> Self {
        Self {
            tasks: Snapshot::empty(Collection::Tasks),
            customers: Snapshot::empty(Collection::Customers),
            projects: Snapshot::empty(Collection::Projects),
            users: Snapshot::empty(Collection::Users),
        }
    }
}

impl SnapshotSet {
    /// True when both sets hold the very same snapshot allocations.
    pub fn same_as(&self, other: &SnapshotSet) -> bool {
        Arc::ptr_eq(&self.tasks.records, &other.tasks.records)
            && Arc::ptr_eq(&self.customers.records, &other.customers.records)
            && Arc::ptr_eq(&self.projects.records, &other.projects.records)
            && Arc::ptr_eq(&self.users.records, &other.users.records)
    }
}

/// Resolve every live task in `set`.
pub fn resolve(set: &SnapshotSet, taxonomy: &Taxonomy) -> Vec<ResolvedTask> {
    let users: HashMap<&str, &UserRecord> =
        set.users.iter().map(|user| (user.id.as_str(), user)).collect();
    let projects: HashMap<&str, &ProjectRecord> = set
        .projects
        .iter()
        .map(|project| (project.id.as_str(), project))
        .collect();
    let customers: HashMap<&str, &CustomerRecord> = set
        .customers
        .iter()
        .filter(|customer| !customer.is_deleted)
        .map(|customer| (customer.id.as_str(), customer))
        .collect();

    set.tasks
        .iter()
        .filter(|task| !task.is_deleted)
        .map(|task| resolve_task(task, &users, &projects, &customers, taxonomy))
        .collect()
}

fn resolve_task(
    task: &TaskRecord,
    users: &HashMap<&str, &UserRecord>,
    projects: &HashMap<&str, &ProjectRecord>,
    customers: &HashMap<&str, &CustomerRecord>,
    taxonomy: &Taxonomy,
) -> ResolvedTask {
    let assigned_to = dedup_ids(task.assigned_to.iter().cloned());
    let assignees = assigned_to
        .iter()
        .filter_map(|id| users.get(id.as_str()))
        .map(|user| AssigneeSummary {
            id: user.id.clone(),
            name: user.label().to_string(),
        })
        .collect();

    let project = match task.project.as_deref() {
        None => ProjectRef::Unset,
        Some(id) => match projects.get(id) {
            Some(project) => ProjectRef::Resolved(ProjectSummary {
                id: project.id.clone(),
                name: project.name.clone(),
                status: project.status.clone(),
            }),
            None => ProjectRef::NotFound { id: id.to_string() },
        },
    };

    let customer_refs = task
        .customers
        .iter()
        .map(|id| match customers.get(id.as_str()) {
            Some(customer) => CustomerRef::Resolved(CustomerSummary {
                id: customer.id.clone(),
                name: customer.name.clone(),
                last_name: customer.last_name.clone(),
                email: customer.email.clone(),
                phone: customer.phone.clone(),
            }),
            None => CustomerRef::NotFound { id: id.clone() },
        })
        .collect();

    ResolvedTask {
        id: task.id.clone(),
        title: task.title.clone(),
        description: task.description.clone(),
        status: map_status(task.status.as_deref(), false, taxonomy),
        urgency: map_urgency(task.urgency.as_deref(), taxonomy),
        due_date: task.due_date,
        completed_at: task.completed_at,
        assigned_to,
        assignees,
        project,
        customers: customer_refs,
        subtasks: task
            .subtasks
            .iter()
            .map(|subtask| resolve_subtask(subtask, taxonomy))
            .collect(),
        comments: task.comments.clone(),
        created_at: task.created_at,
        updated_at: task.updated_at,
        created_by: task.created_by.clone(),
        updated_by: task.updated_by.clone(),
    }
}

fn resolve_subtask(subtask: &Subtask, taxonomy: &Taxonomy) -> ResolvedSubtask {
    ResolvedSubtask {
        id: subtask.id.clone(),
        title: subtask.title.clone(),
        status: map_status(subtask.status.as_deref(), subtask.completed, taxonomy),
        urgency: map_urgency(subtask.urgency.as_deref(), taxonomy),
        due_date: subtask.due_date,
        completed: subtask.completed,
    }
}

/// Missing labels default to `todo` (`done` for completed subtasks).
fn map_status(label: Option<&str>, completed: bool, taxonomy: &Taxonomy) -> Mapped<CanonicalStatus> {
    match label {
        Some(label) => taxonomy.status(label),
        None if completed => Mapped::Known(CanonicalStatus::Done),
        None => Mapped::Known(CanonicalStatus::Todo),
    }
}

fn map_urgency(label: Option<&str>, taxonomy: &Taxonomy) -> Mapped<CanonicalUrgency> {
    match label {
        Some(label) => taxonomy.urgency(label),
        None => Mapped::Known(CanonicalUrgency::Medium),
    }
}

/// Memoizing wrapper around [`resolve`].
#[derive(Debug)]
pub struct Resolver {
    taxonomy: Taxonomy,
    last: Option<(SnapshotSet, Arc<[ResolvedTask]>)>,
    passes: u64,
}

impl Resolver {
    pub fn new(taxonomy: Taxonomy) -> Self {
        Self {
            taxonomy,
            last: None,
            passes: 0,
        }
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn set_taxonomy(&mut self, taxonomy: Taxonomy) {
        self.taxonomy = taxonomy;
        self.last = None;
    }

    /// Resolved tasks for `set`, recomputed only when any input changed.
    pub fn resolve(&mut self, set: &SnapshotSet) -> Arc<[ResolvedTask]> {
        if let Some((seen, output)) = &self.last {
            if seen.same_as(set) {
                return Arc::clone(output);
            }
        }
        let output: Arc<[ResolvedTask]> = Arc::from(resolve(set, &self.taxonomy));
        self.passes += 1;
        tracing::debug!(
            tasks = output.len(),
            tasks_revision = set.tasks.revision,
            customers_revision = set.customers.revision,
            projects_revision = set.projects.revision,
            "resolved board"
        );
        self.last = Some((set.clone(), Arc::clone(&output)));
        output
    }

    /// Number of full recomputations so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::decode;
    use crate::store::Document;
    use serde_json::{json, Value};

    fn records<T: crate::model::Record>(items: &[(&str, Value)]) -> Vec<T> {
        items
            .iter()
            .map(|(id, data)| {
                decode(&Document::new(*id, data.as_object().cloned().unwrap_or_default()))
                    .expect("decode")
            })
            .collect()
    }

    fn set(
        tasks: &[(&str, Value)],
        customers: &[(&str, Value)],
        projects: &[(&str, Value)],
        users: &[(&str, Value)],
    ) -> SnapshotSet {
        SnapshotSet {
            tasks: Snapshot::new(Collection::Tasks, 1, records(tasks)),
            customers: Snapshot::new(Collection::Customers, 1, records(customers)),
            projects: Snapshot::new(Collection::Projects, 1, records(projects)),
            users: Snapshot::new(Collection::Users, 1, records(users)),
        }
    }

    #[test]
    fn missing_assignees_are_dropped_without_error() {
        let input = set(
            &[("t1", json!({ "title": "Call", "assignedTo": ["u1", "u2"] }))],
            &[],
            &[],
            &[("u1", json!({ "displayName": "Noa" }))],
        );
        let resolved = resolve(&input, &Taxonomy::default());
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].assigned_to, vec!["u1".to_string(), "u2".to_string()]);
        assert_eq!(
            resolved[0].assignees,
            vec![AssigneeSummary {
                id: "u1".to_string(),
                name: "Noa".to_string()
            }]
        );
    }

    #[test]
    fn scalar_assignee_resolves_to_list() {
        let input = set(
            &[("t1", json!({ "title": "Call", "assignedTo": "u1" }))],
            &[],
            &[],
            &[("u1", json!({ "displayName": "Noa" }))],
        );
        let resolved = resolve(&input, &Taxonomy::default());
        assert_eq!(resolved[0].assigned_to, vec!["u1".to_string()]);
        assert_eq!(resolved[0].assignees.len(), 1);
    }

    #[test]
    fn project_and_customers_resolve_or_mark_not_found() {
        let input = set(
            &[
                (
                    "t1",
                    json!({ "title": "a", "project": "p1", "customers": ["c1", "c9"] }),
                ),
                ("t2", json!({ "title": "b", "project": "p404" })),
                ("t3", json!({ "title": "c" })),
            ],
            &[("c1", json!({ "name": "Dana", "lastName": "Levi", "phone": "050" }))],
            &[("p1", json!({ "name": "Website", "status": "active" }))],
            &[],
        );
        let resolved = resolve(&input, &Taxonomy::default());

        assert_eq!(resolved[0].project.name(), Some("Website"));
        match &resolved[0].customers[0] {
            CustomerRef::Resolved(summary) => assert_eq!(summary.full_name(), "Dana Levi"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            resolved[0].customers[1],
            CustomerRef::NotFound {
                id: "c9".to_string()
            }
        );
        assert_eq!(
            resolved[1].project,
            ProjectRef::NotFound {
                id: "p404".to_string()
            }
        );
        assert_eq!(resolved[2].project, ProjectRef::Unset);
    }

    #[test]
    fn soft_deleted_tasks_and_customers_are_excluded() {
        let input = set(
            &[
                ("t1", json!({ "title": "live", "customers": ["c1"] })),
                ("t2", json!({ "title": "gone", "isDeleted": true })),
            ],
            &[("c1", json!({ "name": "Old", "isDeleted": true }))],
            &[],
            &[],
        );
        let resolved = resolve(&input, &Taxonomy::default());
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, "t1");
        assert!(matches!(resolved[0].customers[0], CustomerRef::NotFound { .. }));
    }

    #[test]
    fn labels_are_canonicalized_with_defaults() {
        let input = set(
            &[
                ("t1", json!({ "title": "a", "status": "בתהליך", "urgency": "דחוף" })),
                ("t2", json!({ "title": "b" })),
                ("t3", json!({ "title": "c", "status": "archived" })),
                (
                    "t4",
                    json!({ "title": "d", "subtasks": [{ "title": "s", "completed": true }] }),
                ),
            ],
            &[],
            &[],
            &[],
        );
        let resolved = resolve(&input, &Taxonomy::default());
        assert_eq!(resolved[0].status, Mapped::Known(CanonicalStatus::InProgress));
        assert_eq!(resolved[0].urgency, Mapped::Known(CanonicalUrgency::High));
        assert_eq!(resolved[1].status, Mapped::Known(CanonicalStatus::Todo));
        assert_eq!(resolved[1].urgency, Mapped::Known(CanonicalUrgency::Medium));
        assert_eq!(resolved[2].status, Mapped::PassThrough("archived".to_string()));
        assert_eq!(
            resolved[3].subtasks[0].status,
            Mapped::Known(CanonicalStatus::Done)
        );
    }

    #[test]
    fn customer_snapshot_change_alone_updates_summary() {
        let mut input = set(
            &[("t1", json!({ "title": "a", "customers": ["c1"] }))],
            &[("c1", json!({ "name": "Dana" }))],
            &[],
            &[],
        );
        let mut resolver = Resolver::new(Taxonomy::default());
        let first = resolver.resolve(&input);
        assert!(matches!(&first[0].customers[0], CustomerRef::Resolved(c) if c.name == "Dana"));

        input.customers = Snapshot::new(
            Collection::Customers,
            2,
            records(&[("c1", json!({ "name": "Dana-Renamed" }))]),
        );
        let second = resolver.resolve(&input);
        assert!(
            matches!(&second[0].customers[0], CustomerRef::Resolved(c) if c.name == "Dana-Renamed")
        );
        assert_eq!(resolver.passes(), 2);
    }

    #[test]
    fn identical_snapshot_set_is_memoized() {
        let input = set(&[("t1", json!({ "title": "a" }))], &[], &[], &[]);
        let mut resolver = Resolver::new(Taxonomy::default());
        let first = resolver.resolve(&input);
        let second = resolver.resolve(&input.clone());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.passes(), 1);

        resolver.set_taxonomy(Taxonomy::default());
        resolver.resolve(&input);
        assert_eq!(resolver.passes(), 2);
    }
}
