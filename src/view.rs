//! Board view model.
//!
//! Owns the latest snapshot of every collection, the optimistic overlays and
//! the filter/sort state, and derives the rendered rows and columns from
//! them. Reads take `&mut self` because the derived lists are cached.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::config::BoardConfig;
use crate::coordinator::{MutationCoordinator, Notice};
use crate::error::Error;
use crate::model::{CustomerRecord, ProjectRecord, TaskRecord, UserRecord};
use crate::pipeline::{self, Board, FilterSpec, SortSpec};
use crate::resolver::{ResolvedTask, Resolver, SnapshotSet};
use crate::store::{Collection, Snapshot};
use crate::taxonomy::{Canonical, CanonicalStatus, Locale, Taxonomy};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardStats {
    /// Live tasks before filtering.
    pub total: usize,
    /// Tasks passing the current filter.
    pub visible: usize,
    pub per_column: Vec<(CanonicalStatus, usize)>,
    pub pending_mutations: usize,
    pub stale: Vec<Collection>,
}

struct Overlaid {
    base: Arc<[TaskRecord]>,
    generation: u64,
    tasks: Snapshot<TaskRecord>,
}

pub struct BoardViewModel {
    snapshots: SnapshotSet,
    overlaid: Option<Overlaid>,
    resolver: Resolver,
    coordinator: MutationCoordinator,
    filter: FilterSpec,
    sort: SortSpec,
    default_column: CanonicalStatus,
    locale: Locale,
    stale: BTreeSet<Collection>,
}

impl BoardViewModel {
    pub fn new(taxonomy: Taxonomy, board: &BoardConfig, actor: impl Into<String>) -> Self {
        Self {
            snapshots: SnapshotSet::default(),
            overlaid: None,
            resolver: Resolver::new(taxonomy),
            coordinator: MutationCoordinator::new(actor, board.mutation_history),
            filter: FilterSpec::default(),
            sort: SortSpec::new(board.sort_key, board.sort_direction),
            default_column: board.default_column,
            locale: board.locale,
            stale: BTreeSet::new(),
        }
    }

    pub fn apply_tasks(&mut self, snapshot: Snapshot<TaskRecord>) {
        if snapshot.revision < self.snapshots.tasks.revision {
            tracing::debug!(revision = snapshot.revision, "ignoring older tasks snapshot");
            return;
        }
        self.coordinator.observe_tasks_revision(snapshot.revision);
        self.snapshots.tasks = snapshot;
        self.stale.remove(&Collection::Tasks);
    }

    pub fn apply_customers(&mut self, snapshot: Snapshot<CustomerRecord>) {
        if snapshot.revision < self.snapshots.customers.revision {
            return;
        }
        self.snapshots.customers = snapshot;
        self.stale.remove(&Collection::Customers);
    }

    pub fn apply_projects(&mut self, snapshot: Snapshot<ProjectRecord>) {
        if snapshot.revision < self.snapshots.projects.revision {
            return;
        }
        self.snapshots.projects = snapshot;
        self.stale.remove(&Collection::Projects);
    }

    pub fn apply_users(&mut self, snapshot: Snapshot<UserRecord>) {
        self.snapshots.users = snapshot;
        self.stale.remove(&Collection::Users);
    }

    /// Keep serving the last good data for `collection` and tell the user.
    pub fn mark_stale(&mut self, collection: Collection, err: &Error) {
        tracing::warn!(collection = collection.as_str(), %err, "stream stale");
        self.stale.insert(collection);
        self.coordinator.push_notice(Notice::from_error(None, None, err));
    }

    pub fn is_stale(&self, collection: Collection) -> bool {
        self.stale.contains(&collection)
    }

    pub fn snapshots(&self) -> &SnapshotSet {
        &self.snapshots
    }

    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut MutationCoordinator {
        &mut self.coordinator
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        self.resolver.taxonomy()
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn set_locale(&mut self, locale: Locale) {
        self.locale = locale;
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: FilterSpec) {
        self.filter = filter;
    }

    pub fn sort(&self) -> &SortSpec {
        &self.sort
    }

    pub fn set_sort(&mut self, sort: SortSpec) {
        self.sort = sort;
    }

    pub fn default_column(&self) -> CanonicalStatus {
        self.default_column
    }

    /// Every live task, overlays applied, unfiltered.
    pub fn resolved(&mut self) -> Arc<[ResolvedTask]> {
        let set = SnapshotSet {
            tasks: self.overlaid_tasks(),
            ..self.snapshots.clone()
        };
        self.resolver.resolve(&set)
    }

    /// Filtered and sorted rows.
    pub fn rows(&mut self) -> Vec<ResolvedTask> {
        let resolved = self.resolved();
        pipeline::run(&resolved, &self.filter, &self.sort, self.default_column)
    }

    /// Filtered and sorted rows grouped into columns.
    pub fn board(&mut self) -> Board {
        let rows = self.rows();
        pipeline::group(rows, self.default_column)
    }

    /// A live task by id, ignoring the filter.
    pub fn task(&mut self, id: &str) -> Option<ResolvedTask> {
        self.resolved().iter().find(|task| task.id == id).cloned()
    }

    /// The stored record with overlays applied.
    pub fn record(&mut self, id: &str) -> Option<TaskRecord> {
        self.overlaid_tasks()
            .iter()
            .find(|record| record.id == id && !record.is_deleted)
            .cloned()
    }

    pub fn stats(&mut self) -> BoardStats {
        let total = self.resolved().len();
        let board = self.board();
        BoardStats {
            total,
            visible: board.total(),
            per_column: CanonicalStatus::ALL
                .iter()
                .map(|status| {
                    let count = board.column(*status).map_or(0, |column| column.tasks.len());
                    (*status, count)
                })
                .collect(),
            pending_mutations: self.coordinator.pending_count(),
            stale: self.stale.iter().copied().collect(),
        }
    }

    fn overlaid_tasks(&mut self) -> Snapshot<TaskRecord> {
        let base = &self.snapshots.tasks;
        let generation = self.coordinator.generation();
        if let Some(cached) = &self.overlaid {
            if Arc::ptr_eq(&cached.base, &base.records) && cached.generation == generation {
                return cached.tasks.clone();
            }
        }
        let tasks = Snapshot::new(
            base.collection,
            base.revision,
            self.coordinator.apply_overlays(&base.records),
        );
        self.overlaid = Some(Overlaid {
            base: Arc::clone(&base.records),
            generation,
            tasks: tasks.clone(),
        });
        tasks
    }
}
