//! Filter, sort and group stages over resolved tasks.
//!
//! The stages are pure. Filtering is conjunctive over the active dimensions,
//! sorting is stable, and grouping partitions the sorted rows into board
//! columns so each column keeps the sort order.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::resolver::ResolvedTask;
use crate::taxonomy::{Canonical, CanonicalStatus, CanonicalUrgency, Mapped};

/// Inclusive due-date window. Either end may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Result<Self> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(Error::validation("due", "range start is after range end"));
            }
        }
        Ok(Self { from, to })
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

/// Active filter dimensions. Empty dimensions match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSpec {
    pub search: String,
    pub statuses: BTreeSet<CanonicalStatus>,
    pub urgencies: BTreeSet<CanonicalUrgency>,
    pub due_range: Option<DateRange>,
    pub assignee: Option<String>,
    pub project: Option<String>,
}

impl FilterSpec {
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = CanonicalStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_urgencies(mut self, urgencies: impl IntoIterator<Item = CanonicalUrgency>) -> Self {
        self.urgencies = urgencies.into_iter().collect();
        self
    }

    pub fn with_due_range(mut self, range: DateRange) -> Self {
        self.due_range = (!range.is_unbounded()).then_some(range);
        self
    }

    pub fn with_assignee(mut self, user_id: impl Into<String>) -> Self {
        self.assignee = Some(user_id.into());
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project = Some(project_id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.search.trim().is_empty()
            && self.statuses.is_empty()
            && self.urgencies.is_empty()
            && self.due_range.is_none()
            && self.assignee.is_none()
            && self.project.is_none()
    }

    pub fn matches(&self, task: &ResolvedTask, default_column: CanonicalStatus) -> bool {
        let needle = self.search.trim().to_lowercase();
        if !needle.is_empty()
            && !task.title.to_lowercase().contains(&needle)
            && !task.description.to_lowercase().contains(&needle)
        {
            return false;
        }

        if !self.statuses.is_empty()
            && !self.statuses.contains(&column_of(task, default_column))
        {
            return false;
        }

        if !self.urgencies.is_empty() {
            match task.urgency.known() {
                Some(urgency) if self.urgencies.contains(&urgency) => {}
                _ => return false,
            }
        }

        if let Some(range) = &self.due_range {
            match task.due_date {
                Some(due) if range.contains(due) => {}
                _ => return false,
            }
        }

        if let Some(assignee) = &self.assignee {
            if !task.assigned_to.iter().any(|id| id == assignee) {
                return false;
            }
        }

        if let Some(project) = &self.project {
            if task.project.id() != Some(project.as_str()) {
                return false;
            }
        }

        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Title,
    Status,
    Urgency,
    DueDate,
    CreatedAt,
    UpdatedAt,
    AssigneeCount,
    CustomerCount,
    Project,
}

impl SortKey {
    pub const ALL: &'static [SortKey] = &[
        SortKey::Title,
        SortKey::Status,
        SortKey::Urgency,
        SortKey::DueDate,
        SortKey::CreatedAt,
        SortKey::UpdatedAt,
        SortKey::AssigneeCount,
        SortKey::CustomerCount,
        SortKey::Project,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::Title => "title",
            SortKey::Status => "status",
            SortKey::Urgency => "urgency",
            SortKey::DueDate => "due_date",
            SortKey::CreatedAt => "created_at",
            SortKey::UpdatedAt => "updated_at",
            SortKey::AssigneeCount => "assignee_count",
            SortKey::CustomerCount => "customer_count",
            SortKey::Project => "project",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let wanted = value.trim().replace('-', "_").to_ascii_lowercase();
        let wanted = match wanted.as_str() {
            "due" => "due_date",
            "assignees" => "assignee_count",
            "customers" => "customer_count",
            other => other,
        };
        SortKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = SortKey::ALL.iter().map(|key| key.as_str()).collect();
                Error::InvalidArgument(format!(
                    "unknown sort key '{value}' (expected one of {})",
                    known.join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

impl FromStr for SortDirection {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Asc),
            "desc" | "descending" => Ok(SortDirection::Desc),
            other => Err(Error::InvalidArgument(format!(
                "unknown sort direction '{other}' (expected asc|desc)"
            ))),
        }
    }
}

/// Ordered sort keys; later keys break ties of earlier ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    keys: Vec<(SortKey, SortDirection)>,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::new(SortKey::DueDate, SortDirection::Asc)
    }
}

impl SortSpec {
    pub fn new(key: SortKey, direction: SortDirection) -> Self {
        Self {
            keys: vec![(key, direction)],
        }
    }

    pub fn then(mut self, key: SortKey, direction: SortDirection) -> Self {
        self.keys.push((key, direction));
        self
    }

    pub fn keys(&self) -> &[(SortKey, SortDirection)] {
        &self.keys
    }

    pub fn compare(&self, a: &ResolvedTask, b: &ResolvedTask) -> Ordering {
        self.keys
            .iter()
            .map(|(key, direction)| compare_by(*key, *direction, a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

fn compare_by(key: SortKey, direction: SortDirection, a: &ResolvedTask, b: &ResolvedTask) -> Ordering {
    match key {
        SortKey::Title => direction.apply(compare_text(&a.title, &b.title)),
        SortKey::Status => direction.apply(compare_mapped(&a.status, &b.status)),
        SortKey::Urgency => direction.apply(compare_mapped(&a.urgency, &b.urgency)),
        SortKey::DueDate => compare_missing_last(a.due_date, b.due_date, direction, Ord::cmp),
        SortKey::CreatedAt => compare_missing_last(a.created_at, b.created_at, direction, Ord::cmp),
        SortKey::UpdatedAt => compare_missing_last(a.updated_at, b.updated_at, direction, Ord::cmp),
        SortKey::AssigneeCount => direction.apply(a.assignees.len().cmp(&b.assignees.len())),
        SortKey::CustomerCount => direction.apply(a.customers.len().cmp(&b.customers.len())),
        SortKey::Project => compare_missing_last(
            a.project.name(),
            b.project.name(),
            direction,
            |a: &&str, b: &&str| compare_text(a, b),
        ),
    }
}

/// Collation for the English and Hebrew text on the board. This is not full
/// UCA: Latin and Hebrew letters each order by code point once folded. The
/// primary fold ignores case, Hebrew points and cantillation marks, and treats
/// final letter forms as their base letter. Ties fall back to case-folded and
/// then raw text.
fn compare_text(a: &str, b: &str) -> Ordering {
    primary_fold(a)
        .cmp(&primary_fold(b))
        .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        .then_with(|| a.cmp(b))
}

fn primary_fold(text: &str) -> String {
    text.trim()
        .chars()
        .filter(|c| !('\u{0591}'..='\u{05C7}').contains(c))
        .flat_map(|c| {
            let base = match c {
                'ך' => 'כ',
                'ם' => 'מ',
                'ן' => 'נ',
                'ף' => 'פ',
                'ץ' => 'צ',
                other => other,
            };
            base.to_lowercase()
        })
        .collect()
}

/// Known values in rank order, pass-through labels after them.
fn compare_mapped<T: Canonical + Ord>(a: &Mapped<T>, b: &Mapped<T>) -> Ordering {
    match (a, b) {
        (Mapped::Known(a), Mapped::Known(b)) => a.cmp(b),
        (Mapped::Known(_), Mapped::PassThrough(_)) => Ordering::Less,
        (Mapped::PassThrough(_), Mapped::Known(_)) => Ordering::Greater,
        (Mapped::PassThrough(a), Mapped::PassThrough(b)) => compare_text(a, b),
    }
}

/// Missing values sort last in either direction.
fn compare_missing_last<T>(
    a: Option<T>,
    b: Option<T>,
    direction: SortDirection,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => direction.apply(cmp(&a, &b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Board column a task belongs in.
pub fn column_of(task: &ResolvedTask, default_column: CanonicalStatus) -> CanonicalStatus {
    task.status.known().unwrap_or(default_column)
}

pub fn filter(
    tasks: &[ResolvedTask],
    spec: &FilterSpec,
    default_column: CanonicalStatus,
) -> Vec<ResolvedTask> {
    tasks
        .iter()
        .filter(|task| spec.matches(task, default_column))
        .cloned()
        .collect()
}

/// Stable in-place sort.
pub fn sort(tasks: &mut [ResolvedTask], spec: &SortSpec) {
    tasks.sort_by(|a, b| spec.compare(a, b));
}

/// Filter then sort.
pub fn run(
    tasks: &[ResolvedTask],
    filter_spec: &FilterSpec,
    sort_spec: &SortSpec,
    default_column: CanonicalStatus,
) -> Vec<ResolvedTask> {
    let mut rows = filter(tasks, filter_spec, default_column);
    sort(&mut rows, sort_spec);
    rows
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub status: CanonicalStatus,
    pub tasks: Vec<ResolvedTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Board {
    pub columns: Vec<Column>,
}

impl Board {
    pub fn total(&self) -> usize {
        self.columns.iter().map(|column| column.tasks.len()).sum()
    }

    pub fn column(&self, status: CanonicalStatus) -> Option<&Column> {
        self.columns.iter().find(|column| column.status == status)
    }

    /// Column currently holding `task_id`.
    pub fn locate(&self, task_id: &str) -> Option<CanonicalStatus> {
        self.columns
            .iter()
            .find(|column| column.tasks.iter().any(|task| task.id == task_id))
            .map(|column| column.status)
    }
}

/// Partition rows into one column per canonical status, keeping row order.
pub fn group(tasks: Vec<ResolvedTask>, default_column: CanonicalStatus) -> Board {
    let mut columns: Vec<Column> = CanonicalStatus::ALL
        .iter()
        .map(|status| Column {
            status: *status,
            tasks: Vec::new(),
        })
        .collect();
    for task in tasks {
        let status = column_of(&task, default_column);
        if let Some(column) = columns.iter_mut().find(|column| column.status == status) {
            column.tasks.push(task);
        }
    }
    Board { columns }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ProjectRef, ProjectSummary};
    use chrono::TimeZone;

    fn task(id: &str, title: &str, status: &str) -> ResolvedTask {
        ResolvedTask {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            status: match crate::taxonomy::status_from_code(status) {
                Some(known) => Mapped::Known(known),
                None => Mapped::PassThrough(status.to_string()),
            },
            urgency: Mapped::Known(CanonicalUrgency::Medium),
            due_date: None,
            completed_at: None,
            assigned_to: Vec::new(),
            assignees: Vec::new(),
            project: ProjectRef::Unset,
            customers: Vec::new(),
            subtasks: Vec::new(),
            comments: Vec::new(),
            created_at: None,
            updated_at: None,
            created_by: None,
            updated_by: None,
        }
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, d, 12, 0, 0).single().expect("date")
    }

    fn ids(tasks: &[ResolvedTask]) -> Vec<&str> {
        tasks.iter().map(|task| task.id.as_str()).collect()
    }

    #[test]
    fn done_filter_keeps_exactly_the_done_tasks() {
        let tasks = vec![
            task("1", "a", "todo"),
            task("2", "b", "done"),
            task("3", "c", "in_progress"),
            task("4", "d", "done"),
            task("5", "e", "todo"),
        ];
        let spec = FilterSpec::default()
            .with_statuses([CanonicalStatus::Done])
            .with_search("");
        let rows = filter(&tasks, &spec, CanonicalStatus::Todo);
        assert_eq!(ids(&rows), vec!["2", "4"]);
        assert!(rows
            .iter()
            .all(|task| task.status.known() == Some(CanonicalStatus::Done)));
    }

    #[test]
    fn search_is_case_insensitive_over_title_and_description() {
        let mut with_desc = task("2", "Invoice", "todo");
        with_desc.description = "Call the ACME office".to_string();
        let tasks = vec![task("1", "Acme quote", "todo"), with_desc, task("3", "Other", "todo")];
        let rows = filter(
            &tasks,
            &FilterSpec::default().with_search("  acme "),
            CanonicalStatus::Todo,
        );
        assert_eq!(ids(&rows), vec!["1", "2"]);
    }

    #[test]
    fn filters_are_conjunctive() {
        let mut urgent = task("1", "x", "todo");
        urgent.urgency = Mapped::Known(CanonicalUrgency::High);
        urgent.due_date = Some(day(10));
        let mut urgent_late = urgent.clone();
        urgent_late.id = "2".to_string();
        urgent_late.due_date = Some(day(20));
        let mut undated = urgent.clone();
        undated.id = "3".to_string();
        undated.due_date = None;
        let calm = task("4", "x", "todo");

        let range = DateRange::new(Some(day(1)), Some(day(10))).expect("range");
        let spec = FilterSpec::default()
            .with_urgencies([CanonicalUrgency::High])
            .with_due_range(range);
        let rows = filter(&[urgent, urgent_late, undated, calm], &spec, CanonicalStatus::Todo);
        assert_eq!(ids(&rows), vec!["1"]);
    }

    #[test]
    fn due_range_is_inclusive_with_open_ends() {
        let range = DateRange::new(Some(day(5)), None).expect("range");
        assert!(range.contains(day(5)));
        assert!(range.contains(day(30)));
        assert!(!range.contains(day(4)));
        assert!(DateRange::new(Some(day(6)), Some(day(5))).is_err());
    }

    #[test]
    fn pass_through_status_follows_default_column() {
        let tasks = vec![task("1", "a", "archived"), task("2", "b", "done")];
        let todo = FilterSpec::default().with_statuses([CanonicalStatus::Todo]);
        assert_eq!(ids(&filter(&tasks, &todo, CanonicalStatus::Todo)), vec!["1"]);
        assert!(filter(&tasks, &todo, CanonicalStatus::InProgress).is_empty());
    }

    #[test]
    fn assignee_and_project_filters() {
        let mut mine = task("1", "a", "todo");
        mine.assigned_to = vec!["u1".to_string(), "u2".to_string()];
        mine.project = ProjectRef::Resolved(ProjectSummary {
            id: "p1".to_string(),
            name: "Site".to_string(),
            status: None,
        });
        let theirs = task("2", "b", "todo");
        let tasks = vec![mine, theirs];

        let by_user = FilterSpec::default().with_assignee("u2");
        assert_eq!(ids(&filter(&tasks, &by_user, CanonicalStatus::Todo)), vec!["1"]);
        let by_project = FilterSpec::default().with_project("p1");
        assert_eq!(ids(&filter(&tasks, &by_project, CanonicalStatus::Todo)), vec!["1"]);
    }

    #[test]
    fn sort_is_stable_in_both_directions() {
        let mut tasks = vec![
            task("1", "beta", "todo"),
            task("2", "Alpha", "todo"),
            task("3", "beta", "done"),
            task("4", "alpha", "todo"),
        ];
        sort(&mut tasks, &SortSpec::new(SortKey::Title, SortDirection::Asc));
        assert_eq!(ids(&tasks), vec!["2", "4", "1", "3"]);

        let mut tasks = vec![
            task("1", "same", "todo"),
            task("2", "same", "todo"),
            task("3", "same", "todo"),
        ];
        sort(&mut tasks, &SortSpec::new(SortKey::Title, SortDirection::Desc));
        assert_eq!(ids(&tasks), vec!["1", "2", "3"]);
    }

    #[test]
    fn missing_dates_sort_last() {
        let mut early = task("1", "a", "todo");
        early.due_date = Some(day(1));
        let mut late = task("2", "b", "todo");
        late.due_date = Some(day(9));
        let none = task("3", "c", "todo");

        let mut asc = vec![none.clone(), late.clone(), early.clone()];
        sort(&mut asc, &SortSpec::new(SortKey::DueDate, SortDirection::Asc));
        assert_eq!(ids(&asc), vec!["1", "2", "3"]);

        let mut desc = vec![none, early, late];
        sort(&mut desc, &SortSpec::new(SortKey::DueDate, SortDirection::Desc));
        assert_eq!(ids(&desc), vec!["2", "1", "3"]);
    }

    #[test]
    fn secondary_key_breaks_ties() {
        let mut a = task("1", "zeta", "todo");
        a.urgency = Mapped::Known(CanonicalUrgency::High);
        let mut b = task("2", "alpha", "todo");
        b.urgency = Mapped::Known(CanonicalUrgency::High);
        let c = task("3", "mid", "todo");
        let mut tasks = vec![a, b, c];
        let spec = SortSpec::new(SortKey::Urgency, SortDirection::Desc)
            .then(SortKey::Title, SortDirection::Asc);
        sort(&mut tasks, &spec);
        assert_eq!(ids(&tasks), vec!["2", "1", "3"]);
    }

    #[test]
    fn group_partitions_every_row() {
        let tasks = vec![
            task("1", "a", "todo"),
            task("2", "b", "done"),
            task("3", "c", "mystery"),
            task("4", "d", "in_progress"),
            task("5", "e", "done"),
        ];
        let board = group(tasks.clone(), CanonicalStatus::Todo);
        assert_eq!(board.total(), tasks.len());
        let statuses: Vec<CanonicalStatus> =
            board.columns.iter().map(|column| column.status).collect();
        assert_eq!(statuses, CanonicalStatus::ALL.to_vec());
        assert_eq!(
            ids(&board.column(CanonicalStatus::Todo).expect("todo").tasks),
            vec!["1", "3"]
        );
        assert_eq!(board.locate("5"), Some(CanonicalStatus::Done));
        assert_eq!(board.locate("nope"), None);
    }

    #[test]
    fn sort_key_parses_aliases() {
        assert_eq!("due".parse::<SortKey>().expect("key"), SortKey::DueDate);
        assert_eq!("assignee-count".parse::<SortKey>().expect("key"), SortKey::AssigneeCount);
        assert!("colour".parse::<SortKey>().is_err());
        assert_eq!("DESC".parse::<SortDirection>().expect("dir"), SortDirection::Desc);
    }

    #[test]
    fn text_order_ignores_case_and_hebrew_points() {
        assert_eq!(compare_text("apple", "Banana"), Ordering::Less);
        // Pointed "bayit" sorts by its letters, after "beged".
        assert_eq!(compare_text("בַּיִת", "בגד"), Ordering::Greater);
        assert_eq!(primary_fold("מלך"), primary_fold("מלכ"));
        assert_eq!(compare_text("Dana", "dana"), Ordering::Less);
    }
}
