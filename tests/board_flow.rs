use serde_json::json;
use tokio::task::LocalSet;

use crmboard::config::BoardConfig;
use crmboard::coordinator::{FieldEdit, MutationState, NoticeKind};
use crmboard::pipeline::{FilterSpec, SortDirection, SortKey, SortSpec};
use crmboard::resolver::{CustomerRef, ProjectRef};
use crmboard::session::BoardSession;
use crmboard::store::{Collection, MemoryStore, StaticIdentity};
use crmboard::taxonomy::{CanonicalStatus, CanonicalUrgency, Mapped, Taxonomy};
use crmboard::Error;

fn store() -> MemoryStore {
    let store = MemoryStore::new();
    store.put(
        Collection::Tasks,
        "t1",
        json!({
            "title": "Call back Dana",
            "status": "בתהליך",
            "urgency": "דחוף",
            "assignedTo": "u1",
            "customers": ["c1", "c2"],
            "project": "p1",
            "dueDate": "2024-05-10"
        }),
    );
    store.put(
        Collection::Tasks,
        "t2",
        json!({
            "title": "archive old quotes",
            "status": "on hold",
            "assignedTo": ["u1", "u1"],
            "dueDate": { "seconds": 1714521600, "nanoseconds": 0 }
        }),
    );
    store.put(
        Collection::Tasks,
        "t3",
        json!({ "title": "Gone", "assignedTo": ["u1"], "isDeleted": true }),
    );
    store.put(Collection::Customers, "c1", json!({ "name": "Dana", "lastName": "Levi" }));
    store.put(Collection::Projects, "p1", json!({ "name": "Website" }));
    store.put(Collection::Users, "u1", json!({ "displayName": "Noa" }));
    store
}

fn session(store: &MemoryStore) -> BoardSession<MemoryStore> {
    BoardSession::new(
        store.clone(),
        &StaticIdentity("u1".to_string()),
        Taxonomy::default(),
        &BoardConfig::default(),
    )
}

#[tokio::test(flavor = "current_thread")]
async fn legacy_records_render_on_the_board() {
    LocalSet::new()
        .run_until(async {
            let store = store();
            let mut session = session(&store);
            session.start().await.expect("start");

            let board = session.view().board();
            assert_eq!(board.total(), 2);
            assert_eq!(board.locate("t1"), Some(CanonicalStatus::InProgress));
            // Unrecognized status lands in the default column.
            assert_eq!(board.locate("t2"), Some(CanonicalStatus::Todo));

            let t1 = session.view().task("t1").expect("t1");
            assert_eq!(t1.urgency, Mapped::Known(CanonicalUrgency::High));
            assert_eq!(t1.assigned_to, vec!["u1".to_string()]);
            assert_eq!(t1.assignees[0].name, "Noa");
            assert_eq!(t1.project.name(), Some("Website"));
            assert!(matches!(&t1.customers[0], CustomerRef::Resolved(c) if c.full_name() == "Dana Levi"));
            assert!(matches!(&t1.customers[1], CustomerRef::NotFound { id } if id == "c2"));

            let t2 = session.view().task("t2").expect("t2");
            assert_eq!(t2.status, Mapped::PassThrough("on hold".to_string()));
            assert_eq!(t2.assigned_to.len(), 1);
            assert_eq!(t2.project, ProjectRef::Unset);
            assert!(t2.due_date.is_some());
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn filter_and_sort_follow_view_state() {
    LocalSet::new()
        .run_until(async {
            let store = store();
            let mut session = session(&store);
            session.start().await.expect("start");

            let ids: Vec<String> = session.view().rows().into_iter().map(|t| t.id).collect();
            assert_eq!(ids, vec!["t2".to_string(), "t1".to_string()]);

            session
                .view()
                .set_sort(SortSpec::new(SortKey::Title, SortDirection::Asc));
            let ids: Vec<String> = session.view().rows().into_iter().map(|t| t.id).collect();
            assert_eq!(ids, vec!["t2".to_string(), "t1".to_string()]);

            session
                .view()
                .set_filter(FilterSpec::default().with_urgencies([CanonicalUrgency::High]));
            let ids: Vec<String> = session.view().rows().into_iter().map(|t| t.id).collect();
            assert_eq!(ids, vec!["t1".to_string()]);

            let stats = session.view().stats();
            assert_eq!(stats.total, 2);
            assert_eq!(stats.visible, 1);
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn two_quick_edits_settle_independently() {
    LocalSet::new()
        .run_until(async {
            let store = store();
            let mut session = session(&store);
            session.start().await.expect("start");

            let moved = session
                .move_task("t1", CanonicalStatus::Done)
                .expect("move");
            store.fail_next_write("quota exceeded");
            let renamed = session
                .edit_field("t2", FieldEdit::Title("Archive quotes".to_string()))
                .expect("rename");

            assert_eq!(session.view().board().locate("t1"), Some(CanonicalStatus::Done));
            assert_eq!(
                session.view().task("t2").map(|task| task.title),
                Some("Archive quotes".to_string())
            );

            session.wait_for_pending().await;
            let coordinator = session.view().coordinator();
            let states = (coordinator.state(moved), coordinator.state(renamed));
            // The first dispatched write consumes the injected failure.
            assert_eq!(
                states,
                (Some(MutationState::Reverted), Some(MutationState::Confirmed))
            );
            assert_eq!(session.view().board().locate("t1"), Some(CanonicalStatus::InProgress));
            assert_eq!(
                session.view().task("t2").map(|task| task.title),
                Some("Archive quotes".to_string())
            );

            let notices = session.drain_notices();
            assert_eq!(notices.len(), 1);
            assert_eq!(notices[0].category, NoticeKind::Dispatch);
            assert_eq!(notices[0].task_id.as_deref(), Some("t1"));
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn remote_changes_flow_into_the_board() {
    LocalSet::new()
        .run_until(async {
            let store = store();
            let mut session = session(&store);
            session.start().await.expect("start");

            store.put(Collection::Customers, "c2", json!({ "name": "Yossi" }));
            store.put(
                Collection::Tasks,
                "t4",
                json!({ "title": "New lead", "status": "done", "assignedTo": ["u1"] }),
            );
            store.put(
                Collection::Tasks,
                "t5",
                json!({ "title": "Not for me", "assignedTo": ["u9"] }),
            );
            session.pump();

            let t1 = session.view().task("t1").expect("t1");
            assert!(matches!(&t1.customers[1], CustomerRef::Resolved(c) if c.name == "Yossi"));
            assert_eq!(session.view().board().locate("t4"), Some(CanonicalStatus::Done));
            assert!(session.view().task("t5").is_none());
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn delete_hides_then_persists_soft_flag() {
    LocalSet::new()
        .run_until(async {
            let store = store();
            let mut session = session(&store);
            session.start().await.expect("start");

            session.delete_task("t2").expect("delete");
            assert!(session.view().task("t2").is_none());
            session.wait_for_pending().await;

            assert!(session.view().task("t2").is_none());
            let stored = store.get(Collection::Tasks, "t2").expect("still stored");
            assert!(stored.is_deleted());
            assert!(matches!(
                session.delete_task("t2"),
                Err(Error::NotFound { .. })
            ));
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn failing_stream_keeps_other_streams_live() {
    LocalSet::new()
        .run_until(async {
            let store = store();
            let mut session = session(&store);
            session.start().await.expect("start");

            store.emit_error(Collection::Customers, "permission denied");
            store.put(Collection::Projects, "p1", json!({ "name": "Website v2" }));
            session.pump();

            assert!(session.view().is_stale(Collection::Customers));
            assert!(!session.view().is_stale(Collection::Projects));
            let t1 = session.view().task("t1").expect("t1");
            assert_eq!(t1.project.name(), Some("Website v2"));
            assert!(matches!(&t1.customers[0], CustomerRef::Resolved(c) if c.name == "Dana"));

            let notices = session.drain_notices();
            assert_eq!(notices.len(), 1);
            assert_eq!(notices[0].category, NoticeKind::Subscription);
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn rejected_comment_is_not_saved_by_a_later_one() {
    LocalSet::new()
        .run_until(async {
            let store = store();
            let mut session = session(&store);
            session.start().await.expect("start");

            store.fail_next_write("denied");
            let first = session.add_comment("t1", "first").expect("first");
            let second = session.add_comment("t1", "second").expect("second");
            let shown: Vec<String> = session
                .view()
                .task("t1")
                .expect("t1")
                .comments
                .into_iter()
                .map(|comment| comment.text)
                .collect();
            assert_eq!(shown, vec!["first".to_string(), "second".to_string()]);

            session.wait_for_pending().await;
            let coordinator = session.view().coordinator();
            assert_eq!(coordinator.state(first), Some(MutationState::Reverted));
            assert_eq!(coordinator.state(second), Some(MutationState::Confirmed));

            let stored = store.get(Collection::Tasks, "t1").expect("t1");
            let texts: Vec<&str> = stored
                .data
                .get("comments")
                .and_then(|comments| comments.as_array())
                .map(|comments| {
                    comments
                        .iter()
                        .filter_map(|comment| comment.get("text").and_then(|text| text.as_str()))
                        .collect()
                })
                .unwrap_or_default();
            assert_eq!(texts, vec!["second"]);

            let shown: Vec<String> = session
                .view()
                .task("t1")
                .expect("t1")
                .comments
                .into_iter()
                .map(|comment| comment.text)
                .collect();
            assert_eq!(shown, vec!["second".to_string()]);

            let notices = session.drain_notices();
            assert_eq!(notices.len(), 1);
            assert_eq!(notices[0].category, NoticeKind::Dispatch);
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn subtask_edits_queue_behind_each_other() {
    LocalSet::new()
        .run_until(async {
            let store = store();
            let mut session = session(&store);
            session.start().await.expect("start");

            session
                .add_subtask("t1", "Draft", None, None)
                .expect("add");
            let subtask_id = session.view().task("t1").expect("t1").subtasks[0].id.clone();
            session.toggle_subtask("t1", &subtask_id).expect("toggle");
            session.wait_for_pending().await;

            let t1 = session.view().task("t1").expect("t1");
            assert_eq!(t1.subtasks.len(), 1);
            assert!(t1.subtasks[0].completed);
            let stored = store.get(Collection::Tasks, "t1").expect("t1");
            assert_eq!(
                stored.data["subtasks"][0]["completed"],
                serde_json::Value::Bool(true)
            );
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn task_with_current_and_legacy_keys_stays_on_the_board() {
    LocalSet::new()
        .run_until(async {
            let store = store();
            store.put(
                Collection::Tasks,
                "t6",
                json!({
                    "title": "Migrated",
                    "urgency": "high",
                    "priority": "low",
                    "project": "p1",
                    "projectId": "p9",
                    "isDeleted": false,
                    "deleted": false,
                    "assignedTo": "u1"
                }),
            );
            let mut session = session(&store);
            session.start().await.expect("start");

            let t6 = session.view().task("t6").expect("t6 on the board");
            assert_eq!(t6.urgency, Mapped::Known(CanonicalUrgency::High));
            assert_eq!(t6.project.name(), Some("Website"));
        })
        .await;
}
