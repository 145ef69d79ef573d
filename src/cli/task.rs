//! crmboard task mutation commands
//!
//! Each command opens a session, applies the edit optimistically, waits for
//! the store to answer and reports the settled task.

use serde::Serialize;

use crate::coordinator::{FieldEdit, FieldKey, MutationId, MutationState, NewTask};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};
use crate::resolver::ResolvedTask;
use crate::session::BoardSession;
use crate::store::JsonDirStore;
use crate::taxonomy::Taxonomy;

use super::{parse_date, Context};

/// Options for `crmboard create`
pub struct CreateOptions {
    pub title: String,
    pub description: String,
    pub status: Option<String>,
    pub urgency: Option<String>,
    pub due: Option<String>,
    pub assignees: Vec<String>,
    pub customers: Vec<String>,
    pub project: Option<String>,
}

#[derive(Serialize)]
struct CreateReport {
    id: String,
}

#[derive(Serialize)]
struct MutationReport {
    task_id: String,
    field: FieldKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    task: Option<ResolvedTask>,
}

pub async fn run_create(ctx: &Context, options: CreateOptions) -> Result<()> {
    let taxonomy = ctx.taxonomy()?;
    let input = NewTask {
        title: options.title,
        description: options.description,
        status: options
            .status
            .as_deref()
            .map(|label| taxonomy.parse_status(label))
            .transpose()?,
        urgency: options
            .urgency
            .as_deref()
            .map(|label| taxonomy.parse_urgency(label))
            .transpose()?,
        due_date: options
            .due
            .as_deref()
            .map(|raw| parse_date(raw, false))
            .transpose()?,
        assigned_to: options.assignees,
        customers: options.customers,
        project: options.project,
    };

    let mut session = ctx.session().await?;
    let id = session.create_task(input).await?;
    session.stop();

    let mut human = HumanOutput::new(format!("crmboard create: {id}"));
    human.push_summary("id", id.clone());
    human.push_next_step(format!("crmboard show {id}"));
    emit_success(ctx.output, "create", &CreateReport { id }, Some(&human))
}

pub async fn run_move(ctx: &Context, id: &str, status: &str) -> Result<()> {
    let status = ctx.taxonomy()?.parse_status(status)?;
    mutate(ctx, "move", id, FieldKey::Status, |session| {
        session.move_task(id, status)
    })
    .await
}

pub async fn run_set(ctx: &Context, id: &str, field: &str, value: &str) -> Result<()> {
    let key: FieldKey = field.parse()?;
    let edit = parse_edit(key, value, &ctx.taxonomy()?)?;
    mutate(ctx, "set", id, key, |session| session.edit_field(id, edit)).await
}

pub async fn run_delete(ctx: &Context, id: &str) -> Result<()> {
    mutate(ctx, "delete", id, FieldKey::Deleted, |session| {
        session.delete_task(id)
    })
    .await
}

pub async fn run_comment(ctx: &Context, id: &str, text: &str) -> Result<()> {
    mutate(ctx, "comment", id, FieldKey::Comments, |session| {
        session.add_comment(id, text)
    })
    .await
}

pub async fn run_subtask_add(
    ctx: &Context,
    id: &str,
    title: &str,
    urgency: Option<&str>,
    due: Option<&str>,
) -> Result<()> {
    let taxonomy = ctx.taxonomy()?;
    let urgency = urgency.map(|label| taxonomy.parse_urgency(label)).transpose()?;
    let due = due.map(|raw| parse_date(raw, false)).transpose()?;
    mutate(ctx, "subtask add", id, FieldKey::Subtasks, |session| {
        session.add_subtask(id, title, urgency, due)
    })
    .await
}

pub async fn run_subtask_toggle(ctx: &Context, id: &str, subtask: &str) -> Result<()> {
    mutate(ctx, "subtask toggle", id, FieldKey::Subtasks, |session| {
        session.toggle_subtask(id, subtask)
    })
    .await
}

/// Apply one edit through a session and wait for it to settle.
async fn mutate<F>(ctx: &Context, command: &str, task_id: &str, field: FieldKey, apply: F) -> Result<()>
where
    F: FnOnce(&mut BoardSession<JsonDirStore>) -> Result<MutationId>,
{
    let mut session = ctx.session().await?;
    let mutation = apply(&mut session)?;
    session.wait_for_pending().await;

    let settled = session
        .view()
        .coordinator()
        .record(mutation)
        .map(|record| (record.state, record.error.clone()));
    if let Some((MutationState::Reverted, message)) = settled {
        session.stop();
        return Err(Error::Dispatch {
            task_id: task_id.to_string(),
            message: message.unwrap_or_else(|| "rejected".to_string()),
        });
    }

    let task = session.view().task(task_id);
    session.stop();

    let mut human = HumanOutput::new(format!("crmboard {command}: {task_id} {field} updated"));
    if let Some(task) = &task {
        human.push_summary("title", task.title.clone());
        human.push_summary("status", task.status.display(ctx.locale));
        human.push_summary("urgency", task.urgency.display(ctx.locale));
    }
    human.push_next_step(format!("crmboard show {task_id}"));

    emit_success(
        ctx.output,
        command,
        &MutationReport {
            task_id: task_id.to_string(),
            field,
            task,
        },
        Some(&human),
    )
}

/// Turn a `set` value into an edit of `key`.
pub(crate) fn parse_edit(key: FieldKey, value: &str, taxonomy: &Taxonomy) -> Result<FieldEdit> {
    let trimmed = value.trim();
    let cleared = trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none");
    let list = || {
        trimmed
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>()
    };

    match key {
        FieldKey::Status => Ok(FieldEdit::Status(taxonomy.parse_status(value)?)),
        FieldKey::Urgency => Ok(FieldEdit::Urgency(taxonomy.parse_urgency(value)?)),
        FieldKey::Title => Ok(FieldEdit::Title(value.to_string())),
        FieldKey::Description => Ok(FieldEdit::Description(value.to_string())),
        FieldKey::DueDate if cleared => Ok(FieldEdit::DueDate(None)),
        FieldKey::DueDate => Ok(FieldEdit::DueDate(Some(parse_date(trimmed, false)?))),
        FieldKey::Assignees => Ok(FieldEdit::Assignees(list())),
        FieldKey::Customers => Ok(FieldEdit::Customers(list())),
        FieldKey::Project if cleared => Ok(FieldEdit::Project(None)),
        FieldKey::Project => Ok(FieldEdit::Project(Some(trimmed.to_string()))),
        FieldKey::Deleted => Err(Error::InvalidArgument(
            "use `crmboard delete <id>` to delete a task".to_string(),
        )),
        FieldKey::Subtasks => Err(Error::InvalidArgument(
            "use `crmboard subtask add|toggle` to change subtasks".to_string(),
        )),
        FieldKey::Comments => Err(Error::InvalidArgument(
            "use `crmboard comment <id> <text>` to add comments".to_string(),
        )),
    }
}
