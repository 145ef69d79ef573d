//! crmboard board, list, show and watch commands
//!
//! Read-only views over a live session.

use serde::Serialize;

use crate::coordinator::Notice;
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};
use crate::pipeline::Board;
use crate::resolver::{CustomerRef, ProjectRef, ResolvedTask};
use crate::session::BoardSession;
use crate::store::{Collection, JsonDirStore};
use crate::taxonomy::{Canonical, Locale};
use crate::view::BoardStats;

use super::{Context, FilterArgs};

#[derive(Serialize)]
struct BoardReport<'a> {
    actor: &'a str,
    board: &'a Board,
    stats: &'a BoardStats,
}

#[derive(Serialize)]
struct ListReport<'a> {
    actor: &'a str,
    tasks: &'a [ResolvedTask],
    stats: &'a BoardStats,
}

pub async fn run_board(ctx: &Context, filter: &FilterArgs) -> Result<()> {
    let mut session = open_filtered(ctx, filter).await?;
    render_board(ctx, &mut session, "board")?;
    session.stop();
    Ok(())
}

pub async fn run_list(ctx: &Context, filter: &FilterArgs) -> Result<()> {
    let mut session = open_filtered(ctx, filter).await?;
    let rows = session.view().rows();
    let stats = session.view().stats();
    let notices = session.drain_notices();

    let mut human = HumanOutput::new(format!("crmboard list: {} task(s)", rows.len()));
    human.push_summary("actor", ctx.actor.clone());
    for task in &rows {
        human.push_line("Tasks", task_line(task, ctx.locale, true));
    }
    push_notices(&mut human, &notices);

    emit_success(
        ctx.output,
        "list",
        &ListReport {
            actor: &ctx.actor,
            tasks: &rows,
            stats: &stats,
        },
        Some(&human),
    )?;
    session.stop();
    Ok(())
}

pub async fn run_show(ctx: &Context, id: &str) -> Result<()> {
    let mut session = ctx.session().await?;
    let task = session.view().task(id).ok_or_else(|| Error::NotFound {
        collection: Collection::Tasks,
        id: id.to_string(),
    })?;
    let human = describe_task(&task, ctx.locale);
    emit_success(ctx.output, "show", &task, Some(&human))?;
    session.stop();
    Ok(())
}

pub async fn run_watch(
    ctx: &Context,
    filter: &FilterArgs,
    max_updates: Option<usize>,
) -> Result<()> {
    let mut session = open_filtered(ctx, filter).await?;
    render_board(ctx, &mut session, "watch")?;

    let mut updates = 0usize;
    while max_updates.map_or(true, |max| updates < max) {
        tokio::select! {
            handled = session.next() => {
                if handled == 0 {
                    break;
                }
                updates += 1;
                render_board(ctx, &mut session, "watch")?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.stop();
    Ok(())
}

async fn open_filtered(ctx: &Context, filter: &FilterArgs) -> Result<BoardSession<JsonDirStore>> {
    let taxonomy = ctx.taxonomy()?;
    let filter_spec = filter.filter_spec(&taxonomy)?;
    let sort_spec = filter.sort_spec(&ctx.board_config())?;
    let mut session = ctx.session().await?;
    session.view().set_filter(filter_spec);
    session.view().set_sort(sort_spec);
    Ok(session)
}

fn render_board(
    ctx: &Context,
    session: &mut BoardSession<JsonDirStore>,
    command: &str,
) -> Result<()> {
    let board = session.view().board();
    let stats = session.view().stats();
    let notices = session.drain_notices();
    let taxonomy = session.view().taxonomy().clone();

    let mut human = HumanOutput::new(format!(
        "crmboard {command}: {} of {} task(s)",
        stats.visible, stats.total
    ));
    human.push_summary("actor", ctx.actor.clone());
    for column in &board.columns {
        let title = format!(
            "{} ({})",
            taxonomy.display_status(column.status, ctx.locale),
            column.tasks.len()
        );
        if column.tasks.is_empty() {
            human.push_line(&title, "-");
        }
        for task in &column.tasks {
            human.push_line(&title, task_line(task, ctx.locale, false));
        }
    }
    for collection in &stats.stale {
        human.push_warning(format!("{collection} stream is stale; showing last known data"));
    }
    push_notices(&mut human, &notices);

    emit_success(
        ctx.output,
        command,
        &BoardReport {
            actor: &ctx.actor,
            board: &board,
            stats: &stats,
        },
        Some(&human),
    )
}

fn push_notices(human: &mut HumanOutput, notices: &[Notice]) {
    for notice in notices {
        human.push_warning(notice.message.clone());
    }
}

fn task_line(task: &ResolvedTask, locale: Locale, with_status: bool) -> String {
    let mut line = format!("{}  {}", task.id, task.title);
    if with_status {
        line.push_str(&format!("  <{}>", task.status.display(locale)));
    }
    line.push_str(&format!("  [{}]", task.urgency.display(locale)));
    if let Some(due) = task.due_date {
        line.push_str(&format!("  due {}", due.format("%Y-%m-%d")));
    }
    if !task.assignees.is_empty() {
        let names: Vec<&str> = task.assignees.iter().map(|a| a.name.as_str()).collect();
        line.push_str(&format!("  @{}", names.join(", @")));
    }
    line
}

fn describe_task(task: &ResolvedTask, locale: Locale) -> HumanOutput {
    let mut human = HumanOutput::new(format!("{}  {}", task.id, task.title));
    human.push_summary("status", task.status.display(locale));
    human.push_summary("urgency", task.urgency.display(locale));
    if let Some(due) = task.due_date {
        human.push_summary("due", due.format("%Y-%m-%d %H:%M").to_string());
    }
    if let Some(done) = task.completed_at {
        human.push_summary("completed", done.format("%Y-%m-%d %H:%M").to_string());
    }
    let project = match &task.project {
        ProjectRef::Unset => "none".to_string(),
        ProjectRef::Resolved(summary) => summary.name.clone(),
        ProjectRef::NotFound { id } => format!("{id} (not found)"),
    };
    human.push_summary("project", project);
    if let Some(created_by) = &task.created_by {
        human.push_summary("created by", created_by.clone());
    }

    if !task.description.is_empty() {
        human.push_line("Description", task.description.clone());
    }
    for id in &task.assigned_to {
        let line = match task.assignees.iter().find(|assignee| &assignee.id == id) {
            Some(assignee) => format!("{} ({id})", assignee.name),
            None => format!("{id} (unknown user)"),
        };
        human.push_line("Assignees", line);
    }
    for customer in &task.customers {
        let line = match customer {
            CustomerRef::Resolved(summary) => {
                let contact = summary
                    .phone
                    .as_deref()
                    .or(summary.email.as_deref())
                    .unwrap_or("");
                format!("{} {contact}", summary.full_name()).trim().to_string()
            }
            CustomerRef::NotFound { id } => format!("{id} (not found)"),
        };
        human.push_line("Customers", line);
    }
    for subtask in &task.subtasks {
        let mark = if subtask.completed { "x" } else { " " };
        human.push_line(
            "Subtasks",
            format!(
                "[{mark}] {} {} ({})",
                subtask.id,
                subtask.title,
                subtask.urgency.display(locale)
            ),
        );
    }
    for comment in &task.comments {
        let at = comment
            .created_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        human.push_line(
            "Comments",
            format!("{} {at}: {}", comment.author, comment.text),
        );
    }
    if task.status.known().is_none() {
        human.push_warning(format!(
            "unrecognized status '{}' shown in the default column",
            task.status.as_str()
        ));
    }
    if let Some(known) = task.status.known() {
        human.push_next_step(format!("crmboard move {} <status>  (now {})", task.id, known.code()));
    }
    human
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::AssigneeSummary;
    use crate::taxonomy::{CanonicalStatus, CanonicalUrgency, Mapped};

    fn task() -> ResolvedTask {
        ResolvedTask {
            id: "t1".to_string(),
            title: "Quote".to_string(),
            description: String::new(),
            status: Mapped::Known(CanonicalStatus::InProgress),
            urgency: Mapped::Known(CanonicalUrgency::High),
            due_date: None,
            completed_at: None,
            assigned_to: vec!["u1".to_string(), "u2".to_string()],
            assignees: vec![AssigneeSummary {
                id: "u1".to_string(),
                name: "Noa".to_string(),
            }],
            project: ProjectRef::NotFound {
                id: "p9".to_string(),
            },
            customers: Vec::new(),
            subtasks: Vec::new(),
            comments: Vec::new(),
            created_at: None,
            updated_at: None,
            created_by: None,
            updated_by: None,
        }
    }

    #[test]
    fn task_line_uses_locale_labels() {
        let line = task_line(&task(), Locale::En, true);
        assert_eq!(line, "t1  Quote  <In Progress>  [High]  @Noa");
    }

    #[test]
    fn describe_marks_missing_references() {
        let text = crate::output::format_human(&describe_task(&task(), Locale::En));
        assert!(text.contains("- project: p9 (not found)"));
        assert!(text.contains("- u2 (unknown user)"));
    }
}
