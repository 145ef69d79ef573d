//! Command-line interface for crmboard
//!
//! This module defines the CLI structure using clap derive macros.
//! Each group of subcommands is implemented in its own submodule.

use std::future::Future;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use clap::{Args, Parser, Subcommand};

use crate::config::{BoardConfig, Config, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::model::parse_timestamp;
use crate::output::OutputOptions;
use crate::pipeline::{DateRange, FilterSpec, SortDirection, SortKey, SortSpec};
use crate::session::BoardSession;
use crate::store::{JsonDirStore, StaticIdentity};
use crate::taxonomy::{Locale, Taxonomy};

mod actor;
mod board;
mod init;
mod labels;
mod task;

/// crmboard - CRM task board
///
/// Shows the tasks assigned to you as a board, keeps it in sync with the
/// data directory and applies edits optimistically.
#[derive(Parser, Debug)]
#[command(name = "crmboard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding the collection files (defaults to current directory)
    #[arg(long, global = true, env = "CRMBOARD_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Acting user id
    #[arg(long, global = true)]
    pub actor: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Label language: en or he
    #[arg(long, global = true)]
    pub locale: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show tasks grouped into status columns
    Board {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// List tasks as rows
    List {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Show one task with its references resolved
    Show {
        /// Task id
        id: String,
    },

    /// Create a task
    Create {
        /// Task title
        title: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Initial status (defaults to todo)
        #[arg(long)]
        status: Option<String>,

        /// Urgency: low, medium, high
        #[arg(long)]
        urgency: Option<String>,

        /// Due date (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        due: Option<String>,

        /// Assignee user ids (defaults to the actor)
        #[arg(long = "assignee")]
        assignees: Vec<String>,

        /// Customer ids
        #[arg(long = "customer")]
        customers: Vec<String>,

        /// Project id
        #[arg(long)]
        project: Option<String>,
    },

    /// Move a task to another column
    Move {
        /// Task id
        id: String,

        /// Target status (any known label)
        status: String,
    },

    /// Edit a single field of a task
    Set {
        /// Task id
        id: String,

        /// Field: status, urgency, title, description, due, assignees, customers, project
        field: String,

        /// New value; lists are comma separated, empty clears optional fields
        value: String,
    },

    /// Soft-delete a task
    Delete {
        /// Task id
        id: String,
    },

    /// Append a comment to a task
    Comment {
        /// Task id
        id: String,

        /// Comment text
        text: String,
    },

    /// Subtask management
    #[command(subcommand)]
    Subtask(SubtaskCommands),

    /// Print the board on every change until interrupted
    Watch {
        #[command(flatten)]
        filter: FilterArgs,

        /// Stop after this many updates
        #[arg(long)]
        max_updates: Option<usize>,
    },

    /// Show status and urgency labels with their aliases
    Labels,

    /// Set or show actor identity
    #[command(subcommand)]
    Actor(ActorCommands),

    /// Write a default config file into the data directory
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
}

/// Subtask subcommands
#[derive(Subcommand, Debug)]
pub enum SubtaskCommands {
    /// Add a subtask
    Add {
        /// Task id
        id: String,

        /// Subtask title
        title: String,

        #[arg(long)]
        urgency: Option<String>,

        #[arg(long)]
        due: Option<String>,
    },

    /// Flip a subtask between open and completed
    Toggle {
        /// Task id
        id: String,

        /// Subtask id
        subtask: String,
    },
}

/// Actor subcommands
#[derive(Subcommand, Debug)]
pub enum ActorCommands {
    /// Persist the actor id for this data directory
    Set {
        /// Actor id
        name: String,
    },

    /// Show the resolved actor id
    Show,
}

/// Filter and sort flags shared by the board views.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Case-insensitive text in title or description
    #[arg(long, short = 's')]
    pub search: Option<String>,

    /// Keep only these statuses (repeatable)
    #[arg(long = "status", value_name = "STATUS")]
    pub statuses: Vec<String>,

    /// Keep only these urgencies (repeatable)
    #[arg(long = "urgency", value_name = "URGENCY")]
    pub urgencies: Vec<String>,

    /// Earliest due date, inclusive
    #[arg(long)]
    pub due_from: Option<String>,

    /// Latest due date, inclusive
    #[arg(long)]
    pub due_to: Option<String>,

    /// Keep only tasks assigned to this user id
    #[arg(long)]
    pub assignee: Option<String>,

    /// Keep only tasks of this project id
    #[arg(long)]
    pub project: Option<String>,

    /// Sort key (defaults to board.sort_key)
    #[arg(long)]
    pub sort: Option<String>,

    /// Sort descending
    #[arg(long)]
    pub desc: bool,

    /// Tie-break keys, `key` or `key:desc` (repeatable)
    #[arg(long = "then", value_name = "KEY")]
    pub then: Vec<String>,
}

impl FilterArgs {
    pub(crate) fn filter_spec(&self, taxonomy: &Taxonomy) -> Result<FilterSpec> {
        let statuses = self
            .statuses
            .iter()
            .map(|label| taxonomy.parse_status(label))
            .collect::<Result<Vec<_>>>()?;
        let urgencies = self
            .urgencies
            .iter()
            .map(|label| taxonomy.parse_urgency(label))
            .collect::<Result<Vec<_>>>()?;
        let from = self
            .due_from
            .as_deref()
            .map(|raw| parse_date(raw, false))
            .transpose()?;
        let to = self
            .due_to
            .as_deref()
            .map(|raw| parse_date(raw, true))
            .transpose()?;

        let mut spec = FilterSpec::default()
            .with_search(self.search.clone().unwrap_or_default())
            .with_statuses(statuses)
            .with_urgencies(urgencies)
            .with_due_range(DateRange::new(from, to)?);
        if let Some(assignee) = &self.assignee {
            spec = spec.with_assignee(assignee.clone());
        }
        if let Some(project) = &self.project {
            spec = spec.with_project(project.clone());
        }
        Ok(spec)
    }

    pub(crate) fn sort_spec(&self, board: &BoardConfig) -> Result<SortSpec> {
        let key = match &self.sort {
            Some(raw) => raw.parse::<SortKey>()?,
            None => board.sort_key,
        };
        let direction = if self.desc {
            SortDirection::Desc
        } else if self.sort.is_some() {
            SortDirection::Asc
        } else {
            board.sort_direction
        };
        let mut spec = SortSpec::new(key, direction);
        for raw in &self.then {
            let (key, direction) = match raw.split_once(':') {
                Some((key, direction)) => (
                    key.parse::<SortKey>()?,
                    direction.parse::<SortDirection>()?,
                ),
                None => (raw.parse::<SortKey>()?, SortDirection::Asc),
            };
            spec = spec.then(key, direction);
        }
        Ok(spec)
    }
}

/// Parse a CLI date. Date-only upper bounds cover the whole day.
pub(crate) fn parse_date(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let parsed = parse_timestamp(raw)
        .ok_or_else(|| Error::validation("due_date", format!("malformed date '{raw}'")))?;
    let date_only = !raw.contains('T') && raw.trim().len() == 10;
    if end_of_day && date_only {
        return Ok(parsed + Duration::days(1) - Duration::seconds(1));
    }
    Ok(parsed)
}

/// Everything a command needs, resolved from flags, environment and config.
pub(crate) struct Context {
    pub data_dir: PathBuf,
    pub config: Config,
    pub actor: String,
    pub locale: Locale,
    pub output: OutputOptions,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self> {
        let data_dir = match &cli.data_dir {
            Some(path) => path.clone(),
            None => std::env::current_dir()?,
        };
        let config_path = data_dir.join(CONFIG_FILE);
        let config = if config_path.exists() {
            Config::load(&config_path)?
        } else {
            Config::default()
        };
        let actor = crate::actor::resolve_actor(Some(data_dir.as_path()), cli.actor.as_deref())?.0;
        let locale = match &cli.locale {
            Some(raw) => raw.parse()?,
            None => config.board.locale,
        };
        Ok(Self {
            data_dir,
            config,
            actor,
            locale,
            output: OutputOptions {
                json: cli.json,
                quiet: cli.quiet,
            },
        })
    }

    pub(crate) fn taxonomy(&self) -> Result<Taxonomy> {
        self.config.taxonomy()
    }

    pub(crate) fn board_config(&self) -> BoardConfig {
        BoardConfig {
            locale: self.locale,
            ..self.config.board.clone()
        }
    }

    /// Open the store and start a watching session on it.
    pub(crate) async fn session(&self) -> Result<BoardSession<JsonDirStore>> {
        let store = JsonDirStore::open(&self.data_dir, &self.config.store)?;
        let mut session = BoardSession::new(
            store,
            &StaticIdentity(self.actor.clone()),
            self.taxonomy()?,
            &self.board_config(),
        );
        session.start().await?;
        Ok(session)
    }
}

/// Run `future` on a current-thread runtime inside a `LocalSet`.
pub(crate) fn block_on<T>(future: impl Future<Output = Result<T>>) -> Result<T> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    tokio::task::LocalSet::new().block_on(&runtime, future)
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let ctx = Context::load(&self)?;
        match self.command {
            Commands::Board { filter } => block_on(board::run_board(&ctx, &filter)),
            Commands::List { filter } => block_on(board::run_list(&ctx, &filter)),
            Commands::Show { id } => block_on(board::run_show(&ctx, &id)),
            Commands::Watch {
                filter,
                max_updates,
            } => block_on(board::run_watch(&ctx, &filter, max_updates)),
            Commands::Create {
                title,
                description,
                status,
                urgency,
                due,
                assignees,
                customers,
                project,
            } => block_on(task::run_create(
                &ctx,
                task::CreateOptions {
                    title,
                    description,
                    status,
                    urgency,
                    due,
                    assignees,
                    customers,
                    project,
                },
            )),
            Commands::Move { id, status } => block_on(task::run_move(&ctx, &id, &status)),
            Commands::Set { id, field, value } => {
                block_on(task::run_set(&ctx, &id, &field, &value))
            }
            Commands::Delete { id } => block_on(task::run_delete(&ctx, &id)),
            Commands::Comment { id, text } => block_on(task::run_comment(&ctx, &id, &text)),
            Commands::Subtask(cmd) => match cmd {
                SubtaskCommands::Add {
                    id,
                    title,
                    urgency,
                    due,
                } => block_on(task::run_subtask_add(
                    &ctx,
                    &id,
                    &title,
                    urgency.as_deref(),
                    due.as_deref(),
                )),
                SubtaskCommands::Toggle { id, subtask } => {
                    block_on(task::run_subtask_toggle(&ctx, &id, &subtask))
                }
            },
            Commands::Labels => labels::run(&ctx),
            Commands::Actor(cmd) => match cmd {
                ActorCommands::Set { name } => actor::run_set(&ctx, &name),
                ActorCommands::Show => actor::run_show(&ctx),
            },
            Commands::Init { force } => init::run(&ctx, force),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::{CanonicalStatus, CanonicalUrgency};
    use chrono::TimeZone;

    #[test]
    fn filter_args_accept_aliases_and_dates() {
        let args = FilterArgs {
            statuses: vec!["הושלם".to_string(), "open".to_string()],
            urgencies: vec!["urgent".to_string()],
            due_from: Some("2024-05-01".to_string()),
            due_to: Some("2024-05-31".to_string()),
            ..FilterArgs::default()
        };
        let spec = args.filter_spec(&Taxonomy::default()).expect("spec");
        assert!(spec.statuses.contains(&CanonicalStatus::Done));
        assert!(spec.statuses.contains(&CanonicalStatus::Todo));
        assert!(spec.urgencies.contains(&CanonicalUrgency::High));
        let range = spec.due_range.expect("range");
        let last_minute = Utc.with_ymd_and_hms(2024, 5, 31, 23, 59, 0).single().expect("date");
        assert!(range.contains(last_minute));
    }

    #[test]
    fn unknown_status_filter_is_rejected() {
        let args = FilterArgs {
            statuses: vec!["someday".to_string()],
            ..FilterArgs::default()
        };
        let err = args.filter_spec(&Taxonomy::default()).expect_err("unknown");
        assert_eq!(err.field(), Some("status"));
    }

    #[test]
    fn sort_flags_build_multi_key_spec() {
        let args = FilterArgs {
            sort: Some("urgency".to_string()),
            desc: true,
            then: vec!["title".to_string(), "due:desc".to_string()],
            ..FilterArgs::default()
        };
        let spec = args.sort_spec(&BoardConfig::default()).expect("sort");
        assert_eq!(
            spec.keys(),
            &[
                (SortKey::Urgency, SortDirection::Desc),
                (SortKey::Title, SortDirection::Asc),
                (SortKey::DueDate, SortDirection::Desc),
            ]
        );

        let defaults = FilterArgs::default()
            .sort_spec(&BoardConfig::default())
            .expect("sort");
        assert_eq!(defaults.keys(), &[(SortKey::DueDate, SortDirection::Asc)]);
    }

    #[test]
    fn malformed_date_is_a_validation_error() {
        let err = parse_date("next tuesday", false).expect_err("malformed");
        assert_eq!(err.field(), Some("due_date"));
    }
}
