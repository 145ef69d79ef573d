//! crmboard - CRM Task Board Library
//!
//! The view-model layer behind a shared CRM task board: it keeps live
//! snapshots of tasks, customers, projects and users, joins them into
//! display-ready records, and applies user edits optimistically.
//!
//! # Core Concepts
//!
//! - **Taxonomy**: stored status/urgency labels (English, Hebrew or legacy
//!   codes) mapped onto canonical values, with unknown labels passed through
//! - **Snapshots**: revisioned, actor-scoped copies of each remote collection
//! - **Resolution**: tasks joined with customers, projects and users, with
//!   missing references kept visible as "not found"
//! - **Pipeline**: filter, stable multi-key sort and grouping into columns
//! - **Overlays**: pending edits layered over the latest snapshot until the
//!   store confirms or rejects them
//!
//! # Module Organization
//!
//! - `taxonomy`: canonical statuses/urgencies and label mapping
//! - `model`: raw document records as stored
//! - `store`: `DocumentStore` trait with in-memory and JSON directory backends
//! - `watcher`: collection subscriptions feeding snapshots
//! - `resolver`: reference resolution into `ResolvedTask`
//! - `pipeline`: filtering, sorting and grouping
//! - `coordinator`: optimistic mutations, overlays and notices
//! - `view`: the board view model tying it all together
//! - `session`: async driver wiring a store to a view model
//! - `config`: configuration loading from `.crmboard.toml`
//! - `actor`: current-user identity
//! - `lock`: file locking and atomic writes for the JSON store
//! - `cli`: command-line interface using clap
//! - `output`: human and JSON output envelopes
//! - `error`: error types and result aliases

pub mod actor;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod resolver;
pub mod session;
pub mod store;
pub mod taxonomy;
pub mod view;
pub mod watcher;

pub use error::{Error, Result};
