//! Error types for crmboard
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (validation, bad args, unknown task)
//! - 4: Operation failed (store rejected a write, I/O, decoding)

use std::path::PathBuf;
use thiserror::Error;

use crate::store::Collection;

/// Exit codes for the crmboard CLI
pub mod exit_codes {
    pub const USER_ERROR: i32 = 2;
    pub const OPERATION_FAILED: i32 = 4;
}

/// How an error is surfaced to the board.
///
/// Everything that can reach presentation is converted into one of these
/// before it gets there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected locally before any remote call, scoped to a field.
    Validation,
    /// One change feed failed; the others keep running.
    Subscription,
    /// A remote write was rejected; the optimistic change is reverted.
    Dispatch,
    /// A referenced record is missing.
    Resolution,
    /// Configuration, I/O and other ambient failures.
    Internal,
}

/// Main error type for crmboard operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{collection} document not found: {id}")]
    NotFound { collection: Collection, id: String },

    // Operation failures (exit code 4)
    #[error("Subscription to {collection} failed: {message}")]
    Subscription {
        collection: Collection,
        message: String,
    },

    #[error("Update of task {task_id} rejected: {message}")]
    Dispatch { task_id: String, message: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

impl Error {
    /// Shorthand for a field-scoped validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation { .. }
            | Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::NotFound { .. } => exit_codes::USER_ERROR,

            Error::Subscription { .. }
            | Error::Dispatch { .. }
            | Error::Store(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::Watch(_) => exit_codes::OPERATION_FAILED,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation { .. } => ErrorCategory::Validation,
            Error::Subscription { .. } => ErrorCategory::Subscription,
            Error::Dispatch { .. } => ErrorCategory::Dispatch,
            Error::NotFound { .. } => ErrorCategory::Resolution,
            _ => ErrorCategory::Internal,
        }
    }

    /// Field name for validation errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::Validation { field, .. } => Some(field.as_str()),
            _ => None,
        }
    }

    /// Convert a store failure raised while writing `task_id` into a
    /// dispatch error. Validation errors pass through untouched.
    pub fn into_dispatch(self, task_id: &str) -> Self {
        match self {
            Error::Validation { .. } | Error::Dispatch { .. } => self,
            other => Error::Dispatch {
                task_id: task_id.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Structured details for JSON output.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::Validation { field, message } => Some(serde_json::json!({
                "field": field,
                "message": message,
            })),
            Error::NotFound { collection, id } => Some(serde_json::json!({
                "collection": collection.as_str(),
                "id": id,
            })),
            Error::Subscription {
                collection,
                message,
            } => Some(serde_json::json!({
                "collection": collection.as_str(),
                "message": message,
            })),
            Error::Dispatch { task_id, message } => Some(serde_json::json!({
                "task_id": task_id,
                "message": message,
            })),
            Error::InvalidConfig(message) | Error::InvalidArgument(message) => {
                Some(serde_json::json!({ "message": message }))
            }
            _ => None,
        }
    }
}

/// Result type alias for crmboard operations
pub type Result<T> = std::result::Result<T, Error>;
