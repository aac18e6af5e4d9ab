//! Typed error hierarchy for dealflow.
//!
//! Three top-level enums cover the three layers:
//! - `PipelineError`: stage bookkeeping the store refuses to do
//! - `StorageError`: persistence backend failures
//! - `WorkspaceError`: command validation at the session boundary
//!
//! The store treats unknown deal, stage and note ids as silent no-ops; only
//! the workspace reports them, as `WorkspaceError::NotFound`.

use thiserror::Error;

/// Errors from the pipeline store.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Stage '{id}' does not exist")]
    UnknownStage { id: String },

    #[error("Cannot reassign deals from stage '{id}' to itself")]
    SelfReassignment { id: String },
}

/// Errors from a persistence backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to serialize '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Stored state under '{key}' could not be read: {reason}")]
    Unavailable { key: String, reason: String },
}

/// Errors surfaced by `Workspace` commands.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Deal {id} is {status} and must be reopened first")]
    InvalidTransition { id: String, status: String },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
