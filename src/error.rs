//! Error types for Quay
//!
//! Uses `thiserror` for library errors. The orchestrator is the only layer
//! that logs; everything below it returns these variants untouched.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Quay operations
pub type QuayResult<T> = Result<T, QuayError>;

/// Main error type for Quay operations
#[derive(Error, Debug)]
pub enum QuayError {
    /// Another deployment holds the lock. Transient; the caller may retry
    /// later. Never retried internally.
    #[error("deployment already in progress (held by '{holder}' for {held_secs}s)")]
    Busy { holder: String, held_secs: i64 },

    /// Pre-deploy snapshot could not be created
    #[error("snapshot failed: {0}")]
    SnapshotFailed(String),

    /// Restoring from a snapshot failed partway
    #[error("restore from snapshot '{snapshot_id}' failed: {message}")]
    RestoreFailed {
        snapshot_id: String,
        message: String,
    },

    /// Remote repository API problem
    #[error("remote repository error: {0}")]
    Remote(String),

    /// A file action failed mid-application
    #[error("failed to apply {action} for '{path}': {message}")]
    ApplyFailed {
        action: &'static str,
        path: PathBuf,
        message: String,
    },

    /// Unknown deployment id, commit, or snapshot - caller-input error
    #[error("not found: {0}")]
    NotFound(String),

    /// No eligible previous deployment to roll back to
    #[error("no previous successful deployment to roll back to")]
    NoPreviousDeployment,

    /// Settings store read/write problem
    #[error("settings store error: {0}")]
    Store(String),

    /// Webhook signature missing, malformed, or wrong
    #[error("webhook signature rejected: {0}")]
    InvalidSignature(String),

    /// Configuration file problem
    #[error("invalid configuration in {file}: {message}")]
    Config { file: PathBuf, message: String },

    /// Ignore pattern could not be parsed
    #[error("invalid ignore pattern: {0}")]
    InvalidPattern(String),

    /// A change-set path is absolute or escapes the site root
    #[error("path '{0}' is not a normalized relative path")]
    UnsafePath(PathBuf),

    /// The same path appeared twice in one change set
    #[error("duplicate path '{0}' in change set")]
    DuplicatePath(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
