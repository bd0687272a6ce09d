//! Quay - deployment and rollback orchestration for site trees
//!
//! Quay keeps a live site's file tree in sync with a source-control mirror:
//! it diffs the remote tree against the site, snapshots what a deployment
//! will touch, applies the change set under a TTL lock (in resumable chunks
//! for large trees), records every outcome in a bounded ledger, and can roll
//! back to any recorded state by snapshot restore or re-deploy.

pub mod config;
pub mod deploy;
pub mod diff;
pub mod error;
pub mod fs;
pub mod history;
pub mod lock;
pub mod maintenance;
pub mod models;
pub mod repo;
pub mod rollback;
pub mod snapshot;
pub mod store;
pub mod webhook;

// Re-exports for convenience
pub use config::Config;
pub use deploy::{DeployOptions, DeployOutcome, DeployPlan, DeployStatus, Orchestrator};
pub use diff::{ComparePolicy, DiffEngine, DiffOptions, FileTree, IgnorePatterns};
pub use error::{QuayError, QuayResult};
pub use history::HistoryLedger;
pub use lock::DeployLock;
pub use models::{
    ActionKind, ChangeSet, DeploymentRecord, FileAction, Outcome, Snapshot, StepStatus,
    SyncProgress,
};
pub use repo::{CommitInfo, DirRepo, RepoClient};
pub use rollback::{RollbackPlan, RollbackResolver, RollbackTarget};
pub use snapshot::SnapshotStore;
pub use store::{JsonFileStore, MemoryStore, SettingsStore};
