//! Deploy result types
//!
//! Errors *before* any mutation (lock contention, unreachable mirror,
//! snapshot failure) surface as `Err(QuayError)`. Once the apply has
//! started, the run always resolves to a [`DeployOutcome`] whose record
//! carries the true terminal state, including `Failed` and `RolledBack`.

use crate::models::{ChangeSet, DeploymentRecord, Outcome, SyncProgress};
use crate::repo::CommitInfo;

/// How a run ended, from the trigger's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStatus {
    /// Terminal: a history record was written (unless the attempt was
    /// skipped before any mutation)
    Completed,
    /// Chunk boundary reached; the lock is still held and a later
    /// invocation resumes the run
    Suspended,
}

/// What one orchestrator invocation did
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub status: DeployStatus,
    /// Terminal message suitable for direct display
    pub message: String,
    /// History record written by this invocation, if it reached a terminal
    /// state
    pub record: Option<DeploymentRecord>,
    /// Progress state for a suspended run
    pub progress: Option<SyncProgress>,
    /// Actions applied by this invocation
    pub applied: usize,
    /// Actions left for later invocations
    pub remaining: usize,
    /// Pre-deploy snapshot backing this run
    pub snapshot_id: Option<String>,
}

impl DeployOutcome {
    /// True when the run is finished and did not end in `Failed`.
    pub fn is_success(&self) -> bool {
        self.status == DeployStatus::Completed
            && self
                .record
                .as_ref()
                .map(|r| r.outcome != Outcome::Failed)
                .unwrap_or(true)
    }

    /// True while more invocations are needed.
    pub fn is_suspended(&self) -> bool {
        self.status == DeployStatus::Suspended
    }
}

/// A computed-but-unapplied deployment: what `--dry-run` and `quay diff` show
#[derive(Debug, Clone)]
pub struct DeployPlan {
    pub commit: CommitInfo,
    pub change_set: ChangeSet,
}

impl DeployPlan {
    /// One-line summary, e.g. `3 to add, 1 to modify, 2 to delete`.
    pub fn summary(&self) -> String {
        if self.change_set.is_empty() {
            return "no changes".to_string();
        }
        format!(
            "{} to add, {} to modify, {} to delete",
            self.change_set.adds(),
            self.change_set.modifies(),
            self.change_set.deletes()
        )
    }
}
