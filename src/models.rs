//! Core data model for Quay
//!
//! Change sets, snapshots, deployment records, lock payloads, and the
//! transient progress state shared between resumable invocations.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QuayError, QuayResult};

/// What to do with a single file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Present only in the source tree
    Add,
    /// Present in both trees with differing content signature
    Modify,
    /// Present only in the target tree (delete-removed policy enabled)
    Delete,
}

impl ActionKind {
    /// Short verb for logs and error messages.
    pub fn verb(self) -> &'static str {
        match self {
            ActionKind::Add => "add",
            ActionKind::Modify => "modify",
            ActionKind::Delete => "delete",
        }
    }
}

/// A single planned file operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAction {
    /// Site-relative, normalized path
    pub path: PathBuf,
    /// Operation to perform
    pub kind: ActionKind,
    /// Absolute path of the staged source file (Add/Modify only)
    pub source: Option<PathBuf>,
}

/// Ordered collection of file actions for one deployment attempt.
///
/// Produced fresh by the diff engine per attempt and never persisted.
/// Paths are unique and relative; [`ChangeSet::push`] enforces both.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    actions: Vec<FileAction>,
    seen: BTreeSet<PathBuf>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action, rejecting absolute/traversing and duplicate paths.
    pub fn push(&mut self, action: FileAction) -> QuayResult<()> {
        if !is_normalized_relative(&action.path) {
            return Err(QuayError::UnsafePath(action.path));
        }
        if !self.seen.insert(action.path.clone()) {
            return Err(QuayError::DuplicatePath(action.path));
        }
        self.actions.push(action);
        Ok(())
    }

    pub fn actions(&self) -> &[FileAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn adds(&self) -> usize {
        self.count(ActionKind::Add)
    }

    pub fn modifies(&self) -> usize {
        self.count(ActionKind::Modify)
    }

    pub fn deletes(&self) -> usize {
        self.count(ActionKind::Delete)
    }

    fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }

    /// Top-level entries touched by this change set, sorted.
    ///
    /// Used to decide which directories to snapshot before applying.
    pub fn top_level_paths(&self) -> Vec<PathBuf> {
        let mut tops = BTreeSet::new();
        for action in &self.actions {
            if let Some(Component::Normal(first)) = action.path.components().next() {
                tops.insert(PathBuf::from(first));
            }
        }
        tops.into_iter().collect()
    }
}

/// True for a relative path with no `..`/`.`/root/prefix components.
pub fn is_normalized_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// Versions of the environment a snapshot was taken under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteInfo {
    /// Version of the hosted site platform, when known
    pub platform_version: Option<String>,
    /// Version of quay that created the snapshot
    pub tool_version: String,
}

impl SiteInfo {
    pub fn current(platform_version: Option<String>) -> Self {
        Self {
            platform_version,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Metadata for a point-in-time copy of a set of site paths.
///
/// The physical copy lives in its own directory under the snapshot root;
/// `paths` lists exactly what was copied. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub paths: Vec<PathBuf>,
    pub actor: String,
    pub site: SiteInfo,
}

/// Terminal outcome of a deployment or rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
    RolledBack,
}

/// One entry in the deployment ledger.
///
/// Append-only, newest-first. `snapshot_id` is a historical reference; the
/// snapshot it names may have been rotated away since.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub commit: String,
    pub branch: String,
    pub outcome: Outcome,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub is_rollback: bool,
}

/// Status of a resumable multi-step operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

/// Transient progress state for chunked application.
///
/// Persisted in the settings store between invocations so a cron tick or
/// explicit `resume` can pick the operation back up. Reporting state only:
/// a resumed run re-diffs rather than trusting the stored cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub current_step: usize,
    pub total_steps: usize,
    pub status: StepStatus,
    pub detail: String,
    /// The ref the in-flight deployment is applying
    pub target_ref: String,
    /// Pre-deploy snapshot backing restore-on-failure across invocations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    /// Who started the operation
    #[serde(default)]
    pub actor: String,
    /// Whether the finished run should be recorded as a rollback
    #[serde(default)]
    pub is_rollback: bool,
}

impl SyncProgress {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, StepStatus::Complete | StepStatus::Failed)
    }
}

/// Lock payload stored under the lock key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl_secs: i64,
}

impl LockInfo {
    /// A lock past its TTL is stale and may be reclaimed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.acquired_at).num_seconds() > self.ttl_secs
    }
}

/// Time-ordered identifier with a random suffix, e.g. `20250811143022-9f3a1c`.
///
/// Lexicographic order matches creation order at second granularity; the
/// suffix disambiguates snapshots created within the same second.
pub fn generate_id(now: DateTime<Utc>) -> String {
    use rand::Rng;
    let suffix: u32 = rand::thread_rng().gen_range(0..0xff_ffff);
    format!("{}-{:06x}", now.format("%Y%m%d%H%M%S"), suffix)
}
