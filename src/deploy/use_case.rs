//! Deploy use case
//!
//! Orchestrates the deployment state machine:
//! `Idle → Locked → Snapshotting → Applying → (Succeeded | Failed) → Idle`.
//!
//! Errors before any site mutation (lock busy, mirror unreachable, snapshot
//! failure) abort the attempt without a history record. Once the apply has
//! started, the run always terminates in a record (`Success`, `Failed`, or
//! `RolledBack` when the automatic snapshot restore recovered the tree)
//! and the cleanup path (maintenance off, lock released) runs regardless of
//! how the run ended. The one exception is a suspension at a chunk
//! boundary, which deliberately keeps the lock and maintenance mode for the
//! invocation that resumes the run.

use std::path::PathBuf;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::diff::{DiffEngine, DiffOptions, FileTree, IgnorePatterns};
use crate::error::{QuayError, QuayResult};
use crate::fs::FileSystem;
use crate::history::HistoryLedger;
use crate::lock::{DeployLock, LockHandle};
use crate::maintenance::MaintenanceSwitch;
use crate::models::{
    generate_id, ActionKind, DeploymentRecord, FileAction, LockInfo, Outcome, SiteInfo,
    Snapshot, StepStatus, SyncProgress,
};
use crate::repo::RepoClient;
use crate::rollback::{RollbackPlan, RollbackResolver, RollbackTarget};
use crate::snapshot::SnapshotStore;
use crate::store::{get_json, set_json, SettingsStore};

use super::options::DeployOptions;
use super::result::{DeployOutcome, DeployPlan, DeployStatus};

/// Store key holding the serialized [`SyncProgress`]
pub const PROGRESS_KEY: &str = "deploy:progress";

/// Store key holding the sha of the last successfully deployed commit
pub const LAST_COMMIT_KEY: &str = "deploy:last_commit";

/// The deployment orchestrator.
///
/// Owns the lock lifecycle and is the only writer of deployment records and
/// progress state. All collaborators arrive through construction; nothing
/// here reaches for globals.
pub struct Orchestrator<S, F, R, M>
where
    S: SettingsStore + Clone,
    F: FileSystem + Clone,
    R: RepoClient,
    M: MaintenanceSwitch,
{
    config: Config,
    store: S,
    fs: F,
    repo: R,
    maintenance: M,
    lock: DeployLock<S>,
    ledger: HistoryLedger<S>,
    snapshots: SnapshotStore<F>,
    differ: DiffEngine,
}

impl<S, F, R, M> Orchestrator<S, F, R, M>
where
    S: SettingsStore + Clone,
    F: FileSystem + Clone,
    R: RepoClient,
    M: MaintenanceSwitch,
{
    pub fn new(config: Config, store: S, fs: F, repo: R, maintenance: M) -> Self {
        let lock = DeployLock::new(store.clone());
        let ledger = HistoryLedger::new(store.clone(), config.history.max_entries);
        let snapshots = SnapshotStore::new(
            fs.clone(),
            config.snapshot_root(),
            config.site_root.clone(),
        );
        Self {
            config,
            store,
            fs,
            repo,
            maintenance,
            lock,
            ledger,
            snapshots,
            differ: DiffEngine::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Absolute path of a site-relative file.
    pub fn site_path(&self, rel: &std::path::Path) -> PathBuf {
        self.config.site_root.join(rel)
    }

    pub fn ledger(&self) -> &HistoryLedger<S> {
        &self.ledger
    }

    pub fn snapshots(&self) -> &SnapshotStore<F> {
        &self.snapshots
    }

    /// Newest-first deployment records.
    pub fn list_deployments(&self, limit: Option<usize>) -> QuayResult<Vec<DeploymentRecord>> {
        self.ledger.list(limit)
    }

    /// Newest-first snapshots.
    pub fn list_snapshots(&self) -> QuayResult<Vec<Snapshot>> {
        self.snapshots.list()
    }

    /// Progress of the in-flight (or most recent) multi-step operation.
    pub fn progress(&self) -> QuayResult<Option<SyncProgress>> {
        get_json(&self.store, PROGRESS_KEY)
    }

    /// Whether a deployment currently holds the lock.
    pub fn is_locked(&self) -> QuayResult<bool> {
        self.lock.is_held()
    }

    /// Operator escape hatch; the abandoned run's work is re-verified by
    /// the next deployment's re-diff.
    pub fn force_unlock(&self) -> QuayResult<Option<LockInfo>> {
        let cleared = self.lock.force_clear()?;
        if let Some(info) = &cleared {
            warn!(holder = %info.holder, "deployment lock force-cleared");
        }
        Ok(cleared)
    }

    /// Compute what `deploy` would do, without mutating the site.
    pub fn plan(&self, reference: &str) -> QuayResult<DeployPlan> {
        if !crate::models::is_normalized_relative(std::path::Path::new(reference)) {
            return Err(QuayError::Remote(format!("invalid ref '{}'", reference)));
        }

        let staging = self.config.staging_root().join(reference);
        self.repo.download_archive(reference, &staging)?;
        let commit = self.repo.get_commit(reference)?;

        let ignore = IgnorePatterns::from_patterns(&self.config.deploy.ignore)?;
        let source = FileTree::scan(&self.fs, &staging, &ignore)?;
        let target = FileTree::scan(&self.fs, &self.config.site_root, &ignore)?;
        let change_set = self.differ.compute(
            &self.fs,
            &source,
            &target,
            DiffOptions {
                policy: self.config.deploy.compare,
                delete_removed: self.config.deploy.delete_removed,
            },
        )?;

        Ok(DeployPlan { commit, change_set })
    }

    /// Run one deployment invocation for a ref.
    ///
    /// Fails fast with [`QuayError::Busy`] under contention; retrying is
    /// the trigger's decision, never ours.
    pub fn deploy(&self, options: &DeployOptions) -> QuayResult<DeployOutcome> {
        let mut handle = self
            .lock
            .try_acquire(&options.actor, self.config.deploy.lock_ttl_secs)?;
        if let Some(stale) = handle.reclaimed() {
            warn!(
                holder = %stale.holder,
                ttl_secs = stale.ttl_secs,
                "reclaimed stale deployment lock"
            );
        }
        info!(
            target_ref = %options.target_ref,
            actor = %options.actor,
            rollback = options.is_rollback,
            "deployment started"
        );

        let result = self.run_locked(
            &mut handle,
            &options.target_ref,
            &options.actor,
            options.is_rollback,
            None,
        );
        self.finish(handle, result)
    }

    /// Continue a suspended run, if one exists.
    ///
    /// Never trusts the stored cursor: the change set is recomputed and the
    /// next bounded chunk applied, so work done before a crash or forced
    /// unlock drops out naturally.
    pub fn resume(&self) -> QuayResult<Option<DeployOutcome>> {
        let progress = match self.progress()? {
            Some(p) if p.status == StepStatus::Running => p,
            _ => return Ok(None),
        };

        let mut handle = match self.lock.adopt_current()? {
            // Adopt only our own lock. A live lock under another holder
            // means a different run started after ours was force-cleared.
            Some(handle) if handle.holder() == progress.actor => handle,
            Some(other) => {
                return Err(QuayError::Busy {
                    holder: other.info().holder.clone(),
                    held_secs: Utc::now()
                        .signed_duration_since(other.info().acquired_at)
                        .num_seconds(),
                });
            }
            None => {
                // Lock expired or was force-cleared mid-run; take a fresh
                // one and let the re-diff establish what is left to do.
                warn!(
                    target_ref = %progress.target_ref,
                    "resuming without the original lock"
                );
                self.lock
                    .try_acquire(&progress.actor, self.config.deploy.lock_ttl_secs)?
            }
        };
        self.lock.refresh(&mut handle)?;
        info!(
            target_ref = %progress.target_ref,
            step = progress.current_step + 1,
            "resuming deployment"
        );

        let target_ref = progress.target_ref.clone();
        let actor = progress.actor.clone();
        let is_rollback = progress.is_rollback;
        let result = self.run_locked(&mut handle, &target_ref, &actor, is_rollback, Some(&progress));
        self.finish(handle, result).map(Some)
    }

    /// Scheduled-check trigger: finish any suspended run, then deploy the
    /// configured branch when its head moved past the last deployed commit.
    pub fn check(&self, actor: &str) -> QuayResult<Option<DeployOutcome>> {
        if let Some(outcome) = self.resume()? {
            return Ok(Some(outcome));
        }

        let branch = self.config.deploy.branch.clone();
        let commit = self.repo.get_commit(&branch)?;
        if self.store.get(LAST_COMMIT_KEY)?.as_deref() == Some(commit.sha.as_str()) {
            info!(%branch, commit = %commit.sha, "site is up to date");
            return Ok(None);
        }

        self.deploy(&DeployOptions::new(branch).with_actor(actor))
            .map(Some)
    }

    /// Roll back to a prior recorded state.
    pub fn rollback(&self, target: &RollbackTarget, actor: &str) -> QuayResult<DeployOutcome> {
        let resolver = RollbackResolver::new(&self.ledger);
        match resolver.resolve(target)? {
            RollbackPlan::Redeploy { reference } => {
                info!(%reference, "rolling back via full re-deploy");
                self.deploy(
                    &DeployOptions::new(reference)
                        .with_actor(actor)
                        .as_rollback(),
                )
            }
            RollbackPlan::Restore { record } => {
                let mut handle = self
                    .lock
                    .try_acquire(actor, self.config.deploy.lock_ttl_secs)?;
                if let Some(stale) = handle.reclaimed() {
                    warn!(holder = %stale.holder, "reclaimed stale deployment lock");
                }
                info!(deployment = %record.id, "rolling back to recorded deployment");
                let result = self.run_restore(&mut handle, &record, actor);
                self.finish(handle, result)
            }
        }
    }

    /// Restore a snapshot directly, outside any ledger lookup.
    pub fn restore_snapshot(&self, snapshot_id: &str, actor: &str) -> QuayResult<DeployOutcome> {
        let snapshot = self
            .snapshots
            .find(snapshot_id)?
            .ok_or_else(|| QuayError::NotFound(format!("snapshot '{}'", snapshot_id)))?;

        let mut handle = self
            .lock
            .try_acquire(actor, self.config.deploy.lock_ttl_secs)?;
        if let Some(stale) = handle.reclaimed() {
            warn!(holder = %stale.holder, "reclaimed stale deployment lock");
        }

        let result: QuayResult<DeployOutcome> = (|| {
            let safety_id = self.safety_snapshot(&snapshot.paths, actor)?;
            self.enable_maintenance()?;

            let (outcome, message) = match self.snapshots.restore(&snapshot.id, None) {
                Ok(()) => (
                    Outcome::Success,
                    format!("restored snapshot {}", snapshot.id),
                ),
                Err(e) => {
                    error!(snapshot = %snapshot.id, error = %e, "snapshot restore failed");
                    (Outcome::Failed, format!("restore failed: {}", e))
                }
            };
            let record =
                self.write_record(actor, "", "", outcome, &message, safety_id.clone(), true)?;
            Ok(DeployOutcome {
                status: DeployStatus::Completed,
                message,
                record: Some(record),
                progress: None,
                applied: 0,
                remaining: 0,
                snapshot_id: safety_id,
            })
        })();
        self.finish(handle, result)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Terminal bookkeeping shared by every locked entry point.
    ///
    /// A suspended outcome keeps lock and maintenance for the resuming
    /// invocation; every other exit (success, failure, or error) runs the
    /// unconditional cleanup. Leaking either is a correctness bug.
    fn finish(
        &self,
        handle: LockHandle,
        result: QuayResult<DeployOutcome>,
    ) -> QuayResult<DeployOutcome> {
        if matches!(&result, Ok(outcome) if outcome.is_suspended()) {
            return result;
        }
        if let Err(e) = self.maintenance.disable() {
            error!(error = %e, "failed to disable maintenance mode");
        }
        if let Err(e) = self.lock.release(&handle) {
            error!(error = %e, "failed to release deployment lock");
        }
        result
    }

    fn run_locked(
        &self,
        handle: &mut LockHandle,
        reference: &str,
        actor: &str,
        is_rollback: bool,
        existing: Option<&SyncProgress>,
    ) -> QuayResult<DeployOutcome> {
        let plan = self.plan(reference)?;
        let change_set = &plan.change_set;
        let total = change_set.len();
        let step = existing.map(|p| p.current_step).unwrap_or(0) + 1;

        if change_set.is_empty() {
            let message = if existing.is_some() {
                format!("deployment of {} complete", plan.commit.sha)
            } else {
                format!("already up to date at {}", plan.commit.sha)
            };
            self.persist_progress(SyncProgress {
                current_step: step,
                total_steps: step,
                status: StepStatus::Complete,
                detail: message.clone(),
                target_ref: reference.to_string(),
                snapshot_id: existing.and_then(|p| p.snapshot_id.clone()),
                actor: actor.to_string(),
                is_rollback,
            })?;
            let record = self.write_record(
                actor,
                &plan.commit.sha,
                reference,
                Outcome::Success,
                &message,
                existing.and_then(|p| p.snapshot_id.clone()),
                is_rollback,
            )?;
            self.store.set(LAST_COMMIT_KEY, &plan.commit.sha)?;
            info!(commit = %plan.commit.sha, "{}", message);
            return Ok(DeployOutcome {
                status: DeployStatus::Completed,
                message,
                record: Some(record),
                progress: None,
                applied: 0,
                remaining: 0,
                snapshot_id: None,
            });
        }

        // Snapshot before any mutation. A resumed run reuses the snapshot
        // taken when the run started.
        let snapshot_id = match existing.and_then(|p| p.snapshot_id.clone()) {
            Some(id) => Some(id),
            None => self.pre_deploy_snapshot(change_set, actor)?,
        };

        self.enable_maintenance()?;

        let chunk = self.config.deploy.chunk_size.max(1);
        let batch = &change_set.actions()[..total.min(chunk)];
        let mut applied = 0usize;
        let mut apply_error: Option<QuayError> = None;
        for action in batch {
            match self.apply_action(action) {
                Ok(()) => applied += 1,
                Err(e) => {
                    apply_error = Some(e);
                    break;
                }
            }
        }

        if let Some(apply_error) = apply_error {
            return self.handle_apply_failure(
                reference,
                actor,
                is_rollback,
                &plan,
                snapshot_id,
                step,
                applied,
                apply_error,
            );
        }

        let remaining = total - applied;
        if remaining > 0 {
            let total_steps = step + remaining.div_ceil(chunk);
            let progress = SyncProgress {
                current_step: step,
                total_steps,
                status: StepStatus::Running,
                detail: format!("applied {} of {} actions", applied, total),
                target_ref: reference.to_string(),
                snapshot_id: snapshot_id.clone(),
                actor: actor.to_string(),
                is_rollback,
            };
            self.persist_progress(progress.clone())?;
            self.lock.refresh(handle)?;
            info!(applied, remaining, "deployment suspended at chunk boundary");
            return Ok(DeployOutcome {
                status: DeployStatus::Suspended,
                message: format!(
                    "applied {} of {} actions; run again to continue",
                    applied, total
                ),
                record: None,
                progress: Some(progress),
                applied,
                remaining,
                snapshot_id,
            });
        }

        let message = format!(
            "deployed {} ({} added, {} modified, {} deleted)",
            plan.commit.sha,
            change_set.adds(),
            change_set.modifies(),
            change_set.deletes()
        );
        self.persist_progress(SyncProgress {
            current_step: step,
            total_steps: step,
            status: StepStatus::Complete,
            detail: message.clone(),
            target_ref: reference.to_string(),
            snapshot_id: snapshot_id.clone(),
            actor: actor.to_string(),
            is_rollback,
        })?;
        let record = self.write_record(
            actor,
            &plan.commit.sha,
            reference,
            Outcome::Success,
            &message,
            snapshot_id.clone(),
            is_rollback,
        )?;
        self.store.set(LAST_COMMIT_KEY, &plan.commit.sha)?;
        info!(commit = %plan.commit.sha, applied, "deployment succeeded");

        Ok(DeployOutcome {
            status: DeployStatus::Completed,
            message,
            record: Some(record),
            progress: None,
            applied,
            remaining: 0,
            snapshot_id,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_apply_failure(
        &self,
        reference: &str,
        actor: &str,
        is_rollback: bool,
        plan: &DeployPlan,
        snapshot_id: Option<String>,
        step: usize,
        applied: usize,
        apply_error: QuayError,
    ) -> QuayResult<DeployOutcome> {
        error!(error = %apply_error, applied, "apply failed; attempting restore");

        let (outcome, message) = match &snapshot_id {
            Some(id) => match self.snapshots.restore(id, None) {
                Ok(()) => (
                    Outcome::RolledBack,
                    format!(
                        "deployment failed ({}); site restored from snapshot {}",
                        apply_error, id
                    ),
                ),
                Err(restore_error) => {
                    error!(error = %restore_error, "automatic restore failed");
                    (
                        Outcome::Failed,
                        format!(
                            "deployment failed ({}); restore also failed: {}",
                            apply_error, restore_error
                        ),
                    )
                }
            },
            None => (
                Outcome::Failed,
                format!("deployment failed: {}", apply_error),
            ),
        };

        self.persist_progress(SyncProgress {
            current_step: step,
            total_steps: step,
            status: StepStatus::Failed,
            detail: message.clone(),
            target_ref: reference.to_string(),
            snapshot_id: snapshot_id.clone(),
            actor: actor.to_string(),
            is_rollback,
        })?;
        let record = self.write_record(
            actor,
            &plan.commit.sha,
            reference,
            outcome,
            &message,
            snapshot_id.clone(),
            is_rollback,
        )?;

        Ok(DeployOutcome {
            status: DeployStatus::Completed,
            message,
            record: Some(record),
            progress: None,
            applied,
            remaining: plan.change_set.len() - applied,
            snapshot_id,
        })
    }

    /// Rollback via the snapshot referenced by a ledger record, falling
    /// back to re-deploying its commit when the snapshot is gone or the
    /// restore fails.
    fn run_restore(
        &self,
        handle: &mut LockHandle,
        record: &DeploymentRecord,
        actor: &str,
    ) -> QuayResult<DeployOutcome> {
        let snapshot = match record
            .snapshot_id
            .as_deref()
            .map(|id| self.snapshots.find(id))
            .transpose()?
            .flatten()
        {
            Some(snapshot) => snapshot,
            None => {
                warn!(
                    deployment = %record.id,
                    "no usable snapshot; falling back to re-deploy"
                );
                return self.redeploy_fallback(handle, record, actor, None);
            }
        };

        let safety_id = self.safety_snapshot(&snapshot.paths, actor)?;
        self.enable_maintenance()?;

        match self.snapshots.restore(&snapshot.id, None) {
            Ok(()) => {
                let message = format!(
                    "restored snapshot {} (deployment {})",
                    snapshot.id, record.id
                );
                let history_record = self.write_record(
                    actor,
                    &record.commit,
                    &record.branch,
                    Outcome::Success,
                    &message,
                    safety_id.clone(),
                    true,
                )?;
                self.store.set(LAST_COMMIT_KEY, &record.commit)?;
                info!(snapshot = %snapshot.id, "rollback restored snapshot");
                Ok(DeployOutcome {
                    status: DeployStatus::Completed,
                    message,
                    record: Some(history_record),
                    progress: None,
                    applied: 0,
                    remaining: 0,
                    snapshot_id: safety_id,
                })
            }
            Err(restore_error) => {
                warn!(error = %restore_error, "restore failed; falling back to re-deploy");
                self.redeploy_fallback(handle, record, actor, Some(restore_error))
            }
        }
    }

    fn redeploy_fallback(
        &self,
        handle: &mut LockHandle,
        record: &DeploymentRecord,
        actor: &str,
        restore_error: Option<QuayError>,
    ) -> QuayResult<DeployOutcome> {
        match self.run_locked(handle, &record.commit, actor, true, None) {
            Ok(outcome) => Ok(outcome),
            Err(deploy_error) => {
                // The plan was executed; it must still leave a record.
                let message = match restore_error {
                    Some(restore_error) => format!(
                        "rollback failed: restore failed ({}), re-deploy failed ({})",
                        restore_error, deploy_error
                    ),
                    None => format!("rollback failed: re-deploy failed ({})", deploy_error),
                };
                error!("{}", message);
                let history_record = self.write_record(
                    actor,
                    &record.commit,
                    &record.branch,
                    Outcome::Failed,
                    &message,
                    None,
                    true,
                )?;
                Ok(DeployOutcome {
                    status: DeployStatus::Completed,
                    message,
                    record: Some(history_record),
                    progress: None,
                    applied: 0,
                    remaining: 0,
                    snapshot_id: None,
                })
            }
        }
    }

    /// Snapshot the paths a change set will touch.
    ///
    /// Returns `None` for a pure-add deployment into an empty tree: there
    /// is nothing to protect, and aborting a first sync over it would be
    /// wrong.
    fn pre_deploy_snapshot(
        &self,
        change_set: &crate::models::ChangeSet,
        actor: &str,
    ) -> QuayResult<Option<String>> {
        let candidates = if self.config.deploy.snapshot_paths.is_empty() {
            change_set.top_level_paths()
        } else {
            self.config.deploy.snapshot_paths.clone()
        };
        self.safety_snapshot(&candidates, actor)
    }

    fn safety_snapshot(&self, candidates: &[PathBuf], actor: &str) -> QuayResult<Option<String>> {
        let existing: Vec<PathBuf> = candidates
            .iter()
            .filter(|rel| self.fs.exists(&self.config.site_root.join(rel)))
            .cloned()
            .collect();
        if existing.is_empty() {
            info!("nothing to snapshot (no affected paths exist yet)");
            return Ok(None);
        }

        let outcome = self.snapshots.create(
            &existing,
            actor,
            SiteInfo::current(self.config.site.platform_version.clone()),
        )?;
        for skipped in &outcome.skipped {
            warn!(path = %skipped.display(), "snapshot skipped missing path");
        }
        for rotated in self.snapshots.rotate(self.config.snapshots.max_keep)? {
            info!(snapshot = %rotated, "rotated out old snapshot");
        }
        info!(snapshot = %outcome.snapshot.id, paths = outcome.snapshot.paths.len(), "snapshot created");
        Ok(Some(outcome.snapshot.id))
    }

    fn enable_maintenance(&self) -> QuayResult<()> {
        if self.config.deploy.maintenance_mode {
            self.maintenance.enable()?;
        }
        Ok(())
    }

    fn apply_action(&self, action: &FileAction) -> QuayResult<()> {
        let live = self.config.site_root.join(&action.path);
        match action.kind {
            ActionKind::Add | ActionKind::Modify => {
                let source = action.source.as_ref().ok_or_else(|| QuayError::ApplyFailed {
                    action: action.kind.verb(),
                    path: action.path.clone(),
                    message: "missing staged source".to_string(),
                })?;
                self.fs
                    .copy_file(source, &live)
                    .map_err(|e| QuayError::ApplyFailed {
                        action: action.kind.verb(),
                        path: action.path.clone(),
                        message: e.to_string(),
                    })
            }
            ActionKind::Delete => {
                self.fs
                    .remove_recursive(&live)
                    .map_err(|e| QuayError::ApplyFailed {
                        action: action.kind.verb(),
                        path: action.path.clone(),
                        message: e.to_string(),
                    })
            }
        }
    }

    fn persist_progress(&self, progress: SyncProgress) -> QuayResult<()> {
        set_json(&self.store, PROGRESS_KEY, &progress)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_record(
        &self,
        actor: &str,
        commit: &str,
        branch: &str,
        outcome: Outcome,
        message: &str,
        snapshot_id: Option<String>,
        is_rollback: bool,
    ) -> QuayResult<DeploymentRecord> {
        let record = DeploymentRecord {
            id: generate_id(Utc::now()),
            timestamp: Utc::now(),
            actor: actor.to_string(),
            commit: commit.to_string(),
            branch: branch.to_string(),
            outcome,
            message: message.to_string(),
            snapshot_id,
            is_rollback,
        };
        self.ledger.append(record.clone())?;
        Ok(record)
    }
}
