//! Rollback resolver
//!
//! Pure planning: given a rollback target (a deployment id, a commit sha,
//! or the `previous` keyword), decide whether the orchestrator should
//! restore a snapshot or re-deploy a commit from scratch. No effects here;
//! execution stays in the orchestrator so every plan produces exactly one
//! rollback record.

use crate::error::{QuayError, QuayResult};
use crate::history::HistoryLedger;
use crate::models::{DeploymentRecord, Outcome};
use crate::store::SettingsStore;

/// What the operator asked to roll back to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackTarget {
    /// The previous successful, non-rollback deployment
    Previous,
    /// A deployment id or commit sha, resolved against the ledger
    Reference(String),
}

impl RollbackTarget {
    /// Parse operator input. `previous` and `last` are keywords; anything
    /// else is resolved against the ledger later.
    pub fn parse(input: &str) -> Self {
        match input.trim() {
            "previous" | "last" => RollbackTarget::Previous,
            other => RollbackTarget::Reference(other.to_string()),
        }
    }
}

/// The strategy the orchestrator should execute
#[derive(Debug, Clone)]
pub enum RollbackPlan {
    /// Restore the record's snapshot, falling back to re-deploying its
    /// commit when the snapshot is gone or the restore fails
    Restore { record: DeploymentRecord },
    /// The commit was never recorded; run a full deploy of it
    Redeploy { reference: String },
}

/// Resolves rollback targets against the deployment ledger
#[derive(Debug)]
pub struct RollbackResolver<'a, S: SettingsStore> {
    ledger: &'a HistoryLedger<S>,
}

impl<'a, S: SettingsStore> RollbackResolver<'a, S> {
    pub fn new(ledger: &'a HistoryLedger<S>) -> Self {
        Self { ledger }
    }

    pub fn resolve(&self, target: &RollbackTarget) -> QuayResult<RollbackPlan> {
        match target {
            RollbackTarget::Previous => {
                let record = self.previous_success()?;
                Ok(RollbackPlan::Restore { record })
            }
            RollbackTarget::Reference(reference) => {
                if let Some(record) = self.ledger.find_by_id(reference)? {
                    return Ok(RollbackPlan::Restore { record });
                }
                if let Some(record) = self.ledger.find_by_commit(reference)? {
                    return Ok(RollbackPlan::Restore { record });
                }
                // Unknown to the ledger: a deploy-shaped operation through
                // the full state machine, not a lock-free shortcut.
                Ok(RollbackPlan::Redeploy {
                    reference: reference.clone(),
                })
            }
        }
    }

    /// Second-most-recent successful, non-rollback deployment.
    ///
    /// The most recent one is what the site is (nominally) running now;
    /// rolling back means the one before it.
    fn previous_success(&self) -> QuayResult<DeploymentRecord> {
        self.ledger
            .list(None)?
            .into_iter()
            .filter(|r| r.outcome == Outcome::Success && !r.is_rollback)
            .nth(1)
            .ok_or(QuayError::NoPreviousDeployment)
    }
}
