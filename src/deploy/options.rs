//! Deploy options
//!
//! Per-run parameters for the orchestrator.

/// Options for one deployment run
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Ref to deploy: branch name, tag, or commit sha known to the mirror
    pub target_ref: String,
    /// Who initiated the run (recorded in snapshots and history)
    pub actor: String,
    /// Record the finished run as a rollback (set by the rollback path)
    pub is_rollback: bool,
}

impl DeployOptions {
    pub fn new(target_ref: impl Into<String>) -> Self {
        Self {
            target_ref: target_ref.into(),
            actor: "cli".to_string(),
            is_rollback: false,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn as_rollback(mut self) -> Self {
        self.is_rollback = true;
        self
    }
}
