//! Deployment history ledger
//!
//! Append-only, newest-first, size-bounded record of deployments and
//! rollbacks, persisted as one JSON document in the settings store. Lookups
//! are linear scans over a bounded list.

use crate::error::QuayResult;
use crate::models::DeploymentRecord;
use crate::store::{get_json, set_json, SettingsStore};

/// Store key holding the serialized record list
pub const HISTORY_KEY: &str = "deploy:history";

/// Default maximum number of retained records
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Bounded ledger of deployment outcomes
#[derive(Debug, Clone)]
pub struct HistoryLedger<S: SettingsStore> {
    store: S,
    max_entries: usize,
}

impl<S: SettingsStore> HistoryLedger<S> {
    pub fn new(store: S, max_entries: usize) -> Self {
        Self {
            store,
            max_entries: max_entries.max(1),
        }
    }

    /// Prepend a record, dropping the oldest entries beyond the bound.
    pub fn append(&self, record: DeploymentRecord) -> QuayResult<()> {
        let mut records = self.load()?;
        records.insert(0, record);
        records.truncate(self.max_entries);
        set_json(&self.store, HISTORY_KEY, &records)
    }

    /// Find a record by deployment id.
    pub fn find_by_id(&self, id: &str) -> QuayResult<Option<DeploymentRecord>> {
        Ok(self.load()?.into_iter().find(|r| r.id == id))
    }

    /// Find the newest record for a commit.
    pub fn find_by_commit(&self, commit: &str) -> QuayResult<Option<DeploymentRecord>> {
        Ok(self.load()?.into_iter().find(|r| r.commit == commit))
    }

    /// Newest-first records, truncated to `limit` when given.
    pub fn list(&self, limit: Option<usize>) -> QuayResult<Vec<DeploymentRecord>> {
        let mut records = self.load()?;
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    fn load(&self) -> QuayResult<Vec<DeploymentRecord>> {
        Ok(get_json(&self.store, HISTORY_KEY)?.unwrap_or_default())
    }
}
