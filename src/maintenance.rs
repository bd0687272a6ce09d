//! Maintenance-mode port
//!
//! The site-wide maintenance signal is an external, idempotent toggle. The
//! orchestrator enables it for the duration of an apply and disables it in
//! the guaranteed-cleanup path.

use crate::error::QuayResult;
use crate::store::SettingsStore;

/// Store key holding the maintenance flag
pub const MAINTENANCE_KEY: &str = "site:maintenance";

/// Idempotent site-wide maintenance toggle
pub trait MaintenanceSwitch {
    fn enable(&self) -> QuayResult<()>;
    fn disable(&self) -> QuayResult<()>;
    fn is_enabled(&self) -> QuayResult<bool>;
}

/// Maintenance flag kept in the settings store
#[derive(Debug, Clone)]
pub struct StoreMaintenance<S: SettingsStore> {
    store: S,
}

impl<S: SettingsStore> StoreMaintenance<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: SettingsStore> MaintenanceSwitch for StoreMaintenance<S> {
    fn enable(&self) -> QuayResult<()> {
        self.store.set(MAINTENANCE_KEY, "1")
    }

    fn disable(&self) -> QuayResult<()> {
        self.store.delete(MAINTENANCE_KEY)
    }

    fn is_enabled(&self) -> QuayResult<bool> {
        Ok(self.store.get(MAINTENANCE_KEY)?.is_some())
    }
}

/// Disabled maintenance handling (sites that manage their own banner)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMaintenance;

impl MaintenanceSwitch for NoopMaintenance {
    fn enable(&self) -> QuayResult<()> {
        Ok(())
    }

    fn disable(&self) -> QuayResult<()> {
        Ok(())
    }

    fn is_enabled(&self) -> QuayResult<bool> {
        Ok(false)
    }
}
