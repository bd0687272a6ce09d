//! Deployment lock
//!
//! Cross-invocation mutual exclusion built on the settings store's atomic
//! compare-and-swap. One lock instance exists under a single key; a lock
//! past its TTL is stale and may be reclaimed by the next acquirer, so a
//! crashed worker cannot deadlock deployments forever.

use chrono::Utc;

use crate::error::{QuayError, QuayResult};
use crate::models::LockInfo;
use crate::store::SettingsStore;

/// Store key holding the serialized [`LockInfo`]
pub const LOCK_KEY: &str = "deploy:lock";

/// Proof of a successful acquisition.
///
/// Carries the exact serialized payload so release/refresh can CAS against
/// what this holder wrote, never clobbering a reclaimer.
#[derive(Debug, Clone)]
pub struct LockHandle {
    info: LockInfo,
    raw: String,
    reclaimed: Option<LockInfo>,
}

impl LockHandle {
    pub fn holder(&self) -> &str {
        &self.info.holder
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// The stale lock this acquisition displaced, if any.
    ///
    /// A reclaim is a recoverable anomaly; the orchestrator logs it.
    pub fn reclaimed(&self) -> Option<&LockInfo> {
        self.reclaimed.as_ref()
    }
}

/// TTL-based deployment mutex over the settings store
#[derive(Debug, Clone)]
pub struct DeployLock<S: SettingsStore> {
    store: S,
}

impl<S: SettingsStore> DeployLock<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Acquire the lock or fail immediately with [`QuayError::Busy`].
    ///
    /// Never retries internally; contention is the caller's decision. An
    /// expired lock is forcibly reclaimed and surfaced on the handle.
    pub fn try_acquire(&self, holder: &str, ttl_secs: i64) -> QuayResult<LockHandle> {
        let now = Utc::now();
        let info = LockInfo {
            holder: holder.to_string(),
            acquired_at: now,
            ttl_secs,
        };
        let raw = serde_json::to_string(&info)
            .map_err(|e| QuayError::Store(format!("serialize lock: {}", e)))?;

        match self.store.get(LOCK_KEY)? {
            None => {
                if self.store.compare_and_swap(LOCK_KEY, None, Some(&raw))? {
                    return Ok(LockHandle {
                        info,
                        raw,
                        reclaimed: None,
                    });
                }
                // Lost the race to another acquirer.
                self.busy(now)
            }
            Some(current_raw) => {
                let current: LockInfo = serde_json::from_str(&current_raw).map_err(|e| {
                    // Fail closed on corrupt payloads; `force_clear` is the
                    // operator's way out.
                    QuayError::Store(format!("corrupt deployment lock: {}", e))
                })?;
                if !current.is_expired(now) {
                    return Err(QuayError::Busy {
                        holder: current.holder,
                        held_secs: now.signed_duration_since(current.acquired_at).num_seconds(),
                    });
                }
                if self
                    .store
                    .compare_and_swap(LOCK_KEY, Some(&current_raw), Some(&raw))?
                {
                    return Ok(LockHandle {
                        info,
                        raw,
                        reclaimed: Some(current),
                    });
                }
                self.busy(now)
            }
        }
    }

    /// Reset the TTL clock on a held lock.
    ///
    /// Called at every chunk boundary of a resumable run so a long
    /// multi-invocation deployment never looks stale.
    pub fn refresh(&self, handle: &mut LockHandle) -> QuayResult<()> {
        let info = LockInfo {
            holder: handle.info.holder.clone(),
            acquired_at: Utc::now(),
            ttl_secs: handle.info.ttl_secs,
        };
        let raw = serde_json::to_string(&info)
            .map_err(|e| QuayError::Store(format!("serialize lock: {}", e)))?;

        if !self
            .store
            .compare_and_swap(LOCK_KEY, Some(&handle.raw), Some(&raw))?
        {
            return Err(QuayError::Store(
                "deployment lock was lost (reclaimed or force-cleared)".to_string(),
            ));
        }
        handle.info = info;
        handle.raw = raw;
        Ok(())
    }

    /// Release a held lock. Releasing a lock you no longer hold is a no-op.
    pub fn release(&self, handle: &LockHandle) -> QuayResult<()> {
        self.store
            .compare_and_swap(LOCK_KEY, Some(&handle.raw), None)?;
        Ok(())
    }

    /// Whether a non-expired lock currently exists.
    pub fn is_held(&self) -> QuayResult<bool> {
        Ok(match self.current()? {
            Some(info) => !info.is_expired(Utc::now()),
            None => false,
        })
    }

    /// The current lock payload, expired or not.
    pub fn current(&self) -> QuayResult<Option<LockInfo>> {
        match self.store.get(LOCK_KEY)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| QuayError::Store(format!("corrupt deployment lock: {}", e))),
            None => Ok(None),
        }
    }

    /// Adopt the currently held, non-expired lock.
    ///
    /// A resumed invocation continues the run that acquired the lock; it
    /// must not re-acquire (that would be `Busy`) but needs a handle that
    /// can refresh and release. Returns `None` when no live lock exists.
    pub fn adopt_current(&self) -> QuayResult<Option<LockHandle>> {
        match self.store.get(LOCK_KEY)? {
            Some(raw) => {
                let info: LockInfo = serde_json::from_str(&raw)
                    .map_err(|e| QuayError::Store(format!("corrupt deployment lock: {}", e)))?;
                if info.is_expired(Utc::now()) {
                    return Ok(None);
                }
                Ok(Some(LockHandle {
                    info,
                    raw,
                    reclaimed: None,
                }))
            }
            None => Ok(None),
        }
    }

    /// Operator escape hatch: clear the lock unconditionally.
    ///
    /// Equivalent to declaring the in-flight operation abandoned; any
    /// resumed chunked run must re-verify its work instead of trusting
    /// stored progress.
    pub fn force_clear(&self) -> QuayResult<Option<LockInfo>> {
        let current = self.current().unwrap_or(None);
        self.store.delete(LOCK_KEY)?;
        Ok(current)
    }

    fn busy(&self, now: chrono::DateTime<Utc>) -> QuayResult<LockHandle> {
        match self.current()? {
            Some(info) => Err(QuayError::Busy {
                held_secs: now.signed_duration_since(info.acquired_at).num_seconds(),
                holder: info.holder,
            }),
            None => Err(QuayError::Busy {
                holder: "unknown".to_string(),
                held_secs: 0,
            }),
        }
    }
}
