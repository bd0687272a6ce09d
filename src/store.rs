//! Settings store port
//!
//! Key/value persistence for configuration, the deployment ledger, the lock,
//! and resumable progress state. The engine requires one atomic primitive
//! from the backing store: `compare_and_swap`. A backend that cannot provide
//! it must fail closed rather than fake it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{QuayError, QuayResult};

/// Abstract key/value store with one atomic primitive
pub trait SettingsStore {
    /// Read a value, `None` if the key is absent
    fn get(&self, key: &str) -> QuayResult<Option<String>>;

    /// Write a value unconditionally
    fn set(&self, key: &str, value: &str) -> QuayResult<()>;

    /// Delete a key; absent keys are fine
    fn delete(&self, key: &str) -> QuayResult<()>;

    /// Atomically replace `expected` with `new`.
    ///
    /// `expected == None` means "the key must be absent"; `new == None`
    /// deletes the key. Returns `false` (and changes nothing) when the
    /// current value does not match `expected`.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> QuayResult<bool>;
}

/// Read and deserialize a JSON value
pub fn get_json<T: DeserializeOwned, S: SettingsStore>(
    store: &S,
    key: &str,
) -> QuayResult<Option<T>> {
    match store.get(key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| QuayError::Store(format!("corrupt value for '{}': {}", key, e))),
        None => Ok(None),
    }
}

/// Serialize and write a JSON value
pub fn set_json<T: Serialize, S: SettingsStore>(store: &S, key: &str, value: &T) -> QuayResult<()> {
    let raw = serde_json::to_string(value)
        .map_err(|e| QuayError::Store(format!("serialize '{}': {}", key, e)))?;
    store.set(key, &raw)
}

/// In-memory store for tests and single-invocation use.
///
/// `Arc<Mutex<>>` so clones share state, mirroring a shared backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> QuayResult<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> QuayResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> QuayResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> QuayResult<bool> {
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).map(|s| s.as_str()) != expected {
            return Ok(false);
        }
        match new {
            Some(value) => {
                entries.insert(key.to_string(), value.to_string());
            }
            None => {
                entries.remove(key);
            }
        }
        Ok(true)
    }
}

/// File-backed store holding all keys in one JSON document.
///
/// Every mutation takes a sidecar `.lock` file (created with `create_new`,
/// which is atomic on POSIX and Windows) so concurrent quay invocations
/// cannot interleave read-modify-write cycles. Readers go lock-free; the
/// document itself is replaced atomically.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    guard: Arc<Mutex<()>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> QuayResult<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                QuayError::Store(format!("corrupt store {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> QuayResult<()> {
        use std::io::Write;

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;
        let raw = serde_json::to_string_pretty(entries)
            .map_err(|e| QuayError::Store(format!("serialize store: {}", e)))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(raw.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| QuayError::Io(e.error))?;
        Ok(())
    }

    fn with_lock<T>(&self, op: impl FnOnce() -> QuayResult<T>) -> QuayResult<T> {
        let _in_process = self.guard.lock().unwrap();
        let lock_path = self.path.with_extension("json.lock");
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // create_new is the atomic claim; spin briefly, then fail closed.
        let mut attempts = 0u32;
        let _file = loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(file) => break file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    attempts += 1;
                    if attempts > 50 {
                        return Err(QuayError::Store(format!(
                            "store lock {} is held by another process",
                            lock_path.display()
                        )));
                    }
                    std::thread::sleep(std::time::Duration::from_millis(20));
                }
                Err(e) => return Err(e.into()),
            }
        };

        let result = op();
        let _ = std::fs::remove_file(&lock_path);
        result
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str) -> QuayResult<Option<String>> {
        Ok(self.load()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> QuayResult<()> {
        self.with_lock(|| {
            let mut entries = self.load()?;
            entries.insert(key.to_string(), value.to_string());
            self.save(&entries)
        })
    }

    fn delete(&self, key: &str) -> QuayResult<()> {
        self.with_lock(|| {
            let mut entries = self.load()?;
            entries.remove(key);
            self.save(&entries)
        })
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> QuayResult<bool> {
        self.with_lock(|| {
            let mut entries = self.load()?;
            if entries.get(key).map(|s| s.as_str()) != expected {
                return Ok(false);
            }
            match new {
                Some(value) => {
                    entries.insert(key.to_string(), value.to_string());
                }
                None => {
                    entries.remove(key);
                }
            }
            self.save(&entries)?;
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_store_get_set_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some("v".to_string()));

        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn memory_cas_succeeds_on_match() {
        let store = MemoryStore::new();
        assert!(store.compare_and_swap("k", None, Some("v1")).unwrap());
        assert!(store.compare_and_swap("k", Some("v1"), Some("v2")).unwrap());
        assert_eq!(store.get("k").unwrap(), Some("v2".to_string()));
    }

    #[test]
    fn memory_cas_fails_on_mismatch() {
        let store = MemoryStore::new();
        store.set("k", "current").unwrap();

        assert!(!store.compare_and_swap("k", None, Some("v")).unwrap());
        assert!(!store.compare_and_swap("k", Some("other"), Some("v")).unwrap());
        assert_eq!(store.get("k").unwrap(), Some("current".to_string()));
    }

    #[test]
    fn memory_cas_delete() {
        let store = MemoryStore::new();
        store.set("k", "v").unwrap();
        assert!(store.compare_and_swap("k", Some("v"), None).unwrap());
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn clones_share_state() {
        let store = MemoryStore::new();
        let clone = store.clone();
        store.set("k", "v").unwrap();
        assert_eq!(clone.get("k").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn json_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = JsonFileStore::new(&path);
        store.set("branch", "main").unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get("branch").unwrap(), Some("main".to_string()));
    }

    #[test]
    fn json_store_cas_semantics() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("settings.json"));

        assert!(store.compare_and_swap("lock", None, Some("a")).unwrap());
        assert!(!store.compare_and_swap("lock", None, Some("b")).unwrap());
        assert!(store.compare_and_swap("lock", Some("a"), None).unwrap());
        assert_eq!(store.get("lock").unwrap(), None);
    }

    #[test]
    fn json_store_missing_file_reads_empty() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        assert_eq!(store.get("anything").unwrap(), None);
    }

    #[test]
    fn json_store_corrupt_file_is_store_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(store.get("k"), Err(QuayError::Store(_))));
    }

    #[test]
    fn json_helpers_roundtrip() {
        let store = MemoryStore::new();
        set_json(&store, "nums", &vec![1, 2, 3]).unwrap();
        let nums: Option<Vec<i32>> = get_json(&store, "nums").unwrap();
        assert_eq!(nums, Some(vec![1, 2, 3]));
    }
}
