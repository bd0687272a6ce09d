//! Snapshot store
//!
//! Point-in-time copies of a set of site paths, used for pre-deploy safety
//! and restore. Each snapshot owns one directory under the snapshot root
//! (which must sit outside the web root): `<root>/<id>/files/` holds the
//! copies and `<root>/<id>/snapshot.json` the metadata. Snapshots are
//! immutable once created and only ever deleted whole.
//!
//! This layer returns structured errors and never logs; the orchestrator
//! decides what is worth reporting.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{QuayError, QuayResult};
use crate::fs::FileSystem;
use crate::models::{generate_id, SiteInfo, Snapshot};

const META_FILE: &str = "snapshot.json";
const FILES_DIR: &str = "files";

/// Outcome of a snapshot creation: the metadata plus what was skipped
#[derive(Debug, Clone)]
pub struct SnapshotOutcome {
    pub snapshot: Snapshot,
    /// Requested paths that did not exist and were skipped
    pub skipped: Vec<PathBuf>,
}

/// Creates, lists, rotates, restores, and deletes snapshots
#[derive(Debug, Clone)]
pub struct SnapshotStore<F: FileSystem> {
    fs: F,
    root: PathBuf,
    site_root: PathBuf,
}

impl<F: FileSystem> SnapshotStore<F> {
    pub fn new(fs: F, root: impl Into<PathBuf>, site_root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
            site_root: site_root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy each site-relative path into a fresh snapshot directory.
    ///
    /// Missing paths are skipped and reported in the outcome; zero
    /// successful copies deletes the partial directory and fails. The
    /// recorded `paths` list exactly what was copied.
    pub fn create(
        &self,
        paths: &[PathBuf],
        actor: &str,
        site: SiteInfo,
    ) -> QuayResult<SnapshotOutcome> {
        if paths.is_empty() {
            return Err(QuayError::SnapshotFailed(
                "no paths requested for snapshot".to_string(),
            ));
        }

        let created_at = Utc::now();
        let id = self.fresh_id();
        let dir = self.root.join(&id);
        let files_dir = dir.join(FILES_DIR);

        let mut copied = Vec::new();
        let mut skipped = Vec::new();
        for rel in paths {
            let from = self.site_root.join(rel);
            if !self.fs.exists(&from) {
                skipped.push(rel.clone());
                continue;
            }
            if let Err(e) = self.fs.copy_recursive(&from, &files_dir.join(rel)) {
                // Partial snapshots are useless; tear down and report.
                let _ = self.fs.remove_recursive(&dir);
                return Err(QuayError::SnapshotFailed(format!(
                    "copying '{}': {}",
                    rel.display(),
                    e
                )));
            }
            copied.push(rel.clone());
        }

        if copied.is_empty() {
            let _ = self.fs.remove_recursive(&dir);
            return Err(QuayError::SnapshotFailed(format!(
                "none of the {} requested paths exist",
                paths.len()
            )));
        }

        let snapshot = Snapshot {
            id,
            created_at,
            paths: copied,
            actor: actor.to_string(),
            site,
        };
        self.save_meta(&dir, &snapshot)?;

        Ok(SnapshotOutcome { snapshot, skipped })
    }

    /// Restore paths from a snapshot into the site root.
    ///
    /// Defaults to the snapshot's recorded paths. For each path the current
    /// target is deleted, then the copy is put back. Not atomic: a failure
    /// partway leaves the destination mixed; callers that need safety
    /// snapshot first (the orchestrator always does).
    pub fn restore(&self, snapshot_id: &str, paths: Option<&[PathBuf]>) -> QuayResult<()> {
        let snapshot = self
            .find(snapshot_id)?
            .ok_or_else(|| QuayError::NotFound(format!("snapshot '{}'", snapshot_id)))?;
        let files_dir = self.root.join(&snapshot.id).join(FILES_DIR);

        let targets: Vec<PathBuf> = match paths {
            Some(requested) => {
                for rel in requested {
                    if !snapshot.paths.contains(rel) {
                        return Err(QuayError::RestoreFailed {
                            snapshot_id: snapshot_id.to_string(),
                            message: format!("'{}' is not part of this snapshot", rel.display()),
                        });
                    }
                }
                requested.to_vec()
            }
            None => snapshot.paths.clone(),
        };

        for rel in &targets {
            let stored = files_dir.join(rel);
            let live = self.site_root.join(rel);
            self.fs
                .remove_recursive(&live)
                .and_then(|_| self.fs.copy_recursive(&stored, &live))
                .map_err(|e| QuayError::RestoreFailed {
                    snapshot_id: snapshot_id.to_string(),
                    message: format!("restoring '{}': {}", rel.display(), e),
                })?;
        }

        Ok(())
    }

    /// All snapshots, newest first.
    pub fn list(&self) -> QuayResult<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for rel in self.fs.walk(&self.root)? {
            // Only the per-snapshot metadata file, not files/ content.
            if rel.components().count() != 2 || rel.file_name() != Some(META_FILE.as_ref()) {
                continue;
            }
            let meta = self.root.join(&rel);
            let raw = self.fs.read_to_string(&meta)?;
            let snapshot: Snapshot = serde_json::from_str(&raw).map_err(|e| {
                QuayError::SnapshotFailed(format!("corrupt metadata in {}: {}", meta.display(), e))
            })?;
            snapshots.push(snapshot);
        }

        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(snapshots)
    }

    /// Look up one snapshot by id.
    pub fn find(&self, snapshot_id: &str) -> QuayResult<Option<Snapshot>> {
        Ok(self.list()?.into_iter().find(|s| s.id == snapshot_id))
    }

    /// Delete oldest snapshots beyond `max_keep`. Returns the deleted ids.
    pub fn rotate(&self, max_keep: usize) -> QuayResult<Vec<String>> {
        let snapshots = self.list()?;
        let mut deleted = Vec::new();
        for snapshot in snapshots.into_iter().skip(max_keep) {
            self.fs.remove_recursive(&self.root.join(&snapshot.id))?;
            deleted.push(snapshot.id);
        }
        Ok(deleted)
    }

    /// Delete one snapshot. Returns `false` if it did not exist.
    pub fn delete(&self, snapshot_id: &str) -> QuayResult<bool> {
        match self.find(snapshot_id)? {
            Some(snapshot) => {
                self.fs.remove_recursive(&self.root.join(&snapshot.id))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn save_meta(&self, dir: &Path, snapshot: &Snapshot) -> QuayResult<()> {
        let raw = serde_json::to_string_pretty(snapshot)
            .map_err(|e| QuayError::SnapshotFailed(format!("serialize metadata: {}", e)))?;
        self.fs
            .write(&dir.join(META_FILE), raw.as_bytes())
            .map_err(|e| QuayError::SnapshotFailed(format!("write metadata: {}", e)))
    }

    fn fresh_id(&self) -> String {
        loop {
            let id = generate_id(Utc::now());
            if !self.fs.exists(&self.root.join(&id)) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileSystem;
    use tempfile::tempdir;

    struct Env {
        _dir: tempfile::TempDir,
        store: SnapshotStore<LocalFileSystem>,
        site: PathBuf,
    }

    fn env() -> Env {
        let dir = tempdir().unwrap();
        let site = dir.path().join("site");
        let store = SnapshotStore::new(
            LocalFileSystem::new(),
            dir.path().join("snapshots"),
            &site,
        );
        Env {
            _dir: dir,
            store,
            site,
        }
    }

    fn seed(site: &Path, rel: &str, content: &str) {
        let path = site.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn site_info() -> SiteInfo {
        SiteInfo::current(None)
    }

    #[test]
    fn create_copies_listed_paths() {
        let env = env();
        seed(&env.site, "themes/site/style.css", "body{}");
        seed(&env.site, "index.php", "<?php");

        let outcome = env
            .store
            .create(
                &[PathBuf::from("themes"), PathBuf::from("index.php")],
                "ops",
                site_info(),
            )
            .unwrap();

        assert_eq!(outcome.snapshot.paths.len(), 2);
        assert!(outcome.skipped.is_empty());
        let files = env.store.root().join(&outcome.snapshot.id).join("files");
        assert!(files.join("themes/site/style.css").exists());
        assert!(files.join("index.php").exists());
    }

    #[test]
    fn create_skips_missing_paths() {
        let env = env();
        seed(&env.site, "index.php", "<?php");

        let outcome = env
            .store
            .create(
                &[PathBuf::from("index.php"), PathBuf::from("ghost")],
                "ops",
                site_info(),
            )
            .unwrap();

        assert_eq!(outcome.snapshot.paths, vec![PathBuf::from("index.php")]);
        assert_eq!(outcome.skipped, vec![PathBuf::from("ghost")]);
    }

    #[test]
    fn create_with_no_existing_paths_fails_and_cleans_up() {
        let env = env();
        let err = env
            .store
            .create(&[PathBuf::from("ghost")], "ops", site_info());

        assert!(matches!(err, Err(QuayError::SnapshotFailed(_))));
        assert!(env.store.list().unwrap().is_empty());
        // No partial directory left behind.
        assert!(
            !env.store.root().exists()
                || std::fs::read_dir(env.store.root()).unwrap().next().is_none()
        );
    }

    #[test]
    fn restore_puts_files_back() {
        let env = env();
        seed(&env.site, "index.php", "original");

        let outcome = env
            .store
            .create(&[PathBuf::from("index.php")], "ops", site_info())
            .unwrap();

        seed(&env.site, "index.php", "clobbered");
        seed(&env.site, "stray.txt", "left alone");

        env.store.restore(&outcome.snapshot.id, None).unwrap();

        assert_eq!(
            std::fs::read_to_string(env.site.join("index.php")).unwrap(),
            "original"
        );
        assert!(env.site.join("stray.txt").exists());
    }

    #[test]
    fn restore_replaces_directory_wholesale() {
        let env = env();
        seed(&env.site, "themes/a.css", "a");

        let outcome = env
            .store
            .create(&[PathBuf::from("themes")], "ops", site_info())
            .unwrap();

        seed(&env.site, "themes/b.css", "b");
        env.store.restore(&outcome.snapshot.id, None).unwrap();

        assert!(env.site.join("themes/a.css").exists());
        assert!(
            !env.site.join("themes/b.css").exists(),
            "restore deletes the current target before copying back"
        );
    }

    #[test]
    fn restore_unknown_id_is_not_found() {
        let env = env();
        assert!(matches!(
            env.store.restore("20990101000000-ffffff", None),
            Err(QuayError::NotFound(_))
        ));
    }

    #[test]
    fn restore_rejects_path_outside_snapshot() {
        let env = env();
        seed(&env.site, "index.php", "x");
        let outcome = env
            .store
            .create(&[PathBuf::from("index.php")], "ops", site_info())
            .unwrap();

        let err = env
            .store
            .restore(&outcome.snapshot.id, Some(&[PathBuf::from("themes")]));
        assert!(matches!(err, Err(QuayError::RestoreFailed { .. })));
    }

    #[test]
    fn list_is_newest_first() {
        let env = env();
        seed(&env.site, "index.php", "x");
        let first = env
            .store
            .create(&[PathBuf::from("index.php")], "ops", site_info())
            .unwrap();
        let second = env
            .store
            .create(&[PathBuf::from("index.php")], "ops", site_info())
            .unwrap();

        let listed = env.store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.snapshot.id);
        assert_eq!(listed[1].id, first.snapshot.id);
    }

    #[test]
    fn rotate_deletes_exactly_the_oldest() {
        let env = env();
        seed(&env.site, "index.php", "x");

        let mut ids = Vec::new();
        for _ in 0..11 {
            ids.push(
                env.store
                    .create(&[PathBuf::from("index.php")], "ops", site_info())
                    .unwrap()
                    .snapshot
                    .id,
            );
        }

        let deleted = env.store.rotate(10).unwrap();
        assert_eq!(deleted, vec![ids[0].clone()]);

        let remaining = env.store.list().unwrap();
        assert_eq!(remaining.len(), 10);
        assert!(remaining.iter().all(|s| s.id != ids[0]));
    }

    #[test]
    fn delete_returns_false_for_unknown() {
        let env = env();
        assert!(!env.store.delete("20990101000000-ffffff").unwrap());

        seed(&env.site, "index.php", "x");
        let outcome = env
            .store
            .create(&[PathBuf::from("index.php")], "ops", site_info())
            .unwrap();
        assert!(env.store.delete(&outcome.snapshot.id).unwrap());
        assert!(env.store.list().unwrap().is_empty());
    }

    #[test]
    fn snapshot_metadata_roundtrips() {
        let env = env();
        seed(&env.site, "index.php", "x");
        let outcome = env
            .store
            .create(&[PathBuf::from("index.php")], "deploy-bot", site_info())
            .unwrap();

        let found = env.store.find(&outcome.snapshot.id).unwrap().unwrap();
        assert_eq!(found, outcome.snapshot);
        assert_eq!(found.actor, "deploy-bot");
        assert_eq!(found.site.tool_version, env!("CARGO_PKG_VERSION"));
    }
}
