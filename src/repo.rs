//! Repository capability port
//!
//! The remote source-control API is an external collaborator; quay consumes
//! it through [`RepoClient`]. The shipped implementation, [`DirRepo`], reads
//! a local mirror directory (one exported tree per ref, kept current by
//! whatever fetch mechanism the host uses); the hosted-API client lives
//! outside this crate.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diff::{FileTree, IgnorePatterns};
use crate::error::{QuayError, QuayResult};
use crate::fs::{FileSystem, LocalFileSystem};

/// Commit metadata surfaced to history records and listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

/// Access to the remote repository, one ref at a time
pub trait RepoClient {
    /// Scan the full tree for a ref
    fn get_tree(&self, reference: &str) -> QuayResult<FileTree>;

    /// Commit metadata for a ref or sha
    fn get_commit(&self, reference: &str) -> QuayResult<CommitInfo>;

    /// Materialize the tree for a ref under `dest`
    fn download_archive(&self, reference: &str, dest: &Path) -> QuayResult<()>;

    /// Bootstrap an empty repository
    fn create_repository(&self, name: &str, description: &str) -> QuayResult<()>;

    /// Whether the configured repository exists at all
    fn repository_exists(&self) -> QuayResult<bool>;
}

/// Sidecar file carrying commit metadata inside a mirrored ref
const COMMIT_META: &str = "commit.json";

/// Local-mirror implementation of [`RepoClient`].
///
/// Layout: `<root>/<ref>/` holds the exported tree for that ref, optionally
/// with a `commit.json` sidecar (`CommitInfo`). A ref without a sidecar is
/// treated as a detached export whose sha is the ref name itself.
#[derive(Debug, Clone)]
pub struct DirRepo {
    root: PathBuf,
    fs: LocalFileSystem,
}

impl DirRepo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fs: LocalFileSystem::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ref_dir(&self, reference: &str) -> QuayResult<PathBuf> {
        if !crate::models::is_normalized_relative(Path::new(reference)) {
            return Err(QuayError::Remote(format!("invalid ref '{}'", reference)));
        }
        let dir = self.root.join(reference);
        if !dir.is_dir() {
            return Err(QuayError::Remote(format!(
                "ref '{}' not found in mirror {}",
                reference,
                self.root.display()
            )));
        }
        Ok(dir)
    }
}

impl RepoClient for DirRepo {
    fn get_tree(&self, reference: &str) -> QuayResult<FileTree> {
        let dir = self.ref_dir(reference)?;
        let mut tree = FileTree::scan(&self.fs, &dir, &IgnorePatterns::empty())?;
        tree.remove(Path::new(COMMIT_META));
        Ok(tree)
    }

    fn get_commit(&self, reference: &str) -> QuayResult<CommitInfo> {
        let dir = self.ref_dir(reference)?;
        let meta = dir.join(COMMIT_META);
        if self.fs.exists(&meta) {
            let raw = self.fs.read_to_string(&meta)?;
            serde_json::from_str(&raw)
                .map_err(|e| QuayError::Remote(format!("bad {} for '{}': {}", COMMIT_META, reference, e)))
        } else {
            Ok(CommitInfo {
                sha: reference.to_string(),
                message: String::new(),
                author: String::new(),
                timestamp: Utc::now(),
            })
        }
    }

    fn download_archive(&self, reference: &str, dest: &Path) -> QuayResult<()> {
        let dir = self.ref_dir(reference)?;
        self.fs.remove_recursive(dest)?;
        self.fs.copy_recursive(&dir, dest)?;
        // The sidecar is mirror metadata, not site content.
        self.fs.remove_recursive(&dest.join(COMMIT_META))?;
        Ok(())
    }

    fn create_repository(&self, name: &str, _description: &str) -> QuayResult<()> {
        if name.is_empty() {
            return Err(QuayError::Remote("repository name is empty".to_string()));
        }
        self.fs.create_dir_all(&self.root)?;
        Ok(())
    }

    fn repository_exists(&self) -> QuayResult<bool> {
        Ok(self.root.is_dir())
    }
}
