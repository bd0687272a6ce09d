//! Diff engine
//!
//! Computes the change set between a source tree (the materialized remote
//! ref) and the target tree (the live site). Pure planning: the only I/O is
//! reading file content for strict-mode signatures, and nothing here logs or
//! mutates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::error::{QuayError, QuayResult};
use crate::fs::{FileMeta, FileSystem};
use crate::models::{ActionKind, ChangeSet, FileAction};

/// Maximum number of ignore patterns accepted from configuration
const MAX_PATTERNS: usize = 1000;

/// Ignore patterns with gitignore semantics.
///
/// A pattern matches the full relative path or the bare filename; a match at
/// any ancestor directory excludes the whole subtree.
#[derive(Debug)]
pub struct IgnorePatterns {
    matcher: Gitignore,
    pattern_count: usize,
}

impl Default for IgnorePatterns {
    fn default() -> Self {
        Self::empty()
    }
}

impl IgnorePatterns {
    /// Create an empty pattern set (matches nothing).
    pub fn empty() -> Self {
        let matcher = GitignoreBuilder::new("")
            .build()
            .expect("empty gitignore should always build");
        Self {
            matcher,
            pattern_count: 0,
        }
    }

    /// Build a matcher from configured pattern lines.
    ///
    /// Empty lines and `#` comments are skipped, like a `.gitignore`.
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> QuayResult<Self> {
        let mut builder = GitignoreBuilder::new("");
        let mut pattern_count = 0;

        for pattern in patterns {
            let line = pattern.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            pattern_count += 1;
            if pattern_count > MAX_PATTERNS {
                return Err(QuayError::InvalidPattern(format!(
                    "too many ignore patterns ({} max)",
                    MAX_PATTERNS
                )));
            }
            builder
                .add_line(None, line)
                .map_err(|e| QuayError::InvalidPattern(format!("'{}': {}", line, e)))?;
        }

        let matcher = builder
            .build()
            .map_err(|e| QuayError::InvalidPattern(e.to_string()))?;
        Ok(Self {
            matcher,
            pattern_count,
        })
    }

    /// Check if a relative path should be ignored.
    pub fn is_ignored(&self, rel_path: &Path, is_dir: bool) -> bool {
        self.matcher
            .matched_path_or_any_parents(rel_path, is_dir)
            .is_ignore()
    }

    pub fn pattern_count(&self) -> usize {
        self.pattern_count
    }

    pub fn is_empty(&self) -> bool {
        self.pattern_count == 0
    }
}

/// How file equality is decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparePolicy {
    /// Full content hash (SHA-256). Correct, reads every candidate file.
    #[default]
    Strict,
    /// Size + mtime. Fast, but misses a rewrite that lands with identical
    /// size and mtime; an accepted trade-off, not a bug.
    Fast,
}

/// A scanned file tree: sorted relative paths with their metadata
#[derive(Debug, Clone, Default)]
pub struct FileTree {
    root: PathBuf,
    files: BTreeMap<PathBuf, FileMeta>,
}

impl FileTree {
    /// Walk `root`, skipping ignored paths.
    pub fn scan<F: FileSystem>(
        fs: &F,
        root: &Path,
        ignore: &IgnorePatterns,
    ) -> QuayResult<Self> {
        let mut files = BTreeMap::new();
        for rel in fs.walk(root)? {
            if ignore.is_ignored(&rel, false) {
                continue;
            }
            let meta = fs.metadata(&root.join(&rel))?;
            files.insert(rel, meta);
        }
        Ok(Self {
            root: root.to_path_buf(),
            files,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn contains(&self, rel: &Path) -> bool {
        self.files.contains_key(rel)
    }

    pub fn meta(&self, rel: &Path) -> Option<&FileMeta> {
        self.files.get(rel)
    }

    /// Absolute path of a tree entry
    pub fn abs(&self, rel: &Path) -> PathBuf {
        self.root.join(rel)
    }

    pub fn remove(&mut self, rel: &Path) {
        self.files.remove(rel);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Relative paths in lexicographic order
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.keys()
    }
}

/// Options controlling change-set computation
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffOptions {
    pub policy: ComparePolicy,
    /// Emit Delete actions for files present only in the target tree
    pub delete_removed: bool,
}

/// Stateless change-set computation
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffEngine;

impl DiffEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compute the ordered change set turning `target` into `source`.
    ///
    /// Adds and modifies come first, top-down in path order; deletes follow
    /// bottom-up (reverse path order) so a parent's entries are never
    /// removed ahead of children that still matter.
    pub fn compute<F: FileSystem>(
        &self,
        fs: &F,
        source: &FileTree,
        target: &FileTree,
        opts: DiffOptions,
    ) -> QuayResult<ChangeSet> {
        let mut set = ChangeSet::new();

        for rel in source.paths() {
            let kind = match target.meta(rel) {
                None => Some(ActionKind::Add),
                Some(target_meta) => {
                    if self.differs(fs, source, target, rel, *target_meta, opts.policy)? {
                        Some(ActionKind::Modify)
                    } else {
                        None
                    }
                }
            };
            if let Some(kind) = kind {
                set.push(FileAction {
                    path: rel.clone(),
                    kind,
                    source: Some(source.abs(rel)),
                })?;
            }
        }

        if opts.delete_removed {
            let removed: Vec<&PathBuf> = target
                .paths()
                .filter(|rel| !source.contains(rel))
                .collect();
            for rel in removed.into_iter().rev() {
                set.push(FileAction {
                    path: rel.clone(),
                    kind: ActionKind::Delete,
                    source: None,
                })?;
            }
        }

        Ok(set)
    }

    fn differs<F: FileSystem>(
        &self,
        fs: &F,
        source: &FileTree,
        target: &FileTree,
        rel: &Path,
        target_meta: FileMeta,
        policy: ComparePolicy,
    ) -> QuayResult<bool> {
        match policy {
            ComparePolicy::Fast => {
                let source_meta = source
                    .meta(rel)
                    .copied()
                    .ok_or_else(|| QuayError::NotFound(format!("tree entry {}", rel.display())))?;
                Ok(source_meta.len != target_meta.len || source_meta.mtime != target_meta.mtime)
            }
            ComparePolicy::Strict => {
                let source_hash = fs.hash_file(&source.abs(rel))?;
                let target_hash = fs.hash_file(&target.abs(rel))?;
                Ok(source_hash != target_hash)
            }
        }
    }
}

/// Unified diff of two text blobs, with `a/`–`b/` headers for display
pub fn unified_diff(rel: &Path, old: &str, new: &str) -> String {
    similar::TextDiff::from_lines(old, new)
        .unified_diff()
        .header(
            &format!("a/{}", rel.display()),
            &format!("b/{}", rel.display()),
        )
        .context_radius(3)
        .to_string()
}
