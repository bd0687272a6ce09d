//! File system port
//!
//! Abstraction over the file operations the deployment engine needs:
//! atomic writes, recursive copy/delete, content hashing, and tree walks.
//! `LocalFileSystem` is the production implementation; `MockFileSystem`
//! backs unit tests.

use std::path::{Path, PathBuf};

use crate::error::{QuayError, QuayResult};

/// Size and modification time of a file, for fast-mode comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub len: u64,
    /// Seconds since the Unix epoch
    pub mtime: i64,
}

/// Abstract file system interface
pub trait FileSystem {
    /// Read file content as bytes
    fn read(&self, path: &Path) -> QuayResult<Vec<u8>>;

    /// Read file content as a string
    fn read_to_string(&self, path: &Path) -> QuayResult<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes)
            .map_err(|e| QuayError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    /// Write content to a file atomically, creating parent directories
    fn write(&self, path: &Path, content: &[u8]) -> QuayResult<()>;

    /// Copy a single file, creating parent directories at the destination
    fn copy_file(&self, from: &Path, to: &Path) -> QuayResult<()>;

    /// Copy a file or directory tree recursively
    fn copy_recursive(&self, from: &Path, to: &Path) -> QuayResult<()>;

    /// Remove a file
    fn remove_file(&self, path: &Path) -> QuayResult<()>;

    /// Remove a file or directory tree, tolerating an already-missing target
    fn remove_recursive(&self, path: &Path) -> QuayResult<()>;

    /// Check if a path exists
    fn exists(&self, path: &Path) -> bool;

    /// Check if a path is a directory
    fn is_dir(&self, path: &Path) -> bool;

    /// Create directory and parents
    fn create_dir_all(&self, path: &Path) -> QuayResult<()>;

    /// Compute `sha256:`-prefixed content hash of a file
    fn hash_file(&self, path: &Path) -> QuayResult<String>;

    /// Size and mtime of a file
    fn metadata(&self, path: &Path) -> QuayResult<FileMeta>;

    /// All regular files under `root`, as sorted root-relative paths
    fn walk(&self, root: &Path) -> QuayResult<Vec<PathBuf>>;
}

/// Compute a `sha256:`-prefixed hash of a byte slice
pub fn hash_bytes(content: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(content);
    format!("sha256:{}", hex::encode(digest))
}

/// Standard file I/O against the local disk
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for LocalFileSystem {
    fn read(&self, path: &Path) -> QuayResult<Vec<u8>> {
        Ok(std::fs::read(path)?)
    }

    fn write(&self, path: &Path, content: &[u8]) -> QuayResult<()> {
        use std::io::Write;

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        // Write to a sibling temp file, then rename into place.
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(content)?;
        tmp.persist(path).map_err(|e| QuayError::Io(e.error))?;
        Ok(())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> QuayResult<()> {
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(from, to)?;
        // Propagate the source mtime so size+mtime comparisons still mean
        // something after files pass through staging and deploy copies.
        let modified = std::fs::metadata(from)?.modified()?;
        let dest = std::fs::OpenOptions::new().write(true).open(to)?;
        dest.set_modified(modified)?;
        Ok(())
    }

    fn copy_recursive(&self, from: &Path, to: &Path) -> QuayResult<()> {
        if from.is_dir() {
            std::fs::create_dir_all(to)?;
            for entry in std::fs::read_dir(from)? {
                let entry = entry?;
                self.copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
            }
            Ok(())
        } else {
            self.copy_file(from, to)
        }
    }

    fn remove_file(&self, path: &Path) -> QuayResult<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn remove_recursive(&self, path: &Path) -> QuayResult<()> {
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_dir_all(&self, path: &Path) -> QuayResult<()> {
        std::fs::create_dir_all(path)?;
        Ok(())
    }

    fn hash_file(&self, path: &Path) -> QuayResult<String> {
        let content = std::fs::read(path)?;
        Ok(hash_bytes(&content))
    }

    fn metadata(&self, path: &Path) -> QuayResult<FileMeta> {
        let meta = std::fs::metadata(path)?;
        let mtime = meta
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok(FileMeta {
            len: meta.len(),
            mtime,
        })
    }

    fn walk(&self, root: &Path) -> QuayResult<Vec<PathBuf>> {
        fn visit(dir: &Path, root: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    visit(&path, root, files)?;
                } else {
                    let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
                    files.push(rel);
                }
            }
            Ok(())
        }

        let mut files = Vec::new();
        if root.is_dir() {
            visit(root, root, &mut files)?;
        }
        files.sort();
        Ok(files)
    }
}

/// In-memory file system for unit tests
///
/// Uses `Arc<Mutex<>>` internally so it can be cloned and shared.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockFileSystem {
    files: std::sync::Arc<std::sync::Mutex<std::collections::BTreeMap<PathBuf, Vec<u8>>>>,
}

#[cfg(test)]
impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.into(), content.to_vec());
    }
}

#[cfg(test)]
impl FileSystem for MockFileSystem {
    fn read(&self, path: &Path) -> QuayResult<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned().ok_or_else(|| {
            QuayError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            ))
        })
    }

    fn write(&self, path: &Path, content: &[u8]) -> QuayResult<()> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), content.to_vec());
        Ok(())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> QuayResult<()> {
        let content = self.read(from)?;
        self.write(to, &content)
    }

    fn copy_recursive(&self, from: &Path, to: &Path) -> QuayResult<()> {
        let entries: Vec<(PathBuf, Vec<u8>)> = {
            let files = self.files.lock().unwrap();
            files
                .iter()
                .filter(|(p, _)| p.starts_with(from))
                .map(|(p, c)| (p.clone(), c.clone()))
                .collect()
        };
        if entries.is_empty() {
            return self.copy_file(from, to);
        }
        for (path, content) in entries {
            let rel = path.strip_prefix(from).unwrap();
            let dest = if rel.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(rel)
            };
            self.write(&dest, &content)?;
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> QuayResult<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    fn remove_recursive(&self, path: &Path) -> QuayResult<()> {
        self.files
            .lock()
            .unwrap()
            .retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap();
        files.contains_key(path) || files.keys().any(|p| p.starts_with(path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap();
        !files.contains_key(path) && files.keys().any(|p| p.starts_with(path))
    }

    fn create_dir_all(&self, _path: &Path) -> QuayResult<()> {
        Ok(())
    }

    fn hash_file(&self, path: &Path) -> QuayResult<String> {
        Ok(hash_bytes(&self.read(path)?))
    }

    fn metadata(&self, path: &Path) -> QuayResult<FileMeta> {
        let content = self.read(path)?;
        Ok(FileMeta {
            len: content.len() as u64,
            mtime: 0,
        })
    }

    fn walk(&self, root: &Path) -> QuayResult<Vec<PathBuf>> {
        let files = self.files.lock().unwrap();
        let mut out: Vec<PathBuf> = files
            .keys()
            .filter(|p| p.starts_with(root))
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        out.sort();
        Ok(out)
    }
}
