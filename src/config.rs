//! Configuration module for Quay
//!
//! Settings come from three layers, highest priority first:
//! 1. CLI flags
//! 2. Environment variables (QUAY_*)
//! 3. `quay.toml` (built-in defaults below it)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::diff::ComparePolicy;
use crate::error::{QuayError, QuayResult};

/// Default configuration file name
pub const CONFIG_FILE: &str = "quay.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Live site root that deployments write into
    pub site_root: PathBuf,

    /// State directory: settings store, snapshots, staging checkouts.
    /// Must not be web-accessible.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Repository mirror root (one exported tree per ref).
    /// Defaults to `<work_dir>/mirror`.
    #[serde(default)]
    pub mirror: Option<PathBuf>,

    #[serde(default)]
    pub deploy: DeployConfig,

    #[serde(default)]
    pub snapshots: SnapshotConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,

    #[serde(default)]
    pub site: SiteConfig,
}

/// Deployment behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Branch that `check` and webhook pushes deploy from
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Delete local files that no longer exist in the source tree
    #[serde(default)]
    pub delete_removed: bool,

    /// strict = content hashes; fast = size+mtime (can miss a rewrite that
    /// keeps both; speed over certainty, choose deliberately)
    #[serde(default)]
    pub compare: ComparePolicy,

    /// File actions applied per invocation before suspending
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Deployment lock TTL; a lock older than this is reclaimable
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: i64,

    /// Toggle site maintenance mode while applying
    #[serde(default = "default_true")]
    pub maintenance_mode: bool,

    /// Ignore patterns (gitignore semantics) applied to both trees
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,

    /// Paths to snapshot when the change set alone decides badly
    /// (empty = derive from the change set's top-level entries)
    #[serde(default)]
    pub snapshot_paths: Vec<PathBuf>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            delete_removed: false,
            compare: ComparePolicy::default(),
            chunk_size: default_chunk_size(),
            lock_ttl_secs: default_lock_ttl(),
            maintenance_mode: true,
            ignore: default_ignore(),
            snapshot_paths: Vec::new(),
        }
    }
}

/// Snapshot retention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_max_keep")]
    pub max_keep: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_keep: default_max_keep(),
        }
    }
}

/// Ledger bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

/// Webhook trigger settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookConfig {
    /// Shared HMAC secret; empty disables the webhook trigger
    #[serde(default)]
    pub secret: String,
}

/// Site identification recorded into snapshots
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SiteConfig {
    #[serde(default)]
    pub platform_version: Option<String>,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".quay")
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_chunk_size() -> usize {
    250
}

fn default_lock_ttl() -> i64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_ignore() -> Vec<String> {
    vec![".git".to_string(), CONFIG_FILE.to_string()]
}

fn default_max_keep() -> usize {
    10
}

fn default_max_entries() -> usize {
    crate::history::DEFAULT_MAX_ENTRIES
}

impl Config {
    /// Load from a TOML file and apply `QUAY_*` environment overrides.
    pub fn load(path: &Path) -> QuayResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| QuayError::Config {
            file: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut config: Config = toml::from_str(&raw).map_err(|e| QuayError::Config {
            file: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.apply_env();
        Ok(config)
    }

    /// Environment overrides, applied after file parsing.
    fn apply_env(&mut self) {
        if let Ok(branch) = std::env::var("QUAY_BRANCH") {
            self.deploy.branch = branch;
        }
        if let Ok(secret) = std::env::var("QUAY_WEBHOOK_SECRET") {
            self.webhook.secret = secret;
        }
        if let Ok(site_root) = std::env::var("QUAY_SITE_ROOT") {
            self.site_root = PathBuf::from(site_root);
        }
        if let Ok(work_dir) = std::env::var("QUAY_WORK_DIR") {
            self.work_dir = PathBuf::from(work_dir);
        }
    }

    /// Settings store location
    pub fn settings_path(&self) -> PathBuf {
        self.work_dir.join("settings.json")
    }

    /// Snapshot directory root
    pub fn snapshot_root(&self) -> PathBuf {
        self.work_dir.join("snapshots")
    }

    /// Staging checkout root for materialized refs
    pub fn staging_root(&self) -> PathBuf {
        self.work_dir.join("staging")
    }

    /// Mirror root for the repository capability
    pub fn mirror_root(&self) -> PathBuf {
        self.mirror
            .clone()
            .unwrap_or_else(|| self.work_dir.join("mirror"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: Config = toml::from_str(r#"site_root = "/var/www/site""#).unwrap();
        assert_eq!(config.site_root, PathBuf::from("/var/www/site"));
        assert_eq!(config.deploy.branch, "main");
        assert_eq!(config.deploy.chunk_size, 250);
        assert_eq!(config.deploy.lock_ttl_secs, 600);
        assert!(config.deploy.maintenance_mode);
        assert!(!config.deploy.delete_removed);
        assert_eq!(config.deploy.compare, ComparePolicy::Strict);
        assert_eq!(config.snapshots.max_keep, 10);
        assert_eq!(config.history.max_entries, 100);
        assert!(config.webhook.secret.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let toml = r#"
site_root = "/var/www/site"
work_dir = "/var/lib/quay"
mirror = "/srv/mirror"

[deploy]
branch = "production"
delete_removed = true
compare = "fast"
chunk_size = 50
lock_ttl_secs = 120
maintenance_mode = false
ignore = ["cache/*", "*.log"]
snapshot_paths = ["themes", "plugins"]

[snapshots]
max_keep = 5

[history]
max_entries = 25

[webhook]
secret = "hunter2"

[site]
platform_version = "6.5.2"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.deploy.branch, "production");
        assert!(config.deploy.delete_removed);
        assert_eq!(config.deploy.compare, ComparePolicy::Fast);
        assert_eq!(config.deploy.chunk_size, 50);
        assert_eq!(config.deploy.snapshot_paths.len(), 2);
        assert_eq!(config.snapshots.max_keep, 5);
        assert_eq!(config.webhook.secret, "hunter2");
        assert_eq!(config.mirror_root(), PathBuf::from("/srv/mirror"));
        assert_eq!(config.site.platform_version.as_deref(), Some("6.5.2"));
    }

    #[test]
    fn derived_paths_hang_off_work_dir() {
        let config: Config =
            toml::from_str("site_root = \"/site\"\nwork_dir = \"/state\"").unwrap();
        assert_eq!(config.settings_path(), PathBuf::from("/state/settings.json"));
        assert_eq!(config.snapshot_root(), PathBuf::from("/state/snapshots"));
        assert_eq!(config.staging_root(), PathBuf::from("/state/staging"));
        assert_eq!(config.mirror_root(), PathBuf::from("/state/mirror"));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempdir().unwrap();
        let err = Config::load(&dir.path().join("quay.toml"));
        assert!(matches!(err, Err(QuayError::Config { .. })));
    }

    #[test]
    fn load_reports_bad_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quay.toml");
        std::fs::write(&path, "site_root = [not toml").unwrap();
        assert!(matches!(Config::load(&path), Err(QuayError::Config { .. })));
    }
}
