//! Test environment builder for isolated quay testing.
//!
//! Provides `TestEnv` - a temp-dir site plus mirror and config file, with
//! helpers to drive the library API or run the quay binary against it.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use quay::config::Config;
use quay::deploy::Orchestrator;
use quay::fs::LocalFileSystem;
use quay::maintenance::StoreMaintenance;
use quay::store::JsonFileStore;
use quay::DirRepo;

/// Result of running a quay CLI command
#[derive(Debug)]
pub struct CliResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CliResult {
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Isolated site + mirror + work dir with a written `quay.toml`
pub struct TestEnv {
    pub root: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config_lines(&[])
    }

    /// Extra config lines appended after the `[deploy]` table header, so
    /// plain keys extend deployment settings and further `[table]` headers
    /// open new sections.
    pub fn with_config_lines(deploy_lines: &[&str]) -> Self {
        let root = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(root.path().join("site")).expect("site dir");

        let config = format!(
            "site_root = {:?}\nwork_dir = {:?}\n\n[deploy]\ndelete_removed = true\n{}\n",
            root.path().join("site"),
            root.path().join("work"),
            deploy_lines.join("\n")
        );
        std::fs::write(root.path().join("quay.toml"), config).expect("config");

        Self { root }
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.path().join("quay.toml")
    }

    pub fn config(&self) -> Config {
        Config::load(&self.config_path()).expect("load config")
    }

    pub fn site_path(&self, rel: &str) -> PathBuf {
        self.root.path().join("site").join(rel)
    }

    /// Build an orchestrator over the same state the CLI would use.
    pub fn orchestrator(
        &self,
    ) -> Orchestrator<JsonFileStore, LocalFileSystem, DirRepo, StoreMaintenance<JsonFileStore>>
    {
        let config = self.config();
        let store = JsonFileStore::new(config.settings_path());
        let repo = DirRepo::new(config.mirror_root());
        let maintenance = StoreMaintenance::new(store.clone());
        Orchestrator::new(config, store, LocalFileSystem::new(), repo, maintenance)
    }

    /// Export a tree for a ref into the mirror, with commit metadata.
    pub fn mirror_commit(&self, reference: &str, sha: &str, files: &[(&str, &str)]) {
        let ref_dir = self.config().mirror_root().join(reference);
        let _ = std::fs::remove_dir_all(&ref_dir);
        for (rel, content) in files {
            write_file(&ref_dir.join(rel), content);
        }
        write_file(
            &ref_dir.join("commit.json"),
            &format!(
                r#"{{"sha":"{}","message":"update","author":"dev","timestamp":"2025-06-01T10:00:00Z"}}"#,
                sha
            ),
        );
    }

    pub fn seed_site(&self, rel: &str, content: &str) {
        write_file(&self.site_path(rel), content);
    }

    pub fn read_site(&self, rel: &str) -> String {
        std::fs::read_to_string(self.site_path(rel))
            .unwrap_or_else(|e| panic!("reading site file {}: {}", rel, e))
    }

    /// Run the quay binary against this environment.
    pub fn run(&self, args: &[&str]) -> CliResult {
        let config = self.config_path();
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_quay"));
        cmd.current_dir(self.root.path())
            .arg("--config")
            .arg(&config)
            .arg("--actor")
            .arg("test")
            .args(args);

        let output = cmd.output().expect("failed to execute quay");
        CliResult {
            success: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(path, content).expect("write file");
}
