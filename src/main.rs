mod cli;

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use quay::config::Config;
use quay::deploy::{DeployOptions, DeployOutcome, Orchestrator};
use quay::fs::LocalFileSystem;
use quay::maintenance::StoreMaintenance;
use quay::models::{ActionKind, Outcome};
use quay::repo::{DirRepo, RepoClient};
use quay::rollback::RollbackTarget;
use quay::store::JsonFileStore;
use quay::webhook::{verify_signature, PushEvent};

use cli::{Cli, Commands};

type CliOrchestrator =
    Orchestrator<JsonFileStore, LocalFileSystem, DirRepo, StoreMaintenance<JsonFileStore>>;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let actor = cli
        .actor
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "cli".to_string());

    let store = JsonFileStore::new(config.settings_path());
    let repo = DirRepo::new(config.mirror_root());
    let maintenance = StoreMaintenance::new(store.clone());
    let orchestrator = Orchestrator::new(
        config.clone(),
        store,
        LocalFileSystem::new(),
        repo,
        maintenance,
    );

    match cli.command {
        Commands::Deploy {
            target_ref,
            dry_run,
        } => {
            let reference = target_ref.unwrap_or_else(|| config.deploy.branch.clone());
            if dry_run {
                print_plan(&orchestrator, &reference, false)?;
            } else {
                let outcome = orchestrator
                    .deploy(&DeployOptions::new(&reference).with_actor(&actor))?;
                report(&outcome);
            }
        }
        Commands::Resume => match orchestrator.resume()? {
            Some(outcome) => report(&outcome),
            None => println!("nothing to resume"),
        },
        Commands::Rollback { target } => {
            let target = RollbackTarget::parse(&target);
            let outcome = orchestrator.rollback(&target, &actor)?;
            report(&outcome);
        }
        Commands::Restore { snapshot_id } => {
            let outcome = orchestrator.restore_snapshot(&snapshot_id, &actor)?;
            report(&outcome);
        }
        Commands::Diff { target_ref } => {
            let reference = target_ref.unwrap_or_else(|| config.deploy.branch.clone());
            print_plan(&orchestrator, &reference, true)?;
        }
        Commands::History { limit } => {
            let records = orchestrator.list_deployments(Some(limit))?;
            if records.is_empty() {
                println!("no deployments recorded");
            }
            for record in records {
                let outcome = match record.outcome {
                    Outcome::Success => "success",
                    Outcome::Failed => "failed",
                    Outcome::RolledBack => "rolled-back",
                };
                let kind = if record.is_rollback { "rollback" } else { "deploy" };
                println!(
                    "{}  {}  {:<8} {:<11} {}  {}",
                    record.id,
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    kind,
                    outcome,
                    short_sha(&record.commit),
                    record.message
                );
            }
        }
        Commands::Snapshots => {
            let snapshots = orchestrator.list_snapshots()?;
            if snapshots.is_empty() {
                println!("no snapshots");
            }
            for snapshot in snapshots {
                println!(
                    "{}  {}  {:<10} {} path(s)",
                    snapshot.id,
                    snapshot.created_at.format("%Y-%m-%d %H:%M:%S"),
                    snapshot.actor,
                    snapshot.paths.len()
                );
            }
        }
        Commands::Check => match orchestrator.check(&actor)? {
            Some(outcome) => report(&outcome),
            None => println!("site is up to date"),
        },
        Commands::Unlock => match orchestrator.force_unlock()? {
            Some(info) => println!(
                "cleared lock held by '{}' since {}",
                info.holder,
                info.acquired_at.format("%Y-%m-%d %H:%M:%S")
            ),
            None => println!("no lock held"),
        },
        Commands::Webhook { payload, signature } => {
            let body = read_payload(&payload)?;
            verify_signature(&body, &signature, &config.webhook.secret)?;
            let event = PushEvent::parse(&body)?;
            if !event.matches_branch(&config.deploy.branch) {
                println!(
                    "ignoring push to {} (deploying from {})",
                    event.git_ref, config.deploy.branch
                );
                return Ok(());
            }
            let outcome = orchestrator.deploy(
                &DeployOptions::new(&config.deploy.branch).with_actor("webhook"),
            )?;
            report(&outcome);
        }
        Commands::InitRepo { name, description } => {
            let repo = DirRepo::new(config.mirror_root());
            if repo.repository_exists()? {
                println!("repository mirror already exists at {}", config.mirror_root().display());
            } else {
                repo.create_repository(&name, &description)?;
                println!("created repository mirror at {}", config.mirror_root().display());
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn report(outcome: &DeployOutcome) {
    println!("{}", outcome.message);
    if let Some(progress) = &outcome.progress {
        println!(
            "step {}/{}: {}",
            progress.current_step, progress.total_steps, progress.detail
        );
    }
    if !outcome.is_success() && !outcome.is_suspended() {
        std::process::exit(1);
    }
}

fn print_plan(orchestrator: &CliOrchestrator, reference: &str, with_diffs: bool) -> Result<()> {
    let plan = orchestrator.plan(reference)?;
    println!(
        "{} at {}: {}",
        reference,
        short_sha(&plan.commit.sha),
        plan.summary()
    );

    for action in plan.change_set.actions() {
        match action.kind {
            ActionKind::Add => println!("A {}", action.path.display()),
            ActionKind::Delete => println!("D {}", action.path.display()),
            ActionKind::Modify => {
                println!("M {}", action.path.display());
                if with_diffs {
                    if let Some(diff) = modify_diff(orchestrator, action.source.as_deref(), action)
                    {
                        print!("{}", diff);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Unified diff for a modified file, or `None` when either side is binary.
fn modify_diff(
    orchestrator: &CliOrchestrator,
    source: Option<&Path>,
    action: &quay::models::FileAction,
) -> Option<String> {
    let source = source?;
    let new = std::fs::read(source).ok()?;
    let old = std::fs::read(orchestrator.site_path(&action.path)).ok()?;
    match (String::from_utf8(old), String::from_utf8(new)) {
        (Ok(old), Ok(new)) => Some(quay::diff::unified_diff(&action.path, &old, &new)),
        _ => None,
    }
}

fn read_payload(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut body = Vec::new();
        std::io::stdin()
            .read_to_end(&mut body)
            .context("reading payload from stdin")?;
        Ok(body)
    } else {
        std::fs::read(path).with_context(|| format!("reading {}", path.display()))
    }
}

fn short_sha(sha: &str) -> &str {
    if sha.len() > 12 {
        &sha[..12]
    } else {
        sha
    }
}
