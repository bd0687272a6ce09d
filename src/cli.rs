use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Quay - deployment and rollback orchestration for site trees
#[derive(Parser, Debug)]
#[command(name = "quay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "quay.toml")]
    pub config: PathBuf,

    /// Actor recorded in snapshots and history (defaults to $USER)
    #[arg(long, global = true)]
    pub actor: Option<String>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy a ref (defaults to the configured branch)
    Deploy {
        /// Branch, tag, or commit to deploy
        #[arg(value_name = "REF")]
        target_ref: Option<String>,

        /// Show the change set without applying it
        #[arg(long)]
        dry_run: bool,
    },

    /// Continue a suspended multi-step deployment
    Resume,

    /// Roll back to a previous state
    Rollback {
        /// 'previous', a deployment id, or a commit sha
        #[arg(default_value = "previous")]
        target: String,
    },

    /// Restore a snapshot directly
    Restore {
        /// Snapshot id (see `quay snapshots`)
        snapshot_id: String,
    },

    /// Show pending changes against a ref, with per-file diffs
    Diff {
        /// Branch, tag, or commit to compare against
        #[arg(value_name = "REF")]
        target_ref: Option<String>,
    },

    /// Show deployment history
    History {
        /// Maximum entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// List snapshots
    Snapshots,

    /// Deploy the configured branch if its head moved (cron trigger)
    Check,

    /// Force-clear the deployment lock
    Unlock,

    /// Verify a webhook payload and deploy if it targets our branch
    Webhook {
        /// File containing the raw payload ('-' for stdin)
        #[arg(default_value = "-")]
        payload: PathBuf,

        /// Signature header value, e.g. 'sha256=...'
        #[arg(long)]
        signature: String,
    },

    /// Bootstrap the repository mirror
    InitRepo {
        /// Repository name
        name: String,

        /// Repository description
        #[arg(default_value = "")]
        description: String,
    },
}
