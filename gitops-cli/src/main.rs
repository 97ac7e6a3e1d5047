//! gitops-sync: publish build artifacts into a GitOps repository.
//!
//! # Usage
//!
//! ```text
//! gitops-sync sync --output-repo <url> [--output-repo-path a,b] [--output-base develop]
//!                  [--output-head <branch>] [--pr <base>] [--merge <base>]
//!                  [--commit-timestamp now|<rfc3339>] [--dry-run] [--wait-for-tags <glob>]
//! gitops-sync wait <repo-dir> <commit> <glob>
//! ```
//!
//! Progress is logged to stderr; stdout carries only the produced commit hash.

mod commands;
mod runtime;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{sync::SyncArgs, wait::WaitArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "gitops-sync",
    version,
    about = "Publish a directory of build artifacts into a GitOps repository",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync artifacts to a branch, then optionally merge, open a PR and wait for tags.
    Sync(SyncArgs),

    /// Wait until tags matching a glob include a commit.
    Wait(WaitArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    runtime::init_tracing();
    tracing::info!("Running gitops-sync {}", env!("CARGO_PKG_VERSION"));
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Wait(args) => args.run(),
    }
}
