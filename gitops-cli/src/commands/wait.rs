//! `gitops-sync wait`: watch tags of an existing clone.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use git2::Oid;

use gitops_core::{config::DEFAULT_POLL_INTERVAL, Auth, TagPattern};
use gitops_sync::Transport;
use gitops_watch::{wait_for_convergence, WatchOptions};

use crate::runtime;

/// Arguments for `gitops-sync wait`.
#[derive(Args, Debug)]
pub struct WaitArgs {
    /// Local clone whose `origin` remote carries the tags.
    pub repo: PathBuf,

    /// Commit every matching tag must include.
    pub commit: String,

    /// Tag glob, e.g. `gke_myproject_*`.
    pub pattern: String,

    /// Seconds between polls [default: 2]
    #[arg(long, env = "WAIT_INTERVAL")]
    pub wait_interval: Option<u64>,

    /// Give up after this many seconds.
    #[arg(long, env = "GITOPS_SYNC_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Shallow fetch depth; 0 fetches full history.
    #[arg(long, env = "DEPTH", default_value_t = 0)]
    pub depth: u32,

    #[arg(long, env = "GITHUB_USERNAME")]
    pub github_username: Option<String>,

    #[arg(long, env = "GITHUB_PASSWORD", hide_env_values = true)]
    pub github_password: Option<String>,

    #[arg(long, env = "GITHUB_OTP", hide_env_values = true)]
    pub github_otp: Option<String>,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,
}

impl WaitArgs {
    pub fn run(self) -> Result<()> {
        let target = Oid::from_str(&self.commit)
            .with_context(|| format!("invalid commit hash '{}'", self.commit))?;
        let pattern = TagPattern::new(&self.pattern).context("invalid tag glob")?;
        let auth = Auth::from_parts(
            self.github_username.clone(),
            self.github_password.clone(),
            self.github_otp.clone(),
            self.github_token.clone(),
        )
        .context("invalid authentication options")?;
        if let Some(auth) = &auth {
            tracing::info!("{auth}");
        }
        let poll_interval = self
            .wait_interval
            .filter(|s| *s > 0)
            .map_or(DEFAULT_POLL_INTERVAL, Duration::from_secs);
        let timeout = self.timeout.filter(|s| *s > 0).map(Duration::from_secs);

        runtime::block_on(timeout, |cancel| async move {
            tracing::info!("Waiting for tags ({:?}) to include commit {target}", pattern.as_str());
            wait_for_convergence(WatchOptions {
                repo_path: self.repo,
                target,
                pattern,
                poll_interval,
                transport: Transport::new(auth, self.depth, cancel),
            })
            .await
            .context("error waiting for tags")?;
            Ok(())
        })
    }
}
