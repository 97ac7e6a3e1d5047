//! `gitops-sync sync`: sync, push, merge, open a PR, then wait for tags.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use gitops_core::{RawConfig, SyncConfig};
use gitops_github::{GitHubClient, HostingApi};
use gitops_sync::pipeline;
use gitops_watch::{wait_for_convergence, WatchOptions, WatchOutcome};

use crate::runtime;

/// Arguments for `gitops-sync sync`. Every flag can also come from the
/// environment or from the `--config` file; flags win over the file.
#[derive(Args, Debug, Default)]
pub struct SyncArgs {
    /// YAML file with defaults for any of the options below (kebab-case keys).
    #[arg(long, env = "GITOPS_SYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Commit message [default: Sync ${CI_PROJECT_NAME:-$PWD}/${CI_COMMIT_REF_NAME:-unknown}]
    #[arg(long, env = "MESSAGE")]
    pub message: Option<String>,

    /// Where to read artifacts from [default: .]
    #[arg(long, env = "INPUT_PATH")]
    pub input_path: Option<PathBuf>,

    /// Repository to write artifacts to (URL or local path).
    #[arg(long, env = "OUTPUT_REPO")]
    pub output_repo: Option<String>,

    /// Comma separated paths inside the repository to write to [default: .]
    #[arg(long, env = "OUTPUT_REPO_PATH")]
    pub output_repo_path: Option<String>,

    /// Branch to start from [default: develop]
    #[arg(long, env = "OUTPUT_BASE")]
    pub output_base: Option<String>,

    /// Branch to write to [default: auto/sync/<timestamp>]
    #[arg(long, env = "OUTPUT_HEAD")]
    pub output_head: Option<String>,

    /// Open a draft pull request from the head branch into this branch.
    #[arg(long, env = "PR")]
    pub pr: Option<String>,

    /// Merge the synced commit straight into this branch.
    #[arg(long, env = "MERGE")]
    pub merge: Option<String>,

    /// Pull request title [default: Sync]
    #[arg(long, env = "PR_TITLE")]
    pub pr_title: Option<String>,

    /// Pull request body [default: Sync]
    #[arg(long, env = "PR_BODY")]
    pub pr_body: Option<String>,

    /// `now` or an RFC 3339 time, e.g. $CI_COMMIT_TIMESTAMP [default: now]
    #[arg(long, env = "COMMIT_TIMESTAMP")]
    pub commit_timestamp: Option<String>,

    /// Commit locally but do not push, merge, nor open a PR.
    #[arg(long, env = "DRY_RUN")]
    pub dry_run: bool,

    /// Shallow clone depth; 0 clones full history [default: 0]
    #[arg(long, env = "DEPTH")]
    pub depth: Option<u32>,

    /// After pushing, wait until tags matching this glob include the commit.
    #[arg(long, env = "WAIT_FOR_TAGS")]
    pub wait_for_tags: Option<String>,

    /// Seconds between tag polls [default: 2]
    #[arg(long, env = "WAIT_INTERVAL")]
    pub wait_interval: Option<u64>,

    /// Abort the whole run after this many seconds.
    #[arg(long, env = "GITOPS_SYNC_TIMEOUT")]
    pub timeout: Option<u64>,

    /// GitHub username for basic auth.
    #[arg(long, env = "GITHUB_USERNAME")]
    pub github_username: Option<String>,

    /// GitHub password for basic auth.
    #[arg(long, env = "GITHUB_PASSWORD", hide_env_values = true)]
    pub github_password: Option<String>,

    /// GitHub one-time password for basic auth.
    #[arg(long, env = "GITHUB_OTP", hide_env_values = true)]
    pub github_otp: Option<String>,

    /// GitHub token; mutually exclusive with basic auth.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Commit author when no GitHub identity is available [default: gitops-sync]
    #[arg(long, env = "AUTHOR_NAME")]
    pub author_name: Option<String>,

    /// Commit author email when no GitHub identity is available [default: gitops-sync@localhost]
    #[arg(long, env = "AUTHOR_EMAIL")]
    pub author_email: Option<String>,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let config = self.load_config()?;
        let timeout = config.timeout;

        runtime::block_on(timeout, |cancel| async move {
            let pipeline_config = config.clone();
            let result = tokio::task::spawn_blocking(move || {
                let hub = pipeline_config.auth.clone().map(GitHubClient::new);
                pipeline::run(
                    &pipeline_config,
                    hub.as_ref().map(|h| h as &dyn HostingApi),
                    cancel,
                )
            })
            .await
            .context("sync task panicked")?
            .context("sync failed")?;

            println!("{}", result.commit);
            if let Some(url) = result.pull_request_url() {
                tracing::info!("Pull request: {url}");
            }

            let Some(pattern) = config.wait_for_tags.clone() else {
                return Ok(());
            };
            if config.dry_run {
                tracing::info!("[dry-run] not waiting for tags");
                return Ok(());
            }
            tracing::info!("Waiting for tags ({:?}) to include synced commit", pattern.as_str());
            let outcome = wait_for_convergence(WatchOptions {
                repo_path: result.session.path().to_path_buf(),
                target: result.commit,
                pattern,
                poll_interval: config.poll_interval,
                transport: result.session.transport().clone(),
            })
            .await
            .context("error waiting for tags")?;
            if let WatchOutcome::Converged { tags } = outcome {
                tracing::info!("{} tag(s) converged", tags.len());
            }
            // The clone lives in a temp dir owned by the session.
            drop(result);
            Ok(())
        })
    }

    /// Flags and environment first, then the config file, then defaults.
    fn load_config(&self) -> Result<SyncConfig> {
        let mut raw = self.to_raw();
        if let Some(path) = &self.config {
            let file = RawConfig::load_file(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?;
            raw = raw.or(file);
        }
        raw.into_config().context("invalid configuration")
    }

    fn to_raw(&self) -> RawConfig {
        RawConfig {
            message: self.message.clone(),
            input_path: self.input_path.clone(),
            output_repo: self.output_repo.clone(),
            output_repo_path: self.output_repo_path.clone(),
            output_base: self.output_base.clone(),
            output_head: self.output_head.clone(),
            pr: self.pr.clone(),
            merge: self.merge.clone(),
            pr_title: self.pr_title.clone(),
            pr_body: self.pr_body.clone(),
            commit_timestamp: self.commit_timestamp.clone(),
            dry_run: self.dry_run.then_some(true),
            depth: self.depth,
            wait_for_tags: self.wait_for_tags.clone(),
            wait_interval: self.wait_interval,
            timeout: self.timeout,
            github_username: self.github_username.clone(),
            github_password: self.github_password.clone(),
            github_otp: self.github_otp.clone(),
            github_token: self.github_token.clone(),
            author_name: self.author_name.clone(),
            author_email: self.author_email.clone(),
        }
    }
}
