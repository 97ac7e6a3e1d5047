//! Orchestration entrypoint: sync → push → merge → pull request.

use git2::Oid;
use tokio_util::sync::CancellationToken;

use gitops_core::{mask_url, parse_github_repo, Identity, SyncConfig};
use gitops_github::HostingApi;

use crate::engine::{self, resolve_branch, short, CommitOptions};
use crate::error::SyncError;
use crate::merge::{merge_if_needed, MergeOutcome, MergeRequest};
use crate::pr::{ensure_pull_request, PrOutcome, PrRequest};
use crate::push::{push_with_lease, PushOutcome};
use crate::remote::{Session, Transport};
use crate::retry::Backoff;

/// Produced commit plus the session it lives in, handed to the tag watcher.
pub struct SyncResult {
    /// The commit on the head branch; the program's primary output.
    pub commit: Oid,
    pub session: Session,
    /// `None` on a dry run.
    pub push: Option<PushOutcome>,
    pub merge: Option<MergeOutcome>,
    pub pull_request: Option<PrOutcome>,
}

impl SyncResult {
    /// Web URL of the pull request that was opened or found, if any.
    pub fn pull_request_url(&self) -> Option<&str> {
        self.pull_request
            .as_ref()
            .and_then(PrOutcome::pull_request)
            .map(|pr| pr.html_url.as_str())
    }
}

/// Run one full sync for `config`.
///
/// `hub` is the hosting API; without it the commit is signed with the
/// configured author and no pull request can be opened.
pub fn run(
    config: &SyncConfig,
    hub: Option<&dyn HostingApi>,
    cancel: CancellationToken,
) -> Result<SyncResult, SyncError> {
    if config.pr_base.is_some() && hub.is_none() && !config.dry_run {
        return Err(SyncError::MissingApiAuth);
    }
    let slug = match (&config.pr_base, hub) {
        (Some(_), Some(_)) => Some(parse_github_repo(&config.output_repo)?),
        _ => None,
    };

    let identity = sign_in(config, hub)?;
    let transport = Transport::new(config.auth.clone(), config.depth, cancel);

    tracing::info!("Cloning {} ({})", mask_url(&config.output_repo), config.base.refname());
    let session = Session::clone(&config.output_repo, &config.base, transport)?;

    tracing::info!("Fetching {}", config.head.refname());
    session.fetch_branch(&config.head)?;
    let resolved = resolve_branch(session.repo(), &config.base, &config.head)?;

    let options = CommitOptions::new(identity, config.commit_time.resolve());
    let synced = engine::sync(
        session.repo(),
        &config.output_paths,
        &config.input_path,
        &options,
        &config.message,
    )?;

    if config.dry_run {
        tracing::info!("[dry-run] stopping before push of {}", short(synced.oid));
        return Ok(SyncResult {
            commit: synced.oid,
            session,
            push: None,
            merge: None,
            pull_request: None,
        });
    }

    let push = push_with_lease(&session, &config.head, synced.oid, resolved.lease)?;
    if let Some(hub) = hub {
        log_commit_url(hub, &config.output_repo, synced.oid);
    }

    let merge = match &config.merge_base {
        Some(merge_base) => Some(merge_if_needed(
            &session,
            MergeRequest {
                merge_base,
                head: &config.head,
                synced: synced.oid,
                input: &config.input_path,
                output_paths: &config.output_paths,
            },
            &options,
        )?),
        None => None,
    };

    let pull_request = match (&config.pr_base, hub, &slug) {
        (Some(pr_base), Some(hub), Some(slug)) => Some(ensure_pull_request(
            &session,
            hub,
            PrRequest {
                repo: slug,
                head: &config.head,
                base: pr_base,
                title: &config.pr_title,
                body: &config.pr_body,
                synced: synced.oid,
            },
            &Backoff::default(),
        )?),
        _ => None,
    };

    Ok(SyncResult {
        commit: synced.oid,
        session,
        push: Some(push),
        merge,
        pull_request,
    })
}

/// Verify the API credentials and pick the commit signature.
fn sign_in(config: &SyncConfig, hub: Option<&dyn HostingApi>) -> Result<Identity, SyncError> {
    if let Some(auth) = &config.auth {
        tracing::info!("{auth}");
    }
    let Some(hub) = hub else {
        return Ok(config.author.clone());
    };
    let user = hub.current_user()?;
    tracing::info!("Signed in as {:?}", user.login);
    Ok(user.identity())
}

/// Best effort: the push already succeeded.
fn log_commit_url(hub: &dyn HostingApi, output_repo: &str, oid: Oid) {
    let slug = match parse_github_repo(output_repo) {
        Ok(slug) => slug,
        Err(e) => {
            tracing::debug!("not looking up commit URL: {e}");
            return;
        }
    };
    match hub.commit(&slug, &oid.to_string()) {
        Ok(info) => tracing::info!("Commit {}", info.html_url),
        Err(e) => tracing::warn!("could not look up commit {}: {e}", short(oid)),
    }
}
