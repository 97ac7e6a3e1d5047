//! PR coordinator: make sure a pull request exists from head into the PR base.

use git2::Oid;

use gitops_core::{BranchName, RepoSlug};
use gitops_github::{GitHubError, HostingApi, NewPullRequest, PullRequest};

use crate::engine::short;
use crate::error::SyncError;
use crate::remote::Session;
use crate::retry::{with_backoff, Backoff};

/// Outcome of [`ensure_pull_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrOutcome {
    /// The PR base already points at the synced commit.
    Skipped,
    /// An open pull request for head → base was found; nothing was written.
    Existing(PullRequest),
    /// A new draft pull request was opened.
    Created(PullRequest),
}

impl PrOutcome {
    pub fn pull_request(&self) -> Option<&PullRequest> {
        match self {
            PrOutcome::Skipped => None,
            PrOutcome::Existing(pr) | PrOutcome::Created(pr) => Some(pr),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PrRequest<'a> {
    pub repo: &'a RepoSlug,
    pub head: &'a BranchName,
    pub base: &'a BranchName,
    pub title: &'a str,
    pub body: &'a str,
    pub synced: Oid,
}

/// Idempotently open a draft pull request for `request.head` into
/// `request.base`.
///
/// Creation is retried with backoff: a freshly pushed head branch
/// can take a moment to become visible to the API.
pub fn ensure_pull_request(
    session: &Session,
    api: &dyn HostingApi,
    request: PrRequest<'_>,
    backoff: &Backoff,
) -> Result<PrOutcome, SyncError> {
    let PrRequest {
        repo,
        head,
        base,
        title,
        body,
        synced,
    } = request;

    if session.fetch_branch(base)? == Some(synced) {
        tracing::info!("{} already at {}; no pull request needed", base.refname(), short(synced));
        return Ok(PrOutcome::Skipped);
    }

    let open = api.list_open_pulls(repo, head.as_str(), base.as_str())?;
    if let Some(existing) = open.into_iter().next() {
        tracing::info!("Pull request #{} already open: {}", existing.number, existing.html_url);
        return Ok(PrOutcome::Existing(existing));
    }

    tracing::info!("Creating pull request {} -> {}", head, base);
    let new = NewPullRequest {
        title: title.to_owned(),
        head: head.as_str().to_owned(),
        base: base.as_str().to_owned(),
        body: body.to_owned(),
        draft: true,
    };
    session.transport().check_cancelled("pull request")?;
    let created = with_backoff(
        backoff,
        |_| api.create_pull(repo, &new),
        |e: &GitHubError| e.is_retryable(),
    )?;
    tracing::info!("Created pull request #{}: {}", created.number, created.html_url);
    Ok(PrOutcome::Created(created))
}
