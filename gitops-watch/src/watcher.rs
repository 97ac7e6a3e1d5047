//! Tag convergence watcher.
//!
//! Blocks until every tag matching a glob points at a target commit or one of
//! its descendants. Deployment controllers (Flux, Argo, ...) move such a tag
//! to the revision they last applied, so convergence means the synced
//! commit is live everywhere.
//!
//! The watch set is fixed at start. A watched tag that disappears upstream is
//! fatal; a tag that cannot be resolved in one poll is only "not yet".

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use git2::{Oid, Repository};

use gitops_core::TagPattern;
use gitops_sync::remote::{advertised, RemoteRef};
use gitops_sync::{Session, Transport};

use crate::ancestry::is_ancestor_or_equal;
use crate::error::WatchError;

/// Inputs of [`wait_for_convergence`].
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Local clone whose `origin` is watched.
    pub repo_path: PathBuf,
    pub target: Oid,
    pub pattern: TagPattern,
    pub poll_interval: Duration,
    /// Credentials, depth and the cancellation token of the run.
    pub transport: Transport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// No tag matched at start; nothing to wait for.
    NoMatchingTags,
    /// Every watched tag includes the target.
    Converged { tags: Vec<String> },
}

/// Result of a single poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub converged: Vec<String>,
    pub pending: Vec<String>,
}

impl PollReport {
    pub fn is_converged(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Wait until all tags matching `options.pattern` include `options.target`.
///
/// Cancelling the transport's token ends the wait with
/// [`WatchError::Cancelled`], including during the sleep between polls.
pub async fn wait_for_convergence(options: WatchOptions) -> Result<WatchOutcome, WatchError> {
    let cancel = options.transport.cancellation().clone();

    let setup = options.clone();
    let tags = tokio::task::spawn_blocking(move || {
        let session = Session::open(&setup.repo_path, setup.transport.clone())?;
        let refs = session.transport().list_remote(session.repo())?;
        Ok::<_, WatchError>(select_tags(&refs, &setup.pattern))
    })
    .await?
    .map_err(WatchError::normalize)?;

    if tags.is_empty() {
        tracing::info!("No tags match {:?}; nothing to wait for", options.pattern.as_str());
        return Ok(WatchOutcome::NoMatchingTags);
    }
    for tag in &tags {
        tracing::info!("Selected tag {tag}");
    }

    loop {
        let poll = options.clone();
        let watched = tags.clone();
        let report = tokio::task::spawn_blocking(move || -> Result<PollReport, WatchError> {
            let session = Session::open(&poll.repo_path, poll.transport.clone())?;
            poll_once(&session, &watched, poll.target)
        })
        .await?
        .map_err(WatchError::normalize)?;

        if report.is_converged() {
            tracing::info!("All tags include commit {}", options.target);
            return Ok(WatchOutcome::Converged { tags });
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(WatchError::Cancelled),
            _ = tokio::time::sleep(options.poll_interval) => {}
        }
    }
}

/// Names of advertised tags matching `pattern`, sorted, peeled entries skipped.
pub fn select_tags(refs: &[RemoteRef], pattern: &TagPattern) -> Vec<String> {
    let mut tags: Vec<String> = refs
        .iter()
        .filter_map(|r| r.name.strip_prefix("refs/tags/"))
        .filter(|name| !name.ends_with("^{}"))
        .filter(|name| pattern.matches(name))
        .map(str::to_owned)
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

/// One poll: check that every watched tag still exists, force-fetch them,
/// and test each against `target`.
pub fn poll_once(session: &Session, tags: &[String], target: Oid) -> Result<PollReport, WatchError> {
    let repo = session.repo();
    let transport = session.transport();

    tracing::info!("Fetching tags refs");
    let refs = transport.list_remote(repo)?;
    if let Some(gone) = tags
        .iter()
        .find(|tag| advertised(&refs, &tag_refname(tag)).is_none())
    {
        return Err(WatchError::TagDisappeared { tag: gone.clone() });
    }
    let refspecs: Vec<String> = tags
        .iter()
        .map(|tag| format!("+{0}:{0}", tag_refname(tag)))
        .collect();
    transport.fetch(repo, &refspecs)?;

    let mut report = PollReport::default();
    for tag in tags {
        let (commit, tagged_at) = match resolve_tag(repo, tag) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!("{tag} failed to verify: {e}");
                report.pending.push(tag.clone());
                continue;
            }
        };
        let age = tagged_at.map(|t| format!(" (last sync {} ago)", format_age(Utc::now() - t)));
        let age = age.unwrap_or_default();
        match is_ancestor_or_equal(repo, target, commit) {
            Ok(true) => {
                tracing::info!("{tag} is up-to-date");
                report.converged.push(tag.clone());
            }
            Ok(false) => {
                tracing::info!("{tag}{age} is not yet in sync");
                report.pending.push(tag.clone());
            }
            Err(e) => {
                tracing::warn!("{tag}{age} failed to verify: {e}");
                report.pending.push(tag.clone());
            }
        }
    }
    Ok(report)
}

fn tag_refname(tag: &str) -> String {
    format!("refs/tags/{tag}")
}

/// Commit a tag points at, plus the tagger time for annotated tags.
fn resolve_tag(repo: &Repository, tag: &str) -> Result<(Oid, Option<DateTime<Utc>>), git2::Error> {
    let reference = repo.find_reference(&tag_refname(tag))?;
    let tagged_at = reference
        .target()
        .and_then(|oid| repo.find_tag(oid).ok())
        .and_then(|annotated| {
            let when = annotated.tagger()?.when();
            DateTime::from_timestamp(when.seconds(), 0)
        });
    let commit = reference.peel_to_commit()?;
    Ok((commit.id(), tagged_at))
}

/// `1h2m3s` style rendering, negative durations clamp to zero.
fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m{s}s"),
        _ => format!("{h}h{m}m{s}s"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advert(names: &[&str]) -> Vec<RemoteRef> {
        names
            .iter()
            .map(|name| RemoteRef {
                name: (*name).to_owned(),
                oid: Oid::zero(),
            })
            .collect()
    }

    #[test]
    fn selects_matching_tags_only() {
        let refs = advert(&[
            "HEAD",
            "refs/heads/gke_prod_eu",
            "refs/tags/gke_prod_us",
            "refs/tags/gke_prod_us^{}",
            "refs/tags/gke_prod_eu",
            "refs/tags/flux-sync",
        ]);
        let pattern = TagPattern::new("gke_prod_*").unwrap();
        assert_eq!(select_tags(&refs, &pattern), ["gke_prod_eu", "gke_prod_us"]);
    }

    #[test]
    fn no_match_is_empty() {
        let refs = advert(&["refs/tags/v1.0.0"]);
        let pattern = TagPattern::new("flux-*").unwrap();
        assert!(select_tags(&refs, &pattern).is_empty());
    }

    #[test]
    fn ages_are_compact() {
        assert_eq!(format_age(chrono::Duration::seconds(42)), "42s");
        assert_eq!(format_age(chrono::Duration::seconds(125)), "2m5s");
        assert_eq!(format_age(chrono::Duration::seconds(3_725)), "1h2m5s");
        assert_eq!(format_age(chrono::Duration::seconds(-5)), "0s");
    }
}
