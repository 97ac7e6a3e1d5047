//! Push coordinator: compare-and-swap push of a branch tip.
//!
//! The push carries the head tip observed when the sync started (the lease).
//! The remote tip is re-read on the push connection before anything is sent.
//!
//! Network remotes receive the update on that same connection; the command
//! carries the advertised old value and receive-pack refuses it when the ref
//! has moved. libgit2's local transport never compares old values, so for
//! path and `file://` remotes the objects go to a scratch ref and the branch
//! is moved in the destination repository with a matching-old-value update,
//! which libgit2 performs under the ref lock.
//!
//! On rejection the contested ref alone is re-fetched. If the remote now
//! holds exactly the locally produced commit, a concurrent synchronizer
//! already published identical content and the push counts as recovered.
//! Anything else is a genuine conflict.

use std::cell::RefCell;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use git2::{Direction, ErrorCode, Oid, PushOptions, Remote, Repository};

use gitops_core::{BranchName, RepoAddress};

use crate::engine::short;
use crate::error::{describe, git_err, SyncError};
use crate::remote::{advertised, tracking_refspec, Session, Transport, REMOTE};
use crate::retry::{with_backoff, Backoff};

/// Local ref the pushed commit is staged under.
const PUSH_SOURCE: &str = "refs/gitops-sync/push";

/// How long a loser waits for a concurrent writer holding the ref lock.
const LOCK_WAIT: Backoff = Backoff {
    attempts: 8,
    base: Duration::from_millis(25),
    max: Duration::from_millis(800),
};

static SCRATCH_SEQ: AtomicU64 = AtomicU64::new(0);

/// Non-error outcomes of [`push_with_lease`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The remote branch now points at the commit.
    Pushed,
    /// The remote branch already pointed at the commit.
    UpToDate,
    /// The lease was lost, but the winner pushed the identical commit.
    Recovered,
}

/// Why a push attempt did not go through.
enum Attempt {
    Done(PushOutcome),
    Rejected(String),
}

/// Push `commit` to `branch` provided the remote tip still equals `lease`.
pub fn push_with_lease(
    session: &Session,
    branch: &BranchName,
    commit: Oid,
    lease: Option<Oid>,
) -> Result<PushOutcome, SyncError> {
    let refname = branch.refname();
    tracing::info!("Pushing {refname} ({}, lease {})", short(commit), describe(lease));

    let outcome = match attempt(session, &refname, commit, lease)? {
        Attempt::Done(outcome) => outcome,
        Attempt::Rejected(reason) => recover(session, branch, commit, lease, reason)?,
    };
    session.record_tracking(branch, commit)?;
    match outcome {
        PushOutcome::Pushed => tracing::info!("Pushed {}", short(commit)),
        PushOutcome::UpToDate => tracing::info!("{refname} already up to date"),
        PushOutcome::Recovered => tracing::info!(
            "{refname} was pushed concurrently with identical commit {}",
            short(commit)
        ),
    }
    Ok(outcome)
}

fn attempt(
    session: &Session,
    refname: &str,
    commit: Oid,
    lease: Option<Oid>,
) -> Result<Attempt, SyncError> {
    let transport = session.transport();
    transport.check_cancelled("push")?;
    let repo = session.repo();

    // Push from a scratch ref so the local branch name is irrelevant.
    repo.reference(PUSH_SOURCE, commit, true, "gitops-sync: push source")
        .map_err(git_err("push"))?;

    let mut remote = repo.find_remote(REMOTE).map_err(git_err("push"))?;
    let local_dir = remote
        .url()
        .and_then(|url| RepoAddress::parse(url).ok())
        .and_then(|address| address.local_path());
    let mut connection = remote
        .connect_auth(Direction::Push, Some(transport.callbacks()), None)
        .map_err(|e| transport.map_err("push", e))?;

    let observed = {
        let refs = connection.list().map_err(git_err("push"))?;
        refs.iter().find(|h| h.name() == refname).map(|h| h.oid())
    };
    if observed == Some(commit) {
        return Ok(Attempt::Done(PushOutcome::UpToDate));
    }
    if observed != lease {
        return Ok(Attempt::Rejected(format!(
            "stale info: remote is at {}, lease expects {}",
            describe(observed),
            describe(lease)
        )));
    }

    match local_dir {
        Some(dir) => {
            let scratch = format!(
                "refs/gitops-sync/incoming/{}-{}",
                std::process::id(),
                SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed)
            );
            if let Some(reason) = send(transport, connection.remote(), &scratch)? {
                return Ok(Attempt::Rejected(reason));
            }
            swap_local(&dir, &scratch, refname, commit, lease)
        }
        None => match send(transport, connection.remote(), refname)? {
            Some(reason) => Ok(Attempt::Rejected(reason)),
            None => Ok(Attempt::Done(PushOutcome::Pushed)),
        },
    }
}

/// Force-push the staged commit to `target`; `Some(reason)` on rejection.
fn send(
    transport: &Transport,
    remote: &mut Remote<'_>,
    target: &str,
) -> Result<Option<String>, SyncError> {
    let rejection: RefCell<Option<String>> = RefCell::new(None);
    let result = {
        let mut callbacks = transport.callbacks();
        callbacks.push_update_reference(|_refname, status| {
            if let Some(message) = status {
                *rejection.borrow_mut() = Some(message.to_owned());
            }
            Ok(())
        });
        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);
        let refspec = format!("+{PUSH_SOURCE}:{target}");
        remote.push(&[refspec.as_str()], Some(&mut options))
    };

    if let Err(err) = result {
        if is_rejection(err.message()) {
            return Ok(Some(err.message().to_owned()));
        }
        return Err(transport.map_err("push", err));
    }
    Ok(rejection.into_inner())
}

/// Move `refname` in the destination repository only if it still equals
/// `lease`, then drop the scratch ref that carried the objects.
fn swap_local(
    dir: &Path,
    scratch: &str,
    refname: &str,
    commit: Oid,
    lease: Option<Oid>,
) -> Result<Attempt, SyncError> {
    let dest = Repository::open(dir).map_err(git_err("push"))?;
    let message = "gitops-sync: push";
    let updated = match lease {
        Some(expected) => dest.reference_matching(refname, commit, true, expected, message),
        None => dest.reference(refname, commit, false, message),
    };

    if let Err(e) = dest.find_reference(scratch).and_then(|mut r| r.delete()) {
        tracing::debug!("Leaving scratch ref {scratch}: {}", e.message());
    }

    match updated {
        Ok(_) => Ok(Attempt::Done(PushOutcome::Pushed)),
        Err(e) if matches!(e.code(), ErrorCode::Modified | ErrorCode::Exists | ErrorCode::Locked) => {
            Ok(Attempt::Rejected(e.message().to_owned()))
        }
        Err(e) => Err(git_err("push")(e)),
    }
}

/// Re-fetch the contested ref and compare it to the local commit.
fn recover(
    session: &Session,
    branch: &BranchName,
    commit: Oid,
    lease: Option<Oid>,
    reason: String,
) -> Result<PushOutcome, SyncError> {
    let refname = branch.refname();
    tracing::warn!("Push of {refname} rejected ({reason}); re-fetching");

    let mut remote_tip = listed_tip(session, &refname)?;
    if remote_tip == lease && is_lock_contention(&reason) {
        // Another writer holds the ref lock; wait for its update to land.
        remote_tip = with_backoff(
            &LOCK_WAIT,
            |_| {
                let tip = listed_tip(session, &refname)?;
                if tip == lease {
                    return Err(SyncError::PushRejected {
                        refname: refname.clone(),
                        message: reason.clone(),
                    });
                }
                Ok(tip)
            },
            |e| matches!(e, SyncError::PushRejected { .. }),
        )?;
    }
    if remote_tip.is_some() {
        session
            .transport()
            .fetch(session.repo(), &[tracking_refspec(branch)])?;
    }

    if remote_tip == Some(commit) {
        return Ok(PushOutcome::Recovered);
    }
    if remote_tip == lease {
        // Lease still holds, so the remote refused for another reason.
        return Err(SyncError::PushRejected {
            refname,
            message: reason,
        });
    }
    Err(SyncError::PushConflict {
        refname,
        remote: describe(remote_tip),
        expected: describe(lease),
        local: commit,
    })
}

fn listed_tip(session: &Session, refname: &str) -> Result<Option<Oid>, SyncError> {
    let refs = session.transport().list_remote(session.repo())?;
    Ok(advertised(&refs, refname))
}

fn is_lock_contention(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("failed to lock") || message.contains("cannot lock ref")
}

fn is_rejection(message: &str) -> bool {
    let message = message.to_lowercase();
    [
        "stale info",
        "non-fast-forward",
        "fetch first",
        "cannot lock ref",
        "failed to update ref",
        "failed to lock",
        "reference already exists",
        "rejected",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}
