//! Sync engine: branch resolution and the artifact sync itself.
//!
//! ## Branch resolution
//!
//! | remote head          | state             | checkout            | lease        |
//! |----------------------|-------------------|---------------------|--------------|
//! | absent               | `NoHead`          | new branch at base  | none         |
//! | equals base tip      | `HeadMatchesBase` | head                | head tip     |
//! | differs from base    | `HeadDiverged`    | base tip (forced)   | old head tip |
//!
//! Every sync therefore starts from the latest base; prior head history is
//! discarded and only remembered as the push precondition.
//!
//! ## `sync` — per invocation
//!
//! 1. For each output path, in order: delete, mkdir (unless root), copy.
//! 2. Stage the actual status, deletions included.
//! 3. No changes → return the current tip; otherwise commit.

use std::path::Path;

use chrono::{DateTime, FixedOffset};
use git2::{build::CheckoutBuilder, Commit, Oid, Repository, Signature, Status, StatusOptions};

use gitops_core::{BranchName, Identity, SyncConfig};

use crate::error::{fs_err, git_err, SyncError};
use crate::fsutil;
use crate::remote::lookup_ref;

// ---------------------------------------------------------------------------
// Branch resolution
// ---------------------------------------------------------------------------

/// Relationship between the remote head branch and the base branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    NoHead,
    HeadMatchesBase,
    HeadDiverged { previous: Oid },
}

/// Outcome of [`resolve_branch`]: what was checked out and the push lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBranch {
    pub state: BranchState,
    pub base_tip: Oid,
    /// Remote head tip the push must still find, `None` for a new branch.
    pub lease: Option<Oid>,
}

/// Resolve and check out the head branch from the fetched tracking refs.
pub fn resolve_branch(
    repo: &Repository,
    base: &BranchName,
    head: &BranchName,
) -> Result<ResolvedBranch, SyncError> {
    let base_tip = lookup_ref(repo, &base.tracking_refname())?.ok_or_else(|| {
        SyncError::BaseBranchMissing {
            branch: base.to_string(),
        }
    })?;
    let head_tip = lookup_ref(repo, &head.tracking_refname())?;

    let state = match head_tip {
        None => {
            tracing::info!("Creating head branch {} from base {}", head.refname(), base.refname());
            BranchState::NoHead
        }
        Some(tip) if tip == base_tip => {
            tracing::info!("Using {} as existing head", head.refname());
            BranchState::HeadMatchesBase
        }
        Some(previous) => {
            tracing::info!(
                "Resetting existing head {} ({}) onto base {} ({})",
                head.refname(),
                short(previous),
                base.refname(),
                short(base_tip)
            );
            BranchState::HeadDiverged { previous }
        }
    };

    checkout_branch(repo, head, base_tip)?;
    Ok(ResolvedBranch {
        state,
        base_tip,
        lease: head_tip,
    })
}

/// Point local `branch` at `target` and force-check it out, discarding any
/// working tree content.
pub fn checkout_branch(repo: &Repository, branch: &BranchName, target: Oid) -> Result<(), SyncError> {
    let commit = repo.find_commit(target).map_err(git_err("checkout"))?;
    // The branch may be the current HEAD, which libgit2 refuses to move.
    repo.set_head_detached(target).map_err(git_err("checkout"))?;
    repo.branch(branch.as_str(), &commit, true)
        .map_err(git_err("checkout"))?;
    repo.set_head(&branch.refname()).map_err(git_err("checkout"))?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force().remove_untracked(true);
    repo.checkout_head(Some(&mut checkout))
        .map_err(git_err("checkout"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Signature and parents of the commit `sync` may create.
#[derive(Debug, Clone)]
pub struct CommitOptions {
    pub identity: Identity,
    pub time: DateTime<FixedOffset>,
    /// Parents after the checked-out tip; the merge coordinator passes the
    /// synced commit here.
    pub extra_parents: Vec<Oid>,
}

impl CommitOptions {
    pub fn new(identity: Identity, time: DateTime<FixedOffset>) -> Self {
        Self {
            identity,
            time,
            extra_parents: Vec::new(),
        }
    }

    fn signature(&self) -> Result<Signature<'static>, git2::Error> {
        let offset_minutes = self.time.offset().local_minus_utc() / 60;
        Signature::new(
            &self.identity.name,
            &self.identity.email,
            &git2::Time::new(self.time.timestamp(), offset_minutes),
        )
    }
}

/// Result of one sync invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncedCommit {
    pub oid: Oid,
    /// False when the tree was unchanged and the existing tip was returned.
    pub created: bool,
}

/// Per-path change classification used for staging and logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    fn marker(self) -> char {
        match self {
            ChangeKind::Added => 'A',
            ChangeKind::Modified => 'M',
            ChangeKind::Deleted => 'D',
        }
    }
}

/// Sync `input` into every output path of the checked-out branch and commit.
pub fn sync(
    repo: &Repository,
    output_paths: &[String],
    input: &Path,
    options: &CommitOptions,
    message: &str,
) -> Result<SyncedCommit, SyncError> {
    let workdir = repo
        .workdir()
        .ok_or_else(|| SyncError::Git {
            step: "worktree",
            source: git2::Error::from_str("repository has no working tree"),
        })?
        .to_path_buf();

    tracing::info!("Cleaning up files");
    for path in output_paths {
        fsutil::remove_recursively(&workdir, path).map_err(fs_err("delete", workdir.join(path)))?;
    }

    tracing::info!("Copying files");
    for path in output_paths {
        let target = if SyncConfig::is_root(path) {
            workdir.clone()
        } else {
            fsutil::chroot_mkdir(&workdir, path).map_err(fs_err("mkdir", workdir.join(path)))?
        };
        let copied = fsutil::copy_tree(input, &target).map_err(fs_err("copy", input))?;
        tracing::debug!(path = %path, files = copied, "copied artifacts");
    }

    tracing::info!("Adding files to git");
    let changes = worktree_status(repo)?;
    let tree_oid = stage(repo, &changes)?;

    let head = repo
        .head()
        .and_then(|h| h.peel_to_commit())
        .map_err(git_err("commit"))?;
    // A merge commit is still recorded with an unchanged tree so the synced
    // commit becomes reachable from the merge base.
    let unchanged = changes.is_empty() || tree_oid == head.tree_id();
    if unchanged && options.extra_parents.is_empty() {
        tracing::info!("No changes. Skipping commit.");
        return Ok(SyncedCommit {
            oid: head.id(),
            created: false,
        });
    }

    tracing::info!("Sync changes:");
    for change in &changes {
        tracing::info!("> {} {}", change.kind.marker(), change.path);
    }

    let oid = commit(repo, &head, tree_oid, options, message)?;
    tracing::info!("Created commit {oid}");
    Ok(SyncedCommit { oid, created: true })
}

/// Classify every changed path of the working tree against HEAD.
pub fn worktree_status(repo: &Repository) -> Result<Vec<Change>, SyncError> {
    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false)
        .renames_head_to_index(false);
    let statuses = repo.statuses(Some(&mut options)).map_err(git_err("status"))?;

    let mut changes = Vec::new();
    for entry in statuses.iter() {
        let Some(path) = entry.path() else {
            tracing::warn!("skipping non UTF-8 path in status");
            continue;
        };
        let status = entry.status();
        let kind = if status.intersects(Status::WT_DELETED | Status::INDEX_DELETED) {
            ChangeKind::Deleted
        } else if status.intersects(Status::WT_NEW | Status::INDEX_NEW) {
            ChangeKind::Added
        } else if status.intersects(
            Status::WT_MODIFIED
                | Status::WT_TYPECHANGE
                | Status::INDEX_MODIFIED
                | Status::INDEX_TYPECHANGE,
        ) {
            ChangeKind::Modified
        } else {
            continue;
        };
        changes.push(Change {
            path: path.to_owned(),
            kind,
        });
    }
    changes.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(changes)
}

/// `git add -A` restricted to the reported changes: additions and
/// modifications are added, deletions removed from the index.
fn stage(repo: &Repository, changes: &[Change]) -> Result<Oid, SyncError> {
    let mut index = repo.index().map_err(git_err("stage"))?;
    for change in changes {
        let path = Path::new(&change.path);
        match change.kind {
            ChangeKind::Deleted => index.remove_path(path),
            ChangeKind::Added | ChangeKind::Modified => index.add_path(path),
        }
        .map_err(git_err("stage"))?;
    }
    index.write().map_err(git_err("stage"))?;
    index.write_tree().map_err(git_err("stage"))
}

fn commit(
    repo: &Repository,
    head: &Commit<'_>,
    tree_oid: Oid,
    options: &CommitOptions,
    message: &str,
) -> Result<Oid, SyncError> {
    let signature = options.signature().map_err(git_err("commit"))?;
    let tree = repo.find_tree(tree_oid).map_err(git_err("commit"))?;
    let mut parents = vec![head.clone()];
    for oid in &options.extra_parents {
        parents.push(repo.find_commit(*oid).map_err(git_err("commit"))?);
    }
    let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();
    repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parent_refs)
        .map_err(git_err("commit"))
}

pub(crate) fn short(oid: Oid) -> String {
    let mut s = oid.to_string();
    s.truncate(8);
    s
}
