//! Merge coordinator: bring synced artifacts into a merge-base branch.
//!
//! The merge commit's tree is whatever re-running the artifact copy on top
//! of the merge-base tip produces. Divergent edits on the merge-base branch
//! inside the managed output paths are overwritten; content outside them is
//! kept. There is no three-way content merge.

use std::path::Path;

use git2::Oid;

use gitops_core::BranchName;

use crate::engine::{self, checkout_branch, short, CommitOptions};
use crate::error::SyncError;
use crate::push::{push_with_lease, PushOutcome};
use crate::remote::Session;

/// Outcome of [`merge_if_needed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merge-base branch already contains the synced commit.
    Skipped,
    /// The merge-base branch was advanced by a merge commit.
    Merged { commit: Oid, push: PushOutcome },
}

/// Everything the merge needs to re-run the sync on the merge-base branch.
#[derive(Debug, Clone, Copy)]
pub struct MergeRequest<'a> {
    pub merge_base: &'a BranchName,
    pub head: &'a BranchName,
    pub synced: Oid,
    pub input: &'a Path,
    pub output_paths: &'a [String],
}

/// Merge `synced` into the merge-base branch unless it is already there.
pub fn merge_if_needed(
    session: &Session,
    request: MergeRequest<'_>,
    options: &CommitOptions,
) -> Result<MergeOutcome, SyncError> {
    let MergeRequest {
        merge_base,
        head,
        synced,
        input,
        output_paths,
    } = request;

    tracing::info!("Fetching merge base {}", merge_base.refname());
    let tip = session
        .fetch_branch(merge_base)?
        .ok_or_else(|| SyncError::BaseBranchMissing {
            branch: merge_base.to_string(),
        })?;
    if already_merged(session, tip, synced) {
        tracing::info!("{} already contains {}; nothing to merge", merge_base.refname(), short(synced));
        return Ok(MergeOutcome::Skipped);
    }

    tracing::info!("Merging {} into {}", head.refname(), merge_base.refname());
    checkout_branch(session.repo(), merge_base, tip)?;
    let mut merge_options = options.clone();
    merge_options.extra_parents = vec![synced];
    let message = merge_message(head, merge_base);
    let merged = engine::sync(session.repo(), output_paths, input, &merge_options, &message)?;

    let push = push_with_lease(session, merge_base, merged.oid, Some(tip))?;
    Ok(MergeOutcome::Merged {
        commit: merged.oid,
        push,
    })
}

/// The tip is the synced commit or an earlier merge of it. A shallow clone
/// that cannot answer counts as not merged.
fn already_merged(session: &Session, tip: Oid, synced: Oid) -> bool {
    tip == synced
        || session
            .repo()
            .graph_descendant_of(tip, synced)
            .unwrap_or(false)
}

pub fn merge_message(head: &BranchName, merge_base: &BranchName) -> String {
    format!("Merge branch '{head}' into {merge_base}")
}
