//! Commit graph reachability.

use std::collections::HashSet;

use git2::{Oid, Repository};

/// True when `target` is `tip` or one of its ancestors.
///
/// Depth-first over parent edges with an explicit stack, so long histories
/// cannot overflow the call stack. Each commit is visited at most once.
pub fn is_ancestor_or_equal(repo: &Repository, target: Oid, tip: Oid) -> Result<bool, git2::Error> {
    let mut stack = vec![tip];
    let mut seen = HashSet::new();
    while let Some(oid) = stack.pop() {
        if oid == target {
            return Ok(true);
        }
        if !seen.insert(oid) {
            continue;
        }
        let commit = repo.find_commit(oid)?;
        stack.extend(commit.parent_ids());
    }
    Ok(false)
}
