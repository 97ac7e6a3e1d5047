//! Error types for gitops-sync.

use std::path::PathBuf;

use git2::Oid;
use thiserror::Error;

use gitops_core::ConfigError;
use gitops_github::GitHubError;

/// All errors that can arise from sync, push, merge and PR operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid configuration, raised before any network I/O.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A repository operation failed; `step` names the phase.
    #[error("{step}: {source}")]
    Git {
        step: &'static str,
        #[source]
        source: git2::Error,
    },

    /// A working tree or input tree operation failed; `step` names the phase.
    #[error("{step}: I/O error at {path}: {source}")]
    Fs {
        step: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The base (or merge base) branch is not present on the remote.
    #[error("base branch '{branch}' does not exist on the remote, check your inputs")]
    BaseBranchMissing { branch: String },

    /// The lease was lost to a concurrent writer whose content differs.
    #[error(
        "push conflict on {refname}: remote is at {remote}, expected {expected}, local commit {local}"
    )]
    PushConflict {
        refname: String,
        remote: String,
        expected: String,
        local: Oid,
    },

    /// The remote refused the update for a reason other than a lost lease.
    #[error("push of {refname} rejected: {message}")]
    PushRejected { refname: String, message: String },

    /// A pull request was requested without API credentials.
    #[error("creating a pull request requires GitHub authentication")]
    MissingApiAuth,

    #[error("GitHub API error: {0}")]
    GitHub(#[from] GitHubError),

    /// The overall deadline passed or the run was interrupted.
    #[error("cancelled during {step}")]
    Cancelled { step: &'static str },
}

/// Convenience constructor for [`SyncError::Fs`].
pub(crate) fn fs_err(
    step: &'static str,
    path: impl Into<PathBuf>,
) -> impl FnOnce(std::io::Error) -> SyncError {
    let path = path.into();
    move |source| SyncError::Fs { step, path, source }
}

/// Convenience constructor for [`SyncError::Git`].
pub(crate) fn git_err(step: &'static str) -> impl FnOnce(git2::Error) -> SyncError {
    move |source| SyncError::Git { step, source }
}

/// Render an optional ref target for messages.
pub(crate) fn describe(oid: Option<Oid>) -> String {
    oid.map_or_else(|| "<absent>".to_owned(), |o| o.to_string())
}
