use thiserror::Error;

use gitops_sync::SyncError;

/// Error surface of the tag convergence watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    /// A watched tag vanished upstream; convergence can no longer be verified.
    #[error("failed to wait because tag '{tag}' disappeared from the remote")]
    TagDisappeared { tag: String },

    #[error("{step}: {source}")]
    Git {
        step: &'static str,
        #[source]
        source: git2::Error,
    },

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("waiting for tags was cancelled")]
    Cancelled,

    #[error("tag watch task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl WatchError {
    /// Fold transport-level cancellation into [`WatchError::Cancelled`].
    pub(crate) fn normalize(self) -> Self {
        match self {
            WatchError::Sync(SyncError::Cancelled { .. }) => WatchError::Cancelled,
            other => other,
        }
    }
}
