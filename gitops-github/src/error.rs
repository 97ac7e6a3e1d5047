//! Error types for gitops-github.

use thiserror::Error;

/// All errors that can arise from REST calls.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// The API answered with a non-2xx status.
    #[error("GitHub API returned {status} for {endpoint}: {message}")]
    Status {
        status: u16,
        endpoint: String,
        message: String,
    },

    /// DNS, TLS, connect or timeout failure.
    #[error("GitHub API request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    /// The response body did not match the expected shape.
    #[error("failed to decode GitHub API response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
}

impl GitHubError {
    /// Whether a retry may succeed: transport failures, server errors, and
    /// the 422 raised while a just-pushed head branch is not yet visible to
    /// the PR endpoint. Other validation failures ("No commits between",
    /// "A pull request already exists") are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            GitHubError::Status {
                status: 422,
                message,
                ..
            } => message.contains("head invalid"),
            GitHubError::Status { status, .. } => *status >= 500,
            GitHubError::Transport { .. } => true,
            GitHubError::Decode { .. } => false,
        }
    }
}
