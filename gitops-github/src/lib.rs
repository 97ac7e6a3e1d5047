//! # gitops-github
//!
//! Minimal code-hosting REST client.
//!
//! Only what the sync pipeline needs: identify the authenticated user, list
//! and create pull requests, and look up a commit's web URL for logging.
//! [`HostingApi`] is the seam the sync pipeline is written against.

pub mod client;
pub mod error;
pub mod types;

pub use client::{GitHubClient, HostingApi, DEFAULT_API_URL};
pub use error::GitHubError;
pub use types::{CommitInfo, NewPullRequest, PullRequest, User};
