//! gitops-sync core library — configuration, typed values, errors.
//!
//! Public API surface:
//! - [`types`] — branch names, commit time, tag glob, auth modes
//! - [`config`] — [`RawConfig`] (flags / env / YAML file) and the validated [`SyncConfig`]
//! - [`repo_url`] — URL masking and `org/repo` slug parsing
//! - [`error`] — [`ConfigError`]

pub mod config;
pub mod error;
pub mod repo_url;
pub mod types;

pub use config::{RawConfig, SyncConfig};
pub use error::ConfigError;
pub use repo_url::{mask_url, parse_github_repo, RepoAddress, RepoSlug};
pub use types::{Auth, BranchName, CommitTime, Identity, TagPattern};
