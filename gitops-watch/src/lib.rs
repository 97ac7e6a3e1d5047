//! # gitops-watch
//!
//! Wait for deployment-tracking tags to absorb a pushed commit.
//!
//! [`wait_for_convergence`] polls the `origin` remote of a local clone until
//! every tag matching a glob points at the target commit or a descendant.

pub mod ancestry;
pub mod error;
pub mod watcher;

pub use ancestry::is_ancestor_or_equal;
pub use error::WatchError;
pub use watcher::{poll_once, select_tags, wait_for_convergence, PollReport, WatchOptions, WatchOutcome};
