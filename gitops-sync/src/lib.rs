//! # gitops-sync
//!
//! Publish a directory of build artifacts into a destination git repository.
//!
//! Call [`pipeline::run`] for the whole flow, or use the pieces directly:
//! [`engine`] resolves the head branch and syncs the artifacts, [`push`]
//! publishes under a lease, [`merge`] and [`pr`] handle the optional
//! follow-ups.

pub mod engine;
pub mod error;
pub mod fsutil;
pub mod merge;
pub mod pipeline;
pub mod pr;
pub mod push;
pub mod remote;
pub mod retry;

pub use engine::{resolve_branch, sync, BranchState, CommitOptions, ResolvedBranch, SyncedCommit};
pub use error::SyncError;
pub use merge::{merge_if_needed, MergeOutcome};
pub use pipeline::{run, SyncResult};
pub use pr::{ensure_pull_request, PrOutcome};
pub use push::{push_with_lease, PushOutcome};
pub use remote::{Session, Transport};
