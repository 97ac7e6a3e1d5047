//! Remote session: transport options, ls-remote, fetch, and the private
//! clone each synchronizer works in.
//!
//! A [`Session`] is created per invocation in its own temporary directory.
//! The only state shared with other synchronizers is the remote's reference
//! set, which is read through [`Transport::list_remote`] and written by the
//! push coordinator.

use std::path::{Path, PathBuf};

use git2::{Cred, Direction, FetchOptions, Oid, RemoteCallbacks, Repository};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use gitops_core::{mask_url, Auth, BranchName};

use crate::error::{fs_err, git_err, SyncError};

/// Name of the single remote every session talks to.
pub const REMOTE: &str = "origin";

/// libgit2 re-invokes the credential callback after every rejection.
const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Credentials, depth and cancellation shared by every network call.
///
/// Cheap to clone; sent to blocking tasks by the tag watcher.
#[derive(Debug, Clone, Default)]
pub struct Transport {
    auth: Option<Auth>,
    depth: u32,
    cancel: CancellationToken,
}

/// One entry of a remote's reference advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub name: String,
    pub oid: Oid,
}

impl Transport {
    pub fn new(auth: Option<Auth>, depth: u32, cancel: CancellationToken) -> Self {
        Self {
            auth,
            depth,
            cancel,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail fast once the run has been cancelled.
    pub fn check_cancelled(&self, step: &'static str) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled { step });
        }
        Ok(())
    }

    /// Callbacks carrying credentials, progress logging and cancellation.
    ///
    /// Without explicit auth the SSH agent, then the git credential helper,
    /// then libgit2's defaults are tried.
    pub fn callbacks<'a>(&self) -> RemoteCallbacks<'a> {
        let mut callbacks = RemoteCallbacks::new();

        let auth = self.auth.clone();
        let mut attempts = 0u32;
        callbacks.credentials(move |url, username_from_url, allowed| {
            attempts += 1;
            if attempts > MAX_CREDENTIAL_ATTEMPTS {
                return Err(git2::Error::from_str(
                    "authentication failed: credentials were rejected",
                ));
            }
            if let Some(auth) = &auth {
                if allowed.is_user_pass_plaintext() {
                    let (username, secret) = auth.git_credentials();
                    return Cred::userpass_plaintext(username, secret);
                }
            }
            if allowed.is_ssh_key() {
                if let Some(user) = username_from_url {
                    return Cred::ssh_key_from_agent(user);
                }
            }
            if allowed.is_user_pass_plaintext() {
                if let Ok(cfg) = git2::Config::open_default() {
                    if let Ok(cred) = Cred::credential_helper(&cfg, url, username_from_url) {
                        return Ok(cred);
                    }
                }
            }
            if allowed.is_username() {
                return Cred::username(username_from_url.unwrap_or("git"));
            }
            Cred::default()
        });

        let cancel = self.cancel.clone();
        callbacks.transfer_progress(move |_| !cancel.is_cancelled());

        let cancel = self.cancel.clone();
        callbacks.sideband_progress(move |data| {
            let text = String::from_utf8_lossy(data);
            for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                tracing::debug!("> {line}");
            }
            !cancel.is_cancelled()
        });

        callbacks
    }

    pub fn fetch_options<'a>(&self) -> FetchOptions<'a> {
        let mut options = FetchOptions::new();
        options.remote_callbacks(self.callbacks());
        if self.depth > 0 {
            options.depth(i32::try_from(self.depth).unwrap_or(i32::MAX));
        }
        options
    }

    /// Read the remote's reference advertisement (`git ls-remote`).
    pub fn list_remote(&self, repo: &Repository) -> Result<Vec<RemoteRef>, SyncError> {
        self.check_cancelled("ls-remote")?;
        let mut remote = repo.find_remote(REMOTE).map_err(git_err("ls-remote"))?;
        let connection = remote
            .connect_auth(Direction::Fetch, Some(self.callbacks()), None)
            .map_err(|e| self.map_err("ls-remote", e))?;
        let refs = connection
            .list()
            .map_err(git_err("ls-remote"))?
            .iter()
            .map(|head| RemoteRef {
                name: head.name().to_owned(),
                oid: head.oid(),
            })
            .collect();
        Ok(refs)
    }

    /// Fetch `refspecs` from `origin`. An empty fetch ("already up to date")
    /// is success.
    pub fn fetch(&self, repo: &Repository, refspecs: &[String]) -> Result<(), SyncError> {
        self.check_cancelled("fetch")?;
        let mut remote = repo.find_remote(REMOTE).map_err(git_err("fetch"))?;
        let mut options = self.fetch_options();
        remote
            .fetch(refspecs, Some(&mut options), None)
            .map_err(|e| self.map_err("fetch", e))?;
        let stats = remote.stats();
        if stats.received_objects() == 0 {
            tracing::debug!("already up to date");
        } else {
            tracing::debug!(
                objects = stats.received_objects(),
                bytes = stats.received_bytes(),
                "fetched"
            );
        }
        Ok(())
    }

    /// A libgit2 error raised by an aborting callback becomes `Cancelled`.
    pub(crate) fn map_err(&self, step: &'static str, err: git2::Error) -> SyncError {
        if self.cancel.is_cancelled() {
            SyncError::Cancelled { step }
        } else {
            SyncError::Git { step, source: err }
        }
    }
}

/// Target of `refname` in an advertisement.
pub fn advertised(refs: &[RemoteRef], refname: &str) -> Option<Oid> {
    refs.iter().find(|r| r.name == refname).map(|r| r.oid)
}

/// Force refspec mirroring a remote branch into its tracking ref.
pub fn tracking_refspec(branch: &BranchName) -> String {
    format!("+{}:{}", branch.refname(), branch.tracking_refname())
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A private clone of the destination repository.
pub struct Session {
    repo: Repository,
    path: PathBuf,
    transport: Transport,
    // Dropped last; removes the clone.
    _dir: Option<TempDir>,
}

impl Session {
    /// Clone `url` into a fresh temporary directory, fetching only `base`.
    ///
    /// Fails with [`SyncError::BaseBranchMissing`] when the remote does not
    /// advertise the base branch.
    pub fn clone(url: &str, base: &BranchName, transport: Transport) -> Result<Self, SyncError> {
        let dir = tempfile::Builder::new()
            .prefix("gitops-sync-")
            .tempdir()
            .map_err(fs_err("clone", std::env::temp_dir()))?;
        let path = dir.path().to_path_buf();
        let repo = Repository::init(&path).map_err(git_err("clone"))?;
        repo.remote_with_fetch(REMOTE, url, &tracking_refspec(base))
            .map_err(|e| SyncError::Git {
                step: "clone",
                source: git2::Error::from_str(&format!("{}: {}", mask_url(url), e.message())),
            })?;

        let session = Self {
            repo,
            path,
            transport,
            _dir: Some(dir),
        };
        if session.fetch_branch(base)?.is_none() {
            return Err(SyncError::BaseBranchMissing {
                branch: base.to_string(),
            });
        }
        Ok(session)
    }

    /// Work in an existing clone (the standalone `wait` command).
    pub fn open(path: &Path, transport: Transport) -> Result<Self, SyncError> {
        let repo = Repository::open(path).map_err(git_err("open"))?;
        Ok(Self {
            repo,
            path: path.to_path_buf(),
            transport,
            _dir: None,
        })
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Fetch `branch` into its tracking ref if the remote has it.
    ///
    /// Returns the remote tip, or `None` when the branch does not exist
    /// upstream (the "no matching refspec" case, which is not an error).
    pub fn fetch_branch(&self, branch: &BranchName) -> Result<Option<Oid>, SyncError> {
        let refs = self.transport.list_remote(&self.repo)?;
        let Some(tip) = advertised(&refs, &branch.refname()) else {
            return Ok(None);
        };
        if self.tracking_tip(branch)? != Some(tip) {
            self.transport.fetch(&self.repo, &[tracking_refspec(branch)])?;
        }
        Ok(Some(tip))
    }

    /// Locally recorded remote-tracking tip of `branch`.
    pub fn tracking_tip(&self, branch: &BranchName) -> Result<Option<Oid>, SyncError> {
        lookup_ref(&self.repo, &branch.tracking_refname())
    }

    /// Point the remote-tracking ref at `oid` after a successful push.
    pub(crate) fn record_tracking(&self, branch: &BranchName, oid: Oid) -> Result<(), SyncError> {
        self.repo
            .reference(&branch.tracking_refname(), oid, true, "gitops-sync: push")
            .map_err(git_err("push"))?;
        Ok(())
    }
}

/// Resolve `refname` to a commit id; a missing ref is `None`, any other
/// lookup failure is fatal.
pub fn lookup_ref(repo: &Repository, refname: &str) -> Result<Option<Oid>, SyncError> {
    match repo.refname_to_id(refname) {
        Ok(oid) => Ok(Some(oid)),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(SyncError::Git {
            step: "resolve",
            source: e,
        }),
    }
}
