//! Strongly typed configuration values.
//!
//! Every value here is parsed once while the configuration is validated and
//! then handed around by reference; nothing re-parses strings downstream.

use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// BranchName
// ---------------------------------------------------------------------------

/// A short branch name (`develop`, `auto/sync/20240101T000000Z`).
///
/// Validated against the subset of `git check-ref-format` rules that matter
/// for names supplied on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        let name = if name.starts_with("refs/heads/") {
            name["refs/heads/".len()..].to_owned()
        } else {
            name
        };
        if let Some(reason) = invalid_ref_reason(&name) {
            return Err(ConfigError::InvalidBranch { name, reason });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fully qualified local ref, `refs/heads/<name>`.
    pub fn refname(&self) -> String {
        format!("refs/heads/{}", self.0)
    }

    /// Remote-tracking ref under `origin`, `refs/remotes/origin/<name>`.
    pub fn tracking_refname(&self) -> String {
        format!("refs/remotes/origin/{}", self.0)
    }
}

fn invalid_ref_reason(name: &str) -> Option<&'static str> {
    if name.is_empty() {
        return Some("name is empty");
    }
    if name.starts_with('-') {
        return Some("name starts with '-'");
    }
    if name.starts_with('/') || name.ends_with('/') || name.contains("//") {
        return Some("empty path component");
    }
    if name.ends_with('.') || name.ends_with(".lock") {
        return Some("name ends with '.' or '.lock'");
    }
    if name.contains("..") || name.contains("@{") || name == "@" {
        return Some("name contains '..' or '@{'");
    }
    if name.split('/').any(|c| c.starts_with('.')) {
        return Some("path component starts with '.'");
    }
    if name
        .chars()
        .any(|c| c.is_ascii_control() || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\'))
    {
        return Some("name contains a forbidden character");
    }
    None
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for BranchName {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<BranchName> for String {
    fn from(b: BranchName) -> Self {
        b.0
    }
}

// ---------------------------------------------------------------------------
// CommitTime
// ---------------------------------------------------------------------------

/// Signature time of the produced commit.
///
/// A fixed time lets GitOps commits line up with the source commit (e.g.
/// `$CI_COMMIT_TIMESTAMP`), and lets parallel jobs produce identical hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitTime {
    #[default]
    Now,
    Fixed(DateTime<FixedOffset>),
}

impl CommitTime {
    /// Parse `now`, the empty string, or an RFC 3339 timestamp.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("now") {
            return Ok(Self::Now);
        }
        DateTime::parse_from_rfc3339(value)
            .map(Self::Fixed)
            .map_err(|source| ConfigError::InvalidTimestamp {
                value: value.to_owned(),
                source,
            })
    }

    pub fn resolve(&self) -> DateTime<FixedOffset> {
        match self {
            Self::Now => Utc::now().fixed_offset(),
            Self::Fixed(t) => *t,
        }
    }
}

impl fmt::Display for CommitTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Now => write!(f, "now"),
            Self::Fixed(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

// ---------------------------------------------------------------------------
// TagPattern
// ---------------------------------------------------------------------------

/// Glob over tag names, e.g. `flux-sync` or `gke_myproject_*`.
///
/// `*` also matches `/`, so `deploy/*` and `deploy*` both select `deploy/eu/1`.
#[derive(Debug, Clone)]
pub struct TagPattern {
    pattern: String,
    matcher: GlobMatcher,
}

impl TagPattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let glob = Glob::new(pattern).map_err(|source| ConfigError::InvalidGlob {
            pattern: pattern.to_owned(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_owned(),
            matcher: glob.compile_matcher(),
        })
    }

    pub fn matches(&self, tag_name: &str) -> bool {
        self.matcher.is_match(tag_name)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Display for TagPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.pattern.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// The two mutually exclusive authentication modes.
///
/// The same credentials authenticate both the git transport and the REST API.
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    /// HTTP basic auth with an optional one-time password header.
    Basic {
        username: String,
        password: String,
        otp: Option<String>,
    },
    /// Bearer token (`$GITHUB_TOKEN`).
    Token(String),
}

impl Auth {
    /// Combine the raw auth options into at most one mode.
    pub fn from_parts(
        username: Option<String>,
        password: Option<String>,
        otp: Option<String>,
        token: Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        let (username, password, otp, token) = (
            non_empty(username),
            non_empty(password),
            non_empty(otp),
            non_empty(token),
        );
        match (username, token) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingAuth),
            (Some(username), None) => Ok(Some(Self::Basic {
                username,
                password: password.unwrap_or_default(),
                otp,
            })),
            (None, Some(token)) => {
                if password.is_some() || otp.is_some() {
                    return Err(ConfigError::ConflictingAuth);
                }
                Ok(Some(Self::Token(token)))
            }
            (None, None) => {
                if password.is_some() || otp.is_some() {
                    return Err(ConfigError::IncompleteAuth);
                }
                Ok(None)
            }
        }
    }

    /// Username and secret presented to the git transport.
    pub fn git_credentials(&self) -> (&str, &str) {
        match self {
            Self::Basic {
                username, password, ..
            } => (username, password),
            Self::Token(token) => ("x-access-token", token),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Basic { .. } => "http-basic-auth",
            Self::Token(_) => "http-bearer-token",
        }
    }
}

/// Secrets never reach the log: only the mode and username are shown.
impl fmt::Display for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic {
                username, password, ..
            } => {
                let masked = if password.is_empty() { "<empty>" } else { "*******" };
                write!(f, "{} - {username}:{masked}", self.name())
            }
            Self::Token(_) => write!(f, "{} - *******", self.name()),
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Name and email used for the author and committer signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            name: "gitops-sync".to_owned(),
            email: "gitops-sync@localhost".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
