//! Repository address helpers: classification, log masking, slug parsing.

use std::fmt;
use std::path::PathBuf;

use url::Url;

use crate::error::ConfigError;

/// `owner/name` of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// How the output repository is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoAddress {
    /// `https://`, `ssh://`, `git://`, `file://` ...
    Url(Url),
    /// `git@github.com:org/repo.git`
    ScpLike { host: String, path: String },
    /// A local directory (bare repository fixtures, mirrors).
    Path(String),
}

impl RepoAddress {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::MissingOutputRepo);
        }
        if raw.contains("://") {
            let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
                url: mask_url(raw),
                reason: e.to_string(),
            })?;
            if !matches!(url.scheme(), "http" | "https" | "ssh" | "git" | "file") {
                return Err(ConfigError::InvalidUrl {
                    url: mask_url(raw),
                    reason: format!("unsupported scheme '{}'", url.scheme()),
                });
            }
            if url.scheme() != "file" && url.host_str().map_or(true, str::is_empty) {
                return Err(ConfigError::InvalidUrl {
                    url: mask_url(raw),
                    reason: "missing host".to_owned(),
                });
            }
            return Ok(Self::Url(url));
        }
        if let Some((host, path)) = split_scp_like(raw) {
            return Ok(Self::ScpLike {
                host: host.to_owned(),
                path: path.to_owned(),
            });
        }
        Ok(Self::Path(raw.to_owned()))
    }

    /// Directory of a repository reached through libgit2's local transport.
    pub fn local_path(&self) -> Option<PathBuf> {
        match self {
            Self::Url(url) if url.scheme() == "file" => url.to_file_path().ok(),
            Self::Path(path) => Some(PathBuf::from(path)),
            _ => None,
        }
    }

    fn path(&self) -> &str {
        match self {
            Self::Url(url) => url.path(),
            Self::ScpLike { path, .. } => path,
            Self::Path(path) => path,
        }
    }
}

/// `user@host:path`, but not a Windows drive (`C:\...`) or a plain path.
fn split_scp_like(raw: &str) -> Option<(&str, &str)> {
    let (host, path) = raw.split_once(':')?;
    if host.is_empty() || host.contains('/') || host.contains('\\') || host.len() == 1 {
        return None;
    }
    Some((host, path))
}

/// Replace the password of a URL with `masked` for logging.
///
/// Addresses that are not URLs are returned unchanged; they carry no secret.
pub fn mask_url(raw: &str) -> String {
    let Ok(mut parsed) = Url::parse(raw) else {
        return raw.to_owned();
    };
    if parsed.password().is_some() && parsed.set_password(Some("masked")).is_err() {
        return "<unprintable url>".to_owned();
    }
    parsed.to_string()
}

/// Parse `owner/name` out of a hosted repository address.
///
/// ```
/// let slug = gitops_core::parse_github_repo("https://github.com/myorg/myrepo.git").unwrap();
/// assert_eq!(slug.to_string(), "myorg/myrepo");
/// ```
pub fn parse_github_repo(raw: &str) -> Result<RepoSlug, ConfigError> {
    let address = RepoAddress::parse(raw)?;
    let path = address.path().trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    match (segments.next(), segments.next()) {
        (Some(owner), Some(name)) => Ok(RepoSlug {
            owner: owner.to_owned(),
            name: name.to_owned(),
        }),
        _ => Err(ConfigError::InvalidUrl {
            url: mask_url(raw),
            reason: "expected <host>/<owner>/<repo>".to_owned(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
