//! Configuration: raw layered input and the validated [`SyncConfig`].
//!
//! # Layering
//!
//! ```text
//! command line / environment   (RawConfig built by the CLI)
//!   └─ falls back to YAML file (RawConfig::load_file)
//!        └─ falls back to built-in defaults (RawConfig::into_config)
//! ```
//!
//! [`RawConfig::into_config`] is the only place strings become typed values;
//! every error it returns is a [`ConfigError`] raised before any network I/O.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::repo_url::RepoAddress;
use crate::types::{Auth, BranchName, CommitTime, Identity, TagPattern};

/// Default interval between two tag polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// RawConfig
// ---------------------------------------------------------------------------

/// Unvalidated options, one optional field per recognized flag.
///
/// Deserializes from the YAML config file using the flag names as keys
/// (`output-repo`, `output-repo-path`, `wait-for-tags`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawConfig {
    pub message: Option<String>,
    pub input_path: Option<PathBuf>,
    pub output_repo: Option<String>,
    /// Comma separated list of paths inside the output repository.
    pub output_repo_path: Option<String>,
    pub output_base: Option<String>,
    pub output_head: Option<String>,
    /// Branch to open a pull request into.
    pub pr: Option<String>,
    /// Branch to merge into straight away.
    pub merge: Option<String>,
    pub pr_title: Option<String>,
    pub pr_body: Option<String>,
    pub commit_timestamp: Option<String>,
    pub dry_run: Option<bool>,
    pub depth: Option<u32>,
    pub wait_for_tags: Option<String>,
    /// Seconds between tag polls.
    pub wait_interval: Option<u64>,
    /// Overall deadline in seconds.
    pub timeout: Option<u64>,
    pub github_username: Option<String>,
    pub github_password: Option<String>,
    pub github_otp: Option<String>,
    pub github_token: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
}

impl RawConfig {
    /// Load a YAML config file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fill every unset field from `fallback`.
    pub fn or(self, fallback: RawConfig) -> RawConfig {
        RawConfig {
            message: self.message.or(fallback.message),
            input_path: self.input_path.or(fallback.input_path),
            output_repo: self.output_repo.or(fallback.output_repo),
            output_repo_path: self.output_repo_path.or(fallback.output_repo_path),
            output_base: self.output_base.or(fallback.output_base),
            output_head: self.output_head.or(fallback.output_head),
            pr: self.pr.or(fallback.pr),
            merge: self.merge.or(fallback.merge),
            pr_title: self.pr_title.or(fallback.pr_title),
            pr_body: self.pr_body.or(fallback.pr_body),
            commit_timestamp: self.commit_timestamp.or(fallback.commit_timestamp),
            dry_run: self.dry_run.or(fallback.dry_run),
            depth: self.depth.or(fallback.depth),
            wait_for_tags: self.wait_for_tags.or(fallback.wait_for_tags),
            wait_interval: self.wait_interval.or(fallback.wait_interval),
            timeout: self.timeout.or(fallback.timeout),
            github_username: self.github_username.or(fallback.github_username),
            github_password: self.github_password.or(fallback.github_password),
            github_otp: self.github_otp.or(fallback.github_otp),
            github_token: self.github_token.or(fallback.github_token),
            author_name: self.author_name.or(fallback.author_name),
            author_email: self.author_email.or(fallback.author_email),
        }
    }

    /// Apply defaults and validate.
    pub fn into_config(self) -> Result<SyncConfig, ConfigError> {
        let output_repo = self
            .output_repo
            .filter(|r| !r.trim().is_empty())
            .ok_or(ConfigError::MissingOutputRepo)?;
        RepoAddress::parse(&output_repo)?;

        let output_paths = parse_output_paths(self.output_repo_path.as_deref().unwrap_or("."))?;
        let base = BranchName::new(non_empty(self.output_base).unwrap_or_else(|| "develop".into()))?;
        let head = match non_empty(self.output_head) {
            Some(head) => BranchName::new(head)?,
            None => default_head_branch(Utc::now())?,
        };
        let pr_base = non_empty(self.pr).map(BranchName::new).transpose()?;
        let merge_base = non_empty(self.merge).map(BranchName::new).transpose()?;
        let commit_time = CommitTime::parse(self.commit_timestamp.as_deref().unwrap_or("now"))?;
        let wait_for_tags = non_empty(self.wait_for_tags)
            .map(|p| TagPattern::new(&p))
            .transpose()?;
        let auth = Auth::from_parts(
            self.github_username,
            self.github_password,
            self.github_otp,
            self.github_token,
        )?;

        let message = match non_empty(self.message) {
            Some(message) => message,
            None => default_commit_message(
                std::env::var("CI_PROJECT_NAME").ok().as_deref(),
                std::env::var("CI_COMMIT_REF_NAME").ok().as_deref(),
            ),
        };

        let defaults = Identity::default();
        let author = Identity {
            name: non_empty(self.author_name).unwrap_or(defaults.name),
            email: non_empty(self.author_email).unwrap_or(defaults.email),
        };

        Ok(SyncConfig {
            message,
            input_path: self.input_path.unwrap_or_else(|| PathBuf::from(".")),
            output_repo,
            output_paths,
            base,
            head,
            pr_base,
            merge_base,
            pr_title: non_empty(self.pr_title).unwrap_or_else(|| "Sync".into()),
            pr_body: non_empty(self.pr_body).unwrap_or_else(|| "Sync".into()),
            commit_time,
            dry_run: self.dry_run.unwrap_or(false),
            depth: self.depth.unwrap_or(0),
            wait_for_tags,
            poll_interval: self
                .wait_interval
                .filter(|s| *s > 0)
                .map_or(DEFAULT_POLL_INTERVAL, Duration::from_secs),
            timeout: self.timeout.filter(|s| *s > 0).map(Duration::from_secs),
            auth,
            author,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// SyncConfig
// ---------------------------------------------------------------------------

/// Validated configuration, built once and passed by reference through the
/// whole orchestration chain.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub message: String,
    /// Directory the artifacts are read from.
    pub input_path: PathBuf,
    /// URL (or local path) of the destination repository.
    pub output_repo: String,
    /// Ordered destinations inside the destination repository; `.` is the root.
    pub output_paths: Vec<String>,
    pub base: BranchName,
    pub head: BranchName,
    pub pr_base: Option<BranchName>,
    pub merge_base: Option<BranchName>,
    pub pr_title: String,
    pub pr_body: String,
    pub commit_time: CommitTime,
    /// Stop before anything is pushed.
    pub dry_run: bool,
    /// Clone/fetch depth; `0` means full history.
    pub depth: u32,
    pub wait_for_tags: Option<TagPattern>,
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
    pub auth: Option<Auth>,
    /// Signature used when no API identity is available.
    pub author: Identity,
}

impl SyncConfig {
    /// Minimal configuration for `output_repo`, with every other option at
    /// its default. The head branch is generated from the current time.
    pub fn for_repo(output_repo: impl Into<String>) -> Result<Self, ConfigError> {
        RawConfig {
            output_repo: Some(output_repo.into()),
            message: Some("Sync".into()),
            ..RawConfig::default()
        }
        .into_config()
    }

    /// True when `path` denotes the repository root.
    pub fn is_root(path: &str) -> bool {
        path.is_empty() || path == "."
    }
}

/// `auto/sync/<UTC %Y%m%dT%H%M%SZ>`
pub fn default_head_branch(now: DateTime<Utc>) -> Result<BranchName, ConfigError> {
    BranchName::new(format!("auto/sync/{}", now.format("%Y%m%dT%H%M%SZ")))
}

/// `Sync <project>/<ref>`; the project falls back to the working directory
/// and the ref to `unknown`.
pub fn default_commit_message(project: Option<&str>, ref_name: Option<&str>) -> String {
    let project = match project.filter(|p| !p.is_empty()) {
        Some(p) => p.to_owned(),
        None => std::env::current_dir()
            .map(|d| d.display().to_string())
            .unwrap_or_default(),
    };
    let ref_name = ref_name.filter(|r| !r.is_empty()).unwrap_or("unknown");
    format!("Sync {project}/{ref_name}")
}

/// Split the comma separated output path list and normalize each entry.
///
/// `""`, `"."` and `"./"` all denote the root and normalize to `"."`.
/// Absolute paths and `..` components are rejected.
pub fn parse_output_paths(list: &str) -> Result<Vec<String>, ConfigError> {
    let mut out = Vec::new();
    for raw in list.split(',') {
        let raw = raw.trim();
        let mut parts = Vec::new();
        for component in Path::new(raw).components() {
            match component {
                Component::Normal(c) => parts.push(c.to_string_lossy().into_owned()),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(ConfigError::InvalidOutputPath {
                        path: raw.to_owned(),
                        reason: "must not contain '..'",
                    })
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ConfigError::InvalidOutputPath {
                        path: raw.to_owned(),
                        reason: "must be relative to the repository root",
                    })
                }
            }
        }
        if parts.iter().any(|p| p == ".git") {
            return Err(ConfigError::InvalidOutputPath {
                path: raw.to_owned(),
                reason: "must not point into .git",
            });
        }
        let normalized = if parts.is_empty() {
            ".".to_owned()
        } else {
            parts.join("/")
        };
        if !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;

    fn raw(repo: &str) -> RawConfig {
        RawConfig {
            output_repo: Some(repo.into()),
            message: Some("sync".into()),
            ..RawConfig::default()
        }
    }

    #[test]
    fn missing_output_repo_is_rejected() {
        let err = RawConfig::default().into_config().unwrap_err();
        assert!(matches!(err, ConfigError::MissingOutputRepo));
    }

    #[test]
    fn defaults_are_applied() {
        let cfg = raw("https://github.com/org/gitops.git").into_config().unwrap();
        assert_eq!(cfg.base.as_str(), "develop");
        assert!(cfg.head.as_str().starts_with("auto/sync/"));
        assert_eq!(cfg.output_paths, vec!["."]);
        assert_eq!(cfg.pr_title, "Sync");
        assert_eq!(cfg.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(cfg.depth, 0);
        assert!(cfg.auth.is_none());
        assert!(!cfg.dry_run);
    }

    #[test]
    fn cli_values_win_over_file_values() {
        let cli = RawConfig {
            output_base: Some("main".into()),
            ..raw("https://github.com/org/gitops.git")
        };
        let file = RawConfig {
            output_base: Some("develop".into()),
            output_head: Some("sync/from-file".into()),
            ..RawConfig::default()
        };
        let cfg = cli.or(file).into_config().unwrap();
        assert_eq!(cfg.base.as_str(), "main");
        assert_eq!(cfg.head.as_str(), "sync/from-file");
    }

    #[test]
    fn default_head_branch_is_timestamped() {
        let now = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
        assert_eq!(
            default_head_branch(now).unwrap().as_str(),
            "auto/sync/20240203T040506Z"
        );
    }

    #[test]
    fn default_message_uses_ci_variables() {
        assert_eq!(
            default_commit_message(Some("svc"), Some("main")),
            "Sync svc/main"
        );
        assert!(default_commit_message(Some("svc"), None).ends_with("svc/unknown"));
    }

    #[rstest]
    #[case(".", &["."])]
    #[case("", &["."])]
    #[case("./bases/app/", &["bases/app"])]
    #[case("bases/microservice-a, apps/microservice-a", &["bases/microservice-a", "apps/microservice-a"])]
    #[case("a,a", &["a"])]
    fn output_paths_are_normalized(#[case] list: &str, #[case] expected: &[&str]) {
        assert_eq!(parse_output_paths(list).unwrap(), expected);
    }

    #[rstest]
    #[case("../outside")]
    #[case("/abs")]
    #[case(".git/hooks")]
    fn output_paths_escaping_the_repo_are_rejected(#[case] list: &str) {
        assert!(matches!(
            parse_output_paths(list),
            Err(ConfigError::InvalidOutputPath { .. })
        ));
    }

    #[test]
    fn invalid_values_fail_before_io() {
        let bad_glob = RawConfig {
            wait_for_tags: Some("gke_[".into()),
            ..raw("https://github.com/org/gitops.git")
        };
        assert!(matches!(
            bad_glob.into_config(),
            Err(ConfigError::InvalidGlob { .. })
        ));

        let bad_base = RawConfig {
            output_base: Some("feature..x".into()),
            ..raw("https://github.com/org/gitops.git")
        };
        assert!(matches!(
            bad_base.into_config(),
            Err(ConfigError::InvalidBranch { .. })
        ));

        let bad_url = raw("gopher://example.com/repo");
        assert!(matches!(
            bad_url.into_config(),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }
}
