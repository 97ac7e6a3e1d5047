//! Error types for gitops-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while building or validating configuration.
///
/// Every variant is raised before any network I/O takes place.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `--output-repo` / `OUTPUT_REPO` was never set.
    #[error("no output repository set")]
    MissingOutputRepo,

    /// The output repository is neither a URL, an scp-like address nor a path.
    #[error("malformed repository URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A branch name that git would refuse as a ref.
    #[error("invalid branch name '{name}': {reason}")]
    InvalidBranch { name: String, reason: &'static str },

    /// An output path that escapes the repository root.
    #[error("invalid output path '{path}': {reason}")]
    InvalidOutputPath { path: String, reason: &'static str },

    /// `--commit-timestamp` was neither `now` nor RFC 3339.
    #[error("invalid commit timestamp '{value}': {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    /// `--wait-for-tags` did not compile as a glob.
    #[error("invalid tag glob '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// Basic auth and token auth were both configured.
    #[error("conflicting authentication: use either username/password or a token, not both")]
    ConflictingAuth,

    /// Basic auth configured without a username (only password / otp given).
    #[error("basic authentication requires a username")]
    IncompleteAuth,

    /// The YAML config file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The YAML config file could not be parsed.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}
