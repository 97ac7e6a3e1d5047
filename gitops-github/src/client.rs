//! Blocking REST client built on `ureq`.

use std::time::Duration;

use base64::Engine;
use gitops_core::{Auth, RepoSlug};
use serde::de::DeserializeOwned;

use crate::error::GitHubError;
use crate::types::{CommitInfo, NewPullRequest, PullRequest, User};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("gitops-sync/", env!("CARGO_PKG_VERSION"));

/// Hosting-service operations the sync pipeline depends on.
pub trait HostingApi {
    /// The authenticated user; also verifies the credentials.
    fn current_user(&self) -> Result<User, GitHubError>;

    fn commit(&self, repo: &RepoSlug, sha: &str) -> Result<CommitInfo, GitHubError>;

    /// Open pull requests from `head` into `base`.
    fn list_open_pulls(
        &self,
        repo: &RepoSlug,
        head: &str,
        base: &str,
    ) -> Result<Vec<PullRequest>, GitHubError>;

    fn create_pull(
        &self,
        repo: &RepoSlug,
        request: &NewPullRequest,
    ) -> Result<PullRequest, GitHubError>;
}

/// Authenticated client for one API host.
pub struct GitHubClient {
    agent: ureq::Agent,
    base_url: String,
    auth: Auth,
}

impl GitHubClient {
    pub fn new(auth: Auth) -> Self {
        Self::with_base_url(auth, DEFAULT_API_URL)
    }

    /// Client for a GitHub Enterprise (or test) API root.
    pub fn with_base_url(auth: Auth, base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            auth,
        }
    }

    fn request(&self, method: &str, endpoint: &str) -> ureq::Request {
        let mut request = self
            .agent
            .request(method, &format!("{}{endpoint}", self.base_url))
            .set("Accept", "application/vnd.github+json")
            .set("X-GitHub-Api-Version", "2022-11-28")
            .set("Authorization", &authorization_header(&self.auth));
        if let Auth::Basic { otp: Some(otp), .. } = &self.auth {
            request = request.set("X-GitHub-OTP", otp);
        }
        request
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, GitHubError> {
        tracing::debug!(endpoint, "GET");
        let mut request = self.request("GET", endpoint);
        for (k, v) in query {
            request = request.query(k, v);
        }
        let response = request.call().map_err(|e| map_ureq_err(endpoint, e))?;
        response.into_json().map_err(|source| GitHubError::Decode {
            endpoint: endpoint.to_owned(),
            source,
        })
    }
}

impl HostingApi for GitHubClient {
    /// `GET /user`
    fn current_user(&self) -> Result<User, GitHubError> {
        self.get_json("/user", &[])
    }

    /// `GET /repos/{owner}/{repo}/commits/{sha}`
    fn commit(&self, repo: &RepoSlug, sha: &str) -> Result<CommitInfo, GitHubError> {
        self.get_json(&format!("/repos/{repo}/commits/{sha}"), &[])
    }

    fn list_open_pulls(
        &self,
        repo: &RepoSlug,
        head: &str,
        base: &str,
    ) -> Result<Vec<PullRequest>, GitHubError> {
        // The head filter must be qualified with the owner of the head branch.
        let qualified_head = format!("{}:{head}", repo.owner);
        self.get_json(
            &format!("/repos/{repo}/pulls"),
            &[
                ("state", "open"),
                ("head", &qualified_head),
                ("base", base),
                ("per_page", "100"),
            ],
        )
    }

    fn create_pull(
        &self,
        repo: &RepoSlug,
        request: &NewPullRequest,
    ) -> Result<PullRequest, GitHubError> {
        let endpoint = format!("/repos/{repo}/pulls");
        tracing::debug!(endpoint = %endpoint, "POST");
        let response = self
            .request("POST", &endpoint)
            .send_json(request)
            .map_err(|e| map_ureq_err(&endpoint, e))?;
        response.into_json().map_err(|source| GitHubError::Decode {
            endpoint,
            source,
        })
    }
}

fn authorization_header(auth: &Auth) -> String {
    match auth {
        Auth::Basic {
            username, password, ..
        } => {
            let encoded = base64::engine::general_purpose::STANDARD
                .encode(format!("{username}:{password}"));
            format!("Basic {encoded}")
        }
        Auth::Token(token) => format!("Bearer {token}"),
    }
}

fn map_ureq_err(endpoint: &str, err: ureq::Error) -> GitHubError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            GitHubError::Status {
                status,
                endpoint: endpoint.to_owned(),
                message: api_message(&body),
            }
        }
        ureq::Error::Transport(transport) => GitHubError::Transport {
            endpoint: endpoint.to_owned(),
            message: transport.to_string(),
        },
    }
}

/// Pull `message` and the first validation error out of an API error body.
///
/// A validation error without a message is rendered as `<field> <code>`,
/// e.g. `head invalid` for a head branch the API cannot see yet.
fn api_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_owned();
    };
    let message = value
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or_default();
    let first = value.get("errors").and_then(|e| e.get(0));
    let text = |key: &'static str| first.and_then(|e| e.get(key)).and_then(|v| v.as_str());
    let detail = match (text("message"), text("field"), text("code")) {
        (Some(detail), _, _) => Some(detail.to_owned()),
        (None, Some(field), Some(code)) => Some(format!("{field} {code}")),
        _ => None,
    };
    match detail {
        Some(detail) => format!("{message} ({detail})"),
        None => message.to_owned(),
    }
}
