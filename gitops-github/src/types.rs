//! Request and response payloads.

use gitops_core::Identity;
use serde::{Deserialize, Serialize};

/// `GET /user`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl User {
    /// Commit signature for this user. Accounts with a private email get the
    /// noreply address.
    pub fn identity(&self) -> Identity {
        let name = self
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.login.clone());
        let email = self
            .email
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| format!("{}@users.noreply.github.com", self.login));
        Identity { name, email }
    }
}

/// A pull request as returned by the list and create endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub draft: bool,
}

/// `POST /repos/{owner}/{repo}/pulls`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPullRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
    pub draft: bool,
}

/// The parts of `GET /repos/{owner}/{repo}/commits/{sha}` used for logging.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub html_url: String,
    pub commit: CommitDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommitDetail {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_falls_back_to_login_and_noreply() {
        let user: User = serde_json::from_str(r#"{"login":"deploy-bot","name":null}"#).unwrap();
        let id = user.identity();
        assert_eq!(id.name, "deploy-bot");
        assert_eq!(id.email, "deploy-bot@users.noreply.github.com");
    }

    #[test]
    fn identity_prefers_profile_fields() {
        let user: User =
            serde_json::from_str(r#"{"login":"jd","name":"Jane Doe","email":"jane@example.com"}"#)
                .unwrap();
        assert_eq!(user.identity().name, "Jane Doe");
        assert_eq!(user.identity().email, "jane@example.com");
    }

    #[test]
    fn pull_request_ignores_extra_fields() {
        let pr: PullRequest = serde_json::from_str(
            r#"{"number":7,"html_url":"https://github.com/o/r/pull/7","title":"Sync","draft":true,"state":"open"}"#,
        )
        .unwrap();
        assert_eq!(pr.number, 7);
        assert!(pr.draft);
    }
}
