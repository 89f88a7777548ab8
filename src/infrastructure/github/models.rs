//! GitHub REST API response and request models.
//!
//! These structs map to the JSON payloads of the endpoints the client
//! calls. They are converted to domain models at the client boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::{Comment, CommitStatus, StatusState};
use crate::domain::ports::Webhook;

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRateLimit {
    pub resources: GitHubRateResources,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRateResources {
    pub core: GitHubRate,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GitHubRate {
    pub limit: u64,
    pub remaining: u64,
    /// Unix timestamp of the window reset.
    pub reset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRepository {
    pub default_branch: String,
    pub html_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubBranch {
    pub name: String,
    pub commit: GitHubCommitRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubCommitRef {
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubPullRequest {
    pub number: u64,
    pub html_url: String,
    #[serde(default)]
    pub body: Option<String>,
    pub user: GitHubUser,
    pub updated_at: DateTime<Utc>,
    pub head: GitHubPullHead,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubPullHead {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubCommit {
    pub sha: String,
    pub commit: GitHubCommitDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubCommitDetail {
    #[serde(default)]
    pub author: Option<GitHubSignature>,
    #[serde(default)]
    pub committer: Option<GitHubSignature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubSignature {
    pub date: DateTime<Utc>,
}

impl GitHubCommit {
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.commit
            .author
            .as_ref()
            .or(self.commit.committer.as_ref())
            .map(|signature| signature.date)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubStatus {
    pub context: String,
    pub state: StatusState,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<GitHubStatus> for CommitStatus {
    fn from(status: GitHubStatus) -> Self {
        Self {
            context: status.context,
            state: status.state,
            description: status.description,
            target_url: status.target_url,
            updated_at: status.updated_at,
        }
    }
}

impl From<&CommitStatus> for GitHubStatus {
    fn from(status: &CommitStatus) -> Self {
        Self {
            context: status.context.clone(),
            state: status.state,
            description: status.description.clone(),
            target_url: status.target_url.clone(),
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubComment {
    pub user: GitHubUser,
    #[serde(default)]
    pub body: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<GitHubComment> for Comment {
    fn from(comment: GitHubComment) -> Self {
        Self::new(comment.user.login, comment.body.unwrap_or_default(), comment.updated_at)
    }
}

/// Request body for posting a comment.
#[derive(Debug, Clone, Serialize)]
pub struct GitHubCommentRequest {
    pub body: String,
}

/// Request body for opening an issue.
#[derive(Debug, Clone, Serialize)]
pub struct GitHubIssueRequest {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubIssue {
    pub number: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubHook {
    pub id: u64,
    pub name: String,
    pub active: bool,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub config: GitHubHookConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubHookConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl From<GitHubHook> for Webhook {
    fn from(hook: GitHubHook) -> Self {
        Self {
            id: hook.id,
            name: hook.name,
            url: hook.config.url,
            active: hook.active,
            events: hook.events,
        }
    }
}

/// Request body creating or updating a hook.
#[derive(Debug, Clone, Serialize)]
pub struct GitHubHookRequest {
    pub name: String,
    pub active: bool,
    pub events: Vec<String>,
    pub config: GitHubHookConfig,
}
