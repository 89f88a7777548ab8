use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;
use crate::domain::models::{Comment, CommitStatus, Head, HeadLocator, RateLimit, Repository};

/// A webhook registered on a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: u64,
    pub name: String,
    pub url: Option<String>,
    pub active: bool,
    pub events: Vec<String>,
}

/// Port for the code hosting service
///
/// Implementations map missing resources to
/// [`DomainError::ResourceNotFound`](crate::domain::errors::DomainError::ResourceNotFound)
/// and per-commit write caps to
/// [`DomainError::UpstreamQuotaExceeded`](crate::domain::errors::DomainError::UpstreamQuotaExceeded).
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Login of the authenticated user
    async fn whoami(&self) -> DomainResult<String>;

    /// Remaining API quota
    async fn rate_limit(&self) -> DomainResult<RateLimit>;

    async fn default_branch(&self, repository: &Repository) -> DomainResult<String>;

    /// Raw content of `path` at `git_ref`
    async fn fetch_file_contents(
        &self,
        repository: &Repository,
        path: &str,
        git_ref: &str,
    ) -> DomainResult<String>;

    /// Logins with push access
    async fn list_collaborators(&self, repository: &Repository) -> DomainResult<Vec<String>>;

    /// Existing branches among `branches`, then open pull requests
    async fn list_heads(&self, repository: &Repository, branches: &[String])
        -> DomainResult<Vec<Head>>;

    /// Resolve the current tip of a head designated by URL
    async fn resolve_head(&self, locator: &HeadLocator) -> DomainResult<Head>;

    /// Author date of a commit
    async fn fetch_commit_date(
        &self,
        repository: &Repository,
        sha: &str,
    ) -> DomainResult<Option<DateTime<Utc>>>;

    async fn fetch_statuses(&self, repository: &Repository, sha: &str)
        -> DomainResult<Vec<CommitStatus>>;

    /// Write a status, returning it as stored
    async fn push_status(
        &self,
        repository: &Repository,
        sha: &str,
        status: &CommitStatus,
    ) -> DomainResult<CommitStatus>;

    /// Comments addressed to the head, oldest first
    async fn fetch_comments(&self, head: &Head) -> DomainResult<Vec<Comment>>;

    async fn post_comment(&self, head: &Head, body: &str) -> DomainResult<()>;

    /// Open an issue on the repository, returning its number
    async fn report_issue(&self, repository: &Repository, title: &str, body: &str) -> DomainResult<u64>;

    /// Most recent commit SHAs of the head, newest first
    async fn list_commits(&self, head: &Head, limit: usize) -> DomainResult<Vec<String>>;

    async fn list_hooks(&self, repository: &Repository) -> DomainResult<Vec<Webhook>>;

    /// Create or update (`hook_id`) a web hook delivering to `url`
    async fn save_hook(
        &self,
        repository: &Repository,
        hook_id: Option<u64>,
        url: &str,
        secret: Option<&str>,
    ) -> DomainResult<()>;
}
