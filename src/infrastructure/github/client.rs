//! GitHub HTTP client implementing the [`CodeHost`] port.
//!
//! Wraps the GitHub REST API v3. Requests are paced by a local token
//! bucket, and GET requests are made conditional on the `ETag` of the
//! cached response, so unchanged resources cost no quota.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, ETAG, IF_NONE_MATCH, LINK};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::cache::ResponseCache;
use super::models::{
    GitHubBranch, GitHubComment, GitHubCommentRequest, GitHubCommit, GitHubCommitRef, GitHubHook,
    GitHubHookConfig, GitHubHookRequest, GitHubIssue, GitHubIssueRequest, GitHubPullRequest,
    GitHubRateLimit, GitHubRepository, GitHubStatus, GitHubUser,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Comment, CommitStatus, GitHubConfig, Head, HeadKind, HeadLocator, RateLimit, RateLimitConfig,
    Repository,
};
use crate::domain::ports::{CodeHost, Webhook};

const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw+json";

/// Events the bot subscribes its hooks to.
const HOOK_EVENTS: [&str; 4] = ["commit_comment", "issue_comment", "pull_request", "push"];

/// Marker of the per commit and context status cap in 422 answers.
const STATUS_CAP_MARKER: &str = "maximum number of statuses";

/// HTTP client for the GitHub REST API v3.
pub struct GitHubClient {
    http: Client,
    api_url: String,
    token: Option<String>,
    limiter: Arc<DefaultDirectRateLimiter>,
    cache: Arc<ResponseCache>,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig, rate_limit: &RateLimitConfig, cache: Arc<ResponseCache>) -> Self {
        let per_second = NonZeroU32::new(rate_limit.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(rate_limit.burst_size).unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_second(per_second).allow_burst(burst));

        Self {
            http: Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            limiter: Arc::new(limiter),
            cache,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_url)
    }

    /// Wait for a rate-limit token and build an authorized request.
    async fn rate_limited_request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.limiter.until_ready().await;
        let request = self
            .http
            .request(method, url)
            .header("Accept", JSON_MEDIA_TYPE)
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "stagehand");
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    }

    /// Conditional GET of `url`, answered from the cache on 304.
    ///
    /// Raw responses are returned as a JSON string.
    async fn fetch(&self, url: &str, raw: bool) -> DomainResult<(Value, Option<String>)> {
        let cached = self.cache.get(url);

        let mut request = self.rate_limited_request(Method::GET, url).await;
        if raw {
            request = request.header("Accept", RAW_MEDIA_TYPE);
        }
        if let Some(entry) = &cached {
            request = request.header(IF_NONE_MATCH, entry.etag.as_str());
        }

        let resp = request.send().await.map_err(|e| transport_error(url, &e))?;
        let status = resp.status();

        if status == StatusCode::NOT_MODIFIED {
            if let Some(entry) = cached {
                debug!(%url, "Not modified, using cache");
                return Ok((entry.body, entry.next));
            }
        }
        if !status.is_success() {
            let headers = resp.headers().clone();
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(status, &headers, &body, url));
        }

        let etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let next = next_link(resp.headers());
        let body = if raw {
            Value::String(resp.text().await.map_err(|e| transport_error(url, &e))?)
        } else {
            resp.json::<Value>()
                .await
                .map_err(|e| DomainError::SerializationError(format!("{url}: {e}")))?
        };

        if let Some(etag) = etag {
            self.cache.insert(url, etag, body.clone(), next.clone());
        }
        Ok((body, next))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> DomainResult<T> {
        let (body, _) = self.fetch(&self.url(path), false).await?;
        Ok(serde_json::from_value(body)?)
    }

    /// GET every page of a list endpoint.
    async fn get_all<T: DeserializeOwned>(&self, path: &str) -> DomainResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(self.url(path));
        while let Some(url) = next {
            let (body, link) = self.fetch(&url, false).await?;
            items.extend(serde_json::from_value::<Vec<T>>(body)?);
            next = link;
        }
        Ok(items)
    }

    /// Send a JSON body and decode the answer.
    async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> DomainResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let resp = self
            .rate_limited_request(method, &url)
            .await
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(&url, &e))?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let text = resp.text().await.unwrap_or_default();
            return Err(map_status(status, &headers, &text, &url));
        }
        resp.json::<T>()
            .await
            .map_err(|e| DomainError::SerializationError(format!("{url}: {e}")))
    }

    async fn repository(&self, repository: &Repository) -> DomainResult<GitHubRepository> {
        self.get_json(&format!("/repos/{repository}")).await
    }

    async fn pull_request(&self, repository: &Repository, number: u64) -> DomainResult<GitHubPullRequest> {
        self.get_json(&format!("/repos/{repository}/pulls/{number}")).await
    }
}

#[async_trait]
impl CodeHost for GitHubClient {
    async fn whoami(&self) -> DomainResult<String> {
        let user: GitHubUser = self.get_json("/user").await?;
        Ok(user.login)
    }

    async fn rate_limit(&self) -> DomainResult<RateLimit> {
        let rate: GitHubRateLimit = self.get_json("/rate_limit").await?;
        let core = rate.resources.core;
        Ok(RateLimit {
            limit: core.limit,
            remaining: core.remaining,
            reset_at: DateTime::from_timestamp(core.reset, 0).unwrap_or_else(Utc::now),
        })
    }

    async fn default_branch(&self, repository: &Repository) -> DomainResult<String> {
        Ok(self.repository(repository).await?.default_branch)
    }

    async fn fetch_file_contents(
        &self,
        repository: &Repository,
        path: &str,
        git_ref: &str,
    ) -> DomainResult<String> {
        let url = self.url(&format!("/repos/{repository}/contents/{path}?ref={git_ref}"));
        match self.fetch(&url, true).await? {
            (Value::String(content), _) => Ok(content),
            (other, _) => Err(DomainError::SerializationError(format!(
                "{url}: expected raw content, got {other}"
            ))),
        }
    }

    async fn list_collaborators(&self, repository: &Repository) -> DomainResult<Vec<String>> {
        let users: Vec<GitHubUser> = self
            .get_all(&format!("/repos/{repository}/collaborators?per_page=100"))
            .await?;
        Ok(users.into_iter().map(|user| user.login).collect())
    }

    #[instrument(skip(self, branches), fields(repository = %repository))]
    async fn list_heads(&self, repository: &Repository, branches: &[String]) -> DomainResult<Vec<Head>> {
        let html_url = self.repository(repository).await?.html_url;
        let mut heads = Vec::new();

        for name in branches {
            match self
                .get_json::<GitHubBranch>(&format!("/repos/{repository}/branches/{name}"))
                .await
            {
                Ok(branch) => heads.push(Head::branch(
                    repository.clone(),
                    &branch.name,
                    &branch.commit.sha,
                    &format!("{html_url}/tree/{}", branch.name),
                )),
                Err(e) if e.is_not_found() => debug!(branch = %name, "No such branch"),
                Err(e) => return Err(e),
            }
        }

        let pulls: Vec<GitHubPullRequest> = self
            .get_all(&format!("/repos/{repository}/pulls?state=open&per_page=100"))
            .await?;
        heads.extend(pulls.into_iter().map(|pull| {
            Head::pull_request(
                repository.clone(),
                pull.number,
                &pull.head.ref_name,
                &pull.head.sha,
                &pull.html_url,
            )
        }));

        debug!(heads = heads.len(), "Listed heads");
        Ok(heads)
    }

    async fn resolve_head(&self, locator: &HeadLocator) -> DomainResult<Head> {
        match locator {
            HeadLocator::Branch { repository, name } => {
                let html_url = self.repository(repository).await?.html_url;
                let branch: GitHubBranch = self
                    .get_json(&format!("/repos/{repository}/branches/{name}"))
                    .await?;
                Ok(Head::branch(
                    repository.clone(),
                    &branch.name,
                    &branch.commit.sha,
                    &format!("{html_url}/tree/{}", branch.name),
                ))
            }
            HeadLocator::PullRequest { repository, number } => {
                let pull = self.pull_request(repository, *number).await?;
                Ok(Head::pull_request(
                    repository.clone(),
                    pull.number,
                    &pull.head.ref_name,
                    &pull.head.sha,
                    &pull.html_url,
                ))
            }
        }
    }

    async fn fetch_commit_date(
        &self,
        repository: &Repository,
        sha: &str,
    ) -> DomainResult<Option<DateTime<Utc>>> {
        let commit: GitHubCommit = self.get_json(&format!("/repos/{repository}/commits/{sha}")).await?;
        Ok(commit.date())
    }

    async fn fetch_statuses(&self, repository: &Repository, sha: &str) -> DomainResult<Vec<CommitStatus>> {
        let statuses: Vec<GitHubStatus> = self
            .get_all(&format!("/repos/{repository}/commits/{sha}/statuses?per_page=100"))
            .await?;
        Ok(statuses.into_iter().map(CommitStatus::from).collect())
    }

    async fn push_status(
        &self,
        repository: &Repository,
        sha: &str,
        status: &CommitStatus,
    ) -> DomainResult<CommitStatus> {
        let stored: GitHubStatus = self
            .send_json(
                Method::POST,
                &format!("/repos/{repository}/statuses/{sha}"),
                &GitHubStatus::from(status),
            )
            .await?;
        Ok(stored.into())
    }

    async fn fetch_comments(&self, head: &Head) -> DomainResult<Vec<Comment>> {
        let repository = &head.repository;
        let mut comments = match head.kind {
            HeadKind::PullRequest { number } => {
                let pull = self.pull_request(repository, number).await?;
                let mut comments = vec![Comment::new(
                    pull.user.login,
                    pull.body.unwrap_or_default(),
                    pull.updated_at,
                )];
                let issue_comments: Vec<GitHubComment> = self
                    .get_all(&format!("/repos/{repository}/issues/{number}/comments?per_page=100"))
                    .await?;
                comments.extend(issue_comments.into_iter().map(Comment::from));
                comments
            }
            HeadKind::Branch => {
                let commit_comments: Vec<GitHubComment> = self
                    .get_all(&format!("/repos/{repository}/commits/{}/comments?per_page=100", head.sha))
                    .await?;
                commit_comments.into_iter().map(Comment::from).collect()
            }
        };
        comments.sort_by_key(|comment| comment.updated_at);
        Ok(comments)
    }

    async fn post_comment(&self, head: &Head, body: &str) -> DomainResult<()> {
        let repository = &head.repository;
        let path = match head.kind {
            HeadKind::PullRequest { number } => format!("/repos/{repository}/issues/{number}/comments"),
            HeadKind::Branch => format!("/repos/{repository}/commits/{}/comments", head.sha),
        };
        let request = GitHubCommentRequest {
            body: body.to_string(),
        };
        self.send_json::<_, Value>(Method::POST, &path, &request).await?;
        Ok(())
    }

    async fn report_issue(&self, repository: &Repository, title: &str, body: &str) -> DomainResult<u64> {
        let request = GitHubIssueRequest {
            title: title.to_string(),
            body: body.to_string(),
        };
        let issue: GitHubIssue = self
            .send_json(Method::POST, &format!("/repos/{repository}/issues"), &request)
            .await?;
        Ok(issue.number)
    }

    async fn list_commits(&self, head: &Head, limit: usize) -> DomainResult<Vec<String>> {
        let repository = &head.repository;
        match head.kind {
            HeadKind::PullRequest { number } => {
                // Oldest first on this endpoint.
                let commits: Vec<GitHubCommitRef> = self
                    .get_all(&format!("/repos/{repository}/pulls/{number}/commits?per_page=100"))
                    .await?;
                Ok(commits.into_iter().rev().take(limit).map(|c| c.sha).collect())
            }
            HeadKind::Branch => {
                let commits: Vec<GitHubCommitRef> = self
                    .get_json(&format!(
                        "/repos/{repository}/commits?sha={}&per_page={limit}",
                        head.sha
                    ))
                    .await?;
                Ok(commits.into_iter().take(limit).map(|c| c.sha).collect())
            }
        }
    }

    async fn list_hooks(&self, repository: &Repository) -> DomainResult<Vec<Webhook>> {
        let hooks: Vec<GitHubHook> = self
            .get_all(&format!("/repos/{repository}/hooks?per_page=100"))
            .await?;
        Ok(hooks.into_iter().map(Webhook::from).collect())
    }

    async fn save_hook(
        &self,
        repository: &Repository,
        hook_id: Option<u64>,
        url: &str,
        secret: Option<&str>,
    ) -> DomainResult<()> {
        let request = GitHubHookRequest {
            name: "web".to_string(),
            active: true,
            events: HOOK_EVENTS.iter().map(ToString::to_string).collect(),
            config: GitHubHookConfig {
                url: Some(url.to_string()),
                content_type: Some("json".to_string()),
                secret: secret.map(str::to_string),
            },
        };
        let (method, path) = match hook_id {
            Some(id) => (Method::PATCH, format!("/repos/{repository}/hooks/{id}")),
            None => (Method::POST, format!("/repos/{repository}/hooks")),
        };
        self.send_json::<_, Value>(method, &path, &request).await?;
        Ok(())
    }
}

fn transport_error(url: &str, err: &reqwest::Error) -> DomainError {
    DomainError::Transient(format!("{url}: {err}"))
}

/// Map a failed answer to a domain error.
fn map_status(status: StatusCode, headers: &HeaderMap, body: &str, url: &str) -> DomainError {
    let reason = format!("{url} returned {status}: {body}");
    let quota_exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|remaining| remaining == "0");

    match status {
        StatusCode::NOT_FOUND => DomainError::ResourceNotFound(reason),
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS if quota_exhausted => DomainError::Transient(reason),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DomainError::UnauthorizedRepository(reason),
        StatusCode::UNPROCESSABLE_ENTITY if body.contains(STATUS_CAP_MARKER) => {
            DomainError::UpstreamQuotaExceeded(reason)
        }
        StatusCode::TOO_MANY_REQUESTS => DomainError::Transient(reason),
        s if s.is_server_error() => DomainError::Transient(reason),
        _ => DomainError::ExecutionFailed(reason),
    }
}

/// URL of the next page from a `Link` header.
fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|param| param.trim() == "rel=\"next\"")
            .then(|| target.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    })
}
