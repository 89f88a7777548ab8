//! Common test utilities for integration tests
//!
//! In-memory fakes of the code host and build server ports, plus fixtures
//! shared by the integration test files.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use stagehand::domain::errors::{DomainError, DomainResult};
use stagehand::domain::models::job::JobKind;
use stagehand::domain::models::{
    Build, Comment, CommitStatus, Config, Head, HeadLocator, Job, JobParameter, JobSpec, RateLimit,
    Repository,
};
use stagehand::domain::ports::{BuildServer, CodeHost, Webhook};
use stagehand::services::{ExtensionPipeline, Services};

pub const JENKINS_URL: &str = "https://jenkins.test";

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn repository() -> Repository {
    Repository::new("owner", "repo")
}

pub fn branch_head(name: &str, sha: &str) -> Head {
    Head::branch(
        repository(),
        name,
        sha,
        &format!("https://github.com/owner/repo/tree/{name}"),
    )
}

pub fn pull_head(number: u64, ref_name: &str, sha: &str) -> Head {
    Head::pull_request(
        repository(),
        number,
        ref_name,
        sha,
        &format!("https://github.com/owner/repo/pull/{number}"),
    )
}

/// Mutable world seen through [`FakeCodeHost`].
#[derive(Default)]
pub struct CodeHostState {
    pub login: String,
    pub default_branch: String,
    pub heads: Vec<Head>,
    /// Files by path, whatever the ref.
    pub files: HashMap<String, String>,
    pub statuses: HashMap<String, Vec<CommitStatus>>,
    pub comments: Vec<Comment>,
    pub commit_date: Option<DateTime<Utc>>,
    /// History of the head, newest first. Only the head sha when empty.
    pub commits: Vec<String>,
    pub collaborators: Vec<String>,
    pub collaborators_error: Option<DomainError>,
    pub hooks: Vec<Webhook>,
    pub rate_limit: Option<RateLimit>,
    /// Written statuses, as `(sha, status)`.
    pub pushed: Vec<(String, CommitStatus)>,
    pub posted: Vec<String>,
    /// Opened issues, as `(title, body)`.
    pub issues: Vec<(String, String)>,
    pub saved_hooks: Vec<(Option<u64>, String)>,
}

#[derive(Default)]
pub struct FakeCodeHost {
    pub state: Mutex<CodeHostState>,
}

impl FakeCodeHost {
    pub fn new() -> Self {
        let host = Self::default();
        {
            let mut state = host.state.lock().unwrap();
            state.login = "stagehand-bot".to_string();
            state.default_branch = "master".to_string();
            state.commit_date = Some(Utc::now());
        }
        host
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), content.to_string());
        self
    }

    pub fn with_head(self, head: Head) -> Self {
        self.state.lock().unwrap().heads.push(head);
        self
    }

    pub fn with_statuses(self, sha: &str, statuses: Vec<CommitStatus>) -> Self {
        self.state.lock().unwrap().statuses.insert(sha.to_string(), statuses);
        self
    }

    pub fn with_comment(self, author: &str, body: &str, at: DateTime<Utc>) -> Self {
        self.state
            .lock()
            .unwrap()
            .comments
            .push(Comment::new(author, body, at));
        self
    }

    pub fn pushed(&self) -> Vec<(String, CommitStatus)> {
        self.state.lock().unwrap().pushed.clone()
    }

    /// Last written status of `context`.
    pub fn last_pushed(&self, context: &str) -> Option<CommitStatus> {
        self.pushed()
            .into_iter()
            .rev()
            .map(|(_, status)| status)
            .find(|status| status.context == context)
    }

    pub fn posted(&self) -> Vec<String> {
        self.state.lock().unwrap().posted.clone()
    }

    pub fn issues(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().issues.clone()
    }
}

#[async_trait]
impl CodeHost for FakeCodeHost {
    async fn whoami(&self) -> DomainResult<String> {
        Ok(self.state.lock().unwrap().login.clone())
    }

    async fn rate_limit(&self) -> DomainResult<RateLimit> {
        Ok(self.state.lock().unwrap().rate_limit.unwrap_or(RateLimit {
            limit: 5000,
            remaining: 5000,
            reset_at: Utc::now() + chrono::Duration::hours(1),
        }))
    }

    async fn default_branch(&self, _repository: &Repository) -> DomainResult<String> {
        Ok(self.state.lock().unwrap().default_branch.clone())
    }

    async fn fetch_file_contents(
        &self,
        _repository: &Repository,
        path: &str,
        _git_ref: &str,
    ) -> DomainResult<String> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| DomainError::ResourceNotFound(path.to_string()))
    }

    async fn list_collaborators(&self, _repository: &Repository) -> DomainResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        match &state.collaborators_error {
            Some(DomainError::ResourceNotFound(reason)) => Err(DomainError::ResourceNotFound(reason.clone())),
            Some(DomainError::UnauthorizedRepository(reason)) => {
                Err(DomainError::UnauthorizedRepository(reason.clone()))
            }
            Some(other) => Err(DomainError::ExecutionFailed(other.to_string())),
            None => Ok(state.collaborators.clone()),
        }
    }

    async fn list_heads(&self, repository: &Repository, _branches: &[String]) -> DomainResult<Vec<Head>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .heads
            .iter()
            .filter(|head| &head.repository == repository)
            .cloned()
            .collect())
    }

    async fn resolve_head(&self, locator: &HeadLocator) -> DomainResult<Head> {
        let state = self.state.lock().unwrap();
        state
            .heads
            .iter()
            .find(|head| HeadLocator::parse(&head.url).is_ok_and(|l| &l == locator))
            .cloned()
            .ok_or_else(|| DomainError::ResourceNotFound(format!("{locator:?}")))
    }

    async fn fetch_commit_date(&self, _repository: &Repository, _sha: &str) -> DomainResult<Option<DateTime<Utc>>> {
        Ok(self.state.lock().unwrap().commit_date)
    }

    async fn fetch_statuses(&self, _repository: &Repository, sha: &str) -> DomainResult<Vec<CommitStatus>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .statuses
            .get(sha)
            .cloned()
            .unwrap_or_default())
    }

    async fn push_status(
        &self,
        _repository: &Repository,
        sha: &str,
        status: &CommitStatus,
    ) -> DomainResult<CommitStatus> {
        let mut stored = status.clone();
        stored.updated_at = Some(Utc::now());

        let mut state = self.state.lock().unwrap();
        state.pushed.push((sha.to_string(), stored.clone()));
        state.statuses.entry(sha.to_string()).or_default().push(stored.clone());
        Ok(stored)
    }

    async fn fetch_comments(&self, _head: &Head) -> DomainResult<Vec<Comment>> {
        Ok(self.state.lock().unwrap().comments.clone())
    }

    async fn post_comment(&self, _head: &Head, body: &str) -> DomainResult<()> {
        self.state.lock().unwrap().posted.push(body.to_string());
        Ok(())
    }

    async fn report_issue(&self, _repository: &Repository, title: &str, body: &str) -> DomainResult<u64> {
        let mut state = self.state.lock().unwrap();
        state.issues.push((title.to_string(), body.to_string()));
        Ok(state.issues.len() as u64)
    }

    async fn list_commits(&self, head: &Head, limit: usize) -> DomainResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        if state.commits.is_empty() {
            return Ok(vec![head.sha.clone()]);
        }
        Ok(state.commits.iter().take(limit).cloned().collect())
    }

    async fn list_hooks(&self, _repository: &Repository) -> DomainResult<Vec<Webhook>> {
        Ok(self.state.lock().unwrap().hooks.clone())
    }

    async fn save_hook(
        &self,
        _repository: &Repository,
        hook_id: Option<u64>,
        url: &str,
        _secret: Option<&str>,
    ) -> DomainResult<()> {
        self.state
            .lock()
            .unwrap()
            .saved_hooks
            .push((hook_id, url.to_string()));
        Ok(())
    }
}

/// A freestyle job checking out `${REVISION}`, as the build server would
/// report it after creation from `spec`.
pub fn job_from_spec(spec: &JobSpec, description: &str) -> Job {
    let mut parameters = vec![JobParameter::new("REVISION", "StringParameterDefinition")];
    parameters.extend(spec.config.parameters.iter().map(|(name, default)| JobParameter {
        name: name.clone(),
        kind: "StringParameterDefinition".to_string(),
        default: Some(default.clone()),
    }));
    Job {
        name: spec.name.clone(),
        url: format!("{JENKINS_URL}/job/{}/", spec.name),
        description: description.to_string(),
        parameters,
        kind: JobKind::Freestyle,
        spec: spec.clone(),
        scm_branch: Some("${REVISION}".to_string()),
    }
}

#[derive(Default)]
pub struct BuildServerState {
    pub jobs: BTreeMap<String, Job>,
    pub builds: HashMap<String, Build>,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub triggered: Vec<(String, BTreeMap<String, String>)>,
    pub stopped: Vec<String>,
    pub fail_triggers: bool,
}

#[derive(Default)]
pub struct FakeBuildServer {
    pub state: Mutex<BuildServerState>,
}

impl FakeBuildServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(self, job: Job) -> Self {
        self.state.lock().unwrap().jobs.insert(job.name.clone(), job);
        self
    }

    pub fn with_build(self, build: Build) -> Self {
        self.state.lock().unwrap().builds.insert(build.url.clone(), build);
        self
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn updated(&self) -> Vec<String> {
        self.state.lock().unwrap().updated.clone()
    }

    pub fn triggered(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.state.lock().unwrap().triggered.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }
}

#[async_trait]
impl BuildServer for FakeBuildServer {
    fn base_url(&self) -> &str {
        JENKINS_URL
    }

    async fn get_job(&self, name: &str) -> DomainResult<Job> {
        self.state
            .lock()
            .unwrap()
            .jobs
            .get(name)
            .cloned()
            .ok_or_else(|| DomainError::ResourceNotFound(name.to_string()))
    }

    async fn create_job(&self, _repository: &Repository, spec: &JobSpec, description: &str) -> DomainResult<Job> {
        let job = job_from_spec(spec, description);
        let mut state = self.state.lock().unwrap();
        state.created.push(spec.name.clone());
        state.jobs.insert(spec.name.clone(), job.clone());
        Ok(job)
    }

    async fn update_job(&self, _repository: &Repository, spec: &JobSpec, description: &str) -> DomainResult<Job> {
        let job = job_from_spec(spec, description);
        let mut state = self.state.lock().unwrap();
        state.updated.push(spec.name.clone());
        state.jobs.insert(spec.name.clone(), job.clone());
        Ok(job)
    }

    async fn trigger_build(&self, job: &Job, parameters: &BTreeMap<String, String>) -> DomainResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_triggers {
            return Err(DomainError::ExecutionFailed("queue is closed".to_string()));
        }
        state.triggered.push((job.name.clone(), parameters.clone()));
        Ok(())
    }

    async fn get_build(&self, url: &str) -> DomainResult<Build> {
        self.state
            .lock()
            .unwrap()
            .builds
            .get(url)
            .cloned()
            .ok_or_else(|| DomainError::ResourceNotFound(url.to_string()))
    }

    async fn stop_build(&self, build: &Build) -> DomainResult<()> {
        self.state.lock().unwrap().stopped.push(build.url.clone());
        Ok(())
    }

    async fn is_queue_empty(&self) -> DomainResult<bool> {
        Ok(true)
    }
}

pub fn test_config() -> Config {
    Config {
        repositories: vec!["owner/repo".to_string()],
        ..Config::default()
    }
}

pub fn services(code_host: &Arc<FakeCodeHost>, build_server: &Arc<FakeBuildServer>, config: Config) -> Services {
    let code_host: Arc<dyn CodeHost> = code_host.clone();
    let build_server: Arc<dyn BuildServer> = build_server.clone();
    Services::new(code_host, build_server, Arc::new(config)).with_login("stagehand-bot")
}

pub fn pipeline(code_host: &Arc<FakeCodeHost>, build_server: &Arc<FakeBuildServer>, config: Config) -> ExtensionPipeline {
    ExtensionPipeline::with_default_extensions(services(code_host, build_server, config)).unwrap()
}
