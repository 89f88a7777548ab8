//! Per-head reconciliation state and the services extensions act through.

use chrono::{DateTime, Utc};
use serde_yaml::Mapping;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Commit, CommitStatus, Config, Head, Job, JobSpec, Pipeline, Repository, RepositorySettings,
    Stage,
};
use crate::domain::ports::{BuildServer, CodeHost};

/// An error met while processing a head, reported as a comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Configuration override requested by an instruction for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOverride {
    pub job: String,
    pub config: Mapping,
    pub date: DateTime<Utc>,
}

/// A live status whose build should be stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelRequest {
    /// Commit the status was reported on.
    pub sha: String,
    pub status: CommitStatus,
}

/// Mutable state of one head, threaded through every extension.
#[derive(Debug)]
pub struct Current {
    pub head: Head,
    pub settings: RepositorySettings,
    pub commit: Commit,
    /// Raw specification file, `None` when the repository has none.
    pub spec_source: Option<String>,
    pub overrides: Vec<JobOverride>,
    pub job_specs: BTreeMap<String, JobSpec>,
    /// Remote jobs, by spec name.
    pub jobs: BTreeMap<String, Job>,
    pub pipeline: Option<Pipeline>,
    pub current_stage: Option<Stage>,
    pub errors: Vec<ErrorEntry>,
    /// Errors dated before this were already reported.
    pub errors_reset: Option<DateTime<Utc>>,
    pub cancel_queue: Vec<CancelRequest>,
    pub poll_queue: Vec<CommitStatus>,
    /// Authors asking for help, with the date of their request.
    pub help_mentions: BTreeMap<String, DateTime<Utc>>,
    /// Failed builds older than this are built again.
    pub rebuild_failed: Option<DateTime<Utc>>,
    /// Include/exclude patterns of jobs to build, empty for all.
    pub jobs_match: Vec<String>,
    /// Jobs written before this are rewritten.
    pub refresh_jobs: Option<DateTime<Utc>>,
    /// A broken branch was already reported.
    pub report_done: bool,
    /// Why the pipeline stopped early, if it did.
    pub skipped: Option<String>,
}

impl Current {
    pub fn new(head: Head, settings: RepositorySettings) -> Self {
        let commit = Commit::new(head.sha.clone());
        Self {
            head,
            settings,
            commit,
            spec_source: None,
            overrides: Vec::new(),
            job_specs: BTreeMap::new(),
            jobs: BTreeMap::new(),
            pipeline: None,
            current_stage: None,
            errors: Vec::new(),
            errors_reset: None,
            cancel_queue: Vec::new(),
            poll_queue: Vec::new(),
            help_mentions: BTreeMap::new(),
            rebuild_failed: None,
            jobs_match: Vec::new(),
            refresh_jobs: None,
            report_done: false,
            skipped: None,
        }
    }

    /// Date errors of this head are stamped with when no instruction
    /// caused them.
    ///
    /// The commit date keeps the stamp stable across passes, so a reset
    /// posted after a report keeps silencing the same errors.
    pub fn error_timestamp(&self) -> DateTime<Utc> {
        self.commit.date.unwrap_or_else(Utc::now)
    }

    pub fn record_error(&mut self, message: impl Into<String>, timestamp: DateTime<Utc>) {
        let message = message.into();
        warn!(head = %self.head, error = %message, "Recording error");
        self.errors.push(ErrorEntry { message, timestamp });
    }

    /// Errors not silenced by a reset.
    pub fn unreported_errors(&self) -> impl Iterator<Item = &ErrorEntry> {
        self.errors
            .iter()
            .filter(|error| self.errors_reset.is_none_or(|reset| error.timestamp >= reset))
    }
}

/// External collaborators shared by every extension.
#[derive(Clone)]
pub struct Services {
    pub code_host: Arc<dyn CodeHost>,
    pub build_server: Arc<dyn BuildServer>,
    pub config: Arc<Config>,
    /// Login of the bot, whose own comments always count as instructions.
    pub login: Option<String>,
}

impl Services {
    pub fn new(
        code_host: Arc<dyn CodeHost>,
        build_server: Arc<dyn BuildServer>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            code_host,
            build_server,
            config,
            login: None,
        }
    }

    #[must_use]
    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    pub fn dry_run(&self) -> bool {
        self.config.dry_run
    }

    pub fn is_bot(&self, login: &str) -> bool {
        self.login
            .as_deref()
            .is_some_and(|me| me.eq_ignore_ascii_case(login))
    }

    pub async fn comment(&self, head: &Head, body: &str) -> DomainResult<()> {
        if self.dry_run() {
            info!(head = %head, "Would comment:\n{body}");
            return Ok(());
        }
        info!(head = %head, "Commenting");
        self.code_host.post_comment(head, body).await
    }

    /// Push `status` unless the commit already shows the same.
    ///
    /// The local status cache is updated either way, so later extensions
    /// see the new state even in dry run. Hitting the per-commit status cap
    /// drops the write.
    pub async fn maybe_update_status(
        &self,
        repository: &Repository,
        commit: &mut Commit,
        status: CommitStatus,
    ) -> DomainResult<()> {
        if commit
            .statuses
            .get(&status.context)
            .is_some_and(|existing| existing.same_as(&status))
        {
            return Ok(());
        }

        if self.dry_run() {
            info!(
                sha = %commit.sha,
                context = %status.context,
                state = %status.state,
                description = status.description(),
                "Would update status"
            );
            commit.statuses.insert(status.context.clone(), status.at(Utc::now()));
            return Ok(());
        }

        info!(
            sha = %commit.sha,
            context = %status.context,
            state = %status.state,
            description = status.description(),
            "Updating status"
        );
        match self.code_host.push_status(repository, &commit.sha, &status).await {
            Ok(stored) => {
                let stored = if stored.updated_at.is_some() {
                    stored
                } else {
                    stored.at(Utc::now())
                };
                commit.statuses.insert(stored.context.clone(), stored);
                Ok(())
            }
            Err(DomainError::UpstreamQuotaExceeded(reason)) => {
                warn!(sha = %commit.sha, context = %status.context, %reason, "Dropping status update");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
