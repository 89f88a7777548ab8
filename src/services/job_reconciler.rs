//! Keeps build server jobs in line with their declared specs.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::domain::errors::DomainResult;
use crate::domain::models::job::embed_updated_at;
use crate::domain::models::{Build, Head, Job, JobSpec, Repository};
use crate::domain::ports::BuildServer;

/// What to do with the remote definition of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Create,
    Update,
    Keep,
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Keep => "keep",
        })
    }
}

/// Decide the action bringing `job` in line with `spec`.
///
/// A job written before `refresh` is rewritten even when it already
/// contains the spec.
pub fn decide(spec: &JobSpec, job: Option<&Job>, refresh: Option<DateTime<Utc>>) -> JobAction {
    let Some(job) = job else {
        return JobAction::Create;
    };

    let outdated = refresh.is_some_and(|refresh| job.updated_at().is_none_or(|at| at < refresh));
    if outdated || !job.spec.contains(spec) {
        JobAction::Update
    } else {
        JobAction::Keep
    }
}

/// Writes to the build server, or logs them in dry run.
#[derive(Clone)]
pub struct JobReconciler {
    build_server: Arc<dyn BuildServer>,
    dry_run: bool,
}

impl JobReconciler {
    pub fn new(build_server: Arc<dyn BuildServer>, dry_run: bool) -> Self {
        Self {
            build_server,
            dry_run,
        }
    }

    /// Fetch the remote job of every spec concurrently.
    pub async fn fetch_jobs<'a, I>(&self, specs: I) -> Vec<(&'a JobSpec, DomainResult<Option<Job>>)>
    where
        I: IntoIterator<Item = &'a JobSpec>,
    {
        let fetches = specs.into_iter().map(|spec| async move {
            let job = match self.build_server.get_job(&spec.name).await {
                Ok(job) => Ok(Some(job)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            };
            (spec, job)
        });
        join_all(fetches).await
    }

    /// Apply `action` and return the job as it stands afterwards.
    ///
    /// In dry run nothing is written and the existing job, if any, is
    /// returned unchanged.
    #[instrument(skip(self, repository, spec, existing), fields(job = %spec.name, %action))]
    pub async fn apply(
        &self,
        repository: &Repository,
        spec: &JobSpec,
        action: JobAction,
        existing: Option<Job>,
    ) -> DomainResult<Option<Job>> {
        if action == JobAction::Keep {
            debug!("Job up to date");
            return Ok(existing);
        }
        if self.dry_run {
            info!("Would {action} job");
            return Ok(existing);
        }

        let description = embed_updated_at(
            spec.config.description.as_deref().unwrap_or_default(),
            Utc::now(),
        );
        let job = match action {
            JobAction::Create => self.build_server.create_job(repository, spec, &description).await?,
            _ => self.build_server.update_job(repository, spec, &description).await?,
        };
        info!(url = %job.url, "Job {action}d");
        Ok(Some(job))
    }

    /// Trigger a build of `context` for `head`.
    pub async fn trigger(
        &self,
        job: &Job,
        spec: &JobSpec,
        head: &Head,
        context: &str,
    ) -> DomainResult<BTreeMap<String, String>> {
        let parameters = job.build_parameters(head, spec, context);
        if self.dry_run {
            info!(job = %job.name, %context, ?parameters, "Would trigger build");
            return Ok(parameters);
        }
        info!(job = %job.name, %context, ?parameters, "Triggering build");
        self.build_server.trigger_build(job, &parameters).await?;
        Ok(parameters)
    }

    pub async fn stop(&self, build: &Build) -> DomainResult<()> {
        if self.dry_run {
            info!(url = %build.url, "Would stop build");
            return Ok(());
        }
        info!(url = %build.url, "Stopping build");
        self.build_server.stop_build(build).await
    }
}
