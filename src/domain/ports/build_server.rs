use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Build, Job, JobSpec, Repository};

/// Port for the build server
///
/// Jobs are addressed by the name of the spec they implement.
#[async_trait]
pub trait BuildServer: Send + Sync {
    /// Base URL; statuses pointing below it belong to this server
    fn base_url(&self) -> &str;

    /// Fetch a job, `ResourceNotFound` when it does not exist
    async fn get_job(&self, name: &str) -> DomainResult<Job>;

    /// Create a job implementing `spec`, building `repository`
    async fn create_job(
        &self,
        repository: &Repository,
        spec: &JobSpec,
        description: &str,
    ) -> DomainResult<Job>;

    /// Rewrite the definition of an existing job
    async fn update_job(
        &self,
        repository: &Repository,
        spec: &JobSpec,
        description: &str,
    ) -> DomainResult<Job>;

    async fn trigger_build(&self, job: &Job, parameters: &BTreeMap<String, String>)
        -> DomainResult<()>;

    /// Fetch the build a status target URL points at
    async fn get_build(&self, url: &str) -> DomainResult<Build>;

    async fn stop_build(&self, build: &Build) -> DomainResult<()>;

    async fn is_queue_empty(&self) -> DomainResult<bool>;
}

/// Whether `url` designates a build of the server at `base_url`.
pub fn is_build_url(base_url: &str, url: &str) -> bool {
    let base = base_url.trim_end_matches('/');
    let Some(rest) = url.strip_prefix(base) else {
        return false;
    };
    let number = rest.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    rest.starts_with("/job/") && number.parse::<u64>().is_ok()
}
