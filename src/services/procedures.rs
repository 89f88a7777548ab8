//! Top level procedures: one head, one poll cycle, the poll loop, and the
//! fan out of work to the worker pool.

use anyhow::{bail, Context, Result};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::pattern;
use crate::domain::models::queue::{COMMAND_CATEGORY, POLL_CATEGORY};
use crate::domain::models::{
    Config, Enqueued, Head, HeadKind, HeadLocator, JobSpec, Pipeline, Priority, Repository,
    RepositorySettings, StageSummary,
};
use crate::domain::ports::{Cache, CodeHost};
use crate::services::extensions::stages::{select_stage, trim_prefixes};
use crate::services::extensions::{Current, ExtensionPipeline};
use crate::services::throttle::ThrottleController;
use crate::services::worker_pool::{Task, WorkerPool};

/// Path webhooks are delivered to, below the public URL.
pub const WEBHOOK_PATH: &str = "/github-webhook";

/// Name the code host gives to generic web hooks.
const WEB_HOOK_NAME: &str = "web";

/// Outcome of one head pass, as reported to operators.
#[derive(Debug, Clone, Serialize)]
pub struct HeadReport {
    pub url: String,
    pub sha: String,
    pub stage: Option<String>,
    pub skipped: Option<String>,
    pub errors: Vec<String>,
}

impl From<&Current> for HeadReport {
    fn from(current: &Current) -> Self {
        Self {
            url: current.head.url.clone(),
            sha: current.head.sha.clone(),
            stage: current.current_stage.as_ref().map(|stage| stage.name.clone()),
            skipped: current.skipped.clone(),
            errors: current.errors.iter().map(|e| e.message.clone()).collect(),
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|reason| (*reason).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panicked".to_string())
}

/// Stages of one head.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub url: String,
    pub sha: String,
    pub current_stage: Option<String>,
    pub stages: Vec<StageSummary>,
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub heads: Vec<HeadReport>,
    /// Repositories left out of the cycle, with the reason.
    pub skipped_repositories: Vec<(String, String)>,
}

/// What webhook registration did on a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookAction {
    Created,
    Reactivated,
    Unchanged,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct HookReport {
    pub repository: String,
    pub action: HookAction,
}

/// Drives the extension pipeline over repositories and heads.
pub struct Reconciler {
    pipeline: ExtensionPipeline,
    throttle: ThrottleController,
    cache: Arc<dyn Cache>,
}

impl Reconciler {
    pub fn new(pipeline: ExtensionPipeline, cache: Arc<dyn Cache>) -> Self {
        let services = pipeline.services();
        let throttle = ThrottleController::new(services.code_host.clone(), services.config.throttle.clone());
        Self {
            pipeline,
            throttle,
            cache,
        }
    }

    pub fn config(&self) -> &Config {
        &self.pipeline.services().config
    }

    fn code_host(&self) -> &Arc<dyn CodeHost> {
        &self.pipeline.services().code_host
    }

    /// Configured repositories, parsed and deduplicated in order.
    pub fn repositories(&self) -> Result<Vec<Repository>> {
        let mut seen = BTreeSet::new();
        let mut repositories = Vec::new();
        for slug in &self.config().repositories {
            let repository = Repository::parse(slug).with_context(|| format!("Invalid repository {slug:?}"))?;
            if seen.insert(repository.clone()) {
                repositories.push(repository);
            }
        }
        Ok(repositories)
    }

    /// Read the settings of a repository from its default branch.
    ///
    /// Collaborators come from the code host too. A repository whose
    /// collaborators cannot be read is not ours to manage.
    #[instrument(skip(self), fields(repository = %repository))]
    pub async fn load_settings(&self, repository: &Repository) -> DomainResult<RepositorySettings> {
        let code_host = self.code_host();
        let default_branch = code_host.default_branch(repository).await?;

        let mut settings = match code_host
            .fetch_file_contents(repository, &self.config().spec_file, &default_branch)
            .await
        {
            Ok(source) => RepositorySettings::from_spec_file(&source).unwrap_or_else(|e| {
                warn!(error = %e, "Unreadable settings, using defaults");
                RepositorySettings::default()
            }),
            Err(e) if e.is_not_found() => RepositorySettings::default(),
            Err(e) => return Err(e),
        };
        settings.default_branch = default_branch;

        let collaborators = match code_host.list_collaborators(repository).await {
            Ok(collaborators) => collaborators,
            Err(DomainError::ResourceNotFound(reason) | DomainError::UnauthorizedRepository(reason)) => {
                return Err(DomainError::UnauthorizedRepository(format!("{repository}: {reason}")));
            }
            Err(e) => return Err(e),
        };
        for login in collaborators {
            if !settings.collaborators.iter().any(|c| c.eq_ignore_ascii_case(&login)) {
                settings.collaborators.push(login);
            }
        }

        debug!(
            stages = settings.stages.len(),
            collaborators = settings.collaborators.len(),
            "Settings loaded"
        );
        Ok(settings)
    }

    /// Heads of a repository kept by the heads filter.
    pub async fn list_repository_heads(&self, repository: &Repository) -> DomainResult<Vec<Head>> {
        let heads = self
            .code_host()
            .list_heads(repository, &self.config().github.branches)
            .await?;
        let filter = &self.config().github.heads_filter;
        Ok(heads
            .into_iter()
            .filter(|head| {
                let kept = pattern::matches(&head_filter_key(head), filter);
                if !kept {
                    debug!(head = %head, "Head filtered out");
                }
                kept
            })
            .collect())
    }

    /// Heads of every configured repository.
    pub async fn list_heads(&self) -> Result<Vec<Head>> {
        let mut heads = Vec::new();
        for repository in self.repositories()? {
            let found = self
                .list_repository_heads(&repository)
                .await
                .with_context(|| format!("Failed to list heads of {repository}"))?;
            heads.extend(found);
        }
        Ok(heads)
    }

    /// Reconcile one head with already loaded settings.
    pub async fn run_head(&self, head: Head, settings: RepositorySettings) -> Current {
        let current = self.pipeline.run(head, settings).await;
        match (&current.skipped, current.errors.len()) {
            (Some(reason), _) => info!(head = %current.head, %reason, "Head skipped"),
            (None, 0) => info!(head = %current.head, "Head processed"),
            (None, errors) => warn!(head = %current.head, errors, "Head processed with errors"),
        }
        current
    }

    /// Reconcile one head, loading its repository settings first.
    pub async fn process_head(&self, head: Head) -> Result<Current> {
        let settings = self
            .load_settings(&head.repository)
            .await
            .with_context(|| format!("Failed to load settings of {}", head.repository))?;
        Ok(self.run_head(head, settings).await)
    }

    /// Reconcile the head a URL designates.
    #[instrument(skip(self))]
    pub async fn process_url(&self, url: &str) -> Result<Current> {
        let locator = HeadLocator::parse(url)?;
        let head = self
            .code_host()
            .resolve_head(&locator)
            .await
            .with_context(|| format!("Failed to resolve {url}"))?;
        self.process_head(head).await
    }

    /// Stages of the head at `url` as its live statuses show them.
    ///
    /// Read only: nothing is created, triggered or written.
    #[instrument(skip(self))]
    pub async fn describe_pipeline(&self, url: &str) -> Result<PipelineReport> {
        let locator = HeadLocator::parse(url)?;
        let code_host = self.code_host();
        let head = code_host
            .resolve_head(&locator)
            .await
            .with_context(|| format!("Failed to resolve {url}"))?;
        let settings = self.load_settings(&head.repository).await?;

        let (statuses, source) = tokio::try_join!(
            code_host.fetch_statuses(&head.repository, &head.sha),
            code_host.fetch_file_contents(&head.repository, &self.config().spec_file, &head.sha),
        )?;

        let entries = if settings.stages.is_empty() {
            &self.config().default_stages
        } else {
            &settings.stages
        };
        let mut pipeline = Pipeline::new(entries, &trim_prefixes(&self.config().trim_prefixes, &head.repository));
        let specs = JobSpec::parse_all(&source)?
            .into_iter()
            .filter(|spec| spec.matches_branch(&head.ref_name));
        pipeline.add_specs(specs)?;
        pipeline.process_statuses(statuses);

        Ok(PipelineReport {
            url: head.url,
            sha: head.sha,
            current_stage: select_stage(&pipeline).map(|stage| stage.name.clone()),
            stages: pipeline.to_json(),
        })
    }

    /// One pass over every head of every repository.
    ///
    /// Errors the extension pipeline contains end up in the head report.
    /// Failures past that containment, like unreadable settings or a pass
    /// that panics, are logged and the cycle goes on, unless `debug` is set for
    /// a single pass, in which case the first one aborts it.
    #[instrument(skip(self))]
    pub async fn poll_cycle(&self) -> Result<CycleReport> {
        let fail_fast = self.config().debug && self.config().loop_interval_secs == 0;
        let mut report = CycleReport::default();

        self.cache.purge();

        for repository in self.repositories()? {
            let settings = match self.load_settings(&repository).await {
                Ok(settings) => settings,
                Err(DomainError::UnauthorizedRepository(reason)) => {
                    warn!(%repository, %reason, "Skipping unauthorized repository");
                    report.skipped_repositories.push((repository.to_string(), reason));
                    continue;
                }
                Err(e) if fail_fast => return Err(e).context(format!("Failed to load settings of {repository}")),
                Err(e) => {
                    error!(%repository, error = %e, "Failed to load settings");
                    report.skipped_repositories.push((repository.to_string(), e.to_string()));
                    continue;
                }
            };

            let heads = match self.list_repository_heads(&repository).await {
                Ok(heads) => heads,
                Err(e) if fail_fast => return Err(e).context(format!("Failed to list heads of {repository}")),
                Err(e) => {
                    error!(%repository, error = %e, "Failed to list heads");
                    report.skipped_repositories.push((repository.to_string(), e.to_string()));
                    continue;
                }
            };

            for head in heads {
                if let Err(e) = self.throttle.throttle().await {
                    warn!(error = %e, "Failed to read API quota, not throttling");
                }
                let name = head.to_string();
                let current = match AssertUnwindSafe(self.run_head(head, settings.clone()))
                    .catch_unwind()
                    .await
                {
                    Ok(current) => current,
                    Err(panic) if fail_fast => bail!("{name}: {}", panic_reason(&*panic)),
                    Err(panic) => {
                        error!(head = %name, reason = %panic_reason(&*panic), "Head abandoned for this pass");
                        continue;
                    }
                };
                report.heads.push(HeadReport::from(&current));
            }
        }

        if let Err(e) = self.cache.save() {
            warn!(error = %e, "Failed to save response cache");
        }
        if let Err(e) = self.throttle.log_remaining().await {
            debug!(error = %e, "Failed to read API quota");
        }

        Ok(report)
    }

    /// Poll cycles separated by `loop_interval_secs` until `shutdown`.
    ///
    /// A zero interval runs a single cycle.
    pub async fn run_loop(&self, shutdown: CancellationToken) -> Result<CycleReport> {
        let interval = Duration::from_secs(self.config().loop_interval_secs);
        loop {
            let report = self.poll_cycle().await?;
            if interval.is_zero() {
                return Ok(report);
            }

            info!(interval_secs = interval.as_secs(), heads = report.heads.len(), "Cycle done, sleeping");
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Poll loop stopped");
                    return Ok(report);
                }
                () = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Enqueue a pass over each head, as poll work.
    pub fn queue_heads(self: &Arc<Self>, pool: &WorkerPool, heads: Vec<Head>) -> usize {
        let mut queued = 0;
        for head in heads {
            let priority = Priority::new(POLL_CATEGORY, head.url.clone());
            let reconciler = Arc::clone(self);
            let task = Task::new(head.url.clone(), move || {
                let reconciler = Arc::clone(&reconciler);
                let head = head.clone();
                async move { reconciler.process_head(head).await.map(|_| ()) }
            });
            if pool.enqueue(task, priority) != Enqueued::Coalesced {
                queued += 1;
            }
        }
        info!(queued, "Heads queued");
        queued
    }

    /// Enqueue a pass over the head at `url`.
    pub fn queue_url(self: &Arc<Self>, pool: &WorkerPool, url: &str, category: &str) -> Enqueued {
        let reconciler = Arc::clone(self);
        let target = url.to_string();
        let task = Task::new(url, move || {
            let reconciler = Arc::clone(&reconciler);
            let target = target.clone();
            async move { reconciler.process_url(&target).await.map(|_| ()) }
        });
        pool.enqueue(task, Priority::new(category, url))
    }

    /// Make sure every repository delivers events to this bot.
    pub async fn register_webhooks(self: &Arc<Self>, pool: &WorkerPool) -> Result<Vec<HookReport>> {
        let Some(public_url) = self.config().server.public_url.clone() else {
            bail!("server.public_url must be set to register webhooks");
        };
        let target = format!("{}{WEBHOOK_PATH}", public_url.trim_end_matches('/'));
        let reports = Arc::new(Mutex::new(Vec::new()));

        for repository in self.repositories()? {
            let reconciler = Arc::clone(self);
            let reports = Arc::clone(&reports);
            let target = target.clone();
            let discriminator = repository.to_string();
            let task = Task::new(format!("register {repository}"), move || {
                let reconciler = Arc::clone(&reconciler);
                let reports = Arc::clone(&reports);
                let repository = repository.clone();
                let target = target.clone();
                async move {
                    let action = match reconciler.ensure_webhook(&repository, &target).await {
                        Ok(action) => action,
                        Err(e) if e.is_transient() => return Err(e.into()),
                        Err(e) => {
                            error!(%repository, error = %e, "Failed to register webhook");
                            HookAction::Failed
                        }
                    };
                    reports
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(HookReport {
                            repository: repository.to_string(),
                            action,
                        });
                    Ok(())
                }
            });
            pool.enqueue(task, Priority::new(COMMAND_CATEGORY, discriminator));
        }

        pool.join().await;
        let mut reports = std::mem::take(&mut *reports.lock().unwrap_or_else(PoisonError::into_inner));
        reports.sort_by(|a, b| a.repository.cmp(&b.repository));
        Ok(reports)
    }

    #[instrument(skip(self), fields(repository = %repository))]
    async fn ensure_webhook(&self, repository: &Repository, target: &str) -> DomainResult<HookAction> {
        let code_host = self.code_host();
        let hooks = code_host.list_hooks(repository).await?;
        let existing = hooks
            .iter()
            .find(|hook| hook.name == WEB_HOOK_NAME && hook.url.as_deref() == Some(target));

        let (hook_id, action) = match existing {
            Some(hook) if hook.active => {
                debug!("Webhook in place");
                return Ok(HookAction::Unchanged);
            }
            Some(hook) => (Some(hook.id), HookAction::Reactivated),
            None => (None, HookAction::Created),
        };

        if self.pipeline.services().dry_run() {
            info!(%target, ?action, "Would register webhook");
            return Ok(action);
        }
        code_host
            .save_hook(
                repository,
                hook_id,
                target,
                self.config().github.webhook_secret.as_deref(),
            )
            .await?;
        info!(%target, ?action, "Webhook registered");
        Ok(action)
    }
}

/// What the heads filter patterns are matched against:
/// `owner/name/<branch>` or `owner/name/pull/<number>`.
pub fn head_filter_key(head: &Head) -> String {
    match head.kind {
        HeadKind::Branch => format!("{}/{}", head.repository, head.ref_name),
        HeadKind::PullRequest { number } => {
            format!("{}/pull/{number}", head.repository)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_filter_key() {
        let repository = Repository::new("owner", "repo");
        let branch = Head::branch(repository.clone(), "feature/x", "abc", "https://x/tree/feature/x");
        assert_eq!(head_filter_key(&branch), "owner/repo/feature/x");

        let pr = Head::pull_request(repository, 7, "feature/x", "abc", "https://x/pull/7");
        assert_eq!(head_filter_key(&pr), "owner/repo/pull/7");

        assert!(!pattern::matches(&head_filter_key(&pr), &["*", "-*/pull/*"]));
    }
}
