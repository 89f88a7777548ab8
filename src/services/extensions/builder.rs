//! Triggers builds of the current stage.

use async_trait::async_trait;
use tracing::debug;

use super::{Current, Extension, Services};
use crate::domain::errors::PhaseResult;
use crate::domain::models::pattern;
use crate::domain::models::{CommitStatus, Job, JobSpec, StatusState};
use crate::services::job_reconciler::JobReconciler;

/// Description of a status once its build was handed to the build server.
pub const TRIGGERED_DESCRIPTION: &str = "Build triggered";

pub struct BuilderExtension;

#[async_trait]
impl Extension for BuilderExtension {
    fn name(&self) -> &'static str {
        "builder"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["stages", "skip", "rebuild"]
    }

    async fn run(&self, current: &mut Current, services: &Services) -> PhaseResult {
        let Some(stage) = current.current_stage.clone() else {
            return Ok(());
        };
        let reconciler = JobReconciler::new(services.build_server.clone(), services.dry_run());

        for spec in &stage.jobs {
            if !current.jobs_match.is_empty() && !pattern::matches(&spec.name, &current.jobs_match) {
                continue;
            }
            let Some(job) = current.jobs.get(&spec.name).cloned() else {
                debug!(job = %spec.name, "No remote job to build");
                continue;
            };

            let not_built = current
                .commit
                .filter_not_built_contexts(job.list_contexts(spec), current.rebuild_failed);
            if not_built.is_empty() {
                continue;
            }

            // A matrix without combination filter builds every combination at once.
            let batches: Vec<(String, Vec<String>)> =
                if job.is_matrix() && job.combination_param().is_none() {
                    vec![(job.name.clone(), not_built)]
                } else {
                    not_built.into_iter().map(|c| (c.clone(), vec![c])).collect()
                };

            for (target, contexts) in batches {
                trigger(current, services, &reconciler, &job, spec, &target, &contexts).await?;
            }
        }
        Ok(())
    }
}

async fn trigger(
    current: &mut Current,
    services: &Services,
    reconciler: &JobReconciler,
    job: &Job,
    spec: &JobSpec,
    target: &str,
    contexts: &[String],
) -> PhaseResult {
    for context in contexts {
        let queued = CommitStatus::new(context.as_str(), StatusState::Pending)
            .with_description("Queued")
            .with_target_url(job.url.clone());
        services
            .maybe_update_status(&current.head.repository, &mut current.commit, queued)
            .await?;
    }

    let (state, description) = match reconciler.trigger(job, spec, &current.head, target).await {
        Ok(_) => (StatusState::Pending, TRIGGERED_DESCRIPTION.to_string()),
        Err(e) => {
            let timestamp = current.error_timestamp();
            current.record_error(format!("builder: failed to trigger {target}: {e}"), timestamp);
            (StatusState::Error, "Failed to queue build".to_string())
        }
    };

    for context in contexts {
        let status = CommitStatus::new(context.as_str(), state)
            .with_description(description.as_str())
            .with_target_url(job.url.clone());
        services
            .maybe_update_status(&current.head.repository, &mut current.commit, status)
            .await?;
    }
    Ok(())
}
