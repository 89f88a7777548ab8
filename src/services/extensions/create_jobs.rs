//! Creates and updates build server jobs from the declared specs.

use async_trait::async_trait;

use super::{Current, Extension, Services};
use crate::domain::errors::PhaseResult;
use crate::domain::models::Instruction;
use crate::services::job_reconciler::{decide, JobReconciler};

pub struct CreateJobsExtension;

#[async_trait]
impl Extension for CreateJobsExtension {
    fn name(&self) -> &'static str {
        "createjobs"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["yaml"]
    }

    fn instructions(&self) -> &'static [&'static str] {
        &["refresh-jobs"]
    }

    async fn process_instruction(&self, current: &mut Current, instruction: &Instruction) -> PhaseResult {
        current.refresh_jobs = Some(instruction.date);
        Ok(())
    }

    async fn run(&self, current: &mut Current, services: &Services) -> PhaseResult {
        let reconciler = JobReconciler::new(services.build_server.clone(), services.dry_run());
        let fetched = reconciler.fetch_jobs(current.job_specs.values()).await;

        let mut jobs = Vec::with_capacity(fetched.len());
        let mut failures = Vec::new();
        for (spec, existing) in fetched {
            let existing = match existing {
                Ok(existing) => existing,
                Err(e) => {
                    failures.push(format!("createjobs: failed to fetch job {}: {e}", spec.name));
                    continue;
                }
            };

            let action = decide(spec, existing.as_ref(), current.refresh_jobs);
            match reconciler.apply(&current.head.repository, spec, action, existing).await {
                Ok(Some(job)) => jobs.push((spec.name.clone(), job)),
                Ok(None) => {}
                Err(e) => failures.push(format!("createjobs: failed to {action} job {}: {e}", spec.name)),
            }
        }

        current.jobs.extend(jobs);
        let timestamp = current.error_timestamp();
        for failure in failures {
            current.record_error(failure, timestamp);
        }
        Ok(())
    }
}
