//! Groups specs and statuses into stages and picks the stage to build.

use async_trait::async_trait;
use tracing::debug;

use super::{Current, Extension, Services};
use crate::domain::errors::{Interrupt, PhaseResult};
use crate::domain::models::{Pipeline, Repository, Stage};

pub struct StagesExtension;

#[async_trait]
impl Extension for StagesExtension {
    fn name(&self) -> &'static str {
        "stages"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["createjobs", "rebuild"]
    }

    async fn run(&self, current: &mut Current, services: &Services) -> PhaseResult {
        let entries = if current.settings.stages.is_empty() {
            &services.config.default_stages
        } else {
            &current.settings.stages
        };
        let trim_prefixes = trim_prefixes(&services.config.trim_prefixes, &current.head.repository);
        let mut pipeline = Pipeline::new(entries, &trim_prefixes);

        let ref_name = current.head.ref_name.clone();
        let specs = current
            .job_specs
            .values()
            .filter(|spec| {
                let wanted = spec.matches_branch(&ref_name);
                if !wanted {
                    debug!(job = %spec.name, branch = %ref_name, "Job not built on this branch");
                }
                wanted
            })
            .cloned()
            .collect::<Vec<_>>();
        pipeline.add_specs(specs)?;
        pipeline.process_statuses(current.commit.statuses.values().cloned());

        current.current_stage = select_stage(&pipeline).cloned();
        current.pipeline = Some(pipeline);

        match &current.current_stage {
            Some(stage) => {
                debug!(head = %current.head, stage = %stage.name, state = %stage.state(), "Current stage");
                Ok(())
            }
            // Errors met so far still deserve a report.
            None if !current.errors.is_empty() => Ok(()),
            None => Err(Interrupt::skip("no stage with jobs")),
        }
    }
}

/// First active stage not yet complete, else the last active one.
pub fn select_stage(pipeline: &Pipeline) -> Option<&Stage> {
    pipeline
        .stages
        .iter()
        .filter(|stage| stage.is_active())
        .find(|stage| !stage.is_complete())
        .or_else(|| pipeline.stages.iter().filter(|stage| stage.is_active()).last())
}

/// Configured prefixes plus the repository owner and name.
pub fn trim_prefixes(configured: &[String], repository: &Repository) -> Vec<String> {
    let mut prefixes = configured.to_vec();
    for part in [&repository.owner, &repository.name] {
        prefixes.push(part.clone());
        let lower = part.to_lowercase();
        if lower != *part {
            prefixes.push(lower);
        }
    }
    prefixes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{CommitStatus, JobConfig, JobSpec, StatusState};

    fn pipeline(states: &[(&str, Option<StatusState>)]) -> Pipeline {
        let mut pipeline = Pipeline::new(&[], &[]);
        let specs = states.iter().map(|(stage, _)| {
            JobSpec::new(
                format!("{stage}-job"),
                JobConfig {
                    stage: Some((*stage).to_string()),
                    ..JobConfig::default()
                },
            )
        });
        pipeline.add_specs(specs.collect::<Vec<_>>()).unwrap();
        pipeline.process_statuses(
            states
                .iter()
                .filter_map(|(stage, state)| state.map(|s| CommitStatus::new(format!("{stage}-job"), s))),
        );
        pipeline
    }

    #[test]
    fn test_select_first_incomplete_stage() {
        let pipeline = pipeline(&[
            ("build", Some(StatusState::Success)),
            ("test", Some(StatusState::Pending)),
            ("deploy", None),
        ]);
        assert_eq!(select_stage(&pipeline).unwrap().name, "test");
    }

    #[test]
    fn test_select_last_active_when_all_complete() {
        let pipeline = pipeline(&[("build", Some(StatusState::Success)), ("test", Some(StatusState::Success))]);
        assert_eq!(select_stage(&pipeline).unwrap().name, "test");
    }

    #[test]
    fn test_select_none_without_jobs() {
        assert!(select_stage(&Pipeline::new(&[], &[])).is_none());
    }

    #[test]
    fn test_trim_prefixes() {
        let prefixes = trim_prefixes(&["ci".to_string()], &Repository::new("Owner", "repo"));
        assert_eq!(prefixes, vec!["ci", "Owner", "owner", "repo"]);
    }
}
