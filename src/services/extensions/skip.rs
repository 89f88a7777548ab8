//! `skip` and `jobs` instructions: choose which jobs get built.

use async_trait::async_trait;

use super::{CancelRequest, Current, Extension, Services};
use crate::domain::errors::PhaseResult;
use crate::domain::models::commit::SKIPPED_DESCRIPTION;
use crate::domain::models::pattern;
use crate::domain::models::{CommitStatus, Instruction, StatusState};

pub struct SkipExtension;

#[async_trait]
impl Extension for SkipExtension {
    fn name(&self) -> &'static str {
        "skip"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["stages"]
    }

    fn instructions(&self) -> &'static [&'static str] {
        &["skip", "jobs"]
    }

    async fn process_instruction(&self, current: &mut Current, instruction: &Instruction) -> PhaseResult {
        let patterns = instruction.args_as_patterns();
        current.jobs_match = if instruction.name == "skip" {
            skip_patterns(&patterns)
        } else {
            patterns
        };
        Ok(())
    }

    async fn run(&self, current: &mut Current, services: &Services) -> PhaseResult {
        if current.jobs_match.is_empty() {
            return Ok(());
        }
        let Some(stage) = current.current_stage.clone() else {
            return Ok(());
        };

        for spec in &stage.jobs {
            if pattern::matches(&spec.name, &current.jobs_match) {
                continue;
            }
            let Some(job) = current.jobs.get(&spec.name) else {
                continue;
            };

            for context in job.list_contexts(spec) {
                if let Some(status) = current.commit.statuses.get(&context) {
                    if status.state == StatusState::Success && !status.is_skipped() {
                        continue;
                    }
                    if status.is_running() {
                        current.cancel_queue.push(CancelRequest {
                            sha: current.head.sha.clone(),
                            status: status.clone(),
                        });
                    }
                }

                let skipped = CommitStatus::new(context, StatusState::Success)
                    .with_description(SKIPPED_DESCRIPTION);
                services
                    .maybe_update_status(&current.head.repository, &mut current.commit, skipped)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Patterns building everything but `excluded`, nothing when none given.
fn skip_patterns(excluded: &[String]) -> Vec<String> {
    if excluded.is_empty() {
        return vec!["-*".to_string()];
    }
    let mut patterns = vec!["*".to_string()];
    patterns.extend(excluded.iter().map(|p| format!("-{p}")));
    patterns
}
