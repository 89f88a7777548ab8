//! Parses the job specification file and applies per-head overrides.

use anyhow::anyhow;
use async_trait::async_trait;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use super::{Current, Extension, JobOverride, Services};
use crate::domain::errors::{Interrupt, PhaseResult};
use crate::domain::models::instruction::scalar_to_string;
use crate::domain::models::pattern;
use crate::domain::models::{Instruction, JobSpec};

pub struct YamlExtension;

#[async_trait]
impl Extension for YamlExtension {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["head"]
    }

    fn instructions(&self) -> &'static [&'static str] {
        &["yaml", "yml", "params", "parameters"]
    }

    async fn process_instruction(&self, current: &mut Current, instruction: &Instruction) -> PhaseResult {
        let Value::Mapping(jobs) = &instruction.args else {
            return Err(anyhow!("{} instruction expects a mapping of jobs", instruction.name).into());
        };
        let wraps_parameters = matches!(instruction.name.as_str(), "params" | "parameters");

        for (job, config) in jobs {
            let job = scalar_to_string(job)
                .ok_or_else(|| anyhow!("{}: job names must be scalars", instruction.name))?;
            let Value::Mapping(config) = config else {
                return Err(anyhow!("{}: override of {job} must be a mapping", instruction.name).into());
            };

            let config = if wraps_parameters {
                let mut wrapped = Mapping::new();
                wrapped.insert(Value::from("parameters"), Value::Mapping(config.clone()));
                wrapped
            } else {
                config.clone()
            };

            current.overrides.push(JobOverride {
                job,
                config,
                date: instruction.date,
            });
        }
        Ok(())
    }

    async fn run(&self, current: &mut Current, services: &Services) -> PhaseResult {
        let Some(source) = current.spec_source.as_deref() else {
            return Err(Interrupt::skip(format!(
                "no {} in repository",
                services.config.spec_file
            )));
        };

        let specs = match JobSpec::parse_all(source) {
            Ok(specs) => specs,
            Err(e) => {
                let timestamp = current.error_timestamp();
                current.record_error(
                    format!("yaml: failed to load {}: {e}", services.config.spec_file),
                    timestamp,
                );
                return Ok(());
            }
        };

        let jobs_filter = &services.config.jenkins.jobs_filter;
        for spec in specs {
            if !pattern::matches(&spec.name, jobs_filter) {
                debug!(job = %spec.name, "Job filtered out");
                continue;
            }
            current.job_specs.insert(spec.name.clone(), spec);
        }

        let overrides = std::mem::take(&mut current.overrides);
        for job_override in &overrides {
            let Some(spec) = current.job_specs.get_mut(&job_override.job) else {
                current.record_error(
                    format!("yaml: cannot override unknown job {}", job_override.job),
                    job_override.date,
                );
                continue;
            };
            if let Err(e) = spec.apply_override(&job_override.config) {
                current.record_error(format!("yaml: {e}"), job_override.date);
            }
        }
        current.overrides = overrides;

        Ok(())
    }
}
