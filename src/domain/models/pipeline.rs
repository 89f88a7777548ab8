//! Stages and the pipeline grouping them.
//!
//! A [`Pipeline`] is rebuilt on every reconciliation pass from the stage
//! list of the repository settings. Job specs are assigned to stages, then
//! live commit statuses are routed to the stage expecting their context.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::commit::{CommitStatus, StatusState};
use super::job_spec::JobSpec;
use crate::domain::errors::{DomainError, DomainResult};

/// Stage preferred for jobs declaring none.
pub const PREFERRED_DEFAULT_STAGE: &str = "test";

/// A stage as declared in the repository settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageEntry {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        external: Vec<String>,
    },
}

impl StageEntry {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Detailed { name, .. } => name,
        }
    }

    pub fn external(&self) -> &[String] {
        match self {
            Self::Name(_) => &[],
            Self::Detailed { external, .. } => external,
        }
    }
}

/// Stages used when the repository declares none.
pub fn default_stages() -> Vec<StageEntry> {
    ["build", "test", "deploy"]
        .into_iter()
        .map(|name| StageEntry::Name(name.to_string()))
        .collect()
}

/// Aggregate state of a set of statuses.
///
/// `error` beats `failure` beats `pending`; `success` requires every status
/// to succeed. Anything else, including an empty set, is `unknown`.
pub fn aggregate_state<I>(states: I) -> StatusState
where
    I: IntoIterator<Item = StatusState>,
{
    let mut seen_error = false;
    let mut seen_failure = false;
    let mut seen_pending = false;
    let mut all_success = true;
    let mut empty = true;

    for state in states {
        empty = false;
        match state {
            StatusState::Error => seen_error = true,
            StatusState::Failure => seen_failure = true,
            StatusState::Pending => seen_pending = true,
            StatusState::Success | StatusState::Unknown => {}
        }
        if state != StatusState::Success {
            all_success = false;
        }
    }

    if seen_error {
        StatusState::Error
    } else if seen_failure {
        StatusState::Failure
    } else if seen_pending {
        StatusState::Pending
    } else if all_success && !empty {
        StatusState::Success
    } else {
        StatusState::Unknown
    }
}

/// A named gate of jobs and external contexts.
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub jobs: Vec<JobSpec>,
    pub external_contexts: Vec<String>,
    pub statuses: BTreeMap<String, CommitStatus>,
    trim_prefixes: Vec<String>,
}

impl Stage {
    pub fn new(name: impl Into<String>, external_contexts: Vec<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Vec::new(),
            external_contexts,
            statuses: BTreeMap::new(),
            trim_prefixes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_trim_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.trim_prefixes = prefixes;
        self
    }

    /// Contexts this stage claims: external contexts, then job names.
    pub fn expected_contexts(&self) -> impl Iterator<Item = &str> {
        self.external_contexts
            .iter()
            .map(String::as_str)
            .chain(self.jobs.iter().map(|job| job.name.as_str()))
    }

    /// A stage without jobs nor external contexts has no meaningful state.
    pub fn is_active(&self) -> bool {
        !self.jobs.is_empty() || !self.external_contexts.is_empty()
    }

    pub fn state(&self) -> StatusState {
        aggregate_state(self.statuses.values().map(|status| status.state))
    }

    pub fn is_complete(&self) -> bool {
        self.state() == StatusState::Success
    }

    /// Shorten a status context for display.
    ///
    /// Strips separators, then any configured prefix or the stage name
    /// when it ends on a token boundary, until nothing more matches.
    pub fn trim_context(&self, context: &str) -> String {
        let mut context = trim_separators(context);
        'strip: loop {
            let prefixes = self
                .trim_prefixes
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(self.name.as_str()));
            for prefix in prefixes {
                if prefix.is_empty() {
                    continue;
                }
                let Some(rest) = context.strip_prefix(prefix) else {
                    continue;
                };
                match rest.chars().next() {
                    Some(next) if !next.is_ascii_alphabetic() => {
                        context = trim_separators(rest);
                        continue 'strip;
                    }
                    _ => {}
                }
            }
            return context.to_string();
        }
    }

    pub fn summary(&self) -> StageSummary {
        let mut statuses: Vec<&CommitStatus> = self.statuses.values().collect();
        statuses.sort();
        StageSummary {
            name: self.name.clone(),
            state: self.state(),
            statuses: statuses
                .into_iter()
                .map(|status| ContextSummary {
                    name: self.trim_context(&status.context),
                    state: status.state,
                })
                .collect(),
        }
    }
}

fn trim_separators(context: &str) -> &str {
    context.trim_matches(|c| matches!(c, '-' | '/' | '_'))
}

/// Serialized form of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub name: String,
    pub state: StatusState,
    pub statuses: Vec<ContextSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub name: String,
    pub state: StatusState,
}

/// Ordered stages of one head.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    pub default_stage: String,
}

impl Pipeline {
    /// Build stages in declaration order. An empty list means the defaults.
    pub fn new(entries: &[StageEntry], trim_prefixes: &[String]) -> Self {
        let defaults;
        let entries = if entries.is_empty() {
            defaults = default_stages();
            defaults.as_slice()
        } else {
            entries
        };

        let stages: Vec<Stage> = entries
            .iter()
            .map(|entry| {
                Stage::new(entry.name(), entry.external().to_vec())
                    .with_trim_prefixes(trim_prefixes.to_vec())
            })
            .collect();

        let default_stage = if stages.iter().any(|s| s.name == PREFERRED_DEFAULT_STAGE) {
            PREFERRED_DEFAULT_STAGE.to_string()
        } else {
            stages[0].name.clone()
        };

        Self {
            stages,
            default_stage,
        }
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Assign specs to their stage. Periodic jobs without stage are dropped.
    pub fn add_specs<I>(&mut self, specs: I) -> DomainResult<()>
    where
        I: IntoIterator<Item = JobSpec>,
    {
        for spec in specs {
            if spec.is_periodic() && spec.config.stage.is_none() {
                continue;
            }
            let name = spec
                .config
                .stage
                .clone()
                .unwrap_or_else(|| self.default_stage.clone());
            let stage = self
                .stages
                .iter_mut()
                .find(|s| s.name == name)
                .ok_or_else(|| {
                    DomainError::InvalidSpec(format!(
                        "job {} declares unknown stage {name}",
                        spec.name
                    ))
                })?;
            stage.jobs.push(spec);
        }
        Ok(())
    }

    /// Route live statuses to the stage expecting them.
    ///
    /// Exact context matches win. A claimed context left without status then
    /// takes every unclaimed status whose context starts with it, so matrix
    /// sub-contexts land in the stage of their job. When two claimed contexts
    /// prefix the same status, the earlier stage wins. Claimed contexts still
    /// missing get an `unknown` placeholder.
    pub fn process_statuses<I>(&mut self, statuses: I)
    where
        I: IntoIterator<Item = CommitStatus>,
    {
        let mut claims: Vec<(String, usize)> = Vec::new();
        let mut claimed: HashMap<String, usize> = HashMap::new();
        for (index, stage) in self.stages.iter().enumerate() {
            for context in stage.expected_contexts() {
                if !claimed.contains_key(context) {
                    claimed.insert(context.to_string(), index);
                    claims.push((context.to_string(), index));
                }
            }
        }

        let mut unclaimed: BTreeMap<String, CommitStatus> = BTreeMap::new();
        for status in statuses {
            let bucket = match claimed.get(&status.context) {
                Some(&index) => &mut self.stages[index].statuses,
                None => &mut unclaimed,
            };
            keep_newest(bucket, status);
        }

        for (context, index) in claims {
            let stage = &mut self.stages[index];
            if stage.statuses.contains_key(&context) {
                continue;
            }

            let matching: Vec<String> = unclaimed
                .keys()
                .filter(|candidate| candidate.starts_with(context.as_str()))
                .cloned()
                .collect();

            if matching.is_empty() {
                stage
                    .statuses
                    .insert(context.clone(), CommitStatus::unknown(context));
                continue;
            }

            for key in matching {
                if let Some(status) = unclaimed.remove(&key) {
                    keep_newest(&mut stage.statuses, status);
                }
            }
        }
    }

    pub fn to_json(&self) -> Vec<StageSummary> {
        self.stages.iter().map(Stage::summary).collect()
    }
}

fn keep_newest(bucket: &mut BTreeMap<String, CommitStatus>, status: CommitStatus) {
    match bucket.get(&status.context) {
        Some(existing) if !status.is_newer_than(existing) => {}
        _ => {
            bucket.insert(status.context.clone(), status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::job_spec::JobConfig;
    use chrono::{TimeZone, Utc};

    fn spec(name: &str, stage: Option<&str>) -> JobSpec {
        JobSpec::new(
            name,
            JobConfig {
                stage: stage.map(str::to_string),
                ..JobConfig::default()
            },
        )
    }

    fn status(context: &str, state: StatusState, second: u32) -> CommitStatus {
        CommitStatus::new(context, state).at(Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, second).unwrap())
    }

    fn entries() -> Vec<StageEntry> {
        serde_yaml::from_str(
            "- build\n- test\n- name: deploy\n  external: [staging, prod]\n",
        )
        .unwrap()
    }

    #[test]
    fn test_stage_entries_parse() {
        let entries = entries();
        assert_eq!(entries[0], StageEntry::Name("build".to_string()));
        assert_eq!(entries[2].name(), "deploy");
        assert_eq!(entries[2].external(), ["staging", "prod"]);
    }

    #[test]
    fn test_default_stage() {
        assert_eq!(Pipeline::new(&entries(), &[]).default_stage, "test");

        let custom: Vec<StageEntry> = serde_yaml::from_str("[lint, unit]").unwrap();
        assert_eq!(Pipeline::new(&custom, &[]).default_stage, "lint");

        let pipeline = Pipeline::new(&[], &[]);
        let names: Vec<_> = pipeline.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["build", "test", "deploy"]);
    }

    #[test]
    fn test_add_specs() {
        let mut pipeline = Pipeline::new(&entries(), &[]);
        let mut periodic = spec("nightly", None);
        periodic.config.periodic = true;
        let mut periodic_deploy = spec("nightly-deploy", Some("deploy"));
        periodic_deploy.config.periodic = true;

        pipeline
            .add_specs(vec![spec("docker", Some("build")), spec("units", None), periodic, periodic_deploy])
            .unwrap();

        assert_eq!(pipeline.stage("build").unwrap().jobs.len(), 1);
        assert_eq!(pipeline.stage("test").unwrap().jobs[0].name, "units");
        assert_eq!(pipeline.stage("deploy").unwrap().jobs[0].name, "nightly-deploy");

        let err = pipeline.add_specs(vec![spec("lost", Some("qa"))]).unwrap_err();
        assert!(matches!(err, DomainError::InvalidSpec(_)));
    }

    #[test]
    fn test_state_precedence() {
        use StatusState::*;
        assert_eq!(aggregate_state([Success, Error, Failure, Pending]), Error);
        assert_eq!(aggregate_state([Success, Failure, Pending]), Failure);
        assert_eq!(aggregate_state([Success, Pending, Unknown]), Pending);
        assert_eq!(aggregate_state([Success, Success]), Success);
        assert_eq!(aggregate_state([Success, Unknown]), Unknown);
        assert_eq!(aggregate_state(Vec::new()), Unknown);
    }

    #[test]
    fn test_trim_context() {
        let stage = Stage::new("test", vec![]).with_trim_prefixes(vec!["prefix".to_string()]);
        assert_eq!(stage.trim_context("test-units"), "units");
        assert_eq!(stage.trim_context("prefix-test-units"), "units");
        assert_eq!(stage.trim_context("test-prefix-units"), "units");
        assert_eq!(stage.trim_context("tests-units"), "tests-units");
        assert_eq!(stage.trim_context("/units/py35"), "units/py35");
        assert_eq!(stage.trim_context("test"), "test");
    }

    #[test]
    fn test_process_statuses_end_to_end() {
        let mut pipeline = Pipeline::new(&entries(), &[]);
        pipeline
            .add_specs(vec![spec("docker", Some("build")), spec("units", None)])
            .unwrap();

        pipeline.process_statuses(vec![
            status("docker", StatusState::Success, 1),
            status("docker", StatusState::Pending, 0),
            status("units/py35", StatusState::Success, 0),
            status("units/py36", StatusState::Pending, 0),
            status("staging", StatusState::Success, 1),
        ]);

        let build = pipeline.stage("build").unwrap();
        assert_eq!(build.state(), StatusState::Success);
        assert_eq!(build.statuses.len(), 1);

        let test = pipeline.stage("test").unwrap();
        assert_eq!(test.state(), StatusState::Pending);
        assert_eq!(test.statuses.len(), 2);

        let deploy = pipeline.stage("deploy").unwrap();
        assert_eq!(deploy.state(), StatusState::Unknown);
        assert_eq!(deploy.statuses["prod"].state, StatusState::Unknown);

        let json = pipeline.to_json();
        assert_eq!(json.len(), 3);
        assert_eq!(json[1].statuses[0].name, "units/py36");
        assert_eq!(json[1].statuses[0].state, StatusState::Pending);
        let value = serde_json::to_value(&json).unwrap();
        assert_eq!(value[0]["state"], "success");
    }

    #[test]
    fn test_prefix_tie_goes_to_first_stage() {
        let entries: Vec<StageEntry> =
            serde_yaml::from_str("- name: lint\n  external: [ci]\n- name: test\n  external: [ci/units]\n")
                .unwrap();
        let mut pipeline = Pipeline::new(&entries, &[]);
        pipeline.process_statuses(vec![status("ci/units/py35", StatusState::Failure, 0)]);

        assert_eq!(pipeline.stage("lint").unwrap().state(), StatusState::Failure);
        assert_eq!(pipeline.stage("test").unwrap().state(), StatusState::Unknown);
    }
}
