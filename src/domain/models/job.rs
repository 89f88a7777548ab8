//! Remote build server jobs.
//!
//! A [`Job`] is what the build server reports about a job: its parameters,
//! its kind (freestyle or matrix), and the configuration read back as a
//! [`JobSpec`]. The reconciliation logic compares it with the declared spec
//! and derives the status contexts a build of it produces.

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use super::commit::{CommitStatus, StatusState};
use super::head::Head;
use super::job_spec::JobSpec;

/// Parameter types selecting the node a freestyle build runs on.
pub const NODE_PARAMETER_TYPES: [&str; 2] = ["LabelParameterDefinition", "NodeParameterDefinition"];

/// Parameter type restricting which matrix combinations a build runs.
pub const COMBINATION_PARAMETER_TYPE: &str = "MatrixCombinationsParameterDefinition";

/// Key of the state block embedded in job descriptions.
const STATE_BLOCK_KEY: &str = "stagehand";

/// A parameter declared on a remote job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameter {
    pub name: String,
    /// Build server parameter type, e.g. `StringParameterDefinition`.
    pub kind: String,
    pub default: Option<String>,
}

impl JobParameter {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            default: None,
        }
    }
}

/// Freestyle or matrix job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    Freestyle,
    Matrix {
        /// Axis selecting the build node, if any.
        node_axis: Option<String>,
        /// Live combinations, e.g. `NODE=slave-ng,PYTHON=py35`.
        active_configurations: Vec<String>,
    },
}

/// A job as reported by the build server.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub url: String,
    pub description: String,
    pub parameters: Vec<JobParameter>,
    pub kind: JobKind,
    /// Remote configuration, in declared-spec form.
    pub spec: JobSpec,
    /// SCM branch specifier, e.g. `${REVISION}`.
    pub scm_branch: Option<String>,
}

impl Job {
    pub const fn is_matrix(&self) -> bool {
        matches!(self.kind, JobKind::Matrix { .. })
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    /// Parameter choosing the node of a freestyle build.
    pub fn node_param(&self) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| NODE_PARAMETER_TYPES.contains(&p.kind.as_str()))
            .map(|p| p.name.as_str())
    }

    /// Parameter filtering the combinations of a matrix build.
    pub fn combination_param(&self) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.kind == COMBINATION_PARAMETER_TYPE)
            .map(|p| p.name.as_str())
    }

    /// Parameter the SCM checks out, referenced as `$NAME` or `${NAME}`.
    pub fn revision_param(&self) -> Option<&str> {
        let branch = self.scm_branch.as_deref()?.trim();
        let name = branch.strip_prefix('$')?;
        let name = name
            .strip_prefix('{')
            .and_then(|n| n.strip_suffix('}'))
            .unwrap_or(name);
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.name.as_str())
    }

    pub fn node_axis(&self) -> Option<&str> {
        match &self.kind {
            JobKind::Matrix { node_axis, .. } => node_axis.as_deref(),
            JobKind::Freestyle => None,
        }
    }

    /// When this job definition was last written by the bot.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        parse_updated_at(&self.description)
    }

    /// Status contexts a build of this job for `spec` reports.
    ///
    /// A freestyle job reports its own name. A matrix job reports one
    /// context per live combination whose node is allowed by the spec and
    /// whose other axis values are declared by the spec. Axes the spec does
    /// not mention accept every value the remote job defines.
    pub fn list_contexts(&self, spec: &JobSpec) -> Vec<String> {
        let JobKind::Matrix {
            node_axis,
            active_configurations,
        } = &self.kind
        else {
            return vec![self.name.clone()];
        };

        let allowed_nodes: BTreeSet<&str> = spec
            .config
            .node
            .iter()
            .chain(spec.config.merged_nodes.iter())
            .map(String::as_str)
            .collect();

        active_configurations
            .iter()
            .filter(|combination| {
                parse_combination(combination).into_iter().all(|(axis, value)| {
                    if node_axis.as_deref() == Some(axis) {
                        allowed_nodes.is_empty() || allowed_nodes.contains(value)
                    } else {
                        spec.config
                            .axis
                            .get(axis)
                            .is_none_or(|wanted| wanted.iter().any(|v| v == value))
                    }
                })
            })
            .map(|combination| format!("{}/{}", self.name, combination))
            .collect()
    }

    /// Parameters of a build of `context` for `head`.
    ///
    /// Starts from the spec defaults, then fills the revision, node and
    /// combination parameters this job declares.
    pub fn build_parameters(
        &self,
        head: &Head,
        spec: &JobSpec,
        context: &str,
    ) -> BTreeMap<String, String> {
        let declared: BTreeSet<&str> = self.parameter_names().collect();
        let mut params: BTreeMap<String, String> = spec
            .config
            .parameters
            .iter()
            .filter(|(name, _)| declared.contains(name.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(revision) = self.revision_param() {
            params.insert(revision.to_string(), head.sha.clone());
        }

        match &self.kind {
            JobKind::Freestyle => {
                if let (Some(param), Some(node)) = (self.node_param(), &spec.config.node) {
                    params.insert(param.to_string(), node.clone());
                }
            }
            JobKind::Matrix { .. } => {
                let combination = context
                    .strip_prefix(&self.name)
                    .and_then(|rest| rest.strip_prefix('/'));
                if let (Some(param), Some(combination)) = (self.combination_param(), combination) {
                    params.insert(param.to_string(), combination_filter(combination));
                }
            }
        }

        params
    }
}

/// Outcome of a finished build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildResult {
    Success,
    Unstable,
    Failure,
    Aborted,
    NotBuilt,
}

impl BuildResult {
    /// Commit status state mirroring this result.
    pub const fn status_state(self) -> StatusState {
        match self {
            Self::Success => StatusState::Success,
            Self::Unstable | Self::Failure => StatusState::Failure,
            Self::Aborted | Self::NotBuilt => StatusState::Error,
        }
    }
}

/// One build of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Build {
    pub number: u64,
    pub url: String,
    pub running: bool,
    /// `None` while running.
    pub result: Option<BuildResult>,
}

impl Build {
    /// Status describing this build for `context`.
    pub fn to_status(&self, context: &str) -> CommitStatus {
        let (state, description) = match self.result {
            _ if self.running => (StatusState::Pending, format!("#{} running", self.number)),
            Some(result) => (
                result.status_state(),
                format!("#{} {}", self.number, format!("{result:?}").to_lowercase()),
            ),
            None => (StatusState::Pending, format!("#{} pending", self.number)),
        };
        CommitStatus::new(context, state)
            .with_description(description)
            .with_target_url(self.url.clone())
    }
}

/// Split `A=1,B=2` into axis/value pairs.
pub fn parse_combination(combination: &str) -> Vec<(&str, &str)> {
    combination
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .collect()
}

/// Groovy filter selecting exactly one combination.
fn combination_filter(combination: &str) -> String {
    parse_combination(combination)
        .into_iter()
        .map(|(axis, value)| format!("{axis} == \"{value}\""))
        .collect::<Vec<_>>()
        .join(" && ")
}

fn state_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)\s*<!--\s*\n(stagehand:\s*\n.*?)-->\s*")
            .expect("state block pattern is valid")
    })
}

#[derive(Deserialize)]
struct StateEnvelope {
    stagehand: EmbeddedState,
}

#[derive(Deserialize)]
struct EmbeddedState {
    updated_at: Option<DateTime<Utc>>,
}

/// Read the update timestamp embedded in a job description.
pub fn parse_updated_at(description: &str) -> Option<DateTime<Utc>> {
    let captures = state_block_re().captures(description)?;
    let envelope: StateEnvelope = serde_yaml::from_str(&captures[1]).ok()?;
    envelope.stagehand.updated_at
}

/// Replace or append the state block of a job description.
pub fn embed_updated_at(description: &str, updated_at: DateTime<Utc>) -> String {
    let stripped = state_block_re().replace_all(description, "\n");
    let stripped = stripped.trim();
    let block = format!(
        "<!--\n{STATE_BLOCK_KEY}:\n  updated_at: {}\n-->",
        updated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    if stripped.is_empty() {
        block
    } else {
        format!("{stripped}\n\n{block}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::head::Repository;
    use crate::domain::models::job_spec::JobConfig;
    use chrono::TimeZone;

    fn matrix_job(configurations: &[&str], node_axis: Option<&str>) -> Job {
        Job {
            name: "matrix".to_string(),
            url: "https://jenkins/job/matrix/".to_string(),
            description: String::new(),
            parameters: vec![],
            kind: JobKind::Matrix {
                node_axis: node_axis.map(str::to_string),
                active_configurations: configurations.iter().map(|c| (*c).to_string()).collect(),
            },
            spec: JobSpec::new("matrix", JobConfig::default()),
            scm_branch: None,
        }
    }

    fn freestyle_job(parameters: Vec<JobParameter>) -> Job {
        Job {
            name: "freestyle".to_string(),
            url: "https://jenkins/job/freestyle/".to_string(),
            description: String::new(),
            parameters,
            kind: JobKind::Freestyle,
            spec: JobSpec::new("freestyle", JobConfig::default()),
            scm_branch: Some("${REVISION}".to_string()),
        }
    }

    fn spec(node: Option<&str>, merged_nodes: &[&str], axis: &[(&str, &[&str])]) -> JobSpec {
        JobSpec::new(
            "matrix",
            JobConfig {
                node: node.map(str::to_string),
                merged_nodes: merged_nodes.iter().map(|n| (*n).to_string()).collect(),
                axis: axis
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), v.iter().map(|s| (*s).to_string()).collect()))
                    .collect(),
                ..JobConfig::default()
            },
        )
    }

    const NODE_CONFIGURATIONS: [&str; 4] = [
        "NODE=slave-legacy,P=a",
        "NODE=slave-legacy,P=b",
        "NODE=slave-ng,P=a",
        "NODE=slave-ng,P=b",
    ];

    #[test]
    fn test_freestyle_params() {
        let job = freestyle_job(vec![
            JobParameter::new("REVISION", "StringParameterDefinition"),
            JobParameter::new("NODE", "LabelParameterDefinition"),
        ]);
        assert_eq!(job.node_param(), Some("NODE"));
        assert_eq!(job.combination_param(), None);
        assert_eq!(job.revision_param(), Some("REVISION"));
        assert_eq!(job.list_contexts(&job.spec), vec!["freestyle"]);
    }

    #[test]
    fn test_matrix_combination_param() {
        let mut job = matrix_job(&[], None);
        job.parameters = vec![
            JobParameter::new("REVISION", "StringParameterDefinition"),
            JobParameter::new("C", COMBINATION_PARAMETER_TYPE),
        ];
        assert_eq!(job.combination_param(), Some("C"));
        assert_eq!(job.node_param(), None);
    }

    #[test]
    fn test_matrix_node_filter() {
        let job = matrix_job(&NODE_CONFIGURATIONS, Some("NODE"));
        let contexts = job.list_contexts(&spec(Some("slave-ng"), &[], &[("P", &["a", "b"])]));

        assert_eq!(contexts.len(), 2);
        assert!(contexts.iter().all(|c| c.contains("NODE=slave-ng")));
        assert!(!contexts.iter().any(|c| c.contains("slave-legacy")));
    }

    #[test]
    fn test_matrix_merged_nodes() {
        let job = matrix_job(&NODE_CONFIGURATIONS, Some("NODE"));
        let contexts = job.list_contexts(&spec(None, &["slave-ng"], &[("P", &["a", "b"])]));
        assert_eq!(
            contexts,
            vec!["matrix/NODE=slave-ng,P=a", "matrix/NODE=slave-ng,P=b"]
        );
    }

    #[test]
    fn test_matrix_axis_superset() {
        let job = matrix_job(
            &["A=0,B=a", "A=0,B=b", "A=0,B=c", "A=1,B=a", "A=1,B=d"],
            None,
        );
        let contexts = job.list_contexts(&spec(None, &[], &[("B", &["a", "c", "d"])]));

        assert_eq!(
            contexts,
            vec![
                "matrix/A=0,B=a",
                "matrix/A=0,B=c",
                "matrix/A=1,B=a",
                "matrix/A=1,B=d",
            ]
        );
    }

    #[test]
    fn test_build_parameters() {
        let head = Head::branch(Repository::new("o", "r"), "master", "cafed0d0", "url");

        let job = freestyle_job(vec![
            JobParameter::new("REVISION", "StringParameterDefinition"),
            JobParameter::new("NODE", "LabelParameterDefinition"),
            JobParameter::new("FLAVOR", "StringParameterDefinition"),
        ]);
        let mut wanted = JobSpec::new("freestyle", JobConfig::default());
        wanted.config.node = Some("slave-ng".to_string());
        wanted.config.parameters.insert("FLAVOR".to_string(), "slow".to_string());
        wanted.config.parameters.insert("UNDECLARED".to_string(), "x".to_string());

        let params = job.build_parameters(&head, &wanted, "freestyle");
        assert_eq!(params["REVISION"], "cafed0d0");
        assert_eq!(params["NODE"], "slave-ng");
        assert_eq!(params["FLAVOR"], "slow");
        assert!(!params.contains_key("UNDECLARED"));

        let mut job = matrix_job(&NODE_CONFIGURATIONS, Some("NODE"));
        job.parameters = vec![JobParameter::new("C", COMBINATION_PARAMETER_TYPE)];
        let params = job.build_parameters(&head, &job.spec.clone(), "matrix/NODE=slave-ng,P=a");
        assert_eq!(params["C"], r#"NODE == "slave-ng" && P == "a""#);
    }

    #[test]
    fn test_build_to_status() {
        let mut build = Build {
            number: 3,
            url: "https://jenkins/job/units/3/".to_string(),
            running: true,
            result: None,
        };
        let status = build.to_status("units");
        assert_eq!(status.state, StatusState::Pending);
        assert_eq!(status.description(), "#3 running");
        assert!(status.is_running());

        build.running = false;
        build.result = Some(BuildResult::Unstable);
        let status = build.to_status("units");
        assert_eq!(status.state, StatusState::Failure);
        assert_eq!(status.description(), "#3 unstable");

        build.result = Some(BuildResult::NotBuilt);
        assert_eq!(build.to_status("units").state, StatusState::Error);
    }

    #[test]
    fn test_updated_at_block() {
        let description = "Built by the bot.\n\n<!--\nstagehand:\n  updated_at: 2016-10-10T15:27:00Z\n-->\n";
        let expected = Utc.with_ymd_and_hms(2016, 10, 10, 15, 27, 0).unwrap();
        assert_eq!(parse_updated_at(description), Some(expected));
        assert_eq!(parse_updated_at("no block here"), None);
    }

    #[test]
    fn test_embed_updated_at_replaces_block() {
        let first = Utc.with_ymd_and_hms(2016, 10, 10, 15, 27, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2017, 1, 2, 3, 4, 5).unwrap();

        let description = embed_updated_at("Unit tests", first);
        assert!(description.starts_with("Unit tests\n\n<!--"));
        assert_eq!(parse_updated_at(&description), Some(first));

        let description = embed_updated_at(&description, second);
        assert_eq!(description.matches("<!--").count(), 1);
        assert_eq!(parse_updated_at(&description), Some(second));

        assert_eq!(parse_updated_at(&embed_updated_at("", first)), Some(first));
    }
}
