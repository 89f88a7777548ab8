//! Job configuration XML: rendered from a [`JobSpec`], read back into one.
//!
//! Only the elements the bot manages are rendered and read: description,
//! parameters, git checkout of the revision, node, timer trigger, matrix
//! axes and the shell build step.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::OnceLock;

use crate::domain::models::job::COMBINATION_PARAMETER_TYPE;
use crate::domain::models::{JobConfig, JobSpec};

/// Parameter receiving the SHA to build.
pub const REVISION_PARAMETER: &str = "REVISION";

/// Parameter filtering matrix combinations.
pub const COMBINATION_PARAMETER: &str = "combination";

/// Name of the matrix axis choosing the node.
pub const NODE_AXIS: &str = "NODE";

/// Schedule of periodic jobs.
const PERIODIC_SCHEDULE: &str = "@daily";

/// What a remote `config.xml` says about the managed elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteConfig {
    pub script: Option<String>,
    pub scm_branch: Option<String>,
    pub assigned_node: Option<String>,
    pub periodic: bool,
    /// Text axes, in document order.
    pub axes: Vec<(String, Vec<String>)>,
    /// Label axis, if any.
    pub node_axis: Option<(String, Vec<String>)>,
}

impl RemoteConfig {
    /// Declared-spec form of this configuration.
    pub fn to_spec(&self, name: &str, parameters: BTreeMap<String, String>) -> JobSpec {
        let (node, merged_nodes) = match &self.node_axis {
            Some((_, labels)) => (labels.first().cloned(), labels.iter().skip(1).cloned().collect()),
            None => (self.assigned_node.clone(), Vec::new()),
        };
        JobSpec::new(
            name,
            JobConfig {
                script: self.script.clone(),
                periodic: self.periodic,
                parameters,
                axis: self.axes.iter().cloned().collect(),
                node,
                merged_nodes,
                ..JobConfig::default()
            },
        )
    }
}

/// Render the configuration of a job building `clone_url`.
pub fn render_job_xml(spec: &JobSpec, description: &str, clone_url: &str) -> String {
    let config = &spec.config;
    let matrix = spec.is_matrix();
    let root = if matrix { "matrix-project" } else { "project" };

    let mut xml = String::from("<?xml version='1.1' encoding='UTF-8'?>\n");
    let _ = writeln!(xml, "<{root}>");
    let _ = writeln!(xml, "  <description>{}</description>", escape(description));
    xml.push_str("  <keepDependencies>false</keepDependencies>\n");

    xml.push_str("  <properties>\n    <hudson.model.ParametersDefinitionProperty>\n      <parameterDefinitions>\n");
    push_string_parameter(&mut xml, REVISION_PARAMETER, "");
    for (name, default) in &config.parameters {
        if name != REVISION_PARAMETER {
            push_string_parameter(&mut xml, name, default);
        }
    }
    if matrix {
        let _ = writeln!(
            xml,
            "        <hudson.plugins.matrix__configuration__parameter.{COMBINATION_PARAMETER_TYPE}>\n          <name>{COMBINATION_PARAMETER}</name>\n          <defaultCombinationFilter></defaultCombinationFilter>\n        </hudson.plugins.matrix__configuration__parameter.{COMBINATION_PARAMETER_TYPE}>"
        );
    }
    xml.push_str("      </parameterDefinitions>\n    </hudson.model.ParametersDefinitionProperty>\n  </properties>\n");

    let _ = writeln!(
        xml,
        "  <scm class=\"hudson.plugins.git.GitSCM\">\n    <userRemoteConfigs>\n      <hudson.plugins.git.UserRemoteConfig>\n        <url>{}</url>\n        <refspec>+refs/heads/*:refs/remotes/origin/* +refs/pull/*/head:refs/remotes/origin/pr/*</refspec>\n      </hudson.plugins.git.UserRemoteConfig>\n    </userRemoteConfigs>\n    <branches>\n      <hudson.plugins.git.BranchSpec>\n        <name>${{{REVISION_PARAMETER}}}</name>\n      </hudson.plugins.git.BranchSpec>\n    </branches>\n  </scm>",
        escape(clone_url)
    );

    if !matrix {
        if let Some(node) = &config.node {
            let _ = writeln!(xml, "  <assignedNode>{}</assignedNode>\n  <canRoam>false</canRoam>", escape(node));
        }
    }

    if config.periodic {
        let _ = writeln!(
            xml,
            "  <triggers>\n    <hudson.triggers.TimerTrigger>\n      <spec>{PERIODIC_SCHEDULE}</spec>\n    </hudson.triggers.TimerTrigger>\n  </triggers>"
        );
    } else {
        xml.push_str("  <triggers/>\n");
    }

    if matrix {
        xml.push_str("  <axes>\n");
        if let Some(node) = &config.node {
            push_axis(&mut xml, "hudson.matrix.LabelAxis", NODE_AXIS, std::slice::from_ref(node));
        }
        for (name, values) in &config.axis {
            push_axis(&mut xml, "hudson.matrix.TextAxis", name, values);
        }
        xml.push_str("  </axes>\n");
    }

    let _ = writeln!(
        xml,
        "  <builders>\n    <hudson.tasks.Shell>\n      <command>{}</command>\n    </hudson.tasks.Shell>\n  </builders>",
        escape(config.script.as_deref().unwrap_or_default())
    );
    let _ = writeln!(xml, "</{root}>");
    xml
}

fn push_string_parameter(xml: &mut String, name: &str, default: &str) {
    let _ = writeln!(
        xml,
        "        <hudson.model.StringParameterDefinition>\n          <name>{}</name>\n          <defaultValue>{}</defaultValue>\n        </hudson.model.StringParameterDefinition>",
        escape(name),
        escape(default)
    );
}

fn push_axis(xml: &mut String, element: &str, name: &str, values: &[String]) {
    let _ = writeln!(xml, "    <{element}>\n      <name>{}</name>\n      <values>", escape(name));
    for value in values {
        let _ = writeln!(xml, "        <string>{}</string>", escape(value));
    }
    let _ = writeln!(xml, "      </values>\n    </{element}>");
}

fn cached_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("job XML pattern is valid"))
}

/// Read the managed elements of a remote `config.xml`.
pub fn read_job_xml(xml: &str) -> RemoteConfig {
    static COMMAND: OnceLock<Regex> = OnceLock::new();
    static BRANCH: OnceLock<Regex> = OnceLock::new();
    static NODE: OnceLock<Regex> = OnceLock::new();
    static TIMER: OnceLock<Regex> = OnceLock::new();
    static AXIS: OnceLock<Regex> = OnceLock::new();
    static VALUE: OnceLock<Regex> = OnceLock::new();

    let first = |re: &Regex| re.captures(xml).map(|c| unescape(&c[1]));

    let script = first(cached_regex(&COMMAND, r"(?s)<hudson\.tasks\.Shell>\s*<command>(.*?)</command>"));
    let scm_branch = first(cached_regex(
        &BRANCH,
        r"(?s)<hudson\.plugins\.git\.BranchSpec>\s*<name>(.*?)</name>",
    ));
    let assigned_node = first(cached_regex(&NODE, r"(?s)<assignedNode>(.*?)</assignedNode>"));
    let periodic = cached_regex(&TIMER, r"<hudson\.triggers\.TimerTrigger>").is_match(xml);

    let value_re = cached_regex(&VALUE, r"(?s)<string>(.*?)</string>");
    let mut axes = Vec::new();
    let mut node_axis = None;
    let axis_re = cached_regex(
        &AXIS,
        r"(?s)<hudson\.matrix\.(TextAxis|LabelAxis)>\s*<name>(.*?)</name>\s*<values>(.*?)</values>",
    );
    for captures in axis_re.captures_iter(xml) {
        let name = unescape(&captures[2]);
        let values = value_re
            .captures_iter(&captures[3])
            .map(|value| unescape(&value[1]))
            .collect();
        if &captures[1] == "LabelAxis" {
            node_axis = Some((name, values));
        } else {
            axes.push((name, values));
        }
    }

    RemoteConfig {
        script,
        scm_branch,
        assigned_node,
        periodic,
        axes,
        node_axis,
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#xd;", "\r")
        .replace("&amp;", "&")
}
