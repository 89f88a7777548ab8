//! Job definitions declared in the repository specification file.

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};

use super::instruction::scalar_to_string;
use super::pattern;
use crate::domain::errors::{DomainError, DomainResult};

/// Top-level key of the specification file reserved for repository settings.
pub const SETTINGS_KEY: &str = "settings";

/// Configuration of one declared job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    pub periodic: bool,

    /// Branch filter, include/exclude patterns.
    #[serde(deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,

    /// Parameter defaults.
    #[serde(deserialize_with = "scalar_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,

    /// Matrix axes and the values to build along each of them.
    #[serde(deserialize_with = "axis_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub axis: BTreeMap<String, Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,

    /// Nodes whose builds are accepted in place of `node`.
    #[serde(deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub merged_nodes: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A declared job: a name and its configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub name: String,
    pub config: JobConfig,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, config: JobConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Parse every job of a specification file.
    ///
    /// The `settings` entry is skipped. A job declared as a bare string is
    /// a script.
    pub fn parse_all(source: &str) -> DomainResult<Vec<Self>> {
        let document: Value = serde_yaml::from_str(source)?;
        let mapping = match document {
            Value::Null => return Ok(Vec::new()),
            Value::Mapping(mapping) => mapping,
            _ => {
                return Err(DomainError::InvalidSpec(
                    "specification file must be a mapping".to_string(),
                ))
            }
        };

        let mut specs = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let name = scalar_to_string(&key)
                .ok_or_else(|| DomainError::InvalidSpec("job names must be scalars".to_string()))?;
            if name == SETTINGS_KEY {
                continue;
            }
            specs.push(Self::from_value(name, value)?);
        }
        Ok(specs)
    }

    pub fn from_value(name: String, value: Value) -> DomainResult<Self> {
        let config = match value {
            Value::Null => JobConfig::default(),
            Value::String(script) => JobConfig {
                script: Some(script),
                ..JobConfig::default()
            },
            value @ Value::Mapping(_) => serde_yaml::from_value(value)
                .map_err(|e| DomainError::InvalidSpec(format!("job {name}: {e}")))?,
            _ => {
                return Err(DomainError::InvalidSpec(format!(
                    "job {name} must be a script or a mapping"
                )))
            }
        };
        Ok(Self { name, config })
    }

    pub fn is_periodic(&self) -> bool {
        self.config.periodic
    }

    pub fn is_matrix(&self) -> bool {
        !self.config.axis.is_empty()
    }

    /// Whether this job runs on `ref_name`.
    pub fn matches_branch(&self, ref_name: &str) -> bool {
        pattern::matches(ref_name, &self.config.branches)
    }

    /// Merge a per-job override on top of the declared configuration.
    ///
    /// Nested mappings such as `parameters` are merged key by key.
    pub fn apply_override(&mut self, overrides: &Mapping) -> DomainResult<()> {
        let mut current = serde_yaml::to_value(&self.config)?;
        if let Value::Mapping(base) = &mut current {
            merge_mapping(base, overrides);
        }
        self.config = serde_yaml::from_value(current)
            .map_err(|e| DomainError::InvalidSpec(format!("job {}: {e}", self.name)))?;
        Ok(())
    }

    /// Whether this definition, read from the build server, already
    /// satisfies `wanted`.
    ///
    /// Scripts compare modulo trailing whitespace and line endings; declared
    /// parameters must exist with the same default; axes compare as sets.
    pub fn contains(&self, wanted: &Self) -> bool {
        let ours = &self.config;
        let theirs = &wanted.config;

        if normalize_script(ours.script.as_deref()) != normalize_script(theirs.script.as_deref()) {
            return false;
        }
        if ours.periodic != theirs.periodic {
            return false;
        }

        let parameters_match = theirs
            .parameters
            .iter()
            .all(|(name, default)| ours.parameters.get(name) == Some(default));
        if !parameters_match {
            return false;
        }

        let axes_match = theirs.axis.iter().all(|(name, values)| {
            ours.axis
                .get(name)
                .is_some_and(|remote| as_set(remote) == as_set(values))
        });
        if !axes_match {
            return false;
        }

        match &theirs.node {
            Some(node) => ours.node.as_ref() == Some(node) || ours.merged_nodes.contains(node),
            None => true,
        }
    }
}

fn as_set(values: &[String]) -> BTreeSet<&str> {
    values.iter().map(String::as_str).collect()
}

fn normalize_script(script: Option<&str>) -> String {
    script
        .unwrap_or_default()
        .replace("\r\n", "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn merge_mapping(base: &mut Mapping, overrides: &Mapping) {
    for (key, value) in overrides {
        match (base.get_mut(key), value) {
            (Some(Value::Mapping(existing)), Value::Mapping(nested)) => {
                merge_mapping(existing, nested);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_list(&Value::deserialize(deserializer)?))
}

fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Mapping(mapping) = value else {
        return Ok(BTreeMap::new());
    };
    Ok(mapping
        .iter()
        .filter_map(|(k, v)| {
            let value = if v.is_null() { Some(String::new()) } else { scalar_to_string(v) };
            Some((scalar_to_string(k)?, value?))
        })
        .collect())
}

fn axis_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Mapping(mapping) = value else {
        return Ok(BTreeMap::new());
    };
    Ok(mapping
        .iter()
        .filter_map(|(k, v)| Some((scalar_to_string(k)?, value_to_list(v))))
        .collect())
}

fn value_to_list(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(items) => items.iter().filter_map(scalar_to_string).collect(),
        other => scalar_to_string(other).into_iter().collect(),
    }
}
