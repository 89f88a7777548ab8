//! Per-repository settings read from the `settings` entry of the
//! specification file.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use super::job_spec::SETTINGS_KEY;
use super::pipeline::StageEntry;
use crate::domain::errors::DomainResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySettings {
    /// Ordered stages, the configured defaults when empty.
    pub stages: Vec<StageEntry>,
    /// Logins allowed to instruct the bot. Empty means everybody.
    pub collaborators: Vec<String>,
    /// Branch the settings were read from.
    #[serde(skip)]
    pub default_branch: String,
}

impl RepositorySettings {
    /// Read the `settings` entry of a specification file.
    pub fn from_spec_file(source: &str) -> DomainResult<Self> {
        let document: Value = serde_yaml::from_str(source)?;
        match document.get(SETTINGS_KEY) {
            Some(settings) if !settings.is_null() => Ok(serde_yaml::from_value(settings.clone())?),
            _ => Ok(Self::default()),
        }
    }

    pub fn is_collaborator(&self, login: &str) -> bool {
        self.collaborators.is_empty()
            || self
                .collaborators
                .iter()
                .any(|c| c.eq_ignore_ascii_case(login))
    }
}
