//! Commit and commit status domain models.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use super::instruction::Comment;

/// Descriptions of pending statuses written before a build actually started.
pub const QUEUED_DESCRIPTIONS: [&str; 3] = ["Backed", "New", "Queued"];

/// Description of statuses marked by the skip instruction.
pub const SKIPPED_DESCRIPTION: &str = "Skipped";

/// State of a commit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Error,
    Failure,
    Pending,
    Success,
    /// Synthesized for expected contexts that have no live status.
    Unknown,
}

impl StatusState {
    /// Severity rank, lowest is most severe.
    pub const fn rank(self) -> u8 {
        match self {
            Self::Error => 0,
            Self::Failure => 1,
            Self::Pending => 2,
            Self::Success => 3,
            Self::Unknown => 4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Failure => "failure",
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialOrd for StatusState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StatusState {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// A reported build check on one commit.
///
/// Ordered by state severity first, so sorting a list of statuses puts
/// errors before failures before pending before successes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    pub context: String,
    pub state: StatusState,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CommitStatus {
    pub fn new(context: impl Into<String>, state: StatusState) -> Self {
        Self {
            context: context.into(),
            state,
            description: None,
            target_url: None,
            updated_at: None,
        }
    }

    /// Placeholder for a context nobody reported yet.
    pub fn unknown(context: impl Into<String>) -> Self {
        Self::new(context, StatusState::Unknown)
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = Some(url.into());
        self
    }

    #[must_use]
    pub const fn at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }

    /// Strictly newer than `other`. A status without timestamp is the oldest.
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.updated_at > other.updated_at
    }

    /// Pending status written by the bot before any build started.
    pub fn is_queued(&self) -> bool {
        self.state == StatusState::Pending && QUEUED_DESCRIPTIONS.contains(&self.description())
    }

    pub fn is_skipped(&self) -> bool {
        self.state == StatusState::Success && self.description() == SKIPPED_DESCRIPTION
    }

    /// Pending status pointing at a live build.
    pub fn is_running(&self) -> bool {
        self.state == StatusState::Pending && self.target_url.is_some() && !self.is_queued()
    }

    /// Same observable content, ignoring the timestamp.
    pub fn same_as(&self, other: &Self) -> bool {
        self.context == other.context
            && self.state == other.state
            && self.description == other.description
            && self.target_url == other.target_url
    }
}

impl PartialOrd for CommitStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CommitStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.state
            .cmp(&other.state)
            .then_with(|| self.context.cmp(&other.context))
            .then_with(|| self.updated_at.cmp(&other.updated_at))
            .then_with(|| self.description.cmp(&other.description))
            .then_with(|| self.target_url.cmp(&other.target_url))
    }
}

/// Status cache of one SHA.
#[derive(Debug, Clone, Default)]
pub struct Commit {
    pub sha: String,
    pub date: Option<DateTime<Utc>>,
    pub statuses: BTreeMap<String, CommitStatus>,
    pub comments: Vec<Comment>,
}

impl Commit {
    pub fn new(sha: impl Into<String>) -> Self {
        Self {
            sha: sha.into(),
            ..Self::default()
        }
    }

    /// Merge live statuses, keeping the newest status per context.
    pub fn process_statuses(&mut self, statuses: impl IntoIterator<Item = CommitStatus>) {
        for status in statuses {
            match self.statuses.get(&status.context) {
                Some(existing) if !status.is_newer_than(existing) => {}
                _ => {
                    self.statuses.insert(status.context.clone(), status);
                }
            }
        }
    }

    /// Whether the commit is too old to be worth building.
    pub fn is_outdated(&self, now: DateTime<Utc>, max_weeks: u32) -> bool {
        self.date
            .is_some_and(|date| now - date > Duration::weeks(i64::from(max_weeks)))
    }

    /// Contexts among `contexts` which still need a build.
    ///
    /// Failed builds older than `rebuild_failed` are built again; pending
    /// statuses only count as not built while no build picked them up.
    pub fn filter_not_built_contexts<I, S>(
        &self,
        contexts: I,
        rebuild_failed: Option<DateTime<Utc>>,
    ) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        contexts
            .into_iter()
            .filter(|context| {
                let Some(status) = self.statuses.get(context.as_ref()) else {
                    return true;
                };
                match status.state {
                    StatusState::Error | StatusState::Failure => match rebuild_failed {
                        Some(cutoff) => status.updated_at.is_none_or(|at| at < cutoff),
                        None => false,
                    },
                    StatusState::Pending => status.is_queued(),
                    StatusState::Success => status.is_skipped(),
                    StatusState::Unknown => true,
                }
            })
            .map(|context| context.as_ref().to_string())
            .collect()
    }
}
