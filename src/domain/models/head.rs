//! Repositories and the heads (branches, pull requests) evaluated in them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::errors::{DomainError, DomainResult};

/// A repository on the code host, `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

impl Repository {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse an `owner/name` slug.
    pub fn parse(slug: &str) -> DomainResult<Self> {
        let slug = slug.trim().trim_end_matches(".git");
        match slug.split_once('/') {
            Some((owner, name)) if is_segment(owner) && is_segment(name) => {
                Ok(Self::new(owner, name))
            }
            _ => Err(DomainError::InvalidUrl(format!(
                "expected owner/name, got {slug:?}"
            ))),
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

fn is_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains('/') && !s.contains(char::is_whitespace)
}

/// Which kind of head is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum HeadKind {
    Branch,
    PullRequest { number: u64 },
}

/// A branch or pull request tip being evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
    pub repository: Repository,
    pub kind: HeadKind,
    /// Branch name, or the source branch of a pull request.
    pub ref_name: String,
    /// `refs/heads/<branch>` or `refs/pull/<n>/head`.
    pub fullref: String,
    pub sha: String,
    pub url: String,
}

impl Head {
    pub fn branch(repository: Repository, name: &str, sha: &str, url: &str) -> Self {
        Self {
            repository,
            kind: HeadKind::Branch,
            ref_name: name.to_string(),
            fullref: format!("refs/heads/{name}"),
            sha: sha.to_string(),
            url: url.to_string(),
        }
    }

    pub fn pull_request(
        repository: Repository,
        number: u64,
        ref_name: &str,
        sha: &str,
        url: &str,
    ) -> Self {
        Self {
            repository,
            kind: HeadKind::PullRequest { number },
            ref_name: ref_name.to_string(),
            fullref: format!("refs/pull/{number}/head"),
            sha: sha.to_string(),
            url: url.to_string(),
        }
    }

    pub const fn is_pull_request(&self) -> bool {
        matches!(self.kind, HeadKind::PullRequest { .. })
    }

    pub fn short_sha(&self) -> &str {
        self.sha.get(..7).unwrap_or(&self.sha)
    }
}

impl fmt::Display for Head {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            HeadKind::Branch => write!(f, "{} {} ({})", self.repository, self.ref_name, self.short_sha()),
            HeadKind::PullRequest { number } => {
                write!(f, "{} PR #{} ({})", self.repository, number, self.short_sha())
            }
        }
    }
}

/// A head designated by URL, before its tip SHA is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadLocator {
    Branch { repository: Repository, name: String },
    PullRequest { repository: Repository, number: u64 },
}

impl HeadLocator {
    /// Parse `https://<host>/<owner>/<name>/tree/<branch>` or
    /// `https://<host>/<owner>/<name>/pull/<number>`.
    pub fn parse(url: &str) -> DomainResult<Self> {
        let invalid = || DomainError::InvalidUrl(url.to_string());

        let path = url
            .split_once("://")
            .map_or(url, |(_, rest)| rest)
            .split_once('/')
            .map(|(_, path)| path)
            .ok_or_else(invalid)?;
        let path = path.split(['?', '#']).next().unwrap_or_default();

        let mut parts = path.splitn(4, '/');
        let owner = parts.next().ok_or_else(invalid)?;
        let name = parts.next().ok_or_else(invalid)?;
        let kind = parts.next().ok_or_else(invalid)?;
        let rest = parts.next().ok_or_else(invalid)?.trim_end_matches('/');
        let repository = Repository::parse(&format!("{owner}/{name}"))?;

        match kind {
            "tree" if !rest.is_empty() => Ok(Self::Branch {
                repository,
                name: rest.to_string(),
            }),
            "pull" => rest
                .split('/')
                .next()
                .and_then(|n| n.parse().ok())
                .map(|number| Self::PullRequest { repository, number })
                .ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }

    pub const fn repository(&self) -> &Repository {
        match self {
            Self::Branch { repository, .. } | Self::PullRequest { repository, .. } => repository,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_parse() {
        let repo = Repository::parse("owner/name").unwrap();
        assert_eq!(repo.to_string(), "owner/name");
        assert!(Repository::parse("owner").is_err());
        assert!(Repository::parse("/name").is_err());
    }

    #[test]
    fn test_locator_branch_with_slashes() {
        let locator = HeadLocator::parse("https://github.com/owner/repo/tree/feature/x").unwrap();
        assert_eq!(
            locator,
            HeadLocator::Branch {
                repository: Repository::new("owner", "repo"),
                name: "feature/x".to_string(),
            }
        );
    }

    #[test]
    fn test_locator_pull_request() {
        let locator = HeadLocator::parse("https://github.com/owner/repo/pull/42/files").unwrap();
        assert_eq!(
            locator,
            HeadLocator::PullRequest {
                repository: Repository::new("owner", "repo"),
                number: 42,
            }
        );
        assert!(HeadLocator::parse("https://github.com/owner/repo/issues/42").is_err());
        assert!(HeadLocator::parse("https://github.com/owner/repo").is_err());
    }

    #[test]
    fn test_head_refs() {
        let repo = Repository::new("owner", "repo");
        let head = Head::pull_request(repo.clone(), 7, "feature", "0123456789", "https://x/pull/7");
        assert_eq!(head.fullref, "refs/pull/7/head");
        assert_eq!(head.short_sha(), "0123456");
        assert!(head.is_pull_request());

        let head = Head::branch(repo, "master", "abc", "https://x/tree/master");
        assert_eq!(head.fullref, "refs/heads/master");
        assert_eq!(head.short_sha(), "abc");
    }
}
