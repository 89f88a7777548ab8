//! Loads what the other extensions need to know about the head.

use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use tracing::debug;

use super::{Current, Extension, Services};
use crate::domain::errors::{DomainResult, Interrupt, PhaseResult};

pub struct HeadExtension;

#[async_trait]
impl Extension for HeadExtension {
    fn name(&self) -> &'static str {
        "head"
    }

    async fn begin(&self, current: &mut Current, services: &Services) -> PhaseResult {
        let code_host = &services.code_host;
        let head = &current.head;
        let repository = &head.repository;

        let (date, statuses, comments, spec_source) = tokio::try_join!(
            code_host.fetch_commit_date(repository, &head.sha),
            code_host.fetch_statuses(repository, &head.sha),
            code_host.fetch_comments(head),
            optional(code_host.fetch_file_contents(repository, &services.config.spec_file, &head.sha)),
        )?;

        current.commit.date = date;
        current.commit.process_statuses(statuses);
        current.commit.comments = comments;
        current.spec_source = spec_source;

        if current
            .commit
            .is_outdated(Utc::now(), services.config.commit_max_weeks)
        {
            return Err(Interrupt::skip(format!(
                "commit older than {} weeks",
                services.config.commit_max_weeks
            )));
        }

        debug!(
            head = %current.head,
            statuses = current.commit.statuses.len(),
            comments = current.commit.comments.len(),
            has_spec = current.spec_source.is_some(),
            "Head loaded"
        );
        Ok(())
    }
}

/// A missing resource is an absent feature.
async fn optional<T>(fetch: impl Future<Output = DomainResult<T>>) -> DomainResult<Option<T>> {
    match fetch.await {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
