//! Cancels builds still running on older commits of the head.

use async_trait::async_trait;
use tracing::debug;

use super::{CancelRequest, Current, Extension, Services};
use crate::domain::errors::PhaseResult;
use crate::domain::models::Commit;
use crate::domain::ports::is_build_url;

/// Older commits inspected for running builds.
const HISTORY_DEPTH: usize = 5;

pub struct AutoCancelExtension;

#[async_trait]
impl Extension for AutoCancelExtension {
    fn name(&self) -> &'static str {
        "autocancel"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["head"]
    }

    async fn run(&self, current: &mut Current, services: &Services) -> PhaseResult {
        let head = &current.head;
        let shas = services.code_host.list_commits(head, HISTORY_DEPTH + 1).await?;
        let base_url = services.build_server.base_url();

        let mut requests = Vec::new();
        for sha in shas.into_iter().filter(|sha| *sha != head.sha).take(HISTORY_DEPTH) {
            let mut commit = Commit::new(sha.clone());
            commit.process_statuses(
                services
                    .code_host
                    .fetch_statuses(&head.repository, &sha)
                    .await?,
            );
            for status in commit.statuses.into_values() {
                let ours = status
                    .target_url
                    .as_deref()
                    .is_some_and(|url| is_build_url(base_url, url));
                if ours && status.is_running() {
                    debug!(%sha, context = %status.context, "Cancelling build of older commit");
                    requests.push(CancelRequest {
                        sha: sha.clone(),
                        status,
                    });
                }
            }
        }

        current.cancel_queue.extend(requests);
        Ok(())
    }
}
