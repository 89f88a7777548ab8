//! Stops cancelled builds and mirrors running builds into statuses.

use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, warn};

use super::{CancelRequest, Current, Extension, Services};
use crate::domain::errors::{DomainResult, PhaseResult};
use crate::domain::models::{Commit, CommitStatus, StatusState};
use crate::domain::ports::is_build_url;
use crate::services::job_reconciler::JobReconciler;

pub const CANCELLED_DESCRIPTION: &str = "Cancelled";

pub struct PollExtension;

#[async_trait]
impl Extension for PollExtension {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["builder", "skip", "rebuild", "autocancel"]
    }

    async fn run(&self, current: &mut Current, services: &Services) -> PhaseResult {
        let reconciler = JobReconciler::new(services.build_server.clone(), services.dry_run());
        let base_url = services.build_server.base_url().to_string();

        let mut cancelled = HashSet::new();
        for request in std::mem::take(&mut current.cancel_queue) {
            let Some(url) = request.status.target_url.clone() else {
                continue;
            };
            if !is_build_url(&base_url, &url) || !cancelled.insert(url.clone()) {
                continue;
            }
            if let Err(e) = cancel(current, services, &reconciler, &request, &url).await {
                let timestamp = current.error_timestamp();
                current.record_error(format!("poll: failed to cancel {url}: {e}"), timestamp);
            }
        }

        current.poll_queue = current
            .commit
            .statuses
            .values()
            .filter(|status| status.is_running())
            .filter(|status| {
                status
                    .target_url
                    .as_deref()
                    .is_some_and(|url| is_build_url(&base_url, url) && !cancelled.contains(url))
            })
            .cloned()
            .collect();

        for status in std::mem::take(&mut current.poll_queue) {
            let Some(url) = status.target_url.as_deref() else {
                continue;
            };
            let build = match services.build_server.get_build(url).await {
                Ok(build) => build,
                Err(e) if e.is_not_found() => {
                    debug!(%url, "Build vanished");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let polled = build.to_status(&status.context);
            services
                .maybe_update_status(&current.head.repository, &mut current.commit, polled)
                .await?;
        }
        Ok(())
    }
}

async fn cancel(
    current: &mut Current,
    services: &Services,
    reconciler: &JobReconciler,
    request: &CancelRequest,
    url: &str,
) -> DomainResult<()> {
    let build = match services.build_server.get_build(url).await {
        Ok(build) => build,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e),
    };
    if build.running {
        reconciler.stop(&build).await?;
    } else {
        debug!(%url, "Build already finished");
    }

    let cancelled = CommitStatus::new(request.status.context.as_str(), StatusState::Error)
        .with_description(CANCELLED_DESCRIPTION)
        .with_target_url(url);

    if request.sha == current.head.sha {
        // The status may have moved on to a new build meanwhile.
        let still_ours = current
            .commit
            .statuses
            .get(&request.status.context)
            .is_none_or(|status| status.target_url.as_deref() == Some(url));
        if still_ours {
            services
                .maybe_update_status(&current.head.repository, &mut current.commit, cancelled)
                .await?;
        }
    } else {
        let mut older = Commit::new(request.sha.clone());
        older.process_statuses([request.status.clone()]);
        if let Err(e) = services
            .maybe_update_status(&current.head.repository, &mut older, cancelled)
            .await
        {
            warn!(sha = %request.sha, error = %e, "Failed to mark older build cancelled");
        }
    }
    Ok(())
}
