//! `rebuild` instruction: forget build results older than the request.

use async_trait::async_trait;
use tracing::debug;

use super::{CancelRequest, Current, Extension, Services};
use crate::domain::errors::PhaseResult;
use crate::domain::models::Instruction;
use crate::domain::ports::is_build_url;

pub struct RebuildExtension;

#[async_trait]
impl Extension for RebuildExtension {
    fn name(&self) -> &'static str {
        "rebuild"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["head"]
    }

    fn instructions(&self) -> &'static [&'static str] {
        &["rebuild"]
    }

    async fn process_instruction(&self, current: &mut Current, instruction: &Instruction) -> PhaseResult {
        current.rebuild_failed = Some(instruction.date);
        Ok(())
    }

    async fn run(&self, current: &mut Current, services: &Services) -> PhaseResult {
        let Some(cutoff) = current.rebuild_failed else {
            return Ok(());
        };
        let base_url = services.build_server.base_url();

        let forgotten: Vec<String> = current
            .commit
            .statuses
            .values()
            .filter(|status| {
                status
                    .target_url
                    .as_deref()
                    .is_some_and(|url| is_build_url(base_url, url))
                    && status.updated_at.is_none_or(|at| at < cutoff)
            })
            .map(|status| status.context.clone())
            .collect();

        for context in forgotten {
            let Some(status) = current.commit.statuses.remove(&context) else {
                continue;
            };
            debug!(%context, "Forgetting status for rebuild");
            if status.is_running() {
                current.cancel_queue.push(CancelRequest {
                    sha: current.head.sha.clone(),
                    status,
                });
            }
        }
        Ok(())
    }
}
