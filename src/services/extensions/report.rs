//! Opens an issue when a branch is broken.

use async_trait::async_trait;
use std::fmt::Write;
use tracing::info;

use super::{Current, Extension, Services};
use crate::domain::errors::PhaseResult;
use crate::domain::models::{CommitStatus, Head, Instruction, StatusState};

pub struct ReportExtension;

#[async_trait]
impl Extension for ReportExtension {
    fn name(&self) -> &'static str {
        "report"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["stages", "poll"]
    }

    fn instructions(&self) -> &'static [&'static str] {
        &["report-done"]
    }

    async fn process_instruction(&self, current: &mut Current, _instruction: &Instruction) -> PhaseResult {
        current.report_done = true;
        Ok(())
    }

    async fn run(&self, current: &mut Current, services: &Services) -> PhaseResult {
        if current.report_done || current.head.is_pull_request() {
            return Ok(());
        }

        let broken: Vec<&CommitStatus> = current
            .commit
            .statuses
            .values()
            .filter(|status| matches!(status.state, StatusState::Error | StatusState::Failure))
            .collect();
        if broken.is_empty() {
            return Ok(());
        }

        let title = format!("{} is broken", current.head.ref_name);
        let body = issue_body(&current.head, &broken);
        if services.dry_run() {
            info!(head = %current.head, %title, "Would report issue:\n{body}");
            return Ok(());
        }

        info!(head = %current.head, %title, "Reporting broken branch");
        let issue = services
            .code_host
            .report_issue(&current.head.repository, &title, &body)
            .await?;
        services.comment(&current.head, &report_comment(issue)).await?;
        current.report_done = true;
        Ok(())
    }
}

fn issue_body(head: &Head, broken: &[&CommitStatus]) -> String {
    let mut body = format!(
        "Commit {} is broken on {}:\n\n",
        head.short_sha(),
        head.ref_name
    );
    for status in broken {
        let _ = writeln!(
            body,
            "- {}: {}",
            status.context,
            status.target_url.as_deref().unwrap_or_else(|| status.description())
        );
    }
    body
}

fn report_comment(issue: u64) -> String {
    format!("Build failure reported at #{issue}.\n\n<!--\njenkins: report-done\n-->\n")
}
