//! `bot`: poll every configured repository.

use anyhow::Result;
use clap::Args;
use std::fmt::Write;

use crate::cli::display::{list_table, render_list};
use crate::cli::output::{output, truncate, CommandOutput};
use crate::cli::runtime::{ctrl_c_token, Runtime};
use crate::domain::models::Config;
use crate::services::{CycleReport, HeadReport};

#[derive(Args, Debug)]
pub struct BotArgs {
    /// Run a single pass even if a loop interval is configured
    #[arg(long)]
    pub once: bool,
}

/// Outcome column of a head.
pub(crate) fn head_outcome(head: &HeadReport) -> String {
    match (&head.skipped, head.errors.len()) {
        (Some(reason), _) => format!("skipped: {reason}"),
        (None, 0) => "ok".to_string(),
        (None, 1) => "1 error".to_string(),
        (None, errors) => format!("{errors} errors"),
    }
}

impl CommandOutput for CycleReport {
    fn to_human(&self) -> String {
        let mut table = list_table(&["head", "sha", "stage", "outcome"]);
        for head in &self.heads {
            table.add_row(vec![
                truncate(&head.url, 60),
                head.sha.chars().take(7).collect(),
                head.stage.clone().unwrap_or_else(|| "-".to_string()),
                head_outcome(head),
            ]);
        }

        let mut rendered = render_list("head", &table, self.heads.len());
        for (repository, reason) in &self.skipped_repositories {
            let _ = write!(rendered, "\nSkipped {repository}: {reason}");
        }
        rendered
    }
}

pub async fn execute(args: BotArgs, mut config: Config, json_mode: bool) -> Result<()> {
    if args.once {
        config.loop_interval_secs = 0;
    }
    let runtime = Runtime::connect(config).await?;
    let report = runtime.reconciler.run_loop(ctrl_c_token()).await?;
    output(&report, json_mode);
    Ok(())
}
