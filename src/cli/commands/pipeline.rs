//! `pipeline <url>`: show the stages of a head.

use anyhow::Result;
use clap::Args;

use crate::cli::display::list_table;
use crate::cli::output::{output, CommandOutput};
use crate::cli::runtime::Runtime;
use crate::domain::models::Config;
use crate::services::PipelineReport;

#[derive(Args, Debug)]
pub struct PipelineArgs {
    /// Branch or pull request URL
    pub url: String,
}

impl CommandOutput for PipelineReport {
    fn to_human(&self) -> String {
        let mut sections = vec![format!("{} at {}", self.url, self.sha)];
        for stage in &self.stages {
            let marker = if self.current_stage.as_deref() == Some(stage.name.as_str()) {
                " (current)"
            } else {
                ""
            };
            let mut table = list_table(&["context", "state"]);
            for status in &stage.statuses {
                table.add_row(vec![status.name.clone(), status.state.to_string()]);
            }
            sections.push(format!("\n{} [{}]{marker}\n{table}", stage.name, stage.state));
        }
        sections.join("\n")
    }
}

pub async fn execute(args: PipelineArgs, config: Config, json_mode: bool) -> Result<()> {
    let runtime = Runtime::connect(config).await?;
    let report = runtime.reconciler.describe_pipeline(&args.url).await?;
    output(&report, json_mode);
    Ok(())
}
