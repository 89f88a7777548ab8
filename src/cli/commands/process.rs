//! `process <url>`: reconcile a single head now.

use anyhow::Result;
use clap::Args;

use super::bot::head_outcome;
use crate::cli::output::{output, CommandOutput};
use crate::cli::runtime::Runtime;
use crate::domain::models::Config;
use crate::services::HeadReport;

#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Branch (`.../tree/<branch>`) or pull request URL
    pub url: String,
}

impl CommandOutput for HeadReport {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Head: {}", self.url),
            format!("SHA: {}", self.sha),
            format!("Stage: {}", self.stage.as_deref().unwrap_or("-")),
            format!("Outcome: {}", head_outcome(self)),
        ];
        lines.extend(self.errors.iter().map(|e| format!("  - {e}")));
        lines.join("\n")
    }
}

pub async fn execute(args: ProcessArgs, config: Config, json_mode: bool) -> Result<()> {
    let runtime = Runtime::connect(config).await?;
    let current = runtime.reconciler.process_url(&args.url).await?;
    output(&HeadReport::from(&current), json_mode);
    Ok(())
}
