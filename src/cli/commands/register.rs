//! `register`: make repositories deliver events to the webhook server.

use anyhow::Result;
use serde::Serialize;

use crate::cli::display::{list_table, render_list};
use crate::cli::output::{output, CommandOutput};
use crate::cli::runtime::Runtime;
use crate::domain::models::Config;
use crate::services::procedures::HookAction;
use crate::services::HookReport;

#[derive(Debug, Serialize)]
pub struct RegisterOutput {
    pub hooks: Vec<HookReport>,
}

impl CommandOutput for RegisterOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["repository", "webhook"]);
        for hook in &self.hooks {
            let action = match hook.action {
                HookAction::Created => "created",
                HookAction::Reactivated => "reactivated",
                HookAction::Unchanged => "unchanged",
                HookAction::Failed => "failed",
            };
            table.add_row(vec![hook.repository.as_str(), action]);
        }
        render_list("repository", &table, self.hooks.len())
    }
}

pub async fn execute(config: Config, json_mode: bool) -> Result<()> {
    let runtime = Runtime::connect(config).await?;
    let pool = runtime.worker_pool();
    let result = runtime.reconciler.register_webhooks(&pool).await;
    pool.shutdown().await;

    output(&RegisterOutput { hooks: result? }, json_mode);
    Ok(())
}
