//! `list-heads`: heads the bot would reconcile.

use anyhow::Result;
use serde::Serialize;

use crate::cli::display::{list_table, render_list};
use crate::cli::output::{output, CommandOutput};
use crate::cli::runtime::Runtime;
use crate::domain::models::{Config, Head};

#[derive(Debug, Serialize)]
pub struct HeadListOutput {
    pub heads: Vec<Head>,
}

impl CommandOutput for HeadListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["url", "ref", "sha"]);
        for head in &self.heads {
            table.add_row(vec![head.url.as_str(), head.fullref.as_str(), head.short_sha()]);
        }
        render_list("head", &table, self.heads.len())
    }
}

pub async fn execute(config: Config, json_mode: bool) -> Result<()> {
    let runtime = Runtime::connect(config).await?;
    let heads = runtime.reconciler.list_heads().await?;
    output(&HeadListOutput { heads }, json_mode);
    Ok(())
}
