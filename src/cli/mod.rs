//! Command-line interface.

pub mod commands;
pub mod display;
pub mod output;
pub mod runtime;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging::LoggerImpl;
use commands::{bot::BotArgs, pipeline::PipelineArgs, process::ProcessArgs};

#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(about = "Keeps Jenkins jobs and GitHub commit statuses in line with jenkins.yml", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file, instead of .stagehand/config.yaml
    #[arg(short, long, global = true, env = "STAGEHAND_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log intended writes instead of performing them
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile every head of every configured repository
    Bot(BotArgs),

    /// List the heads the bot would reconcile
    ListHeads,

    /// Reconcile a single head
    Process(ProcessArgs),

    /// Show the stages of a head
    Pipeline(PipelineArgs),

    /// Register the webhook on every configured repository
    Register,

    /// Serve webhooks, processing events in a worker pool
    Serve,
}

/// Load configuration, set up logging and run the command.
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = ConfigLoader::load(cli.config.as_deref())?;
    if cli.dry_run {
        config.dry_run = true;
    }
    let _logger = LoggerImpl::init(&config.logging)?;

    match cli.command {
        Commands::Bot(args) => commands::bot::execute(args, config, cli.json).await,
        Commands::ListHeads => commands::heads::execute(config, cli.json).await,
        Commands::Process(args) => commands::process::execute(args, config, cli.json).await,
        Commands::Pipeline(args) => commands::pipeline::execute(args, config, cli.json).await,
        Commands::Register => commands::register::execute(config, cli.json).await,
        Commands::Serve => commands::serve::execute(config).await,
    }
}

/// Report a failed command and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
        let payload = serde_json::json!({ "error": err.to_string(), "causes": &chain[1..] });
        eprintln!("{}", serde_json::to_string_pretty(&payload).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
