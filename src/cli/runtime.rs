//! Wiring of the adapters, services and procedures a command runs on.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::models::Config;
use crate::domain::ports::{BuildServer, Cache, CodeHost};
use crate::infrastructure::github::{GitHubClient, ResponseCache};
use crate::infrastructure::jenkins::JenkinsClient;
use crate::services::{ExtensionPipeline, Reconciler, Services, WorkerPool};

/// Everything a command needs, built from the loaded configuration.
pub struct Runtime {
    pub config: Arc<Config>,
    pub reconciler: Arc<Reconciler>,
}

impl Runtime {
    /// Build the adapters and identify the bot account.
    ///
    /// An unidentified account is not fatal: only the bot's own comments
    /// lose their special treatment.
    pub async fn connect(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        let max_age = chrono::Duration::from_std(std::time::Duration::from_secs(config.cache.max_age_secs))
            .context("cache.max_age_secs is out of range")?;
        let cache = Arc::new(match &config.cache.path {
            Some(path) => ResponseCache::open(path, max_age),
            None => ResponseCache::in_memory(max_age),
        });

        let github = Arc::new(GitHubClient::new(&config.github, &config.rate_limit, cache.clone()));
        let code_host: Arc<dyn CodeHost> = github;
        let build_server: Arc<dyn BuildServer> = Arc::new(JenkinsClient::new(&config.jenkins));

        let mut services = Services::new(code_host.clone(), build_server, config.clone());
        match code_host.whoami().await {
            Ok(login) => {
                info!(%login, "Authenticated on GitHub");
                services = services.with_login(login);
            }
            Err(e) => warn!(error = %e, "Cannot identify the bot account"),
        }

        let pipeline = ExtensionPipeline::with_default_extensions(services)
            .context("Failed to assemble the extension pipeline")?;
        let cache: Arc<dyn Cache> = cache;
        let reconciler = Arc::new(Reconciler::new(pipeline, cache));

        Ok(Self { config, reconciler })
    }

    /// Start a worker pool sized by the configuration.
    pub fn worker_pool(&self) -> WorkerPool {
        WorkerPool::start(self.config.workers, self.config.retry.clone())
    }
}

/// Cancelled on the first Ctrl-C.
pub fn ctrl_c_token() -> tokio_util::sync::CancellationToken {
    let token = tokio_util::sync::CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            cancel.cancel();
        }
    });
    token
}
