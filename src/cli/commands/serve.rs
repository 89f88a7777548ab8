//! `serve`: webhook server feeding the worker pool.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cli::runtime::{ctrl_c_token, Runtime};
use crate::domain::models::Config;
use crate::infrastructure::http::{serve, WebhookState};
use crate::services::{Reconciler, WorkerPool};

pub async fn execute(config: Config) -> Result<()> {
    let runtime = Runtime::connect(config).await?;
    let pool = Arc::new(runtime.worker_pool());
    let shutdown = ctrl_c_token();

    let interval = Duration::from_secs(runtime.config.loop_interval_secs);
    let poller = (!interval.is_zero()).then(|| {
        tokio::spawn(poll_heads(
            runtime.reconciler.clone(),
            pool.clone(),
            interval,
            shutdown.clone(),
        ))
    });

    let state = WebhookState::new(runtime.reconciler.clone(), pool.clone());
    let served = serve(&runtime.config.server.bind, state, shutdown.clone()).await;

    shutdown.cancel();
    if let Some(poller) = poller {
        let _ = poller.await;
    }
    pool.shutdown().await;
    served
}

/// Queue every head as poll work each `interval`, between webhook events.
async fn poll_heads(reconciler: Arc<Reconciler>, pool: Arc<WorkerPool>, interval: Duration, shutdown: CancellationToken) {
    loop {
        match reconciler.list_heads().await {
            Ok(heads) => {
                reconciler.queue_heads(&pool, heads);
            }
            Err(e) => error!(error = %e, "Failed to list heads"),
        }

        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
    info!("Head poller stopped");
}
