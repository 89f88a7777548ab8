//! Webhook receiver
//!
//! Accepts GitHub event deliveries and plain "process this head" pokes, and
//! turns both into work for the worker pool. Responses only acknowledge the
//! enqueueing; processing happens in the background.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::domain::errors::WebhookError;
use crate::domain::models::queue::WEBHOOK_CATEGORY;
use crate::services::procedures::WEBHOOK_PATH;
use crate::services::webhook::{infer_url_from_event, validate_signature, EventTarget, SIGNATURE_HEADER};
use crate::services::{Reconciler, WorkerPool};

/// Path of the unsigned head trigger.
pub const SIMPLE_WEBHOOK_PATH: &str = "/simple-webhook";

/// Shared state of the webhook handlers.
#[derive(Clone)]
pub struct WebhookState {
    pub reconciler: Arc<Reconciler>,
    pub pool: Arc<WorkerPool>,
    pub secret: Option<Arc<str>>,
}

impl WebhookState {
    pub fn new(reconciler: Arc<Reconciler>, pool: Arc<WorkerPool>) -> Self {
        let secret = reconciler.config().github.webhook_secret.as_deref().map(Arc::from);
        Self {
            reconciler,
            pool,
            secret,
        }
    }

    fn enqueue(&self, url: &str) {
        let outcome = self.reconciler.queue_url(&self.pool, url, WEBHOOK_CATEGORY);
        info!(%url, ?outcome, "Queued head");
    }
}

#[derive(Debug, Deserialize)]
pub struct SimpleWebhookQuery {
    pub head: String,
}

type JsonResponse = (StatusCode, Json<Value>);

fn message(status: StatusCode, text: &str) -> JsonResponse {
    (status, Json(json!({ "message": text })))
}

/// Router serving both webhook endpoints.
pub fn webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(github_webhook))
        .route(SIMPLE_WEBHOOK_PATH, get(simple_webhook).post(simple_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve webhooks on `bind` until `shutdown` is cancelled.
pub async fn serve(bind: &str, state: WebhookState, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!(address = %bind, "Webhook server listening");

    axum::serve(listener, webhook_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Webhook server failed")?;

    info!("Webhook server stopped");
    Ok(())
}

async fn github_webhook(State(state): State<WebhookState>, headers: HeaderMap, body: Bytes) -> JsonResponse {
    info!("Processing GitHub webhook event");
    let signature = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());
    if validate_signature(signature, &body, state.secret.as_deref()).is_err() {
        return message(StatusCode::FORBIDDEN, "Invalid signature.");
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Undecodable webhook payload");
            return message(StatusCode::BAD_REQUEST, "Invalid payload.");
        }
    };

    match infer_url_from_event(&payload) {
        Ok(EventTarget::Ping) => message(StatusCode::OK, "Hook is set up."),
        Ok(EventTarget::Head(url)) => {
            state.enqueue(&url);
            message(StatusCode::OK, "Event processing in progress.")
        }
        Err(WebhookError::SkipEvent(reason)) => {
            debug!(%reason, "Event skipped");
            message(StatusCode::OK, "Event processed.")
        }
        Err(e) => {
            warn!(error = %e, "Can't infer head from payload");
            message(StatusCode::BAD_REQUEST, "Can't infer head from payload.")
        }
    }
}

async fn simple_webhook(State(state): State<WebhookState>, Query(query): Query<SimpleWebhookQuery>) -> JsonResponse {
    info!("Processing simple webhook event");
    state.enqueue(&query.head);
    message(StatusCode::OK, "Event processing in progress.")
}
