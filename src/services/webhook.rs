//! Inbound GitHub webhook checks and event interpretation.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha1::Sha1;
use tracing::{debug, info, warn};

use crate::domain::errors::WebhookError;

type HmacSha1 = Hmac<Sha1>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

/// Pull request actions carrying no new buildable state.
const IGNORED_ACTIONS: &[&str] = &[
    "assigned",
    "unassigned",
    "review_requested",
    "review_requested_removed",
    "labeled",
    "unlabeled",
    "closed",
    "synchronize",
];

/// What an event asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTarget {
    /// Reconcile the head at this URL.
    Head(String),
    /// Hook setup ping, nothing to do.
    Ping,
}

/// `sha1=<hex hmac>` of `payload` keyed with `secret`.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
}

/// Check the signature header of a payload.
///
/// Without a configured secret every request is denied.
pub fn validate_signature(
    header: Option<&str>,
    payload: &[u8],
    secret: Option<&str>,
) -> Result<(), WebhookError> {
    let Some(secret) = secret else {
        warn!("No webhook secret configured. Denying.");
        return Err(WebhookError::DenySignature);
    };
    let Some(signature) = header else {
        warn!("No hub signature. Denying.");
        return Err(WebhookError::DenySignature);
    };

    let expected = signature
        .strip_prefix("sha1=")
        .and_then(|digest| hex::decode(digest).ok())
        .ok_or(WebhookError::DenySignature)?;

    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::DenySignature)?;
    mac.update(payload);
    mac.verify_slice(&expected).map_err(|_| {
        warn!("Invalid hub signature. Denying.");
        WebhookError::DenySignature
    })
}

/// Infer which head an event is about.
pub fn infer_url_from_event(payload: &Value) -> Result<EventTarget, WebhookError> {
    if payload.get("hook_id").is_some() {
        debug!("Ping from GitHub");
        return Ok(EventTarget::Ping);
    }

    if let Some(pull_request) = payload.get("pull_request") {
        let action = payload.get("action").and_then(Value::as_str).unwrap_or_default();
        if IGNORED_ACTIONS.contains(&action) {
            info!(%action, "Skipping pull request event");
            return Err(WebhookError::SkipEvent(format!("pull request {action}")));
        }
        return html_url(pull_request).map(EventTarget::Head);
    }

    if let Some(git_ref) = payload.get("ref").and_then(Value::as_str) {
        let branch = git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref);
        let repository = payload.get("repository").ok_or(WebhookError::UnknownPayload)?;
        let url = html_url(repository)?;
        return Ok(EventTarget::Head(format!("{url}/tree/{branch}")));
    }

    if let Some(issue) = payload.get("issue") {
        return match issue.get("pull_request") {
            Some(pull_request) => html_url(pull_request).map(EventTarget::Head),
            None => Err(WebhookError::SkipEvent("comment on a plain issue".to_string())),
        };
    }

    Err(WebhookError::UnknownPayload)
}

fn html_url(object: &Value) -> Result<String, WebhookError> {
    object
        .get("html_url")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(WebhookError::UnknownPayload)
}
