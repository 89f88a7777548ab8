//! Inbound HTTP surface.

pub mod webhook_server;

pub use webhook_server::{serve, webhook_router, WebhookState};
