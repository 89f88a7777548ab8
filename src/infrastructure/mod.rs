//! Infrastructure layer
//!
//! Adapters behind the domain ports and the process plumbing:
//! - GitHub REST client with its conditional request cache
//! - Jenkins REST client and job XML
//! - Webhook HTTP server
//! - Configuration loading
//! - Logging setup

pub mod config;
pub mod github;
pub mod http;
pub mod jenkins;
pub mod logging;
