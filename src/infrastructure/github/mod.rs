//! GitHub adapter: REST client, API models and the response cache.

pub mod cache;
pub mod client;
pub mod models;

pub use cache::ResponseCache;
pub use client::GitHubClient;
