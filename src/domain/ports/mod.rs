//! Port trait definitions (Hexagonal Architecture)
//!
//! - CodeHost: repositories, heads, statuses, comments and hooks
//! - BuildServer: jobs and builds
//! - Cache: shared response cache lifecycle
//!
//! Services only talk to external systems through these traits.

pub mod build_server;
pub mod cache;
pub mod code_host;

pub use build_server::{is_build_url, BuildServer};
pub use cache::{Cache, NullCache};
pub use code_host::{CodeHost, Webhook};
