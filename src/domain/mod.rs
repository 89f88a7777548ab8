//! Domain layer of the reconciliation bot
//!
//! Models, port traits and errors. Nothing here performs I/O.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult, Interrupt, PhaseResult, WebhookError};
