//! Domain errors for the Stagehand reconciliation bot.

use thiserror::Error;

/// Domain-level errors raised by ports and models.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Unauthorized repository: {0}")]
    UnauthorizedRepository(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Upstream quota exceeded: {0}")]
    UpstreamQuotaExceeded(String),

    #[error("Invalid job specification: {0}")]
    InvalidSpec(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Network failure or 5xx answer, worth retrying.
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Whether retrying the same call may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound(_))
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for DomainError {
    fn from(err: serde_yaml::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

/// Outcome of an extension phase that stops the normal flow.
///
/// `SkipHead` is not a failure: it ends the pipeline for the current head
/// only. `Failed` is caught by the pipeline and recorded as a context error.
#[derive(Debug, Error)]
pub enum Interrupt {
    #[error("skipping head: {0}")]
    SkipHead(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl Interrupt {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::SkipHead(reason.into())
    }
}

impl From<DomainError> for Interrupt {
    fn from(err: DomainError) -> Self {
        Self::Failed(err.into())
    }
}

/// Result type of extension phases.
pub type PhaseResult = Result<(), Interrupt>;

/// Errors raised while handling an inbound webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid webhook signature")]
    DenySignature,

    #[error("event skipped: {0}")]
    SkipEvent(String),

    #[error("unknown payload shape")]
    UnknownPayload,
}
