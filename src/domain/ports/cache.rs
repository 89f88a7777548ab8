use crate::domain::errors::DomainResult;

/// Port for the shared response cache
///
/// Purged then saved once per poll cycle, never in the middle of one.
pub trait Cache: Send + Sync {
    /// Drop entries unused for too long
    fn purge(&self);

    /// Persist the cache
    fn save(&self) -> DomainResult<()>;
}

/// Cache doing nothing, for single shots and tests
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

impl Cache for NullCache {
    fn purge(&self) {}

    fn save(&self) -> DomainResult<()> {
        Ok(())
    }
}
