use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remaining API quota of the code host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    /// When the quota window restarts.
    pub reset_at: DateTime<Utc>,
}
