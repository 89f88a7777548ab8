//! Conditional request cache of GitHub responses.
//!
//! Responses are kept with their `ETag` so that unchanged resources are
//! answered with `304 Not Modified`, which does not count against the API
//! quota. The cache is shared by every request of a poll cycle and is
//! purged then saved only between cycles.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::Cache;

/// A cached response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub etag: String,
    pub body: Value,
    /// `Link` rel=next of a paginated response.
    #[serde(default)]
    pub next: Option<String>,
    pub last_used: DateTime<Utc>,
}

/// In-memory response cache, optionally persisted to a JSON file.
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CachedResponse>>,
    path: Option<PathBuf>,
    max_age: Duration,
}

impl ResponseCache {
    pub fn in_memory(max_age: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            path: None,
            max_age,
        }
    }

    /// Load the cache saved at `path`, starting empty when it is missing
    /// or unreadable.
    pub fn open(path: impl AsRef<Path>, max_age: Duration) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Discarding unreadable cache");
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read cache");
                HashMap::new()
            }
        };
        debug!(path = %path.display(), entries = entries.len(), "Cache loaded");

        Self {
            entries: Mutex::new(entries),
            path: Some(path),
            max_age,
        }
    }

    /// Look up `key`, marking it used.
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get_mut(key).map(|entry| {
            entry.last_used = Utc::now();
            entry.clone()
        })
    }

    /// Store a response. Last writer wins.
    pub fn insert(&self, key: impl Into<String>, etag: impl Into<String>, body: Value, next: Option<String>) {
        let entry = CachedResponse {
            etag: etag.into(),
            body,
            next,
            last_used: Utc::now(),
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for ResponseCache {
    fn purge(&self) {
        let cutoff = Utc::now() - self.max_age;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.last_used >= cutoff);
        let purged = before - entries.len();
        if purged > 0 {
            info!(purged, left = entries.len(), "Purged response cache");
        }
    }

    fn save(&self) -> DomainResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let raw = {
            let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            serde_json::to_vec(&*entries)?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| DomainError::ExecutionFailed(format!("cannot create {}: {e}", parent.display())))?;
        }
        std::fs::write(path, raw)
            .map_err(|e| DomainError::ExecutionFailed(format!("cannot write {}: {e}", path.display())))?;
        debug!(path = %path.display(), "Cache saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("github.json");

        let cache = ResponseCache::open(&path, Duration::hours(1));
        assert!(cache.is_empty());
        cache.insert("/repos/o/r", "\"abc\"", json!({"default_branch": "main"}), None);
        cache.save().unwrap();

        let reopened = ResponseCache::open(&path, Duration::hours(1));
        let entry = reopened.get("/repos/o/r").unwrap();
        assert_eq!(entry.etag, "\"abc\"");
        assert_eq!(entry.body["default_branch"], "main");
    }

    #[test]
    fn test_purge_drops_unused_entries() {
        let cache = ResponseCache::in_memory(Duration::hours(1));
        cache.insert("fresh", "1", json!(1), None);
        cache.insert("stale", "2", json!(2), None);
        cache
            .entries
            .lock()
            .unwrap()
            .get_mut("stale")
            .unwrap()
            .last_used = Utc::now() - Duration::hours(2);

        cache.purge();
        assert!(cache.get("fresh").is_some());
        assert!(cache.get("stale").is_none());
    }

    #[test]
    fn test_unreadable_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("github.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(ResponseCache::open(&path, Duration::hours(1)).is_empty());
    }
}
