//! In-memory response cache shared by the release resolver and the artifact
//! fetcher.
//!
//! Entries are never evicted. A stale entry is skipped on lookup and replaced
//! by the next successful write for the same key. The cache lives for the
//! lifetime of the process only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use log::debug;

/// Freshness window applied to cached release metadata.
pub const RELEASE_CACHE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Source of "now" for cache freshness checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock with a settable time, for deterministic tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub payload: String,
    pub stored_at: DateTime<Utc>,
}

pub struct ResponseCache {
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(RELEASE_CACHE_TTL, Arc::new(SystemClock))
    }
}

impl ResponseCache {
    #[must_use]
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Build a stable key for a request from its URL and query parameters.
    ///
    /// Parameters are sorted so the same request always maps to the same key.
    #[must_use]
    pub fn fingerprint(url: &str, query: &[(&str, &str)]) -> String {
        let mut params: Vec<_> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        params.sort_unstable();
        if params.is_empty() {
            url.to_string()
        } else {
            format!("{url}?{}", params.join("&"))
        }
    }

    /// Return the payload stored under `key` if it is still fresh.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(key)?;
        if now - entry.stored_at < self.ttl {
            Some(entry.payload.clone())
        } else {
            debug!("Cache entry for {key} is stale (stored at {})", entry.stored_at);
            None
        }
    }

    pub fn put(&self, key: impl Into<String>, payload: impl Into<String>) {
        let key = key.into();
        let entry = CacheEntry {
            key: key.clone(),
            payload: payload.into(),
            stored_at: self.clock.now(),
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry);
    }

    /// Raw entry lookup that ignores freshness.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
