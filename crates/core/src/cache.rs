//! Shared key-value cache seam.
//!
//! Job snapshots, quota counters, proxy tokens and the per-user job
//! index all live behind this trait. Values are structured JSON; there
//! are no transactions across keys. Callers treat write failures as
//! non-fatal (logged, never surfaced to a download).

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors from cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to encode cache value: {0}")]
    Encode(String),
}

/// Get/set-with-TTL key-value store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a value, `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store a value; `ttl = None` means no expiry.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Remove a key (absent keys are not an error).
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process cache backend.
///
/// Authoritative state lives in the process anyway; this backend keeps
/// the TTL semantics of an external store so the rest of the system
/// does not care which one it is talking to.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

/// Sweep expired entries once the map grows past this many keys.
const SWEEP_THRESHOLD: usize = 4096;

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries, for tests and diagnostics.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| !e.expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired: drop it under the write lock.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.expired(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if entries.len() >= SWEEP_THRESHOLD {
            entries.retain(|_, e| !e.expired(now));
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| now + d),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let cache = MemoryCache::new();
        cache
            .set("k", json!({"n": 1}), None)
            .await
            .unwrap();

        let got = cache.get("k").await.unwrap();
        assert_eq!(got, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = MemoryCache::new();
        cache
            .set("k", json!(42), Some(Duration::from_millis(10)))
            .await
            .unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(json!(42)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove() {
        let cache = MemoryCache::new();
        cache.set("k", json!(1), None).await.unwrap();
        cache.remove("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        // Removing again is fine
        cache.remove("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_overwrite_resets_ttl() {
        let cache = MemoryCache::new();
        cache
            .set("k", json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        cache.set("k", json!(2), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(2)));
    }
}
