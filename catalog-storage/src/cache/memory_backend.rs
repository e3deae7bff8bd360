//! In-process cache store.
//!
//! Ordered map keyed by the cache key, so prefix scans are a range walk.
//! Expiry is checked lazily on read and on scan.

use super::traits::{CacheResult, CacheStats, CacheStore};
use async_trait::async_trait;
use catalog_core::CacheError;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    stats: CacheStats,
}

/// Cache store held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    inner: RwLock<Inner>,
}

fn poisoned() -> CacheError {
    CacheError::Unavailable {
        reason: "in-memory cache lock poisoned".to_string(),
    }
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until they are touched.
    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let now = Instant::now();

        let expired = match inner.entries.get(key) {
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                let value = entry.value.clone();
                inner.stats.hits += 1;
                return Ok(Some(value));
            }
            None => false,
        };

        if expired {
            inner.entries.remove(key);
            inner.stats.expirations += 1;
        }
        inner.stats.misses += 1;
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        inner
            .entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        Ok(inner.entries.remove(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let now = Instant::now();
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let mut stats = inner.stats.clone();
        stats.entry_count = inner.entries.len() as u64;
        stats.memory_bytes = inner
            .entries
            .iter()
            .map(|(k, e)| (k.len() + e.value.len()) as u64)
            .sum();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemoryCacheStore::new();
        store.set("entity:category:1", b"a".to_vec(), None).await.unwrap();

        assert_eq!(
            store.get("entity:category:1").await.unwrap(),
            Some(b"a".to_vec())
        );
        assert!(store.delete("entity:category:1").await.unwrap());
        assert!(!store.delete("entity:category:1").await.unwrap());
        assert_eq!(store.get("entity:category:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = InMemoryCacheStore::new();
        store
            .set("k", b"v".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn test_prefix_scan() {
        let store = InMemoryCacheStore::new();
        for key in [
            "list:category:1:20::position:asc",
            "list:category:2:20::position:asc",
            "list:subcategory:1:20::position:asc",
            "entity:category:x",
        ] {
            store.set(key, vec![1], None).await.unwrap();
        }

        let keys = store.keys_with_prefix("list:category:").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "list:category:1:20::position:asc".to_string(),
                "list:category:2:20::position:asc".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let store = InMemoryCacheStore::new();
        store.set("a", vec![1, 2], None).await.unwrap();
        store.get("a").await.unwrap();
        store.get("b").await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.memory_bytes, 3);
    }
}
