//! Read-through cache coordinator.
//!
//! Wraps a [`CacheStore`] with serialization, the key scheme and the failure
//! policy: every store call runs under the configured timeout, and any error
//! or timeout is logged and treated as a miss (reads) or skipped (writes).
//! Nothing the store does can fail the calling operation.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use catalog_core::{CacheError, CacheSettings, CatalogResult, EntityKind, ParentRef};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::keys::CacheKey;
use super::traits::{CacheResult, CacheStats, CacheStore};
use crate::repository::NaturalKey;

/// Counters kept by the coordinator itself, independent of the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub hits: u64,
    pub misses: u64,
    /// Store calls that failed or timed out.
    pub degraded: u64,
}

/// Cache coordinator shared by the engine components.
pub struct CacheCoordinator {
    store: Arc<dyn CacheStore>,
    settings: CacheSettings,
    hits: AtomicU64,
    misses: AtomicU64,
    degraded: AtomicU64,
}

impl std::fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("settings", &self.settings)
            .field("stats", &self.stats())
            .finish()
    }
}

impl CacheCoordinator {
    pub fn new(store: Arc<dyn CacheStore>, settings: CacheSettings) -> Self {
        Self {
            store,
            settings,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }

    /// Statistics reported by the underlying store, if it answers in time.
    pub async fn store_stats(&self) -> Option<CacheStats> {
        self.guarded("stats", "*", self.store.stats()).await
    }

    /// Run one store call under the operation timeout. `None` means the
    /// store failed and the caller should carry on without it.
    async fn guarded<T, F>(&self, operation: &'static str, key: &str, call: F) -> Option<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        let timeout = self.settings.operation_timeout;
        let error = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(e)) => e,
            Err(_) => CacheError::Timeout {
                operation: operation.to_string(),
                timeout,
            },
        };
        self.degraded.fetch_add(1, Ordering::Relaxed);
        warn!(operation, key, error = %error, "cache degraded, continuing without it");
        None
    }

    /// Read and decode `key`. Undecodable entries are dropped.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let bytes = match self.guarded("get", key.as_str(), self.store.get(key.as_str())).await {
            Some(Some(bytes)) => bytes,
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cache miss");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cache hit");
                Some(value)
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "dropping undecodable cache entry");
                self.invalidate(key).await;
                None
            }
        }
    }

    /// Encode and store `value`. Failures are logged only.
    pub async fn put<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T, ttl: Option<Duration>) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                let error = CacheError::Serialization {
                    reason: e.to_string(),
                };
                warn!(key = %key, error = %error, "skipping cache write");
                return;
            }
        };
        self.guarded("set", key.as_str(), self.store.set(key.as_str(), bytes, ttl))
            .await;
    }

    /// Return the cached value for `key`, or run `loader` and cache what it
    /// returns. A loader returning `Option<_>` caches `None` too, which is
    /// how a call site opts into negative caching.
    pub async fn get_or_load<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Option<Duration>,
        loader: F,
    ) -> CatalogResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CatalogResult<T>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = loader().await?;
        self.put(key, &value, ttl).await;
        Ok(value)
    }

    /// Like [`Self::get_or_load`] but a `None` from the loader is not cached.
    pub async fn get_or_load_optional<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Option<Duration>,
        loader: F,
    ) -> CatalogResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CatalogResult<Option<T>>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(Some(value));
        }
        let loaded = loader().await?;
        if let Some(value) = &loaded {
            self.put(key, value, ttl).await;
        }
        Ok(loaded)
    }

    /// Remove `key`. Returns whether the store confirmed a removal.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        self.guarded("delete", key.as_str(), self.store.delete(key.as_str()))
            .await
            .unwrap_or(false)
    }

    /// Remove every key starting with `prefix`. Returns how many went.
    pub async fn invalidate_by_prefix(&self, prefix: &str) -> u64 {
        let Some(keys) = self
            .guarded("keys_with_prefix", prefix, self.store.keys_with_prefix(prefix))
            .await
        else {
            return 0;
        };

        let mut removed = 0;
        for key in &keys {
            if let Some(true) = self.guarded("delete", key, self.store.delete(key)).await {
                removed += 1;
            }
        }
        debug!(prefix, removed, "invalidated cache prefix");
        removed
    }

    /// Invalidate every cached listing page of `kind`.
    pub async fn invalidate_lists(&self, kind: EntityKind) -> u64 {
        self.invalidate_by_prefix(&CacheKey::list_prefix(kind)).await
    }

    /// Whether a live node with this natural key is known to exist in
    /// `parent`. `false` means "no information", never "free".
    pub async fn existence_check(
        &self,
        kind: EntityKind,
        key: NaturalKey,
        parent: &ParentRef,
        value: &str,
    ) -> bool {
        let cache_key = CacheKey::exists(kind, key, parent, value);
        matches!(self.get::<bool>(&cache_key).await, Some(true))
    }

    pub async fn mark_exists(
        &self,
        kind: EntityKind,
        key: NaturalKey,
        parent: &ParentRef,
        value: &str,
    ) {
        let cache_key = CacheKey::exists(kind, key, parent, value);
        self.put(&cache_key, &true, Some(self.settings.existence_ttl))
            .await;
    }

    pub async fn clear_exists(
        &self,
        kind: EntityKind,
        key: NaturalKey,
        parent: &ParentRef,
        value: &str,
    ) {
        let cache_key = CacheKey::exists(kind, key, parent, value);
        self.invalidate(&cache_key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;
    use async_trait::async_trait;
    use catalog_core::{CatalogError, StorageError};
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    fn coordinator() -> (CacheCoordinator, Arc<InMemoryCacheStore>) {
        let store = Arc::new(InMemoryCacheStore::new());
        let coordinator = CacheCoordinator::new(store.clone(), CacheSettings::default());
        (coordinator, store)
    }

    /// Store whose every call fails.
    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
            Err(CacheError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }
        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> CacheResult<()> {
            Err(CacheError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }
        async fn delete(&self, _key: &str) -> CacheResult<bool> {
            Err(CacheError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }
        async fn keys_with_prefix(&self, _prefix: &str) -> CacheResult<Vec<String>> {
            Err(CacheError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }
        async fn stats(&self) -> CacheResult<CacheStats> {
            Err(CacheError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }
    }

    /// Store that never answers within the timeout.
    struct StalledStore;

    #[async_trait]
    impl CacheStore for StalledStore {
        async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> CacheResult<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
        async fn delete(&self, _key: &str) -> CacheResult<bool> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(false)
        }
        async fn keys_with_prefix(&self, _prefix: &str) -> CacheResult<Vec<String>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![])
        }
        async fn stats(&self) -> CacheResult<CacheStats> {
            Ok(CacheStats::default())
        }
    }

    #[tokio::test]
    async fn test_miss_loads_and_populates() {
        let (coordinator, _store) = coordinator();
        let key = CacheKey::entity(EntityKind::Category, Uuid::now_v7());
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: String = coordinator
                .get_or_load(&key, None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("Shoes".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "Shoes");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = coordinator.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_loader_error_propagates_and_caches_nothing() {
        let (coordinator, store) = coordinator();
        let key = CacheKey::entity(EntityKind::Category, Uuid::now_v7());

        let result: CatalogResult<String> = coordinator
            .get_or_load(&key, None, || async {
                Err(CatalogError::from(StorageError::LockPoisoned))
            })
            .await;
        assert!(result.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_optional_loader_does_not_cache_absence() {
        let (coordinator, store) = coordinator();
        let key = CacheKey::entity(EntityKind::Product, Uuid::now_v7());

        let loaded: Option<String> = coordinator
            .get_or_load_optional(&key, None, || async { Ok(None) })
            .await
            .unwrap();
        assert_eq!(loaded, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_option_loader_caches_negative_result() {
        let (coordinator, _store) = coordinator();
        let key = CacheKey::entity(EntityKind::Product, Uuid::now_v7());
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let loaded: Option<String> = coordinator
                .get_or_load(&key, None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
                .await
                .unwrap();
            assert_eq!(loaded, None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_existence_flags() {
        let (coordinator, _store) = coordinator();
        let kind = EntityKind::Category;
        let root = ParentRef::TopLevel;

        assert!(!coordinator.existence_check(kind, NaturalKey::Name, &root, "Shoes").await);
        coordinator.mark_exists(kind, NaturalKey::Name, &root, "Shoes").await;
        assert!(coordinator.existence_check(kind, NaturalKey::Name, &root, " shoes ").await);
        assert!(!coordinator.existence_check(kind, NaturalKey::Slug, &root, "shoes").await);

        coordinator.clear_exists(kind, NaturalKey::Name, &root, "SHOES").await;
        assert!(!coordinator.existence_check(kind, NaturalKey::Name, &root, "Shoes").await);
    }

    #[tokio::test]
    async fn test_invalidate_by_prefix() {
        let (coordinator, store) = coordinator();
        let page1 = CacheKey::list(EntityKind::Category, &Default::default());
        let entity = CacheKey::entity(EntityKind::Category, Uuid::now_v7());
        coordinator.put(&page1, &vec![1u8], None).await;
        coordinator.put(&entity, &"x", None).await;

        assert_eq!(coordinator.invalidate_lists(EntityKind::Category).await, 1);
        assert_eq!(store.len(), 1);
        assert!(coordinator.get::<String>(&entity).await.is_some());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_dropped() {
        let (coordinator, store) = coordinator();
        let key = CacheKey::entity(EntityKind::Category, Uuid::now_v7());
        store.set(key.as_str(), b"not json".to_vec(), None).await.unwrap();

        assert_eq!(coordinator.get::<u32>(&key).await, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_broken_store_degrades_to_loader() {
        let coordinator = CacheCoordinator::new(Arc::new(BrokenStore), CacheSettings::default());
        let key = CacheKey::entity(EntityKind::Category, Uuid::now_v7());

        let value: u32 = coordinator
            .get_or_load(&key, None, || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(!coordinator.invalidate(&key).await);
        assert_eq!(coordinator.invalidate_by_prefix("list:").await, 0);
        assert!(coordinator.stats().degraded >= 4);
    }

    #[tokio::test]
    async fn test_stalled_store_times_out() {
        let settings = CacheSettings {
            operation_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let coordinator = CacheCoordinator::new(Arc::new(StalledStore), settings);
        let key = CacheKey::entity(EntityKind::Category, Uuid::now_v7());

        let started = std::time::Instant::now();
        let value: u32 = coordinator
            .get_or_load(&key, None, || async { Ok(3) })
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(coordinator.stats().degraded, 2);
    }
}
