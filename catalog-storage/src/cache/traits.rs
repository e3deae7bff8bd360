//! Cache store trait and statistics.
//!
//! A store is a plain byte-oriented key-value service with optional per-entry
//! TTL. Serialization, key construction and failure handling live in the
//! [`super::CacheCoordinator`]; stores only move bytes.

use async_trait::async_trait;
use catalog_core::CacheError;
use std::time::Duration;

pub type CacheResult<T> = Result<T, CacheError>;

/// Cache store trait for pluggable cache implementations.
///
/// Implementations must be thread-safe. Any call may fail; callers treat
/// failures as misses and never let them reach the caller of the engine.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get the raw bytes under `key`. Expired entries read as `None`.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store `value` under `key`. `None` TTL means the entry does not expire.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()>;

    /// Remove `key`. Returns whether an entry was present.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// All live keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>>;

    /// Get cache statistics.
    async fn stats(&self) -> CacheResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate stored payload size in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped because their TTL elapsed.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
