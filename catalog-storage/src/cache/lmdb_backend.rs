//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped,
//! process-shared key-value store that survives restarts.
//!
//! # Value Format
//!
//! `[expires_at: i64 LE millis since epoch, 0 = no expiry][payload]`
//!
//! Expired entries are removed on the read that discovers them.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use catalog_core::{CacheError, LmdbSettings};
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::traits::{CacheResult, CacheStats, CacheStore};

const HEADER_LEN: usize = 8;

fn unavailable(e: impl std::fmt::Display) -> CacheError {
    CacheError::Unavailable {
        reason: e.to_string(),
    }
}

fn encode_value(value: &[u8], ttl: Option<Duration>) -> Vec<u8> {
    let expires_at = ttl
        .map(|ttl| {
            let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            Utc::now().timestamp_millis().saturating_add(millis)
        })
        .unwrap_or(0);
    let mut bytes = Vec::with_capacity(HEADER_LEN + value.len());
    bytes.extend_from_slice(&expires_at.to_le_bytes());
    bytes.extend_from_slice(value);
    bytes
}

/// Split a stored value into its expiry and payload.
fn decode_value(bytes: &[u8]) -> CacheResult<(Option<i64>, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return Err(CacheError::Deserialization {
            reason: "value shorter than expiry header".to_string(),
        });
    }
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&bytes[..HEADER_LEN]);
    let expires_at = i64::from_le_bytes(header);
    let expiry = (expires_at != 0).then_some(expires_at);
    Ok((expiry, &bytes[HEADER_LEN..]))
}

fn is_expired(expiry: Option<i64>, now_millis: i64) -> bool {
    expiry.is_some_and(|at| at <= now_millis)
}

/// LMDB-backed cache store.
pub struct LmdbCacheStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl std::fmt::Debug for LmdbCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbCacheStore")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbCacheStore {
    /// Open (or create) a store in `path`, capped at `max_size_mb`.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> CacheResult<Self> {
        std::fs::create_dir_all(&path).map_err(unavailable)?;

        // SAFETY: the environment is opened once per store and the directory
        // is owned by this process for the store's lifetime.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(unavailable)?;

        let mut wtxn = env.write_txn().map_err(unavailable)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(unavailable)?;
        wtxn.commit().map_err(unavailable)?;

        Ok(Self {
            env,
            db,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        })
    }

    pub fn from_settings(settings: &LmdbSettings) -> CacheResult<Self> {
        Self::new(&settings.path, settings.max_size_mb)
    }

    fn remove_expired(&self, key: &str) -> CacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(unavailable)?;
        let deleted = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(unavailable)?;
        wtxn.commit().map_err(unavailable)?;
        if deleted {
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for LmdbCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let found = {
            let rtxn = self.env.read_txn().map_err(unavailable)?;
            match self.db.get(&rtxn, key.as_bytes()).map_err(unavailable)? {
                Some(bytes) => {
                    let (expiry, payload) = decode_value(bytes)?;
                    Some((expiry, payload.to_vec()))
                }
                None => None,
            }
        };

        match found {
            Some((expiry, _)) if is_expired(expiry, Utc::now().timestamp_millis()) => {
                self.remove_expired(key)?;
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Some((_, payload)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(payload))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        let full_bytes = encode_value(&value, ttl);
        let mut wtxn = self.env.write_txn().map_err(unavailable)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &full_bytes)
            .map_err(unavailable)?;
        wtxn.commit().map_err(unavailable)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(unavailable)?;
        let deleted = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(unavailable)?;
        wtxn.commit().map_err(unavailable)?;
        Ok(deleted)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        let rtxn = self.env.read_txn().map_err(unavailable)?;
        let now = Utc::now().timestamp_millis();
        let prefix = prefix.as_bytes();

        let mut keys = Vec::new();
        for result in self.db.iter(&rtxn).map_err(unavailable)? {
            let (key, value) = result.map_err(unavailable)?;
            if !key.starts_with(prefix) {
                continue;
            }
            // Undecodable entries are still listed so prefix invalidation
            // removes them.
            if let Ok((expiry, _)) = decode_value(value) {
                if is_expired(expiry, now) {
                    continue;
                }
            }
            if let Ok(key) = std::str::from_utf8(key) {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        let rtxn = self.env.read_txn().map_err(unavailable)?;
        let mut entry_count = 0u64;
        let mut memory_bytes = 0u64;
        for result in self.db.iter(&rtxn).map_err(unavailable)? {
            let (key, value) = result.map_err(unavailable)?;
            entry_count += 1;
            memory_bytes += (key.len() + value.len()) as u64;
        }

        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            memory_bytes,
            expirations: self.expirations.load(Ordering::Relaxed),
        })
    }
}
