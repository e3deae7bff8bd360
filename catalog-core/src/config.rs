//! Configuration types

use crate::{CatalogError, CatalogResult, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Cache lifetimes and the per-call timeout applied to cache operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// TTL for `entity:` snapshots.
    pub entity_ttl: Duration,
    /// TTL for `exists:` flags.
    pub existence_ttl: Duration,
    /// TTL for cached `list:` pages.
    pub list_ttl: Duration,
    /// TTL for personal grant lists. `None` keeps them until cleared.
    pub personal_grant_ttl: Option<Duration>,
    /// Timeout for any single cache call; on expiry the call degrades to a miss.
    pub operation_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            entity_ttl: Duration::from_secs(3600),
            existence_ttl: Duration::from_secs(3600),
            list_ttl: Duration::from_secs(300),
            personal_grant_ttl: None,
            operation_timeout: Duration::from_millis(250),
        }
    }
}

/// Location and size of the LMDB side-cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmdbSettings {
    pub path: PathBuf,
    pub max_size_mb: usize,
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub cache: CacheSettings,
    /// Timeout for any single repository call.
    pub repository_timeout: Duration,
    /// Expansion depth used when a caller does not ask for one.
    pub default_graph_depth: u32,
    /// Upper bound on requested expansion depth.
    pub max_graph_depth: u32,
    /// Upper bound on `ListQuery::limit`.
    pub max_page_size: u32,
    /// LMDB cache location; the in-memory store is used when absent.
    pub lmdb: Option<LmdbSettings>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            repository_timeout: Duration::from_secs(5),
            default_graph_depth: 1,
            max_graph_depth: 5,
            max_page_size: 100,
            lmdb: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl CatalogConfig {
    /// Create CatalogConfig from environment variables.
    ///
    /// Environment variables (missing or unparsable values keep the default):
    /// - `CATALOG_ENTITY_TTL_SECS`
    /// - `CATALOG_EXISTS_TTL_SECS`
    /// - `CATALOG_LIST_TTL_SECS`
    /// - `CATALOG_PERSONAL_GRANT_TTL_SECS` (0 = no expiry)
    /// - `CATALOG_CACHE_TIMEOUT_MS`
    /// - `CATALOG_REPOSITORY_TIMEOUT_MS`
    /// - `CATALOG_GRAPH_DEPTH`
    /// - `CATALOG_MAX_GRAPH_DEPTH`
    /// - `CATALOG_MAX_PAGE_SIZE`
    /// - `CATALOG_LMDB_PATH` / `CATALOG_LMDB_MAX_SIZE_MB`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let cache_defaults = defaults.cache.clone();

        let cache = CacheSettings {
            entity_ttl: env_parse("CATALOG_ENTITY_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(cache_defaults.entity_ttl),
            existence_ttl: env_parse("CATALOG_EXISTS_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(cache_defaults.existence_ttl),
            list_ttl: env_parse("CATALOG_LIST_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(cache_defaults.list_ttl),
            personal_grant_ttl: match env_parse::<u64>("CATALOG_PERSONAL_GRANT_TTL_SECS") {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => cache_defaults.personal_grant_ttl,
            },
            operation_timeout: env_parse("CATALOG_CACHE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(cache_defaults.operation_timeout),
        };

        let lmdb = std::env::var("CATALOG_LMDB_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(|path| LmdbSettings {
                path: PathBuf::from(path),
                max_size_mb: env_parse("CATALOG_LMDB_MAX_SIZE_MB").unwrap_or(256),
            });

        Self {
            cache,
            repository_timeout: env_parse("CATALOG_REPOSITORY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.repository_timeout),
            default_graph_depth: env_parse("CATALOG_GRAPH_DEPTH")
                .unwrap_or(defaults.default_graph_depth),
            max_graph_depth: env_parse("CATALOG_MAX_GRAPH_DEPTH")
                .unwrap_or(defaults.max_graph_depth),
            max_page_size: env_parse("CATALOG_MAX_PAGE_SIZE").unwrap_or(defaults.max_page_size),
            lmdb,
        }
    }

    /// Reject settings that would make the engine unusable.
    pub fn validate(&self) -> CatalogResult<()> {
        fn invalid(field: &str, value: String, reason: &str) -> CatalogError {
            CatalogError::Config(ConfigError::InvalidValue {
                field: field.to_string(),
                value,
                reason: reason.to_string(),
            })
        }

        if self.cache.operation_timeout.is_zero() {
            return Err(invalid(
                "cache.operation_timeout",
                format!("{:?}", self.cache.operation_timeout),
                "must be greater than zero",
            ));
        }
        if self.repository_timeout.is_zero() {
            return Err(invalid(
                "repository_timeout",
                format!("{:?}", self.repository_timeout),
                "must be greater than zero",
            ));
        }
        if self.max_page_size == 0 {
            return Err(invalid(
                "max_page_size",
                self.max_page_size.to_string(),
                "must be greater than zero",
            ));
        }
        if self.default_graph_depth > self.max_graph_depth {
            return Err(invalid(
                "default_graph_depth",
                self.default_graph_depth.to_string(),
                "must not exceed max_graph_depth",
            ));
        }
        if let Some(lmdb) = &self.lmdb {
            if lmdb.max_size_mb == 0 {
                return Err(invalid(
                    "lmdb.max_size_mb",
                    lmdb.max_size_mb.to_string(),
                    "must be greater than zero",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CatalogConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_cache_timeout_rejected() {
        let mut config = CatalogConfig::default();
        config.cache.operation_timeout = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(CatalogError::Config(ConfigError::InvalidValue { field, .. })) if field == "cache.operation_timeout"
        ));
    }

    #[test]
    fn test_depth_bounds_rejected() {
        let config = CatalogConfig {
            default_graph_depth: 9,
            max_graph_depth: 3,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CatalogError::Config(ConfigError::InvalidValue { field, .. })) if field == "default_graph_depth"
        ));
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let config = CatalogConfig {
            max_page_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any default depth above the maximum is rejected.
        #[test]
        fn prop_config_rejects_default_depth_above_max(max in 0u32..50, extra in 1u32..50) {
            let config = CatalogConfig {
                default_graph_depth: max + extra,
                max_graph_depth: max,
                ..Default::default()
            };
            prop_assert!(config.validate().is_err());
        }

        /// Any non-zero timeouts with consistent depths validate.
        #[test]
        fn prop_config_accepts_consistent_settings(
            timeout_ms in 1u64..10_000,
            depth in 0u32..10,
            page in 1u32..1000,
        ) {
            let mut config = CatalogConfig {
                repository_timeout: Duration::from_millis(timeout_ms),
                default_graph_depth: depth,
                max_graph_depth: depth + 1,
                max_page_size: page,
                ..Default::default()
            };
            config.cache.operation_timeout = Duration::from_millis(timeout_ms);
            prop_assert!(config.validate().is_ok());
        }
    }
}
