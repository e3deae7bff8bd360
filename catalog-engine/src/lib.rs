//! Catalog Engine - Permissions, Category Tree and Product Graph
//!
//! Provides the request-scoped core of the catalog services:
//! - Permission resolution (personal overrides, OR-merged role grants)
//! - Category / sub-category lifecycle with scoped uniqueness and ordering
//! - Cycle-safe upsell / cross-sell materialization
//! - The [`CatalogService`] entry point returning discriminated outcomes

pub mod graph;
pub mod permissions;
pub mod scope_lock;
pub mod service;
pub mod telemetry;
pub mod tree;

pub use graph::GraphMaterializer;
pub use permissions::{merge_role_grants, PermissionResolver};
pub use scope_lock::ScopeLocks;
pub use service::{cache_store_for, CatalogService};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use tree::TreeLifecycleManager;

use std::future::Future;
use std::time::Duration;

use catalog_core::{CatalogResult, StorageError};

/// Run one repository call under `timeout`; expiry becomes a storage error.
pub(crate) async fn repo_call<T, F>(
    operation: &'static str,
    timeout: Duration,
    call: F,
) -> CatalogResult<T>
where
    F: Future<Output = CatalogResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout {
            operation: operation.to_string(),
            timeout,
        }
        .into()),
    }
}
