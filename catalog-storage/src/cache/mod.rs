//! Side-cache layer.
//!
//! The relational repository is the source of truth; the cache only speeds
//! reads up. Stores move bytes ([`CacheStore`]), keys follow one fixed scheme
//! ([`CacheKey`]), and the [`CacheCoordinator`] owns serialization, TTLs and
//! the rule that a failing store never fails the operation using it.
//!
//! # Example
//!
//! ```ignore
//! let coordinator = CacheCoordinator::new(Arc::new(InMemoryCacheStore::new()), settings);
//!
//! let node: Option<TreeNode> = coordinator
//!     .get_or_load_optional(&CacheKey::entity(EntityKind::Category, id), ttl, || {
//!         repository.node_find_by_id(id)
//!     })
//!     .await?;
//! ```

pub mod coordinator;
pub mod keys;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod traits;

pub use coordinator::{CacheCoordinator, CoordinatorStats};
pub use keys::CacheKey;
pub use lmdb_backend::LmdbCacheStore;
pub use memory_backend::InMemoryCacheStore;
pub use traits::{CacheResult, CacheStats, CacheStore};
