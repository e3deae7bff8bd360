//! Async repository traits for the relational source of truth.
//!
//! One trait per entity family. Implementations are injected into the engine
//! as `Arc<dyn ...>` handles; the in-memory [`crate::InMemoryRepository`] implements
//! all of them.

use ::async_trait::async_trait;
use catalog_core::{
    CatalogResult, DependentUsage, EntityId, ListQuery, NodeKind, NodePatch, Page, ParentRef,
    Product, Role, Timestamp, TreeNode,
};
use serde::{Deserialize, Serialize};

/// Natural identifier of a tree node, unique among live siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NaturalKey {
    Name,
    Slug,
}

impl NaturalKey {
    pub fn field_name(&self) -> &'static str {
        match self {
            NaturalKey::Name => "name",
            NaturalKey::Slug => "slug",
        }
    }

    /// Read this key's value off a node.
    pub fn value_of<'a>(&self, node: &'a TreeNode) -> &'a str {
        match self {
            NaturalKey::Name => &node.name,
            NaturalKey::Slug => &node.slug,
        }
    }
}

/// Result of a delete that is refused while dependents reference the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardedDelete<T> {
    Applied(T),
    Blocked(DependentUsage),
}

/// Async repository for category / sub-category rows.
#[async_trait]
pub trait TreeRepository: Send + Sync {
    /// Get a node by ID, deleted or not.
    async fn node_find_by_id(&self, id: EntityId) -> CatalogResult<Option<TreeNode>>;

    /// All nodes directly under `parent`, ordered by `(position, created_at)`.
    async fn node_find_by_scope(
        &self,
        parent: ParentRef,
        include_deleted: bool,
    ) -> CatalogResult<Vec<TreeNode>>;

    /// Find a live node under `parent` whose normalized name or slug equals
    /// `normalized_value`, ignoring `exclude_id`.
    async fn node_find_live_by_natural_key(
        &self,
        parent: ParentRef,
        key: NaturalKey,
        normalized_value: &str,
        exclude_id: Option<EntityId>,
    ) -> CatalogResult<Option<TreeNode>>;

    /// Number of live nodes directly under `parent`.
    async fn node_count_live_in_scope(&self, parent: ParentRef) -> CatalogResult<u64>;

    /// Count products and child nodes referencing `id`.
    async fn node_count_dependents(&self, id: EntityId) -> CatalogResult<DependentUsage>;

    /// Insert a new node. Fails with `UniqueViolation` if a live sibling
    /// already holds the name or slug, and with `NotFound` if the parent
    /// is missing or deleted.
    async fn node_insert(&self, node: &TreeNode) -> CatalogResult<()>;

    /// Write the supplied fields and return the updated row.
    async fn node_update_fields(&self, id: EntityId, patch: &NodePatch)
        -> CatalogResult<TreeNode>;

    /// Set positions for a batch of siblings as one all-or-nothing unit.
    async fn node_apply_positions(
        &self,
        parent: ParentRef,
        positions: &[(EntityId, u32)],
    ) -> CatalogResult<Vec<TreeNode>>;

    /// Stamp `deleted_at` on `id` unless a live product or live child
    /// references it. Counting and writing happen in one transaction.
    async fn node_soft_delete_if_unused(
        &self,
        id: EntityId,
        deleted_at: Timestamp,
    ) -> CatalogResult<GuardedDelete<TreeNode>>;

    /// Remove the row unless anything, live or deleted, references it.
    /// `Applied(false)` means the row was already gone.
    async fn node_delete_if_unused(&self, id: EntityId) -> CatalogResult<GuardedDelete<bool>>;

    /// Filtered, sorted, paginated listing of live nodes of one kind.
    async fn node_list(&self, kind: NodeKind, query: &ListQuery) -> CatalogResult<Page<TreeNode>>;
}

/// Async repository for products.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn product_insert(&self, product: &Product) -> CatalogResult<()>;

    async fn product_find_by_id(&self, id: EntityId) -> CatalogResult<Option<Product>>;

    /// Fetch every existing product among `ids`, in the order requested.
    async fn product_find_by_ids(&self, ids: &[EntityId]) -> CatalogResult<Vec<Product>>;
}

/// Async repository for roles and their grants.
#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn role_find_by_id(&self, id: EntityId) -> CatalogResult<Option<Role>>;

    async fn role_upsert(&self, role: &Role) -> CatalogResult<()>;
}
