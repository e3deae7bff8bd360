//! Catalog Storage - Repository Traits, Mock Implementation and Side-Cache
//!
//! Defines the repository abstraction over the relational source of truth,
//! an in-memory implementation of it, and the cache layer that sits beside it.

pub mod cache;
pub mod repository;

pub use cache::{
    CacheCoordinator, CacheKey, CacheResult, CacheStats, CacheStore, CoordinatorStats,
    InMemoryCacheStore, LmdbCacheStore,
};
pub use repository::{
    GuardedDelete, NaturalKey, ProductRepository, RoleRepository, TreeRepository,
};

use ::async_trait::async_trait;
use catalog_core::{
    normalize_identifier, CatalogResult, DependentUsage, EntityId, EntityKind, ListQuery,
    NodeKind, NodePatch, Page, ParentRef, Product, Role, SortField, SortOrder, StorageError,
    Timestamp, TreeNode,
};
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

// ============================================================================
// IN-MEMORY REPOSITORY
// ============================================================================

/// In-memory storage implementing every repository trait.
///
/// Enforces the live-sibling unique constraint on name and slug, and applies
/// position batches under a single write lock.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    nodes: Arc<RwLock<HashMap<EntityId, TreeNode>>>,
    products: Arc<RwLock<HashMap<EntityId, Product>>>,
    roles: Arc<RwLock<HashMap<EntityId, Role>>>,
    fail_position_batches: AtomicBool,
}

fn read<T>(lock: &RwLock<T>) -> CatalogResult<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| StorageError::LockPoisoned.into())
}

fn write<T>(lock: &RwLock<T>) -> CatalogResult<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| StorageError::LockPoisoned.into())
}

fn sibling_order(a: &TreeNode, b: &TreeNode) -> Ordering {
    a.position
        .cmp(&b.position)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

fn conflicting_sibling<'a>(
    nodes: &'a HashMap<EntityId, TreeNode>,
    parent: ParentRef,
    key: NaturalKey,
    normalized_value: &str,
    exclude_id: Option<EntityId>,
) -> Option<&'a TreeNode> {
    nodes.values().find(|n| {
        n.parent == parent
            && !n.is_deleted()
            && Some(n.id) != exclude_id
            && normalize_identifier(key.value_of(n)) == normalized_value
    })
}

fn check_unique(
    nodes: &HashMap<EntityId, TreeNode>,
    candidate: &TreeNode,
) -> CatalogResult<()> {
    for key in [NaturalKey::Name, NaturalKey::Slug] {
        let value = normalize_identifier(key.value_of(candidate));
        if conflicting_sibling(nodes, candidate.parent, key, &value, Some(candidate.id)).is_some() {
            return Err(StorageError::UniqueViolation {
                kind: candidate.entity_kind(),
                field: key.field_name().to_string(),
                value,
            }
            .into());
        }
    }
    Ok(())
}

/// Products and child nodes referencing `id`.
fn count_dependents(
    nodes: &HashMap<EntityId, TreeNode>,
    products: &HashMap<EntityId, Product>,
    id: EntityId,
) -> DependentUsage {
    let mut usage = DependentUsage::default();
    for child in nodes.values().filter(|n| n.parent == ParentRef::Node(id)) {
        if child.is_deleted() {
            usage.deleted_children += 1;
        } else {
            usage.live_children += 1;
        }
    }
    usage.live_products = products
        .values()
        .filter(|p| !p.is_deleted() && p.category_ids.contains(&id))
        .count() as u64;
    usage
}

fn compare_for_listing(a: &TreeNode, b: &TreeNode, field: SortField) -> Ordering {
    let primary = match field {
        SortField::Name => normalize_identifier(&a.name).cmp(&normalize_identifier(&b.name)),
        SortField::Slug => a.slug.cmp(&b.slug),
        SortField::Position => a.position.cmp(&b.position),
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

impl InMemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent position batch fail before anything is applied.
    pub fn fail_position_batches(&self, fail: bool) {
        self.fail_position_batches.store(fail, AtomicOrdering::SeqCst);
    }

    /// Clear all stored data.
    pub fn clear(&self) -> CatalogResult<()> {
        write(&self.nodes)?.clear();
        write(&self.products)?.clear();
        write(&self.roles)?.clear();
        Ok(())
    }

    /// Get count of stored nodes, deleted ones included.
    pub fn node_count(&self) -> CatalogResult<usize> {
        Ok(read(&self.nodes)?.len())
    }

    /// Get count of stored products.
    pub fn product_count(&self) -> CatalogResult<usize> {
        Ok(read(&self.products)?.len())
    }
}

#[async_trait]
impl TreeRepository for InMemoryRepository {
    async fn node_find_by_id(&self, id: EntityId) -> CatalogResult<Option<TreeNode>> {
        Ok(read(&self.nodes)?.get(&id).cloned())
    }

    async fn node_find_by_scope(
        &self,
        parent: ParentRef,
        include_deleted: bool,
    ) -> CatalogResult<Vec<TreeNode>> {
        let nodes = read(&self.nodes)?;
        let mut siblings: Vec<TreeNode> = nodes
            .values()
            .filter(|n| n.parent == parent && (include_deleted || !n.is_deleted()))
            .cloned()
            .collect();
        siblings.sort_by(sibling_order);
        Ok(siblings)
    }

    async fn node_find_live_by_natural_key(
        &self,
        parent: ParentRef,
        key: NaturalKey,
        normalized_value: &str,
        exclude_id: Option<EntityId>,
    ) -> CatalogResult<Option<TreeNode>> {
        let nodes = read(&self.nodes)?;
        Ok(conflicting_sibling(&nodes, parent, key, normalized_value, exclude_id).cloned())
    }

    async fn node_count_live_in_scope(&self, parent: ParentRef) -> CatalogResult<u64> {
        let nodes = read(&self.nodes)?;
        Ok(nodes
            .values()
            .filter(|n| n.parent == parent && !n.is_deleted())
            .count() as u64)
    }

    async fn node_count_dependents(&self, id: EntityId) -> CatalogResult<DependentUsage> {
        let nodes = read(&self.nodes)?;
        let products = read(&self.products)?;
        Ok(count_dependents(&nodes, &products, id))
    }

    async fn node_insert(&self, node: &TreeNode) -> CatalogResult<()> {
        let mut nodes = write(&self.nodes)?;
        if nodes.contains_key(&node.id) {
            return Err(StorageError::InsertFailed {
                kind: node.entity_kind(),
                reason: "already exists".to_string(),
            }
            .into());
        }
        if let ParentRef::Node(parent_id) = node.parent {
            let parent_live = nodes.get(&parent_id).is_some_and(|p| !p.is_deleted());
            if !parent_live {
                return Err(StorageError::NotFound {
                    kind: EntityKind::Category,
                    id: parent_id,
                }
                .into());
            }
        }
        if !node.is_deleted() {
            check_unique(&nodes, node)?;
        }
        nodes.insert(node.id, node.clone());
        Ok(())
    }

    async fn node_update_fields(
        &self,
        id: EntityId,
        patch: &NodePatch,
    ) -> CatalogResult<TreeNode> {
        let mut nodes = write(&self.nodes)?;
        let mut updated = nodes
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound {
                kind: EntityKind::Category,
                id,
            })?;

        if let Some(name) = &patch.name {
            updated.name = name.clone();
        }
        if let Some(slug) = &patch.slug {
            updated.slug = slug.clone();
        }
        if let Some(description) = &patch.description {
            updated.description = Some(description.clone());
        }
        if let Some(thumbnail_ref) = &patch.thumbnail_ref {
            updated.thumbnail_ref = Some(thumbnail_ref.clone());
        }
        if let Some(position) = patch.position {
            updated.position = position;
        }
        if let Some(deleted_at) = patch.deleted_at {
            updated.deleted_at = deleted_at;
        }
        if !updated.is_deleted() {
            check_unique(&nodes, &updated)?;
        }
        updated.updated_at = Utc::now();

        nodes.insert(id, updated.clone());
        Ok(updated)
    }

    async fn node_apply_positions(
        &self,
        parent: ParentRef,
        positions: &[(EntityId, u32)],
    ) -> CatalogResult<Vec<TreeNode>> {
        let mut nodes = write(&self.nodes)?;

        if self.fail_position_batches.load(AtomicOrdering::SeqCst) {
            return Err(StorageError::TransactionFailed {
                reason: "position batch rejected".to_string(),
            }
            .into());
        }

        let requested: HashMap<EntityId, u32> = positions.iter().copied().collect();
        for id in requested.keys() {
            match nodes.get(id) {
                Some(node) if node.parent == parent && !node.is_deleted() => {}
                _ => {
                    return Err(StorageError::TransactionFailed {
                        reason: format!("node {id} is not a live member of scope {parent}"),
                    }
                    .into())
                }
            }
        }

        // Positions after the batch must stay unique among live siblings.
        let mut seen = HashSet::new();
        for node in nodes
            .values()
            .filter(|n| n.parent == parent && !n.is_deleted())
        {
            let position = requested.get(&node.id).copied().unwrap_or(node.position);
            if !seen.insert(position) {
                return Err(StorageError::TransactionFailed {
                    reason: format!("duplicate position {position} in scope {parent}"),
                }
                .into());
            }
        }

        let now = Utc::now();
        let mut updated = Vec::with_capacity(requested.len());
        for (id, position) in positions {
            if let Some(node) = nodes.get_mut(id) {
                if node.position != *position {
                    node.position = *position;
                    node.updated_at = now;
                }
                updated.push(node.clone());
            }
        }
        updated.sort_by(sibling_order);
        Ok(updated)
    }

    // Both guarded deletes take the node table before the product table,
    // so a product insert cannot land between the count and the write.
    async fn node_soft_delete_if_unused(
        &self,
        id: EntityId,
        deleted_at: Timestamp,
    ) -> CatalogResult<GuardedDelete<TreeNode>> {
        let mut nodes = write(&self.nodes)?;
        let products = read(&self.products)?;
        let usage = count_dependents(&nodes, &products, id);
        if usage.blocking_total() > 0 {
            return Ok(GuardedDelete::Blocked(usage));
        }

        let node = nodes.get_mut(&id).ok_or(StorageError::NotFound {
            kind: EntityKind::Category,
            id,
        })?;
        node.deleted_at = Some(deleted_at);
        node.updated_at = Utc::now();
        Ok(GuardedDelete::Applied(node.clone()))
    }

    async fn node_delete_if_unused(&self, id: EntityId) -> CatalogResult<GuardedDelete<bool>> {
        let mut nodes = write(&self.nodes)?;
        let products = read(&self.products)?;
        let usage = count_dependents(&nodes, &products, id);
        if usage.hard_delete_total() > 0 {
            return Ok(GuardedDelete::Blocked(usage));
        }
        Ok(GuardedDelete::Applied(nodes.remove(&id).is_some()))
    }

    async fn node_list(&self, kind: NodeKind, query: &ListQuery) -> CatalogResult<Page<TreeNode>> {
        let nodes = read(&self.nodes)?;
        let search = query.normalized_search();
        let mut matching: Vec<TreeNode> = nodes
            .values()
            .filter(|n| n.kind == kind && !n.is_deleted())
            .filter(|n| {
                search.is_empty()
                    || normalize_identifier(&n.name).contains(&search)
                    || n.slug.contains(&search)
            })
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            let ordering = compare_for_listing(a, b, query.sort_by);
            match query.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(query.offset())
            .take(query.limit as usize)
            .collect();

        Ok(Page {
            items,
            total,
            page: query.page.max(1),
            limit: query.limit,
        })
    }
}

#[async_trait]
impl ProductRepository for InMemoryRepository {
    async fn product_insert(&self, product: &Product) -> CatalogResult<()> {
        let mut products = write(&self.products)?;
        if products.contains_key(&product.id) {
            return Err(StorageError::InsertFailed {
                kind: EntityKind::Product,
                reason: "already exists".to_string(),
            }
            .into());
        }
        products.insert(product.id, product.clone());
        Ok(())
    }

    async fn product_find_by_id(&self, id: EntityId) -> CatalogResult<Option<Product>> {
        Ok(read(&self.products)?.get(&id).cloned())
    }

    async fn product_find_by_ids(&self, ids: &[EntityId]) -> CatalogResult<Vec<Product>> {
        let products = read(&self.products)?;
        Ok(ids.iter().filter_map(|id| products.get(id).cloned()).collect())
    }
}

#[async_trait]
impl RoleRepository for InMemoryRepository {
    async fn role_find_by_id(&self, id: EntityId) -> CatalogResult<Option<Role>> {
        Ok(read(&self.roles)?.get(&id).cloned())
    }

    async fn role_upsert(&self, role: &Role) -> CatalogResult<()> {
        write(&self.roles)?.insert(role.id, role.clone());
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
