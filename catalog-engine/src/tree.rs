//! Category / sub-category tree lifecycle.
//!
//! Nodes live in parent scopes (top level, or under another node). Within a
//! scope, live siblings have unique names, unique slugs and unique positions.
//! The repository is authoritative for every precondition that guards a
//! write; the cache is consulted first only for duplicate detection and for
//! plain reads.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use catalog_core::{
    new_entity_id, normalize_identifier, CatalogConfig, CatalogError, CatalogResult,
    ConflictError, CreateNodeInput, EntityId, ListQuery, NodeKind, NodePatch, NodeUpdate, Page,
    ParentRef, ScopeTarget, StorageError, TreeBranch, TreeNode, ValidationError,
};
use catalog_storage::{CacheCoordinator, CacheKey, GuardedDelete, NaturalKey, TreeRepository};
use chrono::Utc;
use tracing::{debug, info};

use crate::repo_call;
use crate::scope_lock::ScopeLocks;

type BranchFuture<'a> = Pin<Box<dyn Future<Output = CatalogResult<TreeBranch>> + Send + 'a>>;

fn not_found(kind: NodeKind, id: EntityId) -> CatalogError {
    CatalogError::not_found(kind.entity_kind(), id)
}

fn invalid_state(node: &TreeNode, reason: impl Into<String>) -> CatalogError {
    ConflictError::InvalidState {
        kind: node.entity_kind(),
        id: node.id,
        reason: reason.into(),
    }
    .into()
}

/// The repository's unique constraint is the backstop for racing creators.
fn map_unique_violation(err: CatalogError, parent: ParentRef) -> CatalogError {
    match err {
        CatalogError::Storage(StorageError::UniqueViolation { kind, field, value }) => {
            ConflictError::Duplicate {
                kind,
                field,
                value,
                scope: parent.scope_key(),
            }
            .into()
        }
        other => other,
    }
}

/// Position after the last live sibling. Equals the sibling count while the
/// scope is dense.
fn next_position(siblings: &[TreeNode]) -> u32 {
    siblings
        .iter()
        .map(|n| n.position + 1)
        .max()
        .unwrap_or(0)
        .max(siblings.len() as u32)
}

/// Manages creation, ordering and deletion of tree nodes.
pub struct TreeLifecycleManager {
    repository: Arc<dyn TreeRepository>,
    cache: Arc<CacheCoordinator>,
    locks: ScopeLocks,
    repository_timeout: Duration,
    max_page_size: u32,
}

impl TreeLifecycleManager {
    pub fn new(
        repository: Arc<dyn TreeRepository>,
        cache: Arc<CacheCoordinator>,
        config: &CatalogConfig,
    ) -> Self {
        Self {
            repository,
            cache,
            locks: ScopeLocks::new(),
            repository_timeout: config.repository_timeout,
            max_page_size: config.max_page_size,
        }
    }

    // ------------------------------------------------------------------------
    // Repository and cache helpers
    // ------------------------------------------------------------------------

    /// Read a node straight from the repository, ignoring the cache.
    async fn authoritative(&self, kind: NodeKind, id: EntityId) -> CatalogResult<TreeNode> {
        repo_call(
            "node_find_by_id",
            self.repository_timeout,
            self.repository.node_find_by_id(id),
        )
        .await?
        .filter(|node| node.kind == kind)
        .ok_or_else(|| not_found(kind, id))
    }

    /// Cache-first read of a node, deleted or not.
    async fn snapshot(&self, kind: NodeKind, id: EntityId) -> CatalogResult<Option<TreeNode>> {
        let key = CacheKey::entity(kind.entity_kind(), id);
        let ttl = Some(self.cache.settings().entity_ttl);
        self.cache
            .get_or_load_optional(&key, ttl, || async move {
                let node = repo_call(
                    "node_find_by_id",
                    self.repository_timeout,
                    self.repository.node_find_by_id(id),
                )
                .await?;
                Ok(node.filter(|node| node.kind == kind))
            })
            .await
    }

    async fn live_siblings(&self, parent: ParentRef) -> CatalogResult<Vec<TreeNode>> {
        repo_call(
            "node_find_by_scope",
            self.repository_timeout,
            self.repository.node_find_by_scope(parent, false),
        )
        .await
    }

    async fn cache_node(&self, node: &TreeNode) {
        let key = CacheKey::entity(node.entity_kind(), node.id);
        self.cache
            .put(&key, node, Some(self.cache.settings().entity_ttl))
            .await;
    }

    async fn flag_node(&self, node: &TreeNode) {
        let kind = node.entity_kind();
        self.cache
            .mark_exists(kind, NaturalKey::Name, &node.parent, &node.name)
            .await;
        self.cache
            .mark_exists(kind, NaturalKey::Slug, &node.parent, &node.slug)
            .await;
    }

    async fn unflag_node(&self, node: &TreeNode) {
        let kind = node.entity_kind();
        self.cache
            .clear_exists(kind, NaturalKey::Name, &node.parent, &node.name)
            .await;
        self.cache
            .clear_exists(kind, NaturalKey::Slug, &node.parent, &node.slug)
            .await;
    }

    async fn invalidate_lists(&self, kind: NodeKind) {
        self.cache.invalidate_lists(kind.entity_kind()).await;
    }

    /// Fail with `Conflict` if a live sibling other than `exclude` holds
    /// `value` for `key`. A cached flag short-circuits; a cache miss falls
    /// through to the repository.
    async fn ensure_unique(
        &self,
        kind: NodeKind,
        parent: ParentRef,
        key: NaturalKey,
        value: &str,
        exclude: Option<EntityId>,
    ) -> CatalogResult<()> {
        let entity_kind = kind.entity_kind();
        let normalized = normalize_identifier(value);
        let duplicate = || -> CatalogError {
            ConflictError::Duplicate {
                kind: entity_kind,
                field: key.field_name().to_string(),
                value: normalized.clone(),
                scope: parent.scope_key(),
            }
            .into()
        };

        if self
            .cache
            .existence_check(entity_kind, key, &parent, value)
            .await
        {
            debug!(scope = %parent, field = key.field_name(), value = %normalized, "duplicate from existence flag");
            return Err(duplicate());
        }

        let existing = repo_call(
            "node_find_live_by_natural_key",
            self.repository_timeout,
            self.repository
                .node_find_live_by_natural_key(parent, key, &normalized, exclude),
        )
        .await?;

        if existing.is_some() {
            self.cache.mark_exists(entity_kind, key, &parent, value).await;
            return Err(duplicate());
        }
        Ok(())
    }

    /// Resolve a scope target into a parent reference, checking that the
    /// parent exists, is live and has the kind the discriminator names.
    async fn resolve_parent(&self, target: ScopeTarget) -> CatalogResult<ParentRef> {
        let (parent_id, expected, field) = match target {
            ScopeTarget::TopLevel => return Ok(ParentRef::TopLevel),
            ScopeTarget::UnderCategory(id) => (id, NodeKind::Category, "categoryId"),
            ScopeTarget::UnderSubCategory(id) => (id, NodeKind::SubCategory, "subCategoryId"),
        };

        let parent = repo_call(
            "node_find_by_id",
            self.repository_timeout,
            self.repository.node_find_by_id(parent_id),
        )
        .await?
        .filter(|node| !node.is_deleted())
        .ok_or_else(|| not_found(expected, parent_id))?;

        if parent.kind != expected {
            return Err(ValidationError::InvalidValue {
                field: field.to_string(),
                reason: format!("{} is not a {}", parent_id, expected.entity_kind()),
            }
            .into());
        }
        Ok(ParentRef::Node(parent.id))
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Create a node at the end of its scope.
    pub async fn create(&self, input: CreateNodeInput) -> CatalogResult<TreeNode> {
        let target = input.scope.resolve()?;
        input.validate()?;
        let kind = target.child_kind();
        let name = input.name.trim().to_string();
        let slug = normalize_identifier(&input.slug);

        // Deletes of the parent take this same lock, so the parent stays
        // live until the insert lands.
        let _guard = self.locks.acquire(target.parent_ref()).await;
        let parent = self.resolve_parent(target).await?;
        self.ensure_unique(kind, parent, NaturalKey::Name, &name, None)
            .await?;
        self.ensure_unique(kind, parent, NaturalKey::Slug, &slug, None)
            .await?;

        let siblings = self.live_siblings(parent).await?;
        let now = Utc::now();
        let node = TreeNode {
            id: new_entity_id(),
            kind,
            name,
            slug,
            description: input.description,
            thumbnail_ref: input.thumbnail_ref,
            position: next_position(&siblings),
            parent,
            created_by: input.creator,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        repo_call(
            "node_insert",
            self.repository_timeout,
            self.repository.node_insert(&node),
        )
        .await
        .map_err(|e| map_unique_violation(e, parent))?;

        self.cache_node(&node).await;
        self.flag_node(&node).await;
        self.invalidate_lists(kind).await;

        info!(node_id = %node.id, kind = %node.entity_kind(), scope = %parent, position = node.position, "created node");
        Ok(node)
    }

    /// Write the supplied fields. Renames are re-checked for uniqueness.
    pub async fn update(
        &self,
        kind: NodeKind,
        id: EntityId,
        update: NodeUpdate,
    ) -> CatalogResult<TreeNode> {
        update.validate()?;
        let current = self.authoritative(kind, id).await?;
        if current.is_deleted() {
            return Err(not_found(kind, id));
        }
        if update.is_empty() {
            debug!(node_id = %id, "empty update, nothing written");
            return Ok(current);
        }

        let patch = NodePatch::from(update);
        let renamed = patch
            .name
            .as_ref()
            .filter(|name| normalize_identifier(name) != normalize_identifier(&current.name));
        let reslugged = patch
            .slug
            .as_ref()
            .filter(|slug| slug.as_str() != normalize_identifier(&current.slug));

        if let Some(name) = renamed {
            self.ensure_unique(kind, current.parent, NaturalKey::Name, name, Some(id))
                .await?;
        }
        if let Some(slug) = reslugged {
            self.ensure_unique(kind, current.parent, NaturalKey::Slug, slug, Some(id))
                .await?;
        }
        let (renamed, reslugged) = (renamed.is_some(), reslugged.is_some());

        let updated = repo_call(
            "node_update_fields",
            self.repository_timeout,
            self.repository.node_update_fields(id, &patch),
        )
        .await
        .map_err(|e| map_unique_violation(e, current.parent))?;

        if renamed {
            self.cache
                .clear_exists(kind.entity_kind(), NaturalKey::Name, &current.parent, &current.name)
                .await;
        }
        if reslugged {
            self.cache
                .clear_exists(kind.entity_kind(), NaturalKey::Slug, &current.parent, &current.slug)
                .await;
        }
        self.cache_node(&updated).await;
        self.flag_node(&updated).await;
        self.invalidate_lists(kind).await;

        info!(node_id = %id, renamed, reslugged, "updated node");
        Ok(updated)
    }

    /// Move a node to `new_position` within its scope and renumber the live
    /// siblings densely. Returns the scope in its new order.
    pub async fn reposition(
        &self,
        kind: NodeKind,
        id: EntityId,
        new_position: u32,
    ) -> CatalogResult<Vec<TreeNode>> {
        let node = self.authoritative(kind, id).await?;
        if node.is_deleted() {
            return Err(not_found(kind, id));
        }
        let parent = node.parent;

        let _guard = self.locks.acquire(parent).await;
        let mut siblings = self.live_siblings(parent).await?;
        let index = siblings
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| not_found(kind, id))?;
        if new_position as usize >= siblings.len() {
            return Err(ValidationError::InvalidValue {
                field: "position".to_string(),
                reason: format!("must be between 0 and {}", siblings.len() - 1),
            }
            .into());
        }

        let moved = siblings.remove(index);
        siblings.insert(new_position as usize, moved);

        let batch: Vec<(EntityId, u32)> = siblings
            .iter()
            .enumerate()
            .filter(|(i, n)| n.position != *i as u32)
            .map(|(i, n)| (n.id, i as u32))
            .collect();
        if batch.is_empty() {
            return Ok(siblings);
        }

        let written = repo_call(
            "node_apply_positions",
            self.repository_timeout,
            self.repository.node_apply_positions(parent, &batch),
        )
        .await?;

        for sibling in siblings.iter_mut() {
            if let Some(fresh) = written.iter().find(|w| w.id == sibling.id) {
                *sibling = fresh.clone();
            }
        }
        for fresh in &written {
            self.cache_node(fresh).await;
        }
        self.invalidate_lists(kind).await;

        info!(node_id = %id, scope = %parent, position = new_position, renumbered = written.len(), "repositioned node");
        Ok(siblings)
    }

    /// Mark a live node deleted. Blocked while live dependents reference it.
    pub async fn soft_delete(&self, kind: NodeKind, id: EntityId) -> CatalogResult<TreeNode> {
        let _guard = self.locks.acquire(ParentRef::Node(id)).await;
        let node = self.authoritative(kind, id).await?;
        if node.is_deleted() {
            return Err(invalid_state(&node, "already deleted"));
        }

        let outcome = repo_call(
            "node_soft_delete_if_unused",
            self.repository_timeout,
            self.repository.node_soft_delete_if_unused(id, Utc::now()),
        )
        .await?;
        let deleted = match outcome {
            GuardedDelete::Applied(deleted) => deleted,
            GuardedDelete::Blocked(usage) => {
                return Err(ConflictError::InUse {
                    kind: node.entity_kind(),
                    id,
                    usage,
                }
                .into())
            }
        };

        self.cache_node(&deleted).await;
        self.unflag_node(&deleted).await;
        self.invalidate_lists(kind).await;

        info!(node_id = %id, kind = %node.entity_kind(), "soft-deleted node");
        Ok(deleted)
    }

    /// Bring a soft-deleted node back, appended to the end of its scope.
    pub async fn restore(&self, kind: NodeKind, id: EntityId) -> CatalogResult<TreeNode> {
        let node = self.authoritative(kind, id).await?;
        if !node.is_deleted() {
            return Err(invalid_state(&node, "not deleted"));
        }

        let _guard = self.locks.acquire(node.parent).await;
        if let ParentRef::Node(parent_id) = node.parent {
            let parent = repo_call(
                "node_find_by_id",
                self.repository_timeout,
                self.repository.node_find_by_id(parent_id),
            )
            .await?;
            if !parent.is_some_and(|p| !p.is_deleted()) {
                return Err(invalid_state(&node, format!("parent {parent_id} is deleted")));
            }
        }

        self.ensure_unique(kind, node.parent, NaturalKey::Name, &node.name, Some(id))
            .await?;
        self.ensure_unique(kind, node.parent, NaturalKey::Slug, &node.slug, Some(id))
            .await?;

        let siblings = self.live_siblings(node.parent).await?;
        let patch = NodePatch {
            position: Some(next_position(&siblings)),
            deleted_at: Some(None),
            ..Default::default()
        };
        let restored = repo_call(
            "node_update_fields",
            self.repository_timeout,
            self.repository.node_update_fields(id, &patch),
        )
        .await
        .map_err(|e| map_unique_violation(e, node.parent))?;

        self.cache_node(&restored).await;
        self.flag_node(&restored).await;
        self.invalidate_lists(kind).await;

        info!(node_id = %id, position = restored.position, "restored node");
        Ok(restored)
    }

    /// Remove a node row. Blocked while anything, live or deleted, still
    /// references it.
    pub async fn hard_delete(&self, kind: NodeKind, id: EntityId) -> CatalogResult<()> {
        let _guard = self.locks.acquire(ParentRef::Node(id)).await;
        let node = self.authoritative(kind, id).await?;

        let outcome = repo_call(
            "node_delete_if_unused",
            self.repository_timeout,
            self.repository.node_delete_if_unused(id),
        )
        .await?;
        match outcome {
            GuardedDelete::Applied(true) => {}
            GuardedDelete::Applied(false) => return Err(not_found(kind, id)),
            GuardedDelete::Blocked(usage) => {
                return Err(ConflictError::InUse {
                    kind: node.entity_kind(),
                    id,
                    usage,
                }
                .into())
            }
        }

        self.cache
            .invalidate(&CacheKey::entity(node.entity_kind(), id))
            .await;
        self.unflag_node(&node).await;
        self.invalidate_lists(kind).await;

        info!(node_id = %id, kind = %node.entity_kind(), "hard-deleted node");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// A live node. Soft-deleted nodes read as `NotFound`.
    pub async fn get(&self, kind: NodeKind, id: EntityId) -> CatalogResult<TreeNode> {
        self.snapshot(kind, id)
            .await?
            .filter(|node| !node.is_deleted())
            .ok_or_else(|| not_found(kind, id))
    }

    pub async fn get_including_deleted(
        &self,
        kind: NodeKind,
        id: EntityId,
    ) -> CatalogResult<TreeNode> {
        self.snapshot(kind, id)
            .await?
            .ok_or_else(|| not_found(kind, id))
    }

    /// Live children of `parent`, ordered by `(position, created_at)`.
    pub async fn children(&self, parent: ParentRef) -> CatalogResult<Vec<TreeNode>> {
        if let ParentRef::Node(parent_id) = parent {
            let exists = repo_call(
                "node_find_by_id",
                self.repository_timeout,
                self.repository.node_find_by_id(parent_id),
            )
            .await?
            .is_some_and(|node| !node.is_deleted());
            if !exists {
                return Err(CatalogError::not_found(
                    catalog_core::EntityKind::Category,
                    parent_id,
                ));
            }
        }
        self.live_siblings(parent).await
    }

    /// A live node and its live descendants, `max_depth` levels deep.
    pub async fn subtree(
        &self,
        kind: NodeKind,
        id: EntityId,
        max_depth: u32,
    ) -> CatalogResult<TreeBranch> {
        let root = self.get(kind, id).await?;
        self.branch(root, max_depth).await
    }

    fn branch(&self, node: TreeNode, depth_left: u32) -> BranchFuture<'_> {
        Box::pin(async move {
            if depth_left == 0 {
                return Ok(TreeBranch::leaf(node));
            }
            let children = self.live_siblings(ParentRef::Node(node.id)).await?;
            let mut branches = Vec::with_capacity(children.len());
            for child in children {
                branches.push(self.branch(child, depth_left - 1).await?);
            }
            Ok(TreeBranch {
                node,
                children: branches,
            })
        })
    }

    /// Paginated listing of live nodes of one kind, cached per query.
    pub async fn list(&self, kind: NodeKind, query: ListQuery) -> CatalogResult<Page<TreeNode>> {
        if query.limit == 0 {
            return Err(ValidationError::InvalidValue {
                field: "limit".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        let query = ListQuery {
            page: query.page.max(1),
            limit: query.limit.min(self.max_page_size),
            ..query
        };

        let key = CacheKey::list(kind.entity_kind(), &query);
        let ttl = Some(self.cache.settings().list_ttl);
        self.cache
            .get_or_load(&key, ttl, || {
                repo_call(
                    "node_list",
                    self.repository_timeout,
                    self.repository.node_list(kind, &query),
                )
            })
            .await
    }
}
