//! Catalog service entry point.
//!
//! Every operation authenticates, authorizes against the entity kind it
//! touches, delegates to the owning component and folds the result into an
//! [`Outcome`]. Internal failures are logged here and reach the caller only
//! as a generic message.

use std::sync::Arc;

use catalog_core::{
    Action, CatalogConfig, CatalogResult, CreateNodeInput, EntityId, EntityKind, ErrorKind,
    ListQuery, MaterializedProduct, NodeKind, NodeUpdate, Outcome, Page, ParentRef, Principal,
    TreeBranch, TreeNode,
};
use catalog_storage::{
    CacheCoordinator, CacheStore, InMemoryCacheStore, InMemoryRepository, LmdbCacheStore,
    ProductRepository, RoleRepository, TreeRepository,
};
use tracing::{debug, error};

use crate::graph::GraphMaterializer;
use crate::permissions::PermissionResolver;
use crate::tree::TreeLifecycleManager;

fn finish<T>(operation: &'static str, result: CatalogResult<T>) -> Outcome<T> {
    if let Err(err) = &result {
        match err.kind() {
            ErrorKind::Internal => error!(operation, error = %err, "operation failed"),
            kind => debug!(operation, ?kind, error = %err, "operation rejected"),
        }
    }
    result.into()
}

/// Cache store selected by configuration: LMDB when a path is set,
/// in-memory otherwise.
pub fn cache_store_for(config: &CatalogConfig) -> CatalogResult<Arc<dyn CacheStore>> {
    Ok(match &config.lmdb {
        Some(settings) => Arc::new(LmdbCacheStore::from_settings(settings)?),
        None => Arc::new(InMemoryCacheStore::new()),
    })
}

/// Permission-checked facade over the tree and graph components.
pub struct CatalogService {
    permissions: PermissionResolver,
    tree: TreeLifecycleManager,
    graph: GraphMaterializer,
    cache: Arc<CacheCoordinator>,
}

impl CatalogService {
    pub fn new(
        config: &CatalogConfig,
        store: Arc<dyn CacheStore>,
        nodes: Arc<dyn TreeRepository>,
        products: Arc<dyn ProductRepository>,
        roles: Arc<dyn RoleRepository>,
    ) -> CatalogResult<Self> {
        config.validate()?;
        let cache = Arc::new(CacheCoordinator::new(store, config.cache.clone()));
        Ok(Self {
            permissions: PermissionResolver::new(cache.clone(), roles, config.repository_timeout),
            tree: TreeLifecycleManager::new(nodes, cache.clone(), config),
            graph: GraphMaterializer::new(products, cache.clone(), config),
            cache,
        })
    }

    /// Wire every repository seam to one in-memory repository.
    pub fn in_memory(
        config: &CatalogConfig,
        repository: Arc<InMemoryRepository>,
    ) -> CatalogResult<Self> {
        let store = cache_store_for(config)?;
        Self::new(
            config,
            store,
            repository.clone(),
            repository.clone(),
            repository,
        )
    }

    pub fn permissions(&self) -> &PermissionResolver {
        &self.permissions
    }

    pub fn tree(&self) -> &TreeLifecycleManager {
        &self.tree
    }

    pub fn graph(&self) -> &GraphMaterializer {
        &self.graph
    }

    pub fn cache(&self) -> &Arc<CacheCoordinator> {
        &self.cache
    }

    async fn require(
        &self,
        principal: Option<&Principal>,
        kind: EntityKind,
        action: Action,
    ) -> CatalogResult<()> {
        self.permissions
            .require(principal, kind.as_str(), action)
            .await
    }

    pub async fn authorize(
        &self,
        principal: &Principal,
        entity_kind: &str,
        action: Action,
    ) -> Outcome<bool> {
        finish(
            "authorize",
            self.permissions.authorize(principal, entity_kind, action).await,
        )
    }

    pub async fn create_node(
        &self,
        principal: Option<&Principal>,
        input: CreateNodeInput,
    ) -> Outcome<TreeNode> {
        let result = async {
            // An ambiguous selector names no kind to authorize against.
            let kind = input.scope.resolve()?.child_kind().entity_kind();
            self.require(principal, kind, Action::Create).await?;
            self.tree.create(input).await
        }
        .await;
        finish("create_node", result)
    }

    pub async fn update_node(
        &self,
        principal: Option<&Principal>,
        kind: NodeKind,
        id: EntityId,
        update: NodeUpdate,
    ) -> Outcome<TreeNode> {
        let result = async {
            self.require(principal, kind.entity_kind(), Action::Update)
                .await?;
            self.tree.update(kind, id, update).await
        }
        .await;
        finish("update_node", result)
    }

    pub async fn reposition_node(
        &self,
        principal: Option<&Principal>,
        kind: NodeKind,
        id: EntityId,
        position: u32,
    ) -> Outcome<Vec<TreeNode>> {
        let result = async {
            self.require(principal, kind.entity_kind(), Action::Update)
                .await?;
            self.tree.reposition(kind, id, position).await
        }
        .await;
        finish("reposition_node", result)
    }

    pub async fn soft_delete_node(
        &self,
        principal: Option<&Principal>,
        kind: NodeKind,
        id: EntityId,
    ) -> Outcome<TreeNode> {
        let result = async {
            self.require(principal, kind.entity_kind(), Action::Delete)
                .await?;
            self.tree.soft_delete(kind, id).await
        }
        .await;
        finish("soft_delete_node", result)
    }

    pub async fn restore_node(
        &self,
        principal: Option<&Principal>,
        kind: NodeKind,
        id: EntityId,
    ) -> Outcome<TreeNode> {
        let result = async {
            self.require(principal, kind.entity_kind(), Action::Update)
                .await?;
            self.tree.restore(kind, id).await
        }
        .await;
        finish("restore_node", result)
    }

    pub async fn hard_delete_node(
        &self,
        principal: Option<&Principal>,
        kind: NodeKind,
        id: EntityId,
    ) -> Outcome<()> {
        let result = async {
            self.require(principal, kind.entity_kind(), Action::Delete)
                .await?;
            self.tree.hard_delete(kind, id).await
        }
        .await;
        finish("hard_delete_node", result)
    }

    pub async fn get_node(
        &self,
        principal: Option<&Principal>,
        kind: NodeKind,
        id: EntityId,
    ) -> Outcome<TreeNode> {
        let result = async {
            self.require(principal, kind.entity_kind(), Action::Read).await?;
            self.tree.get(kind, id).await
        }
        .await;
        finish("get_node", result)
    }

    /// Admin read that also returns soft-deleted nodes.
    pub async fn get_node_including_deleted(
        &self,
        principal: Option<&Principal>,
        kind: NodeKind,
        id: EntityId,
    ) -> Outcome<TreeNode> {
        let result = async {
            self.require(principal, kind.entity_kind(), Action::Read).await?;
            self.tree.get_including_deleted(kind, id).await
        }
        .await;
        finish("get_node_including_deleted", result)
    }

    pub async fn list_children(
        &self,
        principal: Option<&Principal>,
        parent: ParentRef,
    ) -> Outcome<Vec<TreeNode>> {
        let kind = match parent {
            ParentRef::TopLevel => EntityKind::Category,
            ParentRef::Node(_) => EntityKind::SubCategory,
        };
        let result = async {
            self.require(principal, kind, Action::Read).await?;
            self.tree.children(parent).await
        }
        .await;
        finish("list_children", result)
    }

    pub async fn list_nodes(
        &self,
        principal: Option<&Principal>,
        kind: NodeKind,
        query: ListQuery,
    ) -> Outcome<Page<TreeNode>> {
        let result = async {
            self.require(principal, kind.entity_kind(), Action::Read).await?;
            self.tree.list(kind, query).await
        }
        .await;
        finish("list_nodes", result)
    }

    pub async fn subtree(
        &self,
        principal: Option<&Principal>,
        kind: NodeKind,
        id: EntityId,
        max_depth: u32,
    ) -> Outcome<TreeBranch> {
        let result = async {
            self.require(principal, kind.entity_kind(), Action::Read).await?;
            self.tree.subtree(kind, id, max_depth).await
        }
        .await;
        finish("subtree", result)
    }

    pub async fn materialize(
        &self,
        principal: Option<&Principal>,
        product_id: EntityId,
        depth: Option<u32>,
    ) -> Outcome<MaterializedProduct> {
        let result = async {
            self.require(principal, EntityKind::Product, Action::Read)
                .await?;
            self.graph.materialize_by_id(product_id, depth).await
        }
        .await;
        finish("materialize", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::{new_entity_id, GrantScope, PermissionGrant, Role, RoleRef, ScopeSelector};

    fn grant(kind: &str, create: bool, read: bool, update: bool, delete: bool) -> PermissionGrant {
        PermissionGrant {
            subject_scope: GrantScope::Role,
            entity_kind: kind.to_string(),
            can_create: create,
            can_read: read,
            can_update: update,
            can_delete: delete,
            description: None,
        }
    }

    async fn service_with_role(grants: Vec<PermissionGrant>) -> (CatalogService, Principal) {
        let repository = Arc::new(InMemoryRepository::new());
        let role = Role {
            id: new_entity_id(),
            name: "editor".to_string(),
            grants,
        };
        repository.role_upsert(&role).await.unwrap();
        let principal = Principal::new(new_entity_id()).with_role(RoleRef {
            id: role.id,
            name: role.name.clone(),
        });
        let service = CatalogService::in_memory(&CatalogConfig::default(), repository).unwrap();
        (service, principal)
    }

    fn shoes() -> CreateNodeInput {
        CreateNodeInput {
            scope: ScopeSelector::top_level(),
            name: "Shoes".to_string(),
            slug: "shoes".to_string(),
            description: None,
            thumbnail_ref: None,
            creator: new_entity_id(),
        }
    }

    #[tokio::test]
    async fn test_ambiguous_scope_fails_validation_before_authorization() {
        let (service, principal) =
            service_with_role(vec![grant("category", true, true, true, true)]).await;
        let mut input = shoes();
        input.scope = ScopeSelector {
            category_id: Some(new_entity_id()),
            sub_category_id: Some(new_entity_id()),
        };

        let outcome = service.create_node(Some(&principal), input).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::ValidationFailed));
    }

    #[tokio::test]
    async fn test_missing_principal_is_unauthenticated() {
        let (service, _) = service_with_role(vec![grant("category", true, true, true, true)]).await;
        let outcome = service.create_node(None, shoes()).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Unauthenticated));
        assert_eq!(outcome.status_code(), 401);
    }

    #[tokio::test]
    async fn test_denied_action_is_forbidden() {
        let (service, principal) =
            service_with_role(vec![grant("category", false, true, false, false)]).await;
        let outcome = service.create_node(Some(&principal), shoes()).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Forbidden));
        assert_eq!(service.tree().children(ParentRef::TopLevel).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let (service, principal) =
            service_with_role(vec![grant("category", true, true, false, false)]).await;
        let created = service
            .create_node(Some(&principal), shoes())
            .await
            .into_value()
            .unwrap();

        let read = service
            .get_node(Some(&principal), NodeKind::Category, created.id)
            .await;
        assert_eq!(read.value(), Some(&created));
    }

    #[tokio::test]
    async fn test_sub_category_needs_its_own_grant() {
        let (service, principal) =
            service_with_role(vec![grant("category", true, true, true, true)]).await;
        let parent = service
            .create_node(Some(&principal), shoes())
            .await
            .into_value()
            .unwrap();

        let mut child = shoes();
        child.scope = ScopeSelector::category(parent.id);
        let outcome = service.create_node(Some(&principal), child).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Forbidden));
    }

    #[tokio::test]
    async fn test_validation_outcome_carries_violations() {
        let (service, principal) =
            service_with_role(vec![grant("category", true, true, true, true)]).await;
        let mut input = shoes();
        input.name = String::new();
        let outcome = service.create_node(Some(&principal), input).await;
        match outcome {
            Outcome::ValidationFailed { violations, .. } => {
                assert_eq!(violations[0].field, "name");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_materialize_requires_product_read() {
        let (service, principal) =
            service_with_role(vec![grant("category", true, true, true, true)]).await;
        let outcome = service
            .materialize(Some(&principal), new_entity_id(), None)
            .await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Forbidden));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = CatalogConfig {
            default_graph_depth: 9,
            max_graph_depth: 2,
            ..Default::default()
        };
        let result = CatalogService::in_memory(&config, Arc::new(InMemoryRepository::new()));
        assert!(result.is_err());
    }
}
