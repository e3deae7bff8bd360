//! Catalog Test Utilities
//!
//! Shared test infrastructure for the catalog workspace:
//! - A cache store that fails or stalls on demand
//! - A tree repository whose guarded deletes run slowly
//! - Proptest generators for names, slugs and grants
//! - Fixtures for principals, products and a fully wired service
//! - Assertions over service outcomes

pub use catalog_storage::InMemoryRepository;

pub use catalog_core::{
    Action, CatalogConfig, CatalogError, CreateNodeInput, EntityId, ErrorKind, GrantScope,
    NodeKind, Outcome, ParentRef, PermissionGrant, Principal, Product, Role, RoleRef,
    ScopeSelector, SelfRefs, TreeNode,
};

use async_trait::async_trait;
use catalog_core::{
    CacheError, CatalogResult, DependentUsage, ListQuery, NodePatch, Page, Timestamp,
};
use catalog_storage::{
    CacheResult, CacheStats, CacheStore, GuardedDelete, NaturalKey, TreeRepository,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// FAILING CACHE STORE
// ============================================================================

/// How [`FailingCacheStore`] misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Every call returns `CacheError::Unavailable`.
    Error,
    /// Every call sleeps this long before answering with nothing.
    Stall(Duration),
}

/// Cache store standing in for an unreachable cache server.
#[derive(Debug)]
pub struct FailingCacheStore {
    mode: FailureMode,
    calls: AtomicU64,
}

impl FailingCacheStore {
    pub fn new(mode: FailureMode) -> Self {
        Self {
            mode,
            calls: AtomicU64::new(0),
        }
    }

    pub fn erroring() -> Self {
        Self::new(FailureMode::Error)
    }

    pub fn stalling(delay: Duration) -> Self {
        Self::new(FailureMode::Stall(delay))
    }

    /// Number of store calls attempted so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn fail<T: Default>(&self, operation: &str) -> CacheResult<T> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match self.mode {
            FailureMode::Error => Err(CacheError::Unavailable {
                reason: format!("{operation}: connection refused"),
            }),
            FailureMode::Stall(delay) => {
                tokio::time::sleep(delay).await;
                Ok(T::default())
            }
        }
    }
}

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.fail("get").await
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> CacheResult<()> {
        self.fail("set").await
    }

    async fn delete(&self, _key: &str) -> CacheResult<bool> {
        self.fail("delete").await
    }

    async fn keys_with_prefix(&self, _prefix: &str) -> CacheResult<Vec<String>> {
        self.fail("keys_with_prefix").await
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        self.fail("stats").await
    }
}

// ============================================================================
// SLOW TREE REPOSITORY
// ============================================================================

/// Tree repository that waits `delay` before every guarded delete, leaving
/// a wide window for concurrent writers.
#[derive(Debug)]
pub struct SlowDeleteRepository {
    inner: Arc<InMemoryRepository>,
    delay: Duration,
}

impl SlowDeleteRepository {
    pub fn new(inner: Arc<InMemoryRepository>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl TreeRepository for SlowDeleteRepository {
    async fn node_find_by_id(&self, id: EntityId) -> CatalogResult<Option<TreeNode>> {
        self.inner.node_find_by_id(id).await
    }

    async fn node_find_by_scope(
        &self,
        parent: ParentRef,
        include_deleted: bool,
    ) -> CatalogResult<Vec<TreeNode>> {
        self.inner.node_find_by_scope(parent, include_deleted).await
    }

    async fn node_find_live_by_natural_key(
        &self,
        parent: ParentRef,
        key: NaturalKey,
        normalized_value: &str,
        exclude_id: Option<EntityId>,
    ) -> CatalogResult<Option<TreeNode>> {
        self.inner
            .node_find_live_by_natural_key(parent, key, normalized_value, exclude_id)
            .await
    }

    async fn node_count_live_in_scope(&self, parent: ParentRef) -> CatalogResult<u64> {
        self.inner.node_count_live_in_scope(parent).await
    }

    async fn node_count_dependents(&self, id: EntityId) -> CatalogResult<DependentUsage> {
        self.inner.node_count_dependents(id).await
    }

    async fn node_insert(&self, node: &TreeNode) -> CatalogResult<()> {
        self.inner.node_insert(node).await
    }

    async fn node_update_fields(
        &self,
        id: EntityId,
        patch: &NodePatch,
    ) -> CatalogResult<TreeNode> {
        self.inner.node_update_fields(id, patch).await
    }

    async fn node_apply_positions(
        &self,
        parent: ParentRef,
        positions: &[(EntityId, u32)],
    ) -> CatalogResult<Vec<TreeNode>> {
        self.inner.node_apply_positions(parent, positions).await
    }

    async fn node_soft_delete_if_unused(
        &self,
        id: EntityId,
        deleted_at: Timestamp,
    ) -> CatalogResult<GuardedDelete<TreeNode>> {
        tokio::time::sleep(self.delay).await;
        self.inner.node_soft_delete_if_unused(id, deleted_at).await
    }

    async fn node_delete_if_unused(&self, id: EntityId) -> CatalogResult<GuardedDelete<bool>> {
        tokio::time::sleep(self.delay).await;
        self.inner.node_delete_if_unused(id).await
    }

    async fn node_list(&self, kind: NodeKind, query: &ListQuery) -> CatalogResult<Page<TreeNode>> {
        self.inner.node_list(kind, query).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for catalog inputs.

    use super::*;
    use proptest::prelude::*;

    /// Display names: one to three capitalised words.
    pub fn node_name_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec("[A-Z][a-z]{2,8}", 1..=3).prop_map(|words| words.join(" "))
    }

    /// Valid slugs: lower-case words joined by single hyphens.
    pub fn slug_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z0-9]{1,8}", 1..=3).prop_map(|parts| parts.join("-"))
    }

    /// Kind names as grants spell them, mixed case included.
    pub fn entity_kind_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("category".to_string()),
            Just("Category".to_string()),
            Just("subcategory".to_string()),
            Just("product".to_string()),
            Just("tag".to_string()),
        ]
    }

    pub fn action_strategy() -> impl Strategy<Value = Action> {
        prop_oneof![
            Just(Action::Create),
            Just(Action::Read),
            Just(Action::Update),
            Just(Action::Delete),
        ]
    }

    /// Role-scoped grant with arbitrary flags.
    pub fn grant_strategy() -> impl Strategy<Value = PermissionGrant> {
        (entity_kind_strategy(), any::<[bool; 4]>()).prop_map(|(kind, flags)| PermissionGrant {
            subject_scope: GrantScope::Role,
            entity_kind: kind,
            can_create: flags[0],
            can_read: flags[1],
            can_update: flags[2],
            can_delete: flags[3],
            description: None,
        })
    }

    pub fn grants_strategy(max: usize) -> impl Strategy<Value = Vec<PermissionGrant>> {
        prop::collection::vec(grant_strategy(), 0..=max)
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made records and a wired-up service.

    use super::*;
    use catalog_core::new_entity_id;
    use catalog_engine::CatalogService;
    use catalog_storage::{InMemoryCacheStore, ProductRepository, RoleRepository};
    use chrono::Utc;

    /// Grant with explicit flags, in `create, read, update, delete` order.
    pub fn grant(
        scope: GrantScope,
        entity_kind: &str,
        create: bool,
        read: bool,
        update: bool,
        delete: bool,
    ) -> PermissionGrant {
        PermissionGrant {
            subject_scope: scope,
            entity_kind: entity_kind.to_string(),
            can_create: create,
            can_read: read,
            can_update: update,
            can_delete: delete,
            description: None,
        }
    }

    /// Role-scoped grant allowing every action on `entity_kind`.
    pub fn full_grant(entity_kind: &str) -> PermissionGrant {
        grant(GrantScope::Role, entity_kind, true, true, true, true)
    }

    pub fn role(name: &str, grants: Vec<PermissionGrant>) -> Role {
        Role {
            id: new_entity_id(),
            name: name.to_string(),
            grants,
        }
    }

    pub fn principal_with_roles(roles: &[&Role]) -> Principal {
        roles
            .iter()
            .fold(Principal::new(new_entity_id()), |principal, role| {
                principal.with_role(RoleRef {
                    id: role.id,
                    name: role.name.clone(),
                })
            })
    }

    /// Live product with no relations.
    pub fn product(name: &str) -> Product {
        let slug = name.trim().to_lowercase().replace(' ', "-");
        Product {
            id: new_entity_id(),
            name: name.to_string(),
            slug,
            price_cents: 4999,
            primary_image: Some(format!("images/{}.jpg", name.to_lowercase())),
            category_ids: Vec::new(),
            self_refs: SelfRefs::default(),
            attributes: serde_json::json!({}),
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    /// Create input with a slug derived from the name.
    pub fn node_input(scope: ScopeSelector, name: &str) -> CreateNodeInput {
        CreateNodeInput {
            scope,
            name: name.to_string(),
            slug: name.trim().to_lowercase().replace(' ', "-"),
            description: None,
            thumbnail_ref: None,
            creator: new_entity_id(),
        }
    }

    /// A service over one in-memory repository and the chosen cache store.
    pub struct TestCatalog {
        pub service: CatalogService,
        pub repository: Arc<InMemoryRepository>,
    }

    impl TestCatalog {
        pub fn new() -> Self {
            Self::with_store(Arc::new(InMemoryCacheStore::new()))
        }

        pub fn with_store(store: Arc<dyn CacheStore>) -> Self {
            Self::with_config(CatalogConfig::default(), store)
        }

        pub fn with_config(config: CatalogConfig, store: Arc<dyn CacheStore>) -> Self {
            let repository = Arc::new(InMemoryRepository::new());
            Self::wire(config, store, repository.clone(), repository)
        }

        /// Tree rows behind a [`SlowDeleteRepository`]; products and roles
        /// go straight to the shared in-memory repository.
        pub fn with_slow_deletes(delay: Duration) -> Self {
            let repository = Arc::new(InMemoryRepository::new());
            let nodes = Arc::new(SlowDeleteRepository::new(repository.clone(), delay));
            Self::wire(
                CatalogConfig::default(),
                Arc::new(InMemoryCacheStore::new()),
                nodes,
                repository,
            )
        }

        fn wire(
            config: CatalogConfig,
            store: Arc<dyn CacheStore>,
            nodes: Arc<dyn TreeRepository>,
            repository: Arc<InMemoryRepository>,
        ) -> Self {
            let service = CatalogService::new(
                &config,
                store,
                nodes,
                repository.clone(),
                repository.clone(),
            )
            .expect("test configuration is valid");
            Self {
                service,
                repository,
            }
        }

        /// Store `roles` and return a principal holding all of them.
        pub async fn principal(&self, roles: &[&Role]) -> Principal {
            for role in roles {
                self.repository
                    .role_upsert(role)
                    .await
                    .expect("role upsert succeeds");
            }
            principal_with_roles(roles)
        }

        /// A principal allowed everything on categories, sub-categories
        /// and products.
        pub async fn admin(&self) -> Principal {
            let admin = role(
                "admin",
                vec![
                    full_grant("category"),
                    full_grant("subcategory"),
                    full_grant("product"),
                ],
            );
            self.principal(&[&admin]).await
        }

        pub async fn insert_product(&self, product: &Product) {
            self.repository
                .product_insert(product)
                .await
                .expect("product insert succeeds");
        }

        /// Create a node through the service, panicking on any failure.
        pub async fn create(
            &self,
            principal: &Principal,
            scope: ScopeSelector,
            name: &str,
        ) -> TreeNode {
            let outcome = self
                .service
                .create_node(Some(principal), node_input(scope, name))
                .await;
            match outcome {
                Outcome::Ok { value } => value,
                other => panic!("create {name} failed: {other:?}"),
            }
        }
    }

    impl Default for TestCatalog {
        fn default() -> Self {
            Self::new()
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over service outcomes.

    use super::*;

    pub fn assert_ok<T: std::fmt::Debug>(outcome: &Outcome<T>) {
        assert!(outcome.is_ok(), "expected Ok, got {outcome:?}");
    }

    pub fn assert_outcome_kind<T: std::fmt::Debug>(outcome: &Outcome<T>, expected: ErrorKind) {
        assert_eq!(
            outcome.error_kind(),
            Some(expected),
            "expected {expected:?}, got {outcome:?}"
        );
    }

    pub fn assert_conflict<T: std::fmt::Debug>(outcome: &Outcome<T>) {
        assert_outcome_kind(outcome, ErrorKind::Conflict);
    }

    pub fn assert_not_found<T: std::fmt::Debug>(outcome: &Outcome<T>) {
        assert_outcome_kind(outcome, ErrorKind::NotFound);
    }

    /// Live positions of `nodes` are exactly `0..nodes.len()`.
    pub fn assert_dense_positions(nodes: &[TreeNode]) {
        let mut positions: Vec<u32> = nodes.iter().map(|n| n.position).collect();
        positions.sort_unstable();
        let expected: Vec<u32> = (0..nodes.len() as u32).collect();
        assert_eq!(positions, expected, "positions are not dense");
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_erroring_store_counts_calls() {
        let store = FailingCacheStore::erroring();
        assert!(store.get("k").await.is_err());
        assert!(store.delete("k").await.is_err());
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn test_stalling_store_answers_empty() {
        let store = FailingCacheStore::stalling(Duration::from_millis(1));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.keys_with_prefix("list:").await.unwrap().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_slugs_validate(name in node_name_strategy(), slug in slug_strategy()) {
            let input = fixtures::node_input(ScopeSelector::top_level(), &name);
            prop_assert!(input.validate().is_ok());
            let mut input = input;
            input.slug = slug;
            prop_assert!(input.validate().is_ok());
        }
    }
}
