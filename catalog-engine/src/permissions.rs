//! Permission resolution.
//!
//! A principal's personal grant list, when present and non-empty, is the
//! whole answer for every entity kind. Otherwise the grants of every role the
//! principal holds are OR-merged per kind.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use catalog_core::{
    normalize_identifier, AccessError, Action, CatalogResult, EntityId, PermissionGrant,
    Principal, Role,
};
use catalog_storage::{CacheCoordinator, CacheKey, RoleRepository};
use tracing::{debug, info};

use crate::repo_call;

/// Merge role grants by kind, OR-ing each action flag.
///
/// Keys are normalized kind names. A role with no grants contributes nothing.
pub fn merge_role_grants<'a>(
    roles: impl IntoIterator<Item = &'a Role>,
) -> BTreeMap<String, PermissionGrant> {
    let mut merged: BTreeMap<String, PermissionGrant> = BTreeMap::new();
    for grant in roles.into_iter().flat_map(|role| role.grants.iter()) {
        merged
            .entry(normalize_identifier(&grant.entity_kind))
            .and_modify(|existing| existing.merge_or(grant))
            .or_insert_with(|| grant.clone());
    }
    merged
}

/// Answer from a personal grant list, or `None` if it does not apply.
fn personal_decision(grants: &[PermissionGrant], entity_kind: &str, action: Action) -> Option<bool> {
    if grants.is_empty() {
        return None;
    }
    Some(
        grants
            .iter()
            .find(|grant| grant.matches_kind(entity_kind))
            .is_some_and(|grant| grant.allows(action)),
    )
}

/// Resolves whether a principal may perform an action on an entity kind.
pub struct PermissionResolver {
    cache: Arc<CacheCoordinator>,
    roles: Arc<dyn RoleRepository>,
    repository_timeout: Duration,
}

impl PermissionResolver {
    pub fn new(
        cache: Arc<CacheCoordinator>,
        roles: Arc<dyn RoleRepository>,
        repository_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            roles,
            repository_timeout,
        }
    }

    /// Personal grants live only in the cache; an unreachable cache reads as
    /// "no personal list".
    async fn personal_grants(&self, principal_id: EntityId) -> Vec<PermissionGrant> {
        self.cache
            .get(&CacheKey::personal_grants(principal_id))
            .await
            .unwrap_or_default()
    }

    async fn load_role(&self, role_id: EntityId) -> CatalogResult<Option<Role>> {
        let ttl = Some(self.cache.settings().entity_ttl);
        self.cache
            .get_or_load_optional(&CacheKey::role(role_id), ttl, || {
                repo_call(
                    "role_find_by_id",
                    self.repository_timeout,
                    self.roles.role_find_by_id(role_id),
                )
            })
            .await
    }

    /// Effective role-derived grants of `principal`, merged per kind.
    pub async fn role_grants(
        &self,
        principal: &Principal,
    ) -> CatalogResult<BTreeMap<String, PermissionGrant>> {
        let mut roles = Vec::with_capacity(principal.roles.len());
        for role_ref in &principal.roles {
            match self.load_role(role_ref.id).await? {
                Some(role) => roles.push(role),
                None => debug!(role_id = %role_ref.id, role = %role_ref.name, "role not found, ignoring"),
            }
        }
        Ok(merge_role_grants(&roles))
    }

    /// Whether `principal` may perform `action` on `entity_kind`.
    pub async fn authorize(
        &self,
        principal: &Principal,
        entity_kind: &str,
        action: Action,
    ) -> CatalogResult<bool> {
        let personal = self.personal_grants(principal.id).await;
        if let Some(decision) = personal_decision(&personal, entity_kind, action) {
            debug!(
                principal_id = %principal.id,
                entity_kind,
                action = %action,
                decision,
                "resolved from personal grants"
            );
            return Ok(decision);
        }

        let merged = self.role_grants(principal).await?;
        let decision = merged
            .get(&normalize_identifier(entity_kind))
            .is_some_and(|grant| grant.allows(action));
        debug!(
            principal_id = %principal.id,
            entity_kind,
            action = %action,
            decision,
            "resolved from role grants"
        );
        Ok(decision)
    }

    /// Like [`Self::authorize`] but turns a missing principal or a denial
    /// into an error.
    pub async fn require(
        &self,
        principal: Option<&Principal>,
        entity_kind: &str,
        action: Action,
    ) -> CatalogResult<()> {
        let principal = principal.ok_or(AccessError::Unauthenticated)?;
        if self.authorize(principal, entity_kind, action).await? {
            Ok(())
        } else {
            Err(AccessError::Forbidden {
                principal_id: principal.id,
                action: action.flag_name().to_string(),
                entity_kind: entity_kind.to_string(),
            }
            .into())
        }
    }

    /// Replace the personal grant list of a principal.
    pub async fn store_personal_grants(&self, principal_id: EntityId, grants: &[PermissionGrant]) {
        let ttl = self.cache.settings().personal_grant_ttl;
        self.cache
            .put(&CacheKey::personal_grants(principal_id), grants, ttl)
            .await;
        info!(principal_id = %principal_id, grants = grants.len(), "stored personal grants");
    }

    pub async fn clear_personal_grants(&self, principal_id: EntityId) {
        self.cache
            .invalidate(&CacheKey::personal_grants(principal_id))
            .await;
        info!(principal_id = %principal_id, "cleared personal grants");
    }

    /// Drop a role's cached grant list after it was edited.
    pub async fn invalidate_role(&self, role_id: EntityId) {
        self.cache.invalidate(&CacheKey::role(role_id)).await;
    }
}
