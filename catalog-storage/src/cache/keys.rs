//! Cache key scheme.
//!
//! Every cache entry lives under one of three namespaces:
//!
//! - `entity:{kind}:{id}` - snapshot of a single entity
//! - `exists:{kind}:{scopeId|root}:{normalizedName}` - existence flag for a
//!   natural key within a scope (slug flags use kind `{kind}-slug`)
//! - `list:{kind}:{page}:{limit}:{search}:{sortBy}:{sortOrder}` - one page of
//!   a filtered listing
//!
//! [`CacheKey`] can only be built through the constructors below, so no call
//! site can invent its own layout.

use crate::repository::NaturalKey;
use catalog_core::{normalize_identifier, EntityId, EntityKind, ListQuery, ParentRef};
use std::fmt;

/// A fully-formed cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    inner: String,
}

impl CacheKey {
    /// `entity:{kind}:{id}`
    pub fn entity(kind: EntityKind, id: EntityId) -> Self {
        Self {
            inner: format!("entity:{}:{}", kind.as_str(), id),
        }
    }

    /// Existence flag for `value` under `parent`. The value is normalized
    /// here, so callers pass it exactly as the user supplied it.
    pub fn exists(kind: EntityKind, key: NaturalKey, parent: &ParentRef, value: &str) -> Self {
        let kind_segment = match key {
            NaturalKey::Name => kind.as_str().to_string(),
            NaturalKey::Slug => format!("{}-slug", kind.as_str()),
        };
        Self {
            inner: format!(
                "exists:{}:{}:{}",
                kind_segment,
                parent.scope_key(),
                normalize_identifier(value)
            ),
        }
    }

    /// `list:{kind}:{page}:{limit}:{search}:{sortBy}:{sortOrder}`
    pub fn list(kind: EntityKind, query: &ListQuery) -> Self {
        Self {
            inner: format!(
                "{}{}:{}:{}:{}:{}",
                Self::list_prefix(kind),
                query.page.max(1),
                query.limit,
                query.normalized_search(),
                query.sort_by.as_str(),
                query.sort_order.as_str()
            ),
        }
    }

    /// Personal grant list of one principal.
    pub fn personal_grants(principal_id: EntityId) -> Self {
        Self::entity(EntityKind::PersonalGrants, principal_id)
    }

    /// Grant set of one role.
    pub fn role(role_id: EntityId) -> Self {
        Self::entity(EntityKind::Role, role_id)
    }

    /// Prefix covering every cached listing page of `kind`.
    pub fn list_prefix(kind: EntityKind) -> String {
        format!("list:{}:", kind.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn into_string(self) -> String {
        self.inner
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::{SortField, SortOrder};
    use uuid::Uuid;

    fn id(s: &str) -> Uuid {
        Uuid::parse_str(s).unwrap()
    }

    #[test]
    fn test_entity_key_format() {
        let node = id("0190f0c8-0000-7000-8000-000000000001");
        assert_eq!(
            CacheKey::entity(EntityKind::Category, node).as_str(),
            "entity:category:0190f0c8-0000-7000-8000-000000000001"
        );
    }

    #[test]
    fn test_exists_key_at_root_normalizes_value() {
        let key = CacheKey::exists(
            EntityKind::Category,
            NaturalKey::Name,
            &ParentRef::TopLevel,
            "  Running Shoes ",
        );
        assert_eq!(key.as_str(), "exists:category:root:running shoes");
    }

    #[test]
    fn test_exists_key_under_parent() {
        let parent = id("0190f0c8-0000-7000-8000-0000000000aa");
        let key = CacheKey::exists(
            EntityKind::SubCategory,
            NaturalKey::Name,
            &ParentRef::Node(parent),
            "Trail",
        );
        assert_eq!(
            key.as_str(),
            "exists:subcategory:0190f0c8-0000-7000-8000-0000000000aa:trail"
        );
    }

    #[test]
    fn test_slug_flags_live_in_their_own_kind() {
        let name = CacheKey::exists(
            EntityKind::Category,
            NaturalKey::Name,
            &ParentRef::TopLevel,
            "shoes",
        );
        let slug = CacheKey::exists(
            EntityKind::Category,
            NaturalKey::Slug,
            &ParentRef::TopLevel,
            "shoes",
        );
        assert_eq!(slug.as_str(), "exists:category-slug:root:shoes");
        assert_ne!(name, slug);
    }

    #[test]
    fn test_list_key_format() {
        let query = ListQuery {
            page: 2,
            limit: 10,
            search: Some(" Shoe ".to_string()),
            sort_by: SortField::CreatedAt,
            sort_order: SortOrder::Desc,
        };
        let key = CacheKey::list(EntityKind::Category, &query);
        assert_eq!(key.as_str(), "list:category:2:10:shoe:createdAt:desc");
        assert!(key.as_str().starts_with(&CacheKey::list_prefix(EntityKind::Category)));
    }

    #[test]
    fn test_list_key_with_defaults() {
        let key = CacheKey::list(EntityKind::SubCategory, &ListQuery::default());
        assert_eq!(key.as_str(), "list:subcategory:1:20::position:asc");
    }

    #[test]
    fn test_list_prefix_does_not_cover_other_kinds() {
        let sub = CacheKey::list(EntityKind::SubCategory, &ListQuery::default());
        assert!(!sub
            .as_str()
            .starts_with(&CacheKey::list_prefix(EntityKind::Category)));
    }

    #[test]
    fn test_grant_keys() {
        let principal = id("0190f0c8-0000-7000-8000-000000000002");
        assert_eq!(
            CacheKey::personal_grants(principal).as_str(),
            "entity:personal-grants:0190f0c8-0000-7000-8000-000000000002"
        );
        assert_eq!(
            CacheKey::role(principal).as_str(),
            "entity:role:0190f0c8-0000-7000-8000-000000000002"
        );
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Case and surrounding whitespace never produce distinct flags.
        #[test]
        fn prop_exists_key_ignores_case_and_padding(name in "[A-Za-z][A-Za-z ]{0,20}[A-Za-z]") {
            let plain = CacheKey::exists(EntityKind::Category, NaturalKey::Name, &ParentRef::TopLevel, &name);
            let shouted = CacheKey::exists(
                EntityKind::Category,
                NaturalKey::Name,
                &ParentRef::TopLevel,
                &format!("  {}  ", name.to_uppercase()),
            );
            prop_assert_eq!(plain, shouted);
        }
    }
}
