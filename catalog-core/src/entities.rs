//! Catalog data model: principals and grants, tree nodes, products and the
//! read-side shapes built from them.

use crate::{
    normalize_identifier, EntityId, EntityKind, FieldViolation, Timestamp, ValidationError,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// PRINCIPALS AND GRANTS
// ============================================================================

/// Reference to a role held by a principal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoleRef {
    pub id: EntityId,
    pub name: String,
}

/// An already-authenticated caller. Immutable for the duration of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: EntityId,
    pub roles: BTreeSet<RoleRef>,
}

impl Principal {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            roles: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: RoleRef) -> Self {
        self.roles.insert(role);
        self
    }
}

/// Where a grant comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantScope {
    Personal,
    Role,
}

/// CRUD action checked against a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    /// Flag name as stored on grants (`canCreate`, ...).
    pub fn flag_name(&self) -> &'static str {
        match self {
            Action::Create => "canCreate",
            Action::Read => "canRead",
            Action::Update => "canUpdate",
            Action::Delete => "canDelete",
        }
    }

    /// Accepts flag names and bare verbs, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = normalize_identifier(value);
        let verb = normalized.strip_prefix("can").unwrap_or(&normalized);
        match verb {
            "create" => Some(Action::Create),
            "read" => Some(Action::Read),
            "update" => Some(Action::Update),
            "delete" => Some(Action::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag_name())
    }
}

/// Per-kind CRUD flags, either attached to a principal or to a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    pub subject_scope: GrantScope,
    pub entity_kind: String,
    pub can_create: bool,
    pub can_read: bool,
    pub can_update: bool,
    pub can_delete: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl PermissionGrant {
    /// A grant with every flag cleared.
    pub fn none(subject_scope: GrantScope, entity_kind: impl Into<String>) -> Self {
        Self {
            subject_scope,
            entity_kind: entity_kind.into(),
            can_create: false,
            can_read: false,
            can_update: false,
            can_delete: false,
            description: None,
        }
    }

    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Create => self.can_create,
            Action::Read => self.can_read,
            Action::Update => self.can_update,
            Action::Delete => self.can_delete,
        }
    }

    pub fn matches_kind(&self, entity_kind: &str) -> bool {
        self.entity_kind.trim().eq_ignore_ascii_case(entity_kind.trim())
    }

    /// OR every flag of `other` into `self`.
    pub fn merge_or(&mut self, other: &PermissionGrant) {
        self.can_create |= other.can_create;
        self.can_read |= other.can_read;
        self.can_update |= other.can_update;
        self.can_delete |= other.can_delete;
    }
}

/// A role and the grants it confers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: EntityId,
    pub name: String,
    pub grants: Vec<PermissionGrant>,
}

// ============================================================================
// TREE NODES
// ============================================================================

/// Category nodes sit at the top level; sub-categories hang below any node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Category,
    SubCategory,
}

impl NodeKind {
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            NodeKind::Category => EntityKind::Category,
            NodeKind::SubCategory => EntityKind::SubCategory,
        }
    }
}

/// Parent of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParentRef {
    TopLevel,
    Node(EntityId),
}

impl ParentRef {
    /// Scope component used in existence keys and lock tables.
    pub fn scope_key(&self) -> String {
        match self {
            ParentRef::TopLevel => "root".to_string(),
            ParentRef::Node(id) => id.to_string(),
        }
    }

    pub fn node_id(&self) -> Option<EntityId> {
        match self {
            ParentRef::TopLevel => None,
            ParentRef::Node(id) => Some(*id),
        }
    }
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scope_key())
    }
}

/// Caller-supplied scope discriminator. At most one id may be present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSelector {
    pub category_id: Option<EntityId>,
    pub sub_category_id: Option<EntityId>,
}

/// The resolved, unambiguous scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeTarget {
    TopLevel,
    UnderCategory(EntityId),
    UnderSubCategory(EntityId),
}

impl ScopeSelector {
    pub fn top_level() -> Self {
        Self::default()
    }

    pub fn category(id: EntityId) -> Self {
        Self {
            category_id: Some(id),
            sub_category_id: None,
        }
    }

    pub fn sub_category(id: EntityId) -> Self {
        Self {
            category_id: None,
            sub_category_id: Some(id),
        }
    }

    pub fn resolve(&self) -> Result<ScopeTarget, ValidationError> {
        match (self.category_id, self.sub_category_id) {
            (Some(_), Some(_)) => Err(ValidationError::AmbiguousScope {
                first: "categoryId".to_string(),
                second: "subCategoryId".to_string(),
            }),
            (Some(id), None) => Ok(ScopeTarget::UnderCategory(id)),
            (None, Some(id)) => Ok(ScopeTarget::UnderSubCategory(id)),
            (None, None) => Ok(ScopeTarget::TopLevel),
        }
    }
}

impl ScopeTarget {
    pub fn parent_ref(&self) -> ParentRef {
        match self {
            ScopeTarget::TopLevel => ParentRef::TopLevel,
            ScopeTarget::UnderCategory(id) | ScopeTarget::UnderSubCategory(id) => {
                ParentRef::Node(*id)
            }
        }
    }

    /// Kind the parent node must have, if any.
    pub fn expected_parent_kind(&self) -> Option<NodeKind> {
        match self {
            ScopeTarget::TopLevel => None,
            ScopeTarget::UnderCategory(_) => Some(NodeKind::Category),
            ScopeTarget::UnderSubCategory(_) => Some(NodeKind::SubCategory),
        }
    }

    /// Kind of node created in this scope.
    pub fn child_kind(&self) -> NodeKind {
        match self {
            ScopeTarget::TopLevel => NodeKind::Category,
            _ => NodeKind::SubCategory,
        }
    }
}

/// A category or sub-category row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: EntityId,
    pub kind: NodeKind,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub thumbnail_ref: Option<String>,
    pub position: u32,
    pub parent: ParentRef,
    pub created_by: EntityId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl TreeNode {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn entity_kind(&self) -> EntityKind {
        self.kind.entity_kind()
    }
}

/// A node with its ordered descendants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeBranch {
    pub node: TreeNode,
    pub children: Vec<TreeBranch>,
}

impl TreeBranch {
    pub fn leaf(node: TreeNode) -> Self {
        Self {
            node,
            children: Vec::new(),
        }
    }

    /// Number of nodes in this branch, including the root.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(TreeBranch::node_count).sum::<usize>()
    }
}

static SLUG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("slug pattern is a valid regex")
});

fn check_name(field: &str, value: &str, violations: &mut Vec<FieldViolation>) {
    if value.trim().is_empty() {
        violations.push(FieldViolation::new(field, "must not be empty"));
    }
}

fn check_slug(value: &str, violations: &mut Vec<FieldViolation>) {
    let normalized = normalize_identifier(value);
    if normalized.is_empty() {
        violations.push(FieldViolation::new("slug", "must not be empty"));
    } else if !SLUG_PATTERN.is_match(&normalized) {
        violations.push(FieldViolation::new(
            "slug",
            "may only contain lower-case letters, digits and single hyphens",
        ));
    }
}

fn finish(violations: Vec<FieldViolation>) -> Result<(), ValidationError> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::Fields { violations })
    }
}

/// Input for creating a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeInput {
    pub scope: ScopeSelector,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub thumbnail_ref: Option<String>,
    pub creator: EntityId,
}

impl CreateNodeInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        check_name("name", &self.name, &mut violations);
        check_slug(&self.slug, &mut violations);
        finish(violations)
    }
}

/// Partial update. Only supplied fields are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpdate {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub thumbnail_ref: Option<String>,
}

impl NodeUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.slug.is_none()
            && self.description.is_none()
            && self.thumbnail_ref.is_none()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        if let Some(name) = &self.name {
            check_name("name", name, &mut violations);
        }
        if let Some(slug) = &self.slug {
            check_slug(slug, &mut violations);
        }
        finish(violations)
    }
}

/// Field-level write applied by the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePatch {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub thumbnail_ref: Option<String>,
    pub position: Option<u32>,
    pub deleted_at: Option<Option<Timestamp>>,
}

impl From<NodeUpdate> for NodePatch {
    fn from(update: NodeUpdate) -> Self {
        Self {
            name: update.name.map(|n| n.trim().to_string()),
            slug: update.slug.map(|s| normalize_identifier(&s)),
            description: update.description,
            thumbnail_ref: update.thumbnail_ref,
            position: None,
            deleted_at: None,
        }
    }
}

/// Live and soft-deleted references to a node, counted by the repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentUsage {
    pub live_products: u64,
    pub live_children: u64,
    pub deleted_children: u64,
}

impl DependentUsage {
    /// Dependents that block a soft delete.
    pub fn blocking_total(&self) -> u64 {
        self.live_products + self.live_children
    }

    /// Dependents that block a hard delete.
    pub fn hard_delete_total(&self) -> u64 {
        self.blocking_total() + self.deleted_children
    }
}

// ============================================================================
// LISTING
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortField {
    Name,
    Slug,
    #[default]
    Position,
    CreatedAt,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::Name => "name",
            SortField::Slug => "slug",
            SortField::Position => "position",
            SortField::CreatedAt => "createdAt",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Paginated, filtered listing request. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    pub search: Option<String>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            search: None,
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
        }
    }
}

impl ListQuery {
    pub fn normalized_search(&self) -> String {
        self.search
            .as_deref()
            .map(normalize_identifier)
            .unwrap_or_default()
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.limit as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

// ============================================================================
// PRODUCTS
// ============================================================================

/// Self-referencing product relations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfRefs {
    pub upsells: Vec<EntityId>,
    pub cross_sells: Vec<EntityId>,
}

/// Product-like graph entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: EntityId,
    pub name: String,
    pub slug: String,
    pub price_cents: i64,
    pub primary_image: Option<String>,
    pub category_ids: Vec<EntityId>,
    pub self_refs: SelfRefs,
    #[serde(default)]
    pub attributes: serde_json::Value,
    pub created_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl Product {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn stub(&self) -> ProductStub {
        ProductStub {
            id: self.id,
            name: self.name.clone(),
            slug: self.slug.clone(),
            primary_image: self.primary_image.clone(),
            price_cents: self.price_cents,
        }
    }
}

/// Terminal projection emitted where expansion stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductStub {
    pub id: EntityId,
    pub name: String,
    pub slug: String,
    pub primary_image: Option<String>,
    pub price_cents: i64,
}

/// A product with its relations expanded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializedProduct {
    pub id: EntityId,
    pub name: String,
    pub slug: String,
    pub price_cents: i64,
    pub primary_image: Option<String>,
    pub category_ids: Vec<EntityId>,
    pub attributes: serde_json::Value,
    pub upsells: Vec<RelatedProduct>,
    pub cross_sells: Vec<RelatedProduct>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "product", rename_all = "camelCase")]
pub enum RelatedProduct {
    Expanded(Box<MaterializedProduct>),
    Stub(ProductStub),
}

impl RelatedProduct {
    pub fn id(&self) -> EntityId {
        match self {
            RelatedProduct::Expanded(product) => product.id,
            RelatedProduct::Stub(stub) => stub.id,
        }
    }

    pub fn is_stub(&self) -> bool {
        matches!(self, RelatedProduct::Stub(_))
    }

    pub fn as_expanded(&self) -> Option<&MaterializedProduct> {
        match self {
            RelatedProduct::Expanded(product) => Some(product),
            RelatedProduct::Stub(_) => None,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_entity_id;

    #[test]
    fn test_action_parse_accepts_flag_names_and_verbs() {
        assert_eq!(Action::parse("canRead"), Some(Action::Read));
        assert_eq!(Action::parse("CANUPDATE"), Some(Action::Update));
        assert_eq!(Action::parse("delete"), Some(Action::Delete));
        assert_eq!(Action::parse(" Create "), Some(Action::Create));
        assert_eq!(Action::parse("canFly"), None);
    }

    #[test]
    fn test_grant_merge_or() {
        let mut a = PermissionGrant::none(GrantScope::Role, "category");
        a.can_read = true;
        let mut b = PermissionGrant::none(GrantScope::Role, "Category");
        b.can_update = true;
        a.merge_or(&b);
        assert!(a.allows(Action::Read));
        assert!(a.allows(Action::Update));
        assert!(!a.allows(Action::Create));
        assert!(a.matches_kind("CATEGORY"));
    }

    #[test]
    fn test_scope_selector_rejects_both_discriminators() {
        let selector = ScopeSelector {
            category_id: Some(new_entity_id()),
            sub_category_id: Some(new_entity_id()),
        };
        assert!(matches!(
            selector.resolve(),
            Err(ValidationError::AmbiguousScope { .. })
        ));
    }

    #[test]
    fn test_scope_selector_resolution() {
        let id = new_entity_id();
        assert_eq!(ScopeSelector::top_level().resolve(), Ok(ScopeTarget::TopLevel));
        let target = ScopeSelector::category(id).resolve().unwrap();
        assert_eq!(target, ScopeTarget::UnderCategory(id));
        assert_eq!(target.parent_ref(), ParentRef::Node(id));
        assert_eq!(target.expected_parent_kind(), Some(NodeKind::Category));
        assert_eq!(target.child_kind(), NodeKind::SubCategory);
        assert_eq!(ScopeTarget::TopLevel.child_kind(), NodeKind::Category);
        assert_eq!(ParentRef::TopLevel.scope_key(), "root");
    }

    #[test]
    fn test_create_input_validation_collects_fields() {
        let input = CreateNodeInput {
            scope: ScopeSelector::top_level(),
            name: "   ".to_string(),
            slug: "Bad Slug!".to_string(),
            description: None,
            thumbnail_ref: None,
            creator: new_entity_id(),
        };
        let err = input.validate().unwrap_err();
        let fields: Vec<_> = err.violations().into_iter().map(|v| v.field).collect();
        assert_eq!(fields, vec!["name".to_string(), "slug".to_string()]);
    }

    #[test]
    fn test_slug_is_normalized_before_matching() {
        let input = CreateNodeInput {
            scope: ScopeSelector::top_level(),
            name: "Shoes".to_string(),
            slug: " Running-Shoes ".to_string(),
            description: None,
            thumbnail_ref: None,
            creator: new_entity_id(),
        };
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_node_update_is_empty() {
        assert!(NodeUpdate::default().is_empty());
        let update = NodeUpdate {
            description: Some("x".to_string()),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }

    #[test]
    fn test_dependent_usage_totals() {
        let usage = DependentUsage {
            live_products: 2,
            live_children: 1,
            deleted_children: 4,
        };
        assert_eq!(usage.blocking_total(), 3);
        assert_eq!(usage.hard_delete_total(), 7);
    }

    #[test]
    fn test_list_query_offset() {
        let query = ListQuery {
            page: 3,
            limit: 10,
            ..Default::default()
        };
        assert_eq!(query.offset(), 20);
        let first = ListQuery {
            page: 0,
            ..Default::default()
        };
        assert_eq!(first.offset(), 0);
    }
}
