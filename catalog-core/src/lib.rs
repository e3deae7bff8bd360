//! Catalog Core - Entity Types
//!
//! Pure data structures shared by the storage and engine crates: identifiers,
//! the catalog data model, the error taxonomy, the discriminated outcome type
//! and configuration. This crate contains no I/O.

pub mod config;
pub mod entities;
pub mod error;
pub mod outcome;

pub use config::{CacheSettings, CatalogConfig, LmdbSettings};
pub use entities::*;
pub use error::*;
pub use outcome::Outcome;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
/// UUIDv7 embeds a Unix timestamp, making IDs naturally sortable by creation time.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Normalize a natural identifier (name or slug) for comparisons and
/// existence keys: trimmed and lower-cased.
pub fn normalize_identifier(value: &str) -> String {
    value.trim().to_lowercase()
}

// ============================================================================
// ENTITY KINDS
// ============================================================================

/// Entity kind discriminator used in cache keys and error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Category,
    SubCategory,
    Product,
    Role,
    PersonalGrants,
}

impl EntityKind {
    /// Stable lower-case name used in cache keys and permission lookups.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Category => "category",
            EntityKind::SubCategory => "subcategory",
            EntityKind::Product => "product",
            EntityKind::Role => "role",
            EntityKind::PersonalGrants => "personal-grants",
        }
    }

    /// Parse a kind name case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match normalize_identifier(value).as_str() {
            "category" => Some(EntityKind::Category),
            "subcategory" | "sub-category" | "sub_category" => Some(EntityKind::SubCategory),
            "product" => Some(EntityKind::Product),
            "role" => Some(EntityKind::Role),
            "personal-grants" => Some(EntityKind::PersonalGrants),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TESTS
// ============================================================================
