//! Error types for catalog operations

use crate::{DependentUsage, EntityKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {kind} with id {id}")]
    NotFound { kind: EntityKind, id: Uuid },

    #[error("Insert failed for {kind}: {reason}")]
    InsertFailed { kind: EntityKind, reason: String },

    #[error("Update failed for {kind} with id {id}: {reason}")]
    UpdateFailed {
        kind: EntityKind,
        id: Uuid,
        reason: String,
    },

    #[error("Unique constraint violated on {kind}.{field}: {value}")]
    UniqueViolation {
        kind: EntityKind,
        field: String,
        value: String,
    },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Repository operation {operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Only one scope discriminator may be supplied, got both {first} and {second}")]
    AmbiguousScope { first: String, second: String },

    #[error("Validation failed on {} field(s)", violations.len())]
    Fields { violations: Vec<FieldViolation> },
}

impl ValidationError {
    /// Flatten into field/message pairs for the caller.
    pub fn violations(&self) -> Vec<FieldViolation> {
        match self {
            ValidationError::RequiredFieldMissing { field } => {
                vec![FieldViolation::new(field.clone(), "is required")]
            }
            ValidationError::InvalidValue { field, reason } => {
                vec![FieldViolation::new(field.clone(), reason.clone())]
            }
            ValidationError::AmbiguousScope { first, second } => vec![
                FieldViolation::new(first.clone(), format!("cannot be combined with {second}")),
                FieldViolation::new(second.clone(), format!("cannot be combined with {first}")),
            ],
            ValidationError::Fields { violations } => violations.clone(),
        }
    }
}

/// Authentication and authorization errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Permission denied for principal {principal_id}: {action} on {entity_kind}")]
    Forbidden {
        principal_id: Uuid,
        action: String,
        entity_kind: String,
    },
}

/// Conflicts with the current state of the catalog.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConflictError {
    #[error("A {kind} with {field} '{value}' already exists in scope {scope}")]
    Duplicate {
        kind: EntityKind,
        field: String,
        value: String,
        scope: String,
    },

    #[error(
        "{kind} {id} is still referenced by {} live product(s), {} live child node(s) and {} deleted child node(s)",
        usage.live_products,
        usage.live_children,
        usage.deleted_children
    )]
    InUse {
        kind: EntityKind,
        id: Uuid,
        usage: DependentUsage,
    },

    #[error("{kind} {id} is in an invalid state: {reason}")]
    InvalidState {
        kind: EntityKind,
        id: Uuid,
        reason: String,
    },
}

/// Cache store errors. These never reach callers of the engine; the cache
/// coordinator logs them and falls back to the repository.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache operation {operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Deserialization error: {reason}")]
    Deserialization { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Error categories exposed at the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Unauthenticated,
    Forbidden,
    ValidationFailed,
    NotFound,
    Conflict,
    Internal,
}

/// Master error type for all catalog errors.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CatalogError {
    /// Shorthand for a `NotFound` storage error.
    pub fn not_found(kind: EntityKind, id: Uuid) -> Self {
        CatalogError::Storage(StorageError::NotFound { kind, id })
    }

    /// Map onto the service-boundary taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::Access(AccessError::Unauthenticated) => ErrorKind::Unauthenticated,
            CatalogError::Access(AccessError::Forbidden { .. }) => ErrorKind::Forbidden,
            CatalogError::Validation(_) => ErrorKind::ValidationFailed,
            CatalogError::Storage(StorageError::NotFound { .. }) => ErrorKind::NotFound,
            CatalogError::Storage(StorageError::UniqueViolation { .. }) => ErrorKind::Conflict,
            CatalogError::Conflict(_) => ErrorKind::Conflict,
            CatalogError::Storage(_) | CatalogError::Cache(_) | CatalogError::Config(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Result type alias for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            kind: EntityKind::Category,
            id: Uuid::nil(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("category"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_conflict_in_use_reports_dependent_count() {
        let err = ConflictError::InUse {
            kind: EntityKind::Category,
            id: Uuid::nil(),
            usage: DependentUsage {
                live_products: 3,
                live_children: 1,
                deleted_children: 0,
            },
        };
        let msg = format!("{}", err);
        assert!(msg.contains("3 live product(s)"));
        assert!(msg.contains("1 live child node(s)"));
    }

    #[test]
    fn test_validation_violations_flatten() {
        let err = ValidationError::AmbiguousScope {
            first: "categoryId".to_string(),
            second: "subCategoryId".to_string(),
        };
        let violations = err.violations();
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].field, "categoryId");
        assert_eq!(violations[1].field, "subCategoryId");

        let missing = ValidationError::RequiredFieldMissing {
            field: "name".to_string(),
        };
        assert_eq!(missing.violations(), vec![FieldViolation::new("name", "is required")]);
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            CatalogError::from(AccessError::Unauthenticated).kind(),
            ErrorKind::Unauthenticated
        );
        assert_eq!(
            CatalogError::from(AccessError::Forbidden {
                principal_id: Uuid::nil(),
                action: "canRead".to_string(),
                entity_kind: "category".to_string(),
            })
            .kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(
            CatalogError::not_found(EntityKind::Product, Uuid::nil()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CatalogError::from(StorageError::UniqueViolation {
                kind: EntityKind::Category,
                field: "name".to_string(),
                value: "shoes".to_string(),
            })
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            CatalogError::from(StorageError::LockPoisoned).kind(),
            ErrorKind::Internal
        );
        assert_eq!(
            CatalogError::from(CacheError::Unavailable {
                reason: "down".to_string()
            })
            .kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_catalog_error_from_variants() {
        let storage = CatalogError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, CatalogError::Storage(_)));

        let validation = CatalogError::from(ValidationError::RequiredFieldMissing {
            field: "name".to_string(),
        });
        assert!(matches!(validation, CatalogError::Validation(_)));

        let config = CatalogError::from(ConfigError::MissingRequired {
            field: "lmdb.path".to_string(),
        });
        assert!(matches!(config, CatalogError::Config(_)));
    }
}
