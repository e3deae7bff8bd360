//! Discriminated operation outcomes.
//!
//! Every entry point of the engine returns an [`Outcome<T>`]: either the value
//! or one of the error shapes of the service boundary, each with a status code
//! and a caller-facing message. Nothing else crosses that boundary.

use crate::{CatalogError, CatalogResult, ErrorKind, FieldViolation};
use serde::{Deserialize, Serialize};

/// Result shape returned to callers of the catalog service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome<T> {
    Ok { value: T },
    Unauthenticated { message: String },
    Forbidden { message: String },
    ValidationFailed {
        message: String,
        violations: Vec<FieldViolation>,
    },
    NotFound { message: String },
    Conflict { message: String },
    Internal { message: String },
}

impl<T> Outcome<T> {
    pub fn ok(value: T) -> Self {
        Outcome::Ok { value }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Outcome::Ok { .. } => "OK",
            Outcome::Unauthenticated { .. } => "UNAUTHENTICATED",
            Outcome::Forbidden { .. } => "FORBIDDEN",
            Outcome::ValidationFailed { .. } => "VALIDATION_FAILED",
            Outcome::NotFound { .. } => "NOT_FOUND",
            Outcome::Conflict { .. } => "CONFLICT",
            Outcome::Internal { .. } => "INTERNAL",
        }
    }

    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        match self {
            Outcome::Ok { .. } => 200,
            Outcome::Unauthenticated { .. } => 401,
            Outcome::Forbidden { .. } => 403,
            Outcome::ValidationFailed { .. } => 400,
            Outcome::NotFound { .. } => 404,
            Outcome::Conflict { .. } => 409,
            Outcome::Internal { .. } => 500,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Ok { .. } => None,
            Outcome::Unauthenticated { .. } => Some(ErrorKind::Unauthenticated),
            Outcome::Forbidden { .. } => Some(ErrorKind::Forbidden),
            Outcome::ValidationFailed { .. } => Some(ErrorKind::ValidationFailed),
            Outcome::NotFound { .. } => Some(ErrorKind::NotFound),
            Outcome::Conflict { .. } => Some(ErrorKind::Conflict),
            Outcome::Internal { .. } => Some(ErrorKind::Internal),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Outcome::Ok { .. } => "ok",
            Outcome::Unauthenticated { message }
            | Outcome::Forbidden { message }
            | Outcome::ValidationFailed { message, .. }
            | Outcome::NotFound { message }
            | Outcome::Conflict { message }
            | Outcome::Internal { message } => message,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Ok { value } => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Outcome::Ok { value } => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok { value } => Outcome::Ok { value: f(value) },
            Outcome::Unauthenticated { message } => Outcome::Unauthenticated { message },
            Outcome::Forbidden { message } => Outcome::Forbidden { message },
            Outcome::ValidationFailed {
                message,
                violations,
            } => Outcome::ValidationFailed {
                message,
                violations,
            },
            Outcome::NotFound { message } => Outcome::NotFound { message },
            Outcome::Conflict { message } => Outcome::Conflict { message },
            Outcome::Internal { message } => Outcome::Internal { message },
        }
    }
}

impl<T> From<CatalogError> for Outcome<T> {
    fn from(err: CatalogError) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::Unauthenticated => Outcome::Unauthenticated { message },
            ErrorKind::Forbidden => Outcome::Forbidden { message },
            ErrorKind::ValidationFailed => {
                let violations = match &err {
                    CatalogError::Validation(validation) => validation.violations(),
                    _ => Vec::new(),
                };
                Outcome::ValidationFailed {
                    message,
                    violations,
                }
            }
            ErrorKind::NotFound => Outcome::NotFound { message },
            ErrorKind::Conflict => Outcome::Conflict { message },
            // Internal details stay in the logs.
            ErrorKind::Internal => Outcome::Internal {
                message: "Internal error".to_string(),
            },
        }
    }
}

impl<T> From<CatalogResult<T>> for Outcome<T> {
    fn from(result: CatalogResult<T>) -> Self {
        match result {
            Ok(value) => Outcome::Ok { value },
            Err(err) => err.into(),
        }
    }
}
