//! Core error types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-field validation messages, keyed by field key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelState(BTreeMap<String, String>);

impl ModelState {
    /// Create an empty model state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message for a field. The first message per field wins.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_insert_with(|| message.into());
    }

    /// Message recorded for `field`, if any.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Check if no field failed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of failing fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over `(field, message)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// `Ok(())` when empty, otherwise a validation error carrying this state.
    pub fn into_result(self) -> Result<(), Error> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

/// Core errors.
#[derive(Debug, Error)]
pub enum Error {
    /// One or more fields failed validation.
    #[error("validation failed: {0}")]
    Validation(ModelState),

    /// Row not found.
    #[error("{0} not found")]
    NotFound(String),

    /// A row with the same id already exists.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The caller may not perform the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The operation requires an authenticated caller.
    #[error("unauthorized")]
    Unauthorized,

    /// Field key is not defined on the entity.
    #[error("unknown field '{field}' on entity '{entity}'")]
    UnknownField { entity: String, field: String },

    /// Entity is not registered.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    /// Custom filter expansion did not terminate.
    #[error("circular custom filter: {0}")]
    CircularFilter(String),

    /// Filter is malformed.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// Value cannot be converted for a field.
    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// Operator is not supported by the field.
    #[error("operator '{op}' is not supported on field '{field}'")]
    UnsupportedOperator { field: String, op: String },

    /// Compound value has the wrong number of components.
    #[error("field '{field}' expects {expected} components, got {actual}")]
    CompoundArity {
        field: String,
        expected: usize,
        actual: usize,
    },

    /// Entity definitions are inconsistent.
    #[error("schema error: {0}")]
    Schema(String),

    /// Transaction error.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Opaque backend failure.
    #[error("provider error: {0}")]
    Provider(String),

    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] shoal_proto::Error),
}

impl Error {
    /// Create an invalid value error.
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code reported to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "notFound",
            Error::DuplicateKey(_) => "duplicateKey",
            Error::Forbidden(_) => "forbidden",
            Error::Unauthorized => "unauthorized",
            Error::UnknownField { .. } => "unknownField",
            Error::UnknownEntity(_) => "unknownEntity",
            Error::CircularFilter(_) => "circularFilter",
            Error::InvalidFilter(_) | Error::Protocol(_) | Error::Json(_) => "invalidFilter",
            Error::InvalidValue { .. } => "invalidValue",
            Error::UnsupportedOperator { .. } => "unsupportedOperator",
            Error::CompoundArity { .. } => "compoundArity",
            Error::Schema(_) => "schema",
            Error::Transaction(_) => "transaction",
            Error::Provider(_) | Error::Sqlite(_) => "provider",
        }
    }

    /// Check if the error was caused by the request rather than the backend.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Error::Schema(_) | Error::Transaction(_) | Error::Provider(_) | Error::Sqlite(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_state_keeps_first_message() {
        let mut state = ModelState::new();
        state.add("name", "required");
        state.add("name", "too short");
        state.add("age", "invalid");

        assert_eq!(state.len(), 2);
        assert_eq!(state.get("name"), Some("required"));
        assert_eq!(state.to_string(), "age: invalid; name: required");
        assert!(matches!(state.into_result(), Err(Error::Validation(_))));
        assert!(ModelState::new().into_result().is_ok());
    }

    #[test]
    fn test_model_state_serializes_as_map() {
        let mut state = ModelState::new();
        state.add("name", "required");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json, serde_json::json!({"name": "required"}));
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::NotFound("task".into()).is_client_error());
        assert!(!Error::Provider("disk".into()).is_client_error());
        assert_eq!(Error::DuplicateKey("1".into()).code(), "duplicateKey");
    }
}
