//! JSON request and response types for the HTTP gateway.

use serde::{Deserialize, Serialize};
use shoal_core::catalog::EntitySchema;
use shoal_core::ModelState;

/// Error response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Human readable message.
    pub message: String,
    /// Per-field validation messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_state: Option<ModelState>,
    /// Machine readable error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            model_state: None,
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_model_state(mut self, state: ModelState) -> Self {
        self.model_state = Some(state);
        self
    }
}

/// Count response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

/// Body of `POST /api/:entity?__action=get`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetRequest {
    /// Serialized filter expression.
    #[serde(default, rename = "where")]
    pub filter: Option<serde_json::Value>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Health status.
    pub status: String,
    /// Gateway version.
    pub version: String,
    /// Number of served entities.
    pub entities: usize,
}

/// Entity metadata listing.
#[derive(Debug, Serialize)]
pub struct SchemaResponse {
    pub entities: Vec<EntitySchema>,
}
