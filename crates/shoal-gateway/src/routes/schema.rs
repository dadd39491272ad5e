//! Schema endpoint.

use axum::{extract::State, routing::get, Json, Router};
use shoal_core::catalog::EntitySchema;

use crate::json::SchemaResponse;
use crate::AppState;

/// Schema routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/schema", get(handle_get_schema))
}

/// List the served entities.
async fn handle_get_schema(State(state): State<AppState>) -> Json<SchemaResponse> {
    let entities = state
        .api
        .registry()
        .entities()
        .iter()
        .map(|entity| EntitySchema::describe(entity))
        .collect();
    Json(SchemaResponse { entities })
}
