//! Data API endpoints.
//!
//! `/api/:entity` and `/api/:entity/:id` accept every verb; the protocol
//! handler decides which operation, if any, a request maps to.

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use shoal_core::catalog::RequestContext;
use shoal_core::filter::parse_query;
use shoal_core::provider::HttpMethod;
use tracing::warn;

use crate::api::{DataApiRequest, DataApiResponse};
use crate::AppState;

/// Header carrying the caller's user id.
pub const USER_HEADER: &str = "x-user-id";
/// Header carrying the caller's comma-separated roles.
pub const ROLES_HEADER: &str = "x-user-roles";

/// Data API routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/:entity", any(handle_collection))
        .route("/api/:entity/:id", any(handle_item))
}

async fn handle_collection(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> DataApiResponse {
    handle(&state, method, entity, None, query, &headers, &body).await
}

async fn handle_item(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> DataApiResponse {
    handle(&state, method, entity, Some(id), query, &headers, &body).await
}

async fn handle(
    state: &AppState,
    method: Method,
    entity: String,
    id: Option<String>,
    query: Option<String>,
    headers: &HeaderMap,
    body: &[u8],
) -> DataApiResponse {
    let method = match method {
        Method::GET => HttpMethod::Get,
        Method::POST => HttpMethod::Post,
        Method::PUT => HttpMethod::Put,
        Method::DELETE => HttpMethod::Delete,
        _ => return DataApiResponse::MethodNotAllowed,
    };
    let body: Option<serde_json::Value> = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        match serde_json::from_slice(body) {
            Ok(json) => Some(json),
            Err(e) => {
                warn!(error = %e, "Malformed request body");
                return DataApiResponse::bad_request(format!("malformed JSON body: {e}"));
            }
        }
    };

    let request = DataApiRequest {
        method,
        entity,
        id,
        query: query.as_deref().map(parse_query).unwrap_or_default(),
        body,
        context: request_context(headers),
    };
    state.api.handle(request).await
}

/// Caller identity from the identity headers.
fn request_context(headers: &HeaderMap) -> RequestContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let mut context = match header(USER_HEADER) {
        Some(user) => RequestContext::user(user),
        None => RequestContext::anonymous(),
    };
    if let Some(roles) = header(ROLES_HEADER) {
        for role in roles.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            context = context.with_role(role);
        }
    }
    context
}

impl IntoResponse for DataApiResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match self.into_body() {
            Some(body) => (status, Json(body)).into_response(),
            None => status.into_response(),
        }
    }
}
