//! Data API protocol handler.
//!
//! Every request runs through the same four steps:
//!
//! 1. **Parse**: resolve the entity, turn the query string and JSON body into
//!    find options, ids and rows.
//! 2. **Authorize**: check the entity permission for the operation, then the
//!    per-field read and update rules.
//! 3. **Execute**: delegate to a [`Repository`] over the configured provider.
//! 4. **Respond**: produce exactly one [`DataApiResponse`].
//!
//! The handler knows nothing about axum; `routes::data` binds it to HTTP.

use std::sync::Arc;

use serde_json::Value as Json;
use shoal_core::catalog::{Decision, EntityDef, EntityRegistry, Operation, RequestContext};
use shoal_core::filter::json::from_json;
use shoal_core::filter::{find_options_from_params, from_url_params, DEFAULT_PAGE_SIZE};
use shoal_core::provider::rest::ACTION_PARAM;
use shoal_core::provider::{DataProvider, HttpMethod};
use shoal_core::{Error, ModelState, Repository};
use shoal_proto::{FilterExpr, OrderSpec, Row, Value};
use tracing::{debug, error, warn};

use crate::json::{CountResponse, ErrorBody, GetRequest};

/// One Data API call, already split out of its HTTP envelope.
#[derive(Debug, Clone)]
pub struct DataApiRequest {
    pub method: HttpMethod,
    /// Entity name from the path.
    pub entity: String,
    /// Raw id path segment, if the request addresses one row.
    pub id: Option<String>,
    /// Decoded query string parameters.
    pub query: Vec<(String, String)>,
    /// Parsed JSON body.
    pub body: Option<Json>,
    /// Caller identity.
    pub context: RequestContext,
}

impl DataApiRequest {
    pub fn new(method: HttpMethod, entity: impl Into<String>) -> Self {
        Self {
            method,
            entity: entity.into(),
            id: None,
            query: Vec::new(),
            body: None,
            context: RequestContext::anonymous(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: Json) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    fn action(&self) -> Option<&str> {
        self.query
            .iter()
            .rev()
            .find(|(key, _)| key == ACTION_PARAM)
            .map(|(_, value)| value.as_str())
    }
}

/// Outcome of a Data API call.
#[derive(Debug, Clone, PartialEq)]
pub enum DataApiResponse {
    /// 200 with a row, a row array or a count.
    Success(Json),
    /// 201 with the inserted row.
    Created(Json),
    /// 204.
    Deleted,
    /// 404.
    NotFound,
    /// 405: the operation is never available on the entity.
    MethodNotAllowed,
    /// 403: the caller may not perform the operation. The reason is logged,
    /// never sent.
    Forbidden(String),
    /// 400 for bad requests, 500 for backend failures.
    Error { status: u16, body: ErrorBody },
}

impl DataApiResponse {
    /// Bad request with a plain message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        DataApiResponse::Error {
            status: 400,
            body: ErrorBody::new(message),
        }
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        match self {
            DataApiResponse::Success(_) => 200,
            DataApiResponse::Created(_) => 201,
            DataApiResponse::Deleted => 204,
            DataApiResponse::NotFound => 404,
            DataApiResponse::MethodNotAllowed => 405,
            DataApiResponse::Forbidden(_) => 403,
            DataApiResponse::Error { status, .. } => *status,
        }
    }

    /// JSON body, if the response carries one.
    pub fn into_body(self) -> Option<Json> {
        match self {
            DataApiResponse::Success(body) | DataApiResponse::Created(body) => Some(body),
            DataApiResponse::Error { body, .. } => serde_json::to_value(body).ok(),
            DataApiResponse::Deleted
            | DataApiResponse::NotFound
            | DataApiResponse::MethodNotAllowed
            | DataApiResponse::Forbidden(_) => None,
        }
    }

    fn from_error(err: Error) -> Self {
        match err {
            Error::NotFound(what) => {
                debug!(%what, "Row not found");
                DataApiResponse::NotFound
            }
            Error::UnknownEntity(name) => {
                debug!(entity = %name, "Unknown entity");
                DataApiResponse::NotFound
            }
            Error::Forbidden(message) => {
                warn!(%message, "Rejected request");
                DataApiResponse::Forbidden(message)
            }
            Error::Unauthorized => {
                warn!("Rejected unauthenticated request");
                DataApiResponse::Forbidden("authentication required".into())
            }
            Error::Validation(state) => DataApiResponse::Error {
                status: 400,
                body: ErrorBody::new("validation failed")
                    .with_code("validation")
                    .with_model_state(state),
            },
            err if err.is_client_error() => {
                debug!(error = %err, "Bad request");
                DataApiResponse::Error {
                    status: 400,
                    body: ErrorBody::new(err.to_string()).with_code(err.code()),
                }
            }
            err => {
                error!(error = %err, "Data API request failed");
                DataApiResponse::Error {
                    status: 500,
                    body: ErrorBody::new("internal server error"),
                }
            }
        }
    }
}

/// Operation selected by verb, id presence and `__action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route<'a> {
    Find,
    Count,
    Get(&'a str),
    Insert,
    Update(&'a str),
    Delete(&'a str),
}

impl<'a> Route<'a> {
    fn of(request: &'a DataApiRequest) -> Option<Self> {
        let id = request.id.as_deref();
        Some(match (request.method, id, request.action()) {
            (HttpMethod::Get | HttpMethod::Post, None, Some("count")) => Route::Count,
            (HttpMethod::Get, None, _) | (HttpMethod::Post, None, Some("get")) => Route::Find,
            (HttpMethod::Post, None, None) => Route::Insert,
            (HttpMethod::Get, Some(id), _) => Route::Get(id),
            (HttpMethod::Put, Some(id), _) => Route::Update(id),
            (HttpMethod::Delete, Some(id), _) => Route::Delete(id),
            _ => return None,
        })
    }

    fn operation(&self) -> Operation {
        match self {
            Route::Find | Route::Count | Route::Get(_) => Operation::Read,
            Route::Insert => Operation::Insert,
            Route::Update(_) => Operation::Update,
            Route::Delete(_) => Operation::Delete,
        }
    }
}

/// Server side of the Data API.
#[derive(Clone)]
pub struct DataApi {
    registry: Arc<EntityRegistry>,
    provider: Arc<dyn DataProvider>,
    default_page_size: u32,
}

impl DataApi {
    pub fn new(registry: Arc<EntityRegistry>, provider: Arc<dyn DataProvider>) -> Self {
        Self {
            registry,
            provider,
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Page size applied when `_page` is given without `_limit`.
    pub fn with_default_page_size(mut self, size: u32) -> Self {
        self.default_page_size = size.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn provider(&self) -> &Arc<dyn DataProvider> {
        &self.provider
    }

    /// Handle one request.
    pub async fn handle(&self, request: DataApiRequest) -> DataApiResponse {
        debug!(
            method = request.method.as_str(),
            entity = %request.entity,
            id = ?request.id,
            "Handling Data API request"
        );
        match self.dispatch(&request).await {
            Ok(response) => response,
            Err(err) => DataApiResponse::from_error(err),
        }
    }

    async fn dispatch(&self, request: &DataApiRequest) -> Result<DataApiResponse, Error> {
        let entity = self.registry.require(&request.entity)?;
        let Some(route) = Route::of(request) else {
            warn!(method = request.method.as_str(), entity = %request.entity, "Unsupported Data API call");
            return Ok(DataApiResponse::MethodNotAllowed);
        };
        if let Some(denied) = authorize(&entity, route.operation(), &request.context) {
            return Ok(denied);
        }

        let repo = Repository::new(entity.clone(), self.provider.clone());
        match route {
            Route::Find => self.find(&repo, request).await,
            Route::Count => count(&repo, request).await,
            Route::Get(raw) => {
                let id = entity.parse_id(raw)?;
                match repo.find_id(&id).await? {
                    Some(row) => Ok(DataApiResponse::Success(output(&entity, &row)?)),
                    None => Ok(DataApiResponse::NotFound),
                }
            }
            Route::Insert => {
                let Some(body) = request.body.as_ref() else {
                    return Ok(DataApiResponse::bad_request("request body is required"));
                };
                check_writable(&entity, body, None)?;
                let created = repo.insert(input_row(&entity, body)?).await?;
                Ok(DataApiResponse::Created(output(&entity, &created)?))
            }
            Route::Update(raw) => {
                let Some(body) = request.body.as_ref() else {
                    return Ok(DataApiResponse::bad_request("request body is required"));
                };
                let id = entity.parse_id(raw)?;
                let Some(existing) = repo.find_id(&id).await? else {
                    return Ok(DataApiResponse::NotFound);
                };
                check_writable(&entity, body, Some(&existing))?;
                let updated = repo.update(&id, input_row(&entity, body)?).await?;
                Ok(DataApiResponse::Success(output(&entity, &updated)?))
            }
            Route::Delete(raw) => {
                let id = entity.parse_id(raw)?;
                repo.delete(&id).await?;
                Ok(DataApiResponse::Deleted)
            }
        }
    }

    async fn find(&self, repo: &Repository, request: &DataApiRequest) -> Result<DataApiResponse, Error> {
        let entity = repo.entity();
        let mut options = find_options_from_params(&request.query, entity, self.default_page_size)?;
        options.filter = with_body_filter(entity, options.filter.take(), request.body.as_ref())?;
        check_readable(entity, options.filter.as_ref(), &options.order_by)?;

        let rows = repo.find(&options).await?;
        let items = rows
            .iter()
            .map(|row| output(entity, row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DataApiResponse::Success(Json::Array(items)))
    }
}

async fn count(repo: &Repository, request: &DataApiRequest) -> Result<DataApiResponse, Error> {
    let entity = repo.entity();
    let filter = from_url_params(&request.query, entity)?;
    let filter = with_body_filter(entity, filter, request.body.as_ref())?;
    check_readable(entity, filter.as_ref(), &[])?;

    let count = repo.count(filter.as_ref()).await?;
    Ok(DataApiResponse::Success(serde_json::to_value(CountResponse { count })?))
}

fn authorize(entity: &EntityDef, operation: Operation, context: &RequestContext) -> Option<DataApiResponse> {
    let verb = match operation {
        Operation::Read => "read",
        Operation::Insert => "insert",
        Operation::Update => "update",
        Operation::Delete => "delete",
    };
    match entity.permissions().check(operation, context) {
        Decision::Granted => None,
        Decision::NotAllowed => {
            warn!(entity = entity.name(), operation = verb, "Operation not allowed");
            Some(DataApiResponse::MethodNotAllowed)
        }
        Decision::Forbidden => {
            warn!(entity = entity.name(), operation = verb, user = ?context.user, "Operation forbidden");
            Some(DataApiResponse::Forbidden(format!(
                "not allowed to {verb} {}",
                entity.name()
            )))
        }
    }
}

/// AND the `where` member of a JSON body onto a filter.
fn with_body_filter(
    entity: &EntityDef,
    filter: Option<FilterExpr>,
    body: Option<&Json>,
) -> Result<Option<FilterExpr>, Error> {
    let Some(body) = body else {
        return Ok(filter);
    };
    let request: GetRequest = serde_json::from_value(body.clone())?;
    let Some(raw) = request.filter else {
        return Ok(filter);
    };
    let parsed = from_json(&raw, entity)?;
    Ok(Some(match filter {
        Some(filter) => filter.and_also(parsed),
        None => parsed,
    }))
}

/// Fields hidden from the API may not be filtered or sorted on.
fn check_readable(entity: &EntityDef, filter: Option<&FilterExpr>, order: &[OrderSpec]) -> Result<(), Error> {
    let filtered = filter.map(FilterExpr::fields).unwrap_or_default();
    let keys = filtered
        .iter()
        .map(String::as_str)
        .chain(order.iter().map(|o| o.field.as_str()));
    for key in keys {
        if !entity.require_field(key)?.allow_api_read() {
            return Err(Error::Forbidden(format!("field '{key}' is not readable")));
        }
    }
    Ok(())
}

/// Writing a changed value to a field the API may not update is forbidden.
///
/// Inserts compare against an empty row, updates against the stored row.
fn check_writable(entity: &EntityDef, body: &Json, existing: Option<&Row>) -> Result<(), Error> {
    let Some(object) = body.as_object() else {
        return Ok(());
    };
    for (key, raw) in object {
        let Some(field) = entity.field(key) else {
            continue;
        };
        if field.allow_api_update() || field.is_computed() {
            continue;
        }
        let value = match entity.value_from_json(field, raw) {
            Ok(value) => value,
            Err(err) if err.is_client_error() => {
                let message = match err {
                    Error::InvalidValue { message, .. } => message,
                    other => other.to_string(),
                };
                let mut state = ModelState::new();
                state.add(key.clone(), message);
                return Err(Error::Validation(state));
            }
            Err(err) => return Err(err),
        };
        let changed = match existing {
            Some(row) => !value.loose_eq(&entity.field_value(field, row)),
            None => !is_blank(&value),
        };
        if changed {
            return Err(Error::Forbidden(format!("field '{key}' is read-only")));
        }
    }
    Ok(())
}

/// Untyped input row; the repository converts each value and reports
/// conversion failures in the model state.
fn input_row(entity: &EntityDef, body: &Json) -> Result<Row, Error> {
    let object = body
        .as_object()
        .ok_or_else(|| Error::invalid_value(entity.name(), "expected a JSON object"))?;
    let mut row = Row::new();
    for (key, raw) in object {
        entity.require_field(key)?;
        row.set(key.clone(), Value::Json(raw.clone()));
    }
    Ok(row)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::List(items) => items.iter().all(Value::is_null),
        _ => false,
    }
}

fn output(entity: &EntityDef, row: &Row) -> Result<Json, Error> {
    Ok(Json::Object(entity.row_to_json(row, true)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use shoal_core::catalog::{EntityPermissions, FieldDef, Permission};
    use shoal_core::provider::{MemoryDataProvider, Transaction};
    use shoal_proto::{EntityId, FindOptions};

    fn accounts() -> EntityDef {
        EntityDef::new("accounts", "id")
            .with_field(FieldDef::integer("id").auto_increment())
            .with_field(FieldDef::string("name").required())
            .with_field(FieldDef::string("secret").hidden())
            .with_field(FieldDef::string("plan").read_only())
            .with_permissions(EntityPermissions {
                delete: Permission::Role("admin".into()),
                ..EntityPermissions::allow_all()
            })
    }

    async fn api() -> (DataApi, Arc<EntityDef>) {
        let registry = Arc::new(EntityRegistry::new());
        let entity = registry.register(accounts()).unwrap();
        let provider = Arc::new(MemoryDataProvider::new());
        provider
            .insert(
                &entity,
                Row::new().with("name", "acme").with("secret", "s3").with("plan", "gold"),
            )
            .await
            .unwrap();
        (DataApi::new(registry, provider), entity)
    }

    fn request(method: HttpMethod) -> DataApiRequest {
        DataApiRequest::new(method, "accounts")
    }

    #[tokio::test]
    async fn test_hidden_fields_are_stripped_and_unfilterable() {
        let (api, _) = api().await;
        let response = api.handle(request(HttpMethod::Get).with_id("1")).await;
        assert_eq!(
            response,
            DataApiResponse::Success(json!({"id": 1, "name": "acme", "plan": "gold"}))
        );

        let response = api.handle(request(HttpMethod::Get).with_param("secret", "s3")).await;
        assert!(matches!(response, DataApiResponse::Forbidden(_)));
        let response = api.handle(request(HttpMethod::Get).with_param("_sort", "secret")).await;
        assert!(matches!(response, DataApiResponse::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_read_only_fields() {
        let (api, _) = api().await;
        let same = api
            .handle(request(HttpMethod::Put).with_id("1").with_body(json!({"id": 1, "plan": "gold", "name": "acme inc"})))
            .await;
        assert_eq!(same.status(), 200);

        let changed = api
            .handle(request(HttpMethod::Put).with_id("1").with_body(json!({"plan": "free"})))
            .await;
        assert!(matches!(changed, DataApiResponse::Forbidden(_)));

        let garbled = api
            .handle(request(HttpMethod::Put).with_id("1").with_body(json!({"id": "abc"})))
            .await;
        match garbled {
            DataApiResponse::Error { status: 400, body } => {
                let state = body.model_state.expect("model state");
                assert!(state.get("id").is_some());
            }
            other => panic!("expected a validation error, got {other:?}"),
        }

        let insert = api
            .handle(request(HttpMethod::Post).with_body(json!({"name": "b", "plan": "gold"})))
            .await;
        assert!(matches!(insert, DataApiResponse::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_permission_decisions() {
        let (api, _) = api().await;
        let anonymous = api.handle(request(HttpMethod::Delete).with_id("1")).await;
        assert!(matches!(anonymous, DataApiResponse::Forbidden(_)));
        assert_eq!(anonymous.status(), 403);
        assert_eq!(anonymous.into_body(), None);

        let admin = RequestContext::user("root").with_role("admin");
        let deleted = api
            .handle(request(HttpMethod::Delete).with_id("1").with_context(admin.clone()))
            .await;
        assert_eq!(deleted, DataApiResponse::Deleted);
        let again = api
            .handle(request(HttpMethod::Delete).with_id("1").with_context(admin))
            .await;
        assert_eq!(again, DataApiResponse::NotFound);

        let registry = Arc::new(EntityRegistry::new());
        registry
            .register(EntityDef::new("logs", "id").with_field(FieldDef::integer("id")))
            .unwrap();
        let read_only = DataApi::new(registry, Arc::new(MemoryDataProvider::new()));
        let insert = read_only
            .handle(DataApiRequest::new(HttpMethod::Post, "logs").with_body(json!({"id": 1})))
            .await;
        assert_eq!(insert, DataApiResponse::MethodNotAllowed);
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let (api, entity) = api().await;
        let response = api
            .handle(request(HttpMethod::Put).with_id("42").with_body(json!({"name": "ghost"})))
            .await;
        assert_eq!(response, DataApiResponse::NotFound);
        assert_eq!(api.provider().count(&entity, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_count_and_body_filter() {
        let (api, _) = api().await;
        api.handle(request(HttpMethod::Post).with_body(json!({"name": "zen"})))
            .await;

        let count = api.handle(request(HttpMethod::Get).with_param(ACTION_PARAM, "count")).await;
        assert_eq!(count, DataApiResponse::Success(json!({"count": 2})));

        let found = api
            .handle(
                request(HttpMethod::Post)
                    .with_param(ACTION_PARAM, "get")
                    .with_body(json!({"where": {"name": {"$startsWith": "z"}}})),
            )
            .await;
        match found {
            DataApiResponse::Success(Json::Array(rows)) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0]["name"], "zen");
            }
            other => panic!("expected rows, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let (api, _) = api().await;
        let unknown = api.handle(DataApiRequest::new(HttpMethod::Get, "nope")).await;
        assert_eq!(unknown, DataApiResponse::NotFound);

        let filter = api.handle(request(HttpMethod::Get).with_param("where", "{not json")).await;
        assert_eq!(filter.status(), 400);

        let field = api.handle(request(HttpMethod::Get).with_param("color", "red")).await;
        assert_eq!(field.status(), 400);

        let invalid = api.handle(request(HttpMethod::Post).with_body(json!({"name": ""}))).await;
        match invalid {
            DataApiResponse::Error { status: 400, body } => {
                assert!(body.model_state.unwrap().get("name").is_some());
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        let verb = api.handle(request(HttpMethod::Put)).await;
        assert_eq!(verb, DataApiResponse::MethodNotAllowed);
    }

    /// Provider failing every call.
    struct Broken;

    #[async_trait]
    impl DataProvider for Broken {
        async fn find(&self, _: &EntityDef, _: &FindOptions) -> Result<Vec<Row>, Error> {
            Err(Error::Provider("disk on fire".into()))
        }

        async fn count(&self, _: &EntityDef, _: Option<&FilterExpr>) -> Result<u64, Error> {
            Err(Error::Provider("disk on fire".into()))
        }

        async fn insert(&self, _: &EntityDef, _: Row) -> Result<Row, Error> {
            Err(Error::Provider("disk on fire".into()))
        }

        async fn update(&self, _: &EntityDef, _: &EntityId, _: Row) -> Result<Row, Error> {
            Err(Error::Provider("disk on fire".into()))
        }

        async fn delete(&self, _: &EntityDef, _: &EntityId) -> Result<(), Error> {
            Err(Error::Provider("disk on fire".into()))
        }

        async fn begin(&self) -> Result<Arc<dyn Transaction>, Error> {
            Err(Error::Transaction("unsupported".into()))
        }
    }

    #[tokio::test]
    async fn test_provider_errors_are_generic() {
        let registry = Arc::new(EntityRegistry::new());
        registry.register(accounts()).unwrap();
        let api = DataApi::new(registry, Arc::new(Broken));
        let response = api.handle(request(HttpMethod::Get)).await;
        assert_eq!(response.status(), 500);
        let body = response.into_body().unwrap();
        assert_eq!(body, json!({"message": "internal server error"}));
    }
}
