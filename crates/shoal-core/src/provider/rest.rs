//! Client-side provider speaking the Data API.
//!
//! Every operation becomes one HTTP request: filters and paging travel as
//! URL parameters, rows as JSON bodies. The HTTP client itself is supplied
//! by an [`HttpTransport`].

use async_trait::async_trait;
use serde_json::{Map, Value as Json};
use shoal_proto::{EntityId, FilterExpr, FindOptions, Row};
use std::sync::Arc;
use tracing::debug;

use super::{describe_id, DataProvider, Transaction};
use crate::catalog::EntityDef;
use crate::error::{Error, ModelState};
use crate::filter::{find_options_to_params, to_url_params};

/// Query parameter selecting the count operation.
pub const ACTION_PARAM: &str = "__action";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Json>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Option<Json>,
}

/// Sends Data API requests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, Error>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
        (**self).send(request).await
    }
}

/// Provider forwarding every operation to a Data API server.
#[derive(Debug, Clone)]
pub struct RestDataProvider<T> {
    transport: T,
    base_path: String,
}

impl<T: HttpTransport> RestDataProvider<T> {
    /// Create a provider for a server mounted at `/api`.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            base_path: "/api".to_string(),
        }
    }

    /// Use a different mount point.
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into().trim_end_matches('/').to_string();
        self
    }

    fn collection(&self, entity: &EntityDef) -> String {
        format!("{}/{}", self.base_path, entity.name())
    }

    fn item(&self, entity: &EntityDef, id: &EntityId) -> Result<String, Error> {
        let input = entity.id_to_input(id)?;
        let segment: String = form_urlencoded::byte_serialize(input.as_bytes()).collect();
        Ok(format!("{}/{}", self.collection(entity), segment.replace('+', "%20")))
    }

    async fn call(&self, request: HttpRequest, not_found: impl FnOnce() -> String) -> Result<Option<Json>, Error> {
        debug!(method = request.method.as_str(), path = %request.path, "Sending Data API request");
        let response = self.transport.send(request).await?;
        check_status(response, not_found)
    }
}

fn check_status(response: HttpResponse, not_found: impl FnOnce() -> String) -> Result<Option<Json>, Error> {
    let message = response
        .body
        .as_ref()
        .and_then(|b| b.get("message"))
        .and_then(Json::as_str)
        .unwrap_or_default()
        .to_string();
    match response.status {
        200..=299 => Ok(response.body),
        401 => Err(Error::Unauthorized),
        403 | 405 if message.is_empty() => Err(Error::Forbidden(format!(
            "server responded with status {}",
            response.status
        ))),
        403 | 405 => Err(Error::Forbidden(message)),
        404 => Err(Error::NotFound(not_found())),
        400..=499 => Err(client_error(response.body.as_ref(), message)),
        status => Err(Error::Provider(format!("server responded with status {status}"))),
    }
}

fn client_error(body: Option<&Json>, message: String) -> Error {
    let model_state = body
        .and_then(|b| b.get("modelState"))
        .and_then(Json::as_object)
        .filter(|m| !m.is_empty());
    if let Some(entries) = model_state {
        let mut state = ModelState::new();
        for (field, text) in entries {
            state.add(field.clone(), text.as_str().unwrap_or_default());
        }
        return Error::Validation(state);
    }
    match body.and_then(|b| b.get("code")).and_then(Json::as_str) {
        Some("duplicateKey") => Error::DuplicateKey(message),
        Some("notFound") => Error::NotFound(message),
        Some("unknownEntity") => Error::UnknownEntity(message),
        Some("circularFilter") => Error::CircularFilter(message),
        _ => Error::InvalidFilter(message),
    }
}

/// Parse a response row, keeping stored columns only.
fn parse_row(entity: &EntityDef, json: &Json) -> Result<Row, Error> {
    let mut row = entity.row_from_json(json)?;
    for field in entity.fields().iter().filter(|f| f.is_computed()) {
        row.remove(field.key());
    }
    Ok(row)
}

fn row_body(entity: &EntityDef, row: &Row, skip_nulls: bool) -> Result<Json, Error> {
    let mut body = Map::new();
    for (key, value) in row {
        if skip_nulls && value.is_null() {
            continue;
        }
        let field = entity.require_field(key)?;
        body.insert(key.clone(), entity.value_to_json(field, value)?);
    }
    Ok(Json::Object(body))
}

fn missing_body() -> Error {
    Error::Provider("server response has no body".into())
}

#[async_trait]
impl<T: HttpTransport> DataProvider for RestDataProvider<T> {
    async fn find(&self, entity: &EntityDef, options: &FindOptions) -> Result<Vec<Row>, Error> {
        let request = HttpRequest {
            method: HttpMethod::Get,
            path: self.collection(entity),
            query: find_options_to_params(options, entity)?,
            body: None,
        };
        let body = self
            .call(request, || entity.name().to_string())
            .await?
            .ok_or_else(missing_body)?;
        body.as_array()
            .ok_or_else(|| Error::Provider("expected an array of rows".into()))?
            .iter()
            .map(|item| parse_row(entity, item))
            .collect()
    }

    async fn count(&self, entity: &EntityDef, filter: Option<&FilterExpr>) -> Result<u64, Error> {
        let mut query = match filter {
            Some(filter) => to_url_params(filter, entity)?,
            None => Vec::new(),
        };
        query.push((ACTION_PARAM.to_string(), "count".to_string()));
        let request = HttpRequest {
            method: HttpMethod::Get,
            path: self.collection(entity),
            query,
            body: None,
        };
        let body = self
            .call(request, || entity.name().to_string())
            .await?
            .ok_or_else(missing_body)?;
        body.get("count")
            .and_then(Json::as_u64)
            .ok_or_else(|| Error::Provider("expected a count".into()))
    }

    async fn insert(&self, entity: &EntityDef, row: Row) -> Result<Row, Error> {
        let request = HttpRequest {
            method: HttpMethod::Post,
            path: self.collection(entity),
            query: Vec::new(),
            body: Some(row_body(entity, &row, true)?),
        };
        let body = self
            .call(request, || entity.name().to_string())
            .await?
            .ok_or_else(missing_body)?;
        parse_row(entity, &body)
    }

    async fn update(&self, entity: &EntityDef, id: &EntityId, changes: Row) -> Result<Row, Error> {
        let request = HttpRequest {
            method: HttpMethod::Put,
            path: self.item(entity, id)?,
            query: Vec::new(),
            body: Some(row_body(entity, &changes, false)?),
        };
        let body = self
            .call(request, || describe_id(entity, id))
            .await?
            .ok_or_else(missing_body)?;
        parse_row(entity, &body)
    }

    async fn delete(&self, entity: &EntityDef, id: &EntityId) -> Result<(), Error> {
        let request = HttpRequest {
            method: HttpMethod::Delete,
            path: self.item(entity, id)?,
            query: Vec::new(),
            body: None,
        };
        self.call(request, || describe_id(entity, id)).await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Arc<dyn Transaction>, Error> {
        Err(Error::Transaction(
            "transactions are not available over the Data API".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldDef;
    use parking_lot::Mutex;
    use serde_json::json;
    use shoal_proto::Value;

    /// Transport answering every request with a fixed response.
    struct Canned {
        response: HttpResponse,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl Canned {
        fn new(status: u16, body: Option<Json>) -> Arc<Self> {
            Arc::new(Self {
                response: HttpResponse { status, body },
                requests: Mutex::new(Vec::new()),
            })
        }

        fn last(&self) -> HttpRequest {
            self.requests.lock().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl HttpTransport for Canned {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
            self.requests.lock().push(request);
            Ok(self.response.clone())
        }
    }

    fn lines() -> EntityDef {
        EntityDef::new("lines", "key")
            .with_field(FieldDef::integer("order"))
            .with_field(FieldDef::string("line"))
            .with_field(FieldDef::compound("key", ["order", "line"]))
            .with_field(FieldDef::computed("label", crate::catalog::ValueType::String, |row| {
                Value::String(format!("{}:{}", row.get_or_null("order"), row.get_or_null("line")))
            }))
    }

    #[tokio::test]
    async fn test_find_sends_url_params() {
        let transport = Canned::new(200, Some(json!([{"key": [1, "a"], "order": 1, "line": "a", "label": "1:a"}])));
        let provider = RestDataProvider::new(transport.clone());
        let entity = lines();
        let options = FindOptions::new()
            .with_filter(FilterExpr::gt("order", 0))
            .with_limit(5);
        let rows = provider.find(&entity, &options).await.unwrap();

        assert_eq!(rows, vec![Row::new().with("order", 1).with("line", "a")]);
        let request = transport.last();
        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.path, "/api/lines");
        assert_eq!(request.query[0], ("order_gt".to_string(), "0".to_string()));
    }

    #[tokio::test]
    async fn test_compound_id_in_path() {
        let transport = Canned::new(204, None);
        let provider = RestDataProvider::new(transport.clone()).with_base_path("/data/");
        let id = EntityId::Compound(vec![Value::Integer(2), Value::from("b c")]);
        provider.delete(&lines(), &id).await.unwrap();
        assert_eq!(transport.last().path, "/data/lines/%5B2%2C%22b%20c%22%5D");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let entity = lines();
        let id = EntityId::Compound(vec![Value::Integer(1), Value::from("a")]);

        let provider = RestDataProvider::new(Canned::new(404, None));
        assert!(matches!(
            provider.update(&entity, &id, Row::new()).await,
            Err(Error::NotFound(_))
        ));

        let provider = RestDataProvider::new(Canned::new(405, None));
        assert!(matches!(provider.delete(&entity, &id).await, Err(Error::Forbidden(_))));

        let body = json!({"message": "validation failed", "modelState": {"line": "required"}});
        let provider = RestDataProvider::new(Canned::new(400, Some(body)));
        match provider.insert(&entity, Row::new()).await {
            Err(Error::Validation(state)) => assert_eq!(state.get("line"), Some("required")),
            other => panic!("expected validation error, got {other:?}"),
        }

        let body = json!({"message": "duplicate", "code": "duplicateKey"});
        let provider = RestDataProvider::new(Canned::new(400, Some(body)));
        assert!(matches!(
            provider.insert(&entity, Row::new()).await,
            Err(Error::DuplicateKey(_))
        ));

        let provider = RestDataProvider::new(Canned::new(500, Some(json!({"message": "x"}))));
        assert!(matches!(provider.count(&entity, None).await, Err(Error::Provider(_))));
        assert!(matches!(provider.begin().await, Err(Error::Transaction(_))));
    }

    #[tokio::test]
    async fn test_count_uses_action_param() {
        let transport = Canned::new(200, Some(json!({"count": 7})));
        let provider = RestDataProvider::new(transport.clone());
        let count = provider
            .count(&lines(), Some(&FilterExpr::eq("line", "a")))
            .await
            .unwrap();
        assert_eq!(count, 7);
        assert_eq!(
            transport.last().query,
            vec![
                ("line".to_string(), "a".to_string()),
                ("__action".to_string(), "count".to_string())
            ]
        );
    }
}
