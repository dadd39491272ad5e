//! The REST data provider talking to the gateway router in process.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::Router;
use shoal_core::catalog::{EntityDef, EntityPermissions, EntityRegistry, FieldDef};
use shoal_core::filter::encode_query;
use shoal_core::provider::{
    run_in_transaction, DataProvider, HttpRequest, HttpResponse, HttpTransport,
    MemoryDataProvider, RestDataProvider,
};
use shoal_core::{Error, Repository};
use shoal_gateway::{create_router, AppState, DataApi, GatewayConfig};
use shoal_proto::{EntityId, FilterExpr, FindOptions, OrderSpec, Row, Value};
use tower::ServiceExt;

/// Transport dispatching requests straight into a router.
struct RouterTransport {
    router: Router,
}

#[async_trait]
impl HttpTransport for RouterTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
        let query = encode_query(&request.query);
        let uri = if query.is_empty() {
            request.path.clone()
        } else {
            format!("{}?{}", request.path, query)
        };
        let body = match &request.body {
            Some(json) => Body::from(serde_json::to_vec(json)?),
            None => Body::empty(),
        };
        let http_request = Request::builder()
            .method(request.method.as_str())
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();

        let response = self.router.clone().oneshot(http_request).await.unwrap();
        let status = response.status().as_u16();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(&bytes)?)
        };
        Ok(HttpResponse { status, body })
    }
}

struct TestContext {
    registry: Arc<EntityRegistry>,
    server: Arc<MemoryDataProvider>,
    client: Arc<RestDataProvider<RouterTransport>>,
}

impl TestContext {
    fn new() -> Self {
        let registry = Arc::new(EntityRegistry::new());
        registry
            .register(
                EntityDef::new("tasks", "id")
                    .with_field(FieldDef::integer("id").auto_increment())
                    .with_field(FieldDef::string("title").required())
                    .with_field(FieldDef::integer("priority"))
                    .with_permissions(EntityPermissions::allow_all()),
            )
            .unwrap();
        registry
            .register(
                EntityDef::new("lines", "key")
                    .with_field(FieldDef::integer("order"))
                    .with_field(FieldDef::string("line"))
                    .with_field(FieldDef::compound("key", ["order", "line"]))
                    .with_permissions(EntityPermissions::allow_all()),
            )
            .unwrap();
        registry
            .register(EntityDef::new("archive", "id").with_field(FieldDef::integer("id")))
            .unwrap();

        let server = Arc::new(MemoryDataProvider::new());
        let api = DataApi::new(registry.clone(), server.clone());
        let router = create_router(AppState::new(api, GatewayConfig::default()));
        let client = Arc::new(RestDataProvider::new(RouterTransport { router }));
        Self {
            registry,
            server,
            client,
        }
    }

    fn entity(&self, name: &str) -> Arc<EntityDef> {
        self.registry.require(name).unwrap()
    }

    fn repo(&self, name: &str) -> Repository {
        Repository::new(self.entity(name), self.client.clone())
    }
}

#[tokio::test]
async fn test_repository_over_rest() {
    let ctx = TestContext::new();
    let tasks = ctx.repo("tasks");

    for (title, priority) in [("c", 1), ("a", 3), ("b", 2), ("d", 3)] {
        tasks
            .insert(Row::new().with("title", title).with("priority", priority))
            .await
            .unwrap();
    }
    assert_eq!(ctx.server.rows(tasks.entity()).len(), 4);

    let options = FindOptions::new()
        .with_filter(FilterExpr::gte("priority", 2))
        .with_order(OrderSpec::desc("title"))
        .with_limit(2)
        .with_page(1);
    let titles: Vec<_> = tasks
        .find(&options)
        .await
        .unwrap()
        .iter()
        .filter_map(|r| r.get("title").and_then(Value::as_str).map(str::to_string))
        .collect();
    assert_eq!(titles, vec!["d", "b"]);

    let either = FilterExpr::or([FilterExpr::eq("title", "a"), FilterExpr::lt("priority", 2)]);
    assert_eq!(tasks.count(Some(&either)).await.unwrap(), 2);

    let updated = tasks
        .update(&EntityId::from(1), Row::new().with("priority", 5))
        .await
        .unwrap();
    assert_eq!(updated.get("title"), Some(&Value::from("c")));
    assert_eq!(updated.get("priority"), Some(&Value::Integer(5)));

    tasks.delete(&EntityId::from(1)).await.unwrap();
    assert!(tasks.find_id(&EntityId::from(1)).await.unwrap().is_none());
    assert_eq!(tasks.count(None).await.unwrap(), 3);
}

#[tokio::test]
async fn test_server_errors_map_back() {
    let ctx = TestContext::new();
    let tasks = ctx.entity("tasks");

    let invalid = ctx.client.insert(&tasks, Row::new().with("priority", 1)).await;
    match invalid {
        Err(Error::Validation(state)) => assert!(state.get("title").is_some()),
        other => panic!("expected validation error, got {other:?}"),
    }

    let missing = ctx
        .client
        .update(&tasks, &EntityId::from(99), Row::new().with("title", "ghost"))
        .await;
    assert!(matches!(missing, Err(Error::NotFound(_))));
    assert_eq!(ctx.server.count(&tasks, None).await.unwrap(), 0);

    let archive = ctx.entity("archive");
    let denied = ctx.client.insert(&archive, Row::new().with("id", 1)).await;
    assert!(matches!(denied, Err(Error::Forbidden(_))));

    let tx: Result<(), Error> = run_in_transaction(ctx.client.as_ref(), |_| async { Ok(()) }).await;
    assert!(matches!(tx, Err(Error::Transaction(_))));
}

#[tokio::test]
async fn test_compound_ids_over_rest() {
    let ctx = TestContext::new();
    let lines = ctx.repo("lines");

    lines
        .insert(Row::new().with("order", 7).with("line", "a b"))
        .await
        .unwrap();
    lines
        .insert(Row::new().with("order", 7).with("line", "c"))
        .await
        .unwrap();
    let duplicate = lines
        .insert(Row::new().with("order", 7).with("line", "a b"))
        .await;
    assert!(matches!(duplicate, Err(Error::DuplicateKey(_))));

    let id = EntityId::Compound(vec![Value::Integer(7), Value::from("a b")]);
    let found = lines.find_id(&id).await.unwrap().unwrap();
    assert_eq!(found.get("line"), Some(&Value::from("a b")));

    lines.delete(&id).await.unwrap();
    assert!(lines.find_id(&id).await.unwrap().is_none());
    assert_eq!(lines.count(None).await.unwrap(), 1);
}
