//! Shoal Data API Gateway.
//!
//! This crate serves registered entities over the Data API: generic CRUD
//! over HTTP with filtering, sorting and paging, backed by any Shoal data
//! provider.

pub mod api;
pub mod config;
pub mod error;
pub mod json;
pub mod routes;

pub use api::{DataApi, DataApiRequest, DataApiResponse};
pub use config::{Args, GatewayConfig, ProviderKind};
pub use error::AppError;

use std::sync::Arc;

use axum::Router;
use shoal_core::catalog::{EntityRegistry, SchemaFile};
use shoal_core::provider::{DataProvider, MemoryDataProvider, SqlDataProvider};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::MEMORY_DATABASE;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Data API handler.
    pub api: Arc<DataApi>,
    /// Gateway configuration.
    pub config: GatewayConfig,
}

impl AppState {
    /// Create new application state.
    pub fn new(api: DataApi, config: GatewayConfig) -> Self {
        Self {
            api: Arc::new(api),
            config,
        }
    }
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::routes())
        .merge(routes::schema::routes())
        .merge(routes::data::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Load the schema, open the configured provider and create its tables.
pub async fn build_state(config: GatewayConfig) -> Result<AppState, AppError> {
    let registry = Arc::new(EntityRegistry::new());
    if let Some(path) = &config.schema_path {
        for entity in SchemaFile::load(path)?.into_entities() {
            registry.register(entity)?;
        }
    } else {
        warn!("No schema file given; no entities will be served");
    }

    let provider: Arc<dyn DataProvider> = match config.provider {
        ProviderKind::Memory => {
            if config.database != MEMORY_DATABASE {
                return Err(AppError::Config(
                    "--database requires --provider sqlite".to_string(),
                ));
            }
            Arc::new(MemoryDataProvider::new())
        }
        ProviderKind::Sqlite => {
            let sql = if config.database == MEMORY_DATABASE {
                SqlDataProvider::open_in_memory()?
            } else {
                SqlDataProvider::open(&config.database)?
            };
            for entity in registry.entities() {
                sql.ensure_schema(&entity).await?;
            }
            Arc::new(sql)
        }
    };

    info!(
        entities = registry.names().len(),
        provider = ?config.provider,
        "Data API ready"
    );
    let api = DataApi::new(registry, provider).with_default_page_size(config.default_page_size);
    Ok(AppState::new(api, config))
}
