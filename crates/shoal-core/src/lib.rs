//! Shoal Core - entity catalog, filter translation and data providers.
//!
//! This crate provides the data access layer behind the Shoal Data API:
//! entity definitions, filter preparation and translation (in-memory, SQL,
//! URL, JSON), storage providers, repositories and live queries.

pub mod catalog;
pub mod error;
pub mod filter;
pub mod live;
pub mod provider;
pub mod repository;

pub use catalog::{
    Decision, EntityDef, EntityPermissions, EntityRegistry, FieldDef, FieldRef, Operation,
    Permission, RequestContext, SchemaFile, ValueConverter, ValueType,
};
pub use error::{Error, ModelState};
pub use filter::{FilterEvaluator, PreparedFilter};
pub use live::{Change, LiveEvent, LiveQuery};
pub use provider::{
    run_in_transaction, DataProvider, MemoryDataProvider, RestDataProvider, SqlDataProvider,
    Transaction,
};
pub use repository::Repository;

/// Re-export protocol types.
pub use shoal_proto as proto;
