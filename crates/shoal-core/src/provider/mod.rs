//! Storage backends.
//!
//! A [`DataProvider`] executes find/count/insert/update/delete for any
//! registered entity. Rows exchanged with providers carry stored columns
//! only: compound fields appear as their member columns and computed fields
//! are absent.

pub mod memory;
pub mod rest;
pub mod sql;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use shoal_proto::{EntityId, FilterExpr, FindOptions, Row};
use tracing::warn;

use crate::catalog::EntityDef;
use crate::error::Error;

pub use memory::{MemoryDataProvider, MemoryTransaction};
pub use rest::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, RestDataProvider};
pub use sql::{SqlDataProvider, SqlTransaction};

/// Storage backend.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Rows matching the options' filter, ordered and paged.
    ///
    /// Without an `orderBy`, rows come back in the backend's storage order:
    /// insertion order in memory, rowid order in SQLite (the key itself for
    /// integer primary keys). Only an explicit order is identical across
    /// backends.
    async fn find(&self, entity: &EntityDef, options: &FindOptions) -> Result<Vec<Row>, Error>;

    /// Number of rows matching a filter. Ordering and paging do not apply.
    async fn count(&self, entity: &EntityDef, filter: Option<&FilterExpr>) -> Result<u64, Error>;

    /// Insert a row and return it as stored.
    async fn insert(&self, entity: &EntityDef, row: Row) -> Result<Row, Error>;

    /// Apply a partial update and return the stored row.
    async fn update(&self, entity: &EntityDef, id: &EntityId, changes: Row) -> Result<Row, Error>;

    /// Delete a row.
    async fn delete(&self, entity: &EntityDef, id: &EntityId) -> Result<(), Error>;

    /// Start a transaction.
    async fn begin(&self) -> Result<Arc<dyn Transaction>, Error>;
}

/// Provider whose writes become visible only on commit.
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait Transaction: DataProvider {
    /// Publish every write made through this transaction.
    async fn commit(&self) -> Result<(), Error>;

    /// Discard every write made through this transaction.
    async fn rollback(&self) -> Result<(), Error>;

    /// View the transaction as a plain provider.
    fn as_provider(self: Arc<Self>) -> Arc<dyn DataProvider>;
}

/// Run `f` inside a transaction on `provider`.
///
/// Commits when `f` returns `Ok` and rolls back when it returns `Err`.
pub async fn run_in_transaction<F, Fut, T>(provider: &dyn DataProvider, f: F) -> Result<T, Error>
where
    F: FnOnce(Arc<dyn DataProvider>) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let tx = provider.begin().await?;
    match f(tx.clone().as_provider()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

/// Describe an id for error messages.
pub(crate) fn describe_id(entity: &EntityDef, id: &EntityId) -> String {
    format!("{} {}", entity.name(), id.to_value())
}
