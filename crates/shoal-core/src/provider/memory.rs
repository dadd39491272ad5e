//! In-memory provider.
//!
//! Rows live in per-entity vectors in insertion order behind a shared
//! `RwLock`. Transactions work on a snapshot of the tables and publish the
//! tables they touched on commit, failing if another writer changed one of
//! them in the meantime.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shoal_proto::{EntityId, FilterExpr, FindOptions, Row, Value};
use tokio::sync::broadcast;
use tracing::debug;

use super::{describe_id, DataProvider, Transaction};
use crate::catalog::EntityDef;
use crate::error::Error;
use crate::filter::{prepare_option, select_rows, FilterEvaluator};
use crate::live::Change;

/// Capacity of the change channel.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Row>,
    last_id: i64,
    version: u64,
}

type Tables = HashMap<String, Table>;

/// Provider keeping all rows in memory.
///
/// Clones share the same storage.
#[derive(Debug, Clone)]
pub struct MemoryDataProvider {
    tables: Arc<RwLock<Tables>>,
    changes: broadcast::Sender<Change>,
}

impl Default for MemoryDataProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDataProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            tables: Arc::new(RwLock::new(Tables::new())),
            changes,
        }
    }

    /// Receive every committed change.
    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }

    /// Snapshot of all rows of an entity, in insertion order.
    pub fn rows(&self, entity: &EntityDef) -> Vec<Row> {
        self.tables
            .read()
            .get(entity.name())
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    fn publish(&self, change: Change) {
        // Sending only fails when nobody is subscribed.
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl DataProvider for MemoryDataProvider {
    async fn find(&self, entity: &EntityDef, options: &FindOptions) -> Result<Vec<Row>, Error> {
        find_rows(&self.tables.read(), entity, options)
    }

    async fn count(&self, entity: &EntityDef, filter: Option<&FilterExpr>) -> Result<u64, Error> {
        count_rows(&self.tables.read(), entity, filter)
    }

    async fn insert(&self, entity: &EntityDef, row: Row) -> Result<Row, Error> {
        let (row, change) = insert_row(&mut self.tables.write(), entity, row)?;
        self.publish(change);
        Ok(row)
    }

    async fn update(&self, entity: &EntityDef, id: &EntityId, changes: Row) -> Result<Row, Error> {
        let (row, change) = update_row(&mut self.tables.write(), entity, id, changes)?;
        self.publish(change);
        Ok(row)
    }

    async fn delete(&self, entity: &EntityDef, id: &EntityId) -> Result<(), Error> {
        let change = delete_row(&mut self.tables.write(), entity, id)?;
        self.publish(change);
        Ok(())
    }

    async fn begin(&self) -> Result<Arc<dyn Transaction>, Error> {
        let snapshot = self.tables.read().clone();
        let versions = snapshot
            .iter()
            .map(|(name, table)| (name.clone(), table.version))
            .collect();
        debug!(tables = snapshot.len(), "Begin memory transaction");
        Ok(Arc::new(MemoryTransaction {
            provider: self.clone(),
            state: Mutex::new(Some(Pending {
                tables: snapshot,
                versions,
                touched: BTreeSet::new(),
                changes: Vec::new(),
            })),
        }))
    }
}

fn find_rows(tables: &Tables, entity: &EntityDef, options: &FindOptions) -> Result<Vec<Row>, Error> {
    let filter = prepare_option(options.filter.as_ref(), entity)?;
    let rows = tables.get(entity.name()).map(|t| t.rows.as_slice()).unwrap_or_default();
    select_rows(rows, &filter, entity, options)
}

fn count_rows(tables: &Tables, entity: &EntityDef, filter: Option<&FilterExpr>) -> Result<u64, Error> {
    let filter = prepare_option(filter, entity)?;
    let rows = tables.get(entity.name()).map(|t| t.rows.as_slice()).unwrap_or_default();
    Ok(rows
        .iter()
        .filter(|row| FilterEvaluator::evaluate(&filter, entity, row))
        .count() as u64)
}

/// Set stored columns from `input`, coercing each value.
fn assign(entity: &EntityDef, target: &mut Row, input: Row) -> Result<(), Error> {
    for (key, value) in input {
        let field = entity.require_field(&key)?;
        if !field.is_stored() {
            continue;
        }
        target.set(key, field.converter().coerce(field.key(), &value)?);
    }
    Ok(())
}

fn position(table: &Table, entity: &EntityDef, id: &EntityId) -> Result<Option<usize>, Error> {
    for (index, row) in table.rows.iter().enumerate() {
        if entity.id_of(row)? == *id {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn insert_row(tables: &mut Tables, entity: &EntityDef, input: Row) -> Result<(Row, Change), Error> {
    let table = tables.entry(entity.name().to_string()).or_default();

    let mut row: Row = entity
        .stored_fields()
        .map(|f| (f.key().to_string(), Value::Null))
        .collect();
    assign(entity, &mut row, input)?;

    let id_field = entity.id_field()?;
    if id_field.is_auto_increment() {
        match row.get_or_null(id_field.key()).as_i64() {
            Some(explicit) => table.last_id = table.last_id.max(explicit),
            None => {
                table.last_id += 1;
                row.set(id_field.key(), table.last_id);
            }
        }
    }

    let id = entity.id_of(&row)?;
    if id.components().iter().any(Value::is_null) {
        return Err(Error::invalid_value(entity.id_key(), "id is required"));
    }
    if position(table, entity, &id)?.is_some() {
        return Err(Error::DuplicateKey(describe_id(entity, &id)));
    }

    table.rows.push(row.clone());
    table.version += 1;
    let change = Change::Inserted {
        entity: entity.name().to_string(),
        row: row.clone(),
    };
    Ok((row, change))
}

fn update_row(tables: &mut Tables, entity: &EntityDef, id: &EntityId, changes: Row) -> Result<(Row, Change), Error> {
    let id = entity.coerce_id(id)?;
    let table = tables
        .get_mut(entity.name())
        .ok_or_else(|| Error::NotFound(describe_id(entity, &id)))?;
    let index = position(table, entity, &id)?.ok_or_else(|| Error::NotFound(describe_id(entity, &id)))?;

    let before = table.rows[index].clone();
    let mut after = before.clone();
    assign(entity, &mut after, changes)?;

    let new_id = entity.id_of(&after)?;
    if new_id != id {
        if new_id.components().iter().any(Value::is_null) {
            return Err(Error::invalid_value(entity.id_key(), "id is required"));
        }
        if position(table, entity, &new_id)?.is_some() {
            return Err(Error::DuplicateKey(describe_id(entity, &new_id)));
        }
    }

    table.rows[index] = after.clone();
    table.version += 1;
    let change = Change::Updated {
        entity: entity.name().to_string(),
        before,
        after: after.clone(),
    };
    Ok((after, change))
}

fn delete_row(tables: &mut Tables, entity: &EntityDef, id: &EntityId) -> Result<Change, Error> {
    let id = entity.coerce_id(id)?;
    let table = tables
        .get_mut(entity.name())
        .ok_or_else(|| Error::NotFound(describe_id(entity, &id)))?;
    let index = position(table, entity, &id)?.ok_or_else(|| Error::NotFound(describe_id(entity, &id)))?;
    let row = table.rows.remove(index);
    table.version += 1;
    Ok(Change::Deleted {
        entity: entity.name().to_string(),
        row,
    })
}

struct Pending {
    tables: Tables,
    versions: HashMap<String, u64>,
    touched: BTreeSet<String>,
    changes: Vec<Change>,
}

/// Snapshot transaction over a [`MemoryDataProvider`].
pub struct MemoryTransaction {
    provider: MemoryDataProvider,
    state: Mutex<Option<Pending>>,
}

impl MemoryTransaction {
    fn with_pending<T>(&self, f: impl FnOnce(&mut Pending) -> Result<T, Error>) -> Result<T, Error> {
        let mut state = self.state.lock();
        let pending = state
            .as_mut()
            .ok_or_else(|| Error::Transaction("transaction already finished".into()))?;
        f(pending)
    }

    fn write<T>(
        &self,
        entity: &EntityDef,
        op: impl FnOnce(&mut Tables) -> Result<(T, Change), Error>,
    ) -> Result<T, Error> {
        self.with_pending(|pending| {
            let (value, change) = op(&mut pending.tables)?;
            pending.touched.insert(entity.name().to_string());
            pending.changes.push(change);
            Ok(value)
        })
    }
}

#[async_trait]
impl DataProvider for MemoryTransaction {
    async fn find(&self, entity: &EntityDef, options: &FindOptions) -> Result<Vec<Row>, Error> {
        self.with_pending(|p| find_rows(&p.tables, entity, options))
    }

    async fn count(&self, entity: &EntityDef, filter: Option<&FilterExpr>) -> Result<u64, Error> {
        self.with_pending(|p| count_rows(&p.tables, entity, filter))
    }

    async fn insert(&self, entity: &EntityDef, row: Row) -> Result<Row, Error> {
        self.write(entity, |tables| insert_row(tables, entity, row))
    }

    async fn update(&self, entity: &EntityDef, id: &EntityId, changes: Row) -> Result<Row, Error> {
        self.write(entity, |tables| update_row(tables, entity, id, changes))
    }

    async fn delete(&self, entity: &EntityDef, id: &EntityId) -> Result<(), Error> {
        self.write(entity, |tables| Ok(((), delete_row(tables, entity, id)?)))
    }

    async fn begin(&self) -> Result<Arc<dyn Transaction>, Error> {
        Err(Error::Transaction("nested transactions are not supported".into()))
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(&self) -> Result<(), Error> {
        let pending = self
            .state
            .lock()
            .take()
            .ok_or_else(|| Error::Transaction("transaction already finished".into()))?;
        let Pending {
            mut tables,
            versions,
            touched,
            changes,
        } = pending;

        {
            let mut base = self.provider.tables.write();
            for name in &touched {
                let current = base.get(name).map(|t| t.version).unwrap_or(0);
                let started = versions.get(name).copied().unwrap_or(0);
                if current != started {
                    return Err(Error::Transaction(format!(
                        "'{name}' was modified by another writer"
                    )));
                }
            }
            for name in &touched {
                if let Some(table) = tables.remove(name) {
                    base.insert(name.clone(), table);
                }
            }
        }

        debug!(tables = touched.len(), changes = changes.len(), "Committed memory transaction");
        for change in changes {
            self.provider.publish(change);
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), Error> {
        self.state
            .lock()
            .take()
            .map(|_| ())
            .ok_or_else(|| Error::Transaction("transaction already finished".into()))
    }

    fn as_provider(self: Arc<Self>) -> Arc<dyn DataProvider> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldDef;
    use crate::provider::run_in_transaction;

    fn tasks() -> EntityDef {
        EntityDef::new("tasks", "id")
            .with_field(FieldDef::integer("id").auto_increment())
            .with_field(FieldDef::string("title"))
    }

    #[tokio::test]
    async fn test_auto_increment_and_duplicates() {
        let provider = MemoryDataProvider::new();
        let entity = tasks();

        let first = provider.insert(&entity, Row::new().with("title", "a")).await.unwrap();
        assert_eq!(first.get("id"), Some(&Value::Integer(1)));
        let explicit = provider
            .insert(&entity, Row::new().with("id", 10).with("title", "b"))
            .await
            .unwrap();
        assert_eq!(explicit.get("id"), Some(&Value::Integer(10)));
        let next = provider.insert(&entity, Row::new().with("title", "c")).await.unwrap();
        assert_eq!(next.get("id"), Some(&Value::Integer(11)));

        let dup = provider.insert(&entity, Row::new().with("id", 10)).await;
        assert!(matches!(dup, Err(Error::DuplicateKey(_))));
        assert_eq!(provider.count(&entity, None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing() {
        let provider = MemoryDataProvider::new();
        let entity = tasks();
        provider.insert(&entity, Row::new().with("title", "a")).await.unwrap();

        let updated = provider
            .update(&entity, &EntityId::from(1), Row::new().with("title", "z"))
            .await
            .unwrap();
        assert_eq!(updated.get("title"), Some(&Value::from("z")));

        let missing = provider.update(&entity, &EntityId::from(9), Row::new()).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
        assert!(matches!(
            provider.delete(&entity, &EntityId::from(9)).await,
            Err(Error::NotFound(_))
        ));
        provider.delete(&entity, &EntityId::from(1)).await.unwrap();
        assert!(provider.rows(&entity).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_field_rejected() {
        let provider = MemoryDataProvider::new();
        let result = provider.insert(&tasks(), Row::new().with("bogus", 1)).await;
        assert!(matches!(result, Err(Error::UnknownField { .. })));
    }

    #[tokio::test]
    async fn test_transaction_rollback_discards_inserts() {
        let provider = MemoryDataProvider::new();
        let entity = tasks();

        let result: Result<(), Error> = run_in_transaction(&provider, |tx| {
            let entity = entity.clone();
            async move {
                tx.insert(&entity, Row::new().with("title", "a")).await?;
                assert_eq!(tx.count(&entity, None).await?, 1);
                Err(Error::Provider("boom".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(provider.count(&entity, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transaction_commit_publishes() {
        let provider = MemoryDataProvider::new();
        let entity = tasks();
        let mut changes = provider.subscribe();

        let tx = provider.begin().await.unwrap();
        tx.insert(&entity, Row::new().with("title", "a")).await.unwrap();
        assert_eq!(provider.count(&entity, None).await.unwrap(), 0);
        tx.commit().await.unwrap();

        assert_eq!(provider.count(&entity, None).await.unwrap(), 1);
        assert!(matches!(changes.recv().await.unwrap(), Change::Inserted { .. }));
        assert!(matches!(tx.commit().await, Err(Error::Transaction(_))));
        assert!(matches!(tx.begin().await, Err(Error::Transaction(_))));
    }

    #[tokio::test]
    async fn test_conflicting_commit_fails() {
        let provider = MemoryDataProvider::new();
        let entity = tasks();
        let tx = provider.begin().await.unwrap();
        tx.insert(&entity, Row::new().with("title", "a")).await.unwrap();
        provider.insert(&entity, Row::new().with("title", "b")).await.unwrap();

        assert!(matches!(tx.commit().await, Err(Error::Transaction(_))));
        assert_eq!(provider.count(&entity, None).await.unwrap(), 1);
    }
}
