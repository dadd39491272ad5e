//! SQLite provider.
//!
//! Statements are compiled by the filter SQL builder with `?` placeholders
//! and executed on a single connection. A transaction holds the connection
//! from `BEGIN` until it commits, rolls back or is dropped.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{ffi, params_from_iter, Connection};
use shoal_proto::{EntityId, FilterExpr, FindOptions, Row, Value, DATE_FORMAT};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::{describe_id, DataProvider, Transaction};
use crate::catalog::EntityDef;
use crate::error::Error;
use crate::filter::{order_by_clause, prepare_option, quote_ident, QuestionMark, SqlBuilder};

/// Bound statement parameter.
struct Param<'a>(&'a Value);

impl ToSql for Param<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Date(d) => ToSqlOutput::Owned(SqlValue::Text(d.format(DATE_FORMAT).to_string())),
            Value::Json(json) => ToSqlOutput::Owned(SqlValue::Text(json.to_string())),
            Value::List(_) => {
                return Err(rusqlite::Error::ToSqlConversionFailure(
                    "compound values cannot be bound to one parameter".into(),
                ))
            }
        })
    }
}

fn read_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Provider backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqlDataProvider {
    conn: Arc<Mutex<Connection>>,
}

impl SqlDataProvider {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, Error> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Wrap an open connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Create the entity's table if it does not exist.
    pub async fn ensure_schema(&self, entity: &EntityDef) -> Result<(), Error> {
        let conn = self.conn.lock().await;
        create_table(&conn, entity)
    }
}

fn create_table(conn: &Connection, entity: &EntityDef) -> Result<(), Error> {
    let id_field = entity.id_field()?;
    let inline_key = id_field.is_auto_increment();

    let mut columns = Vec::new();
    for field in entity.stored_fields() {
        let mut column = format!("{} {}", quote_ident(field.db_name()), field.value_type().sql_type());
        if inline_key && field.key() == id_field.key() {
            column.push_str(" PRIMARY KEY");
        }
        columns.push(column);
    }
    if !inline_key {
        let keys: Vec<String> = entity
            .id_columns()?
            .iter()
            .map(|f| quote_ident(f.db_name()))
            .collect();
        columns.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }

    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(entity.db_name()),
        columns.join(", ")
    );
    debug!(sql = %sql, "Ensuring table");
    conn.execute_batch(&sql)?;
    Ok(())
}

fn select_list(entity: &EntityDef) -> String {
    entity
        .stored_fields()
        .map(|f| quote_ident(f.db_name()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn select(conn: &Connection, entity: &EntityDef, options: &FindOptions) -> Result<Vec<Row>, Error> {
    let filter = prepare_option(options.filter.as_ref(), entity)?;
    let mut builder = SqlBuilder::new(entity, QuestionMark);
    let condition = builder.condition(&filter)?;
    let order = order_by_clause(entity, &options.order_by)?;

    let mut sql = format!(
        "SELECT {} FROM {} WHERE {condition} ORDER BY {}",
        select_list(entity),
        quote_ident(entity.db_name()),
        if order.is_empty() { "rowid" } else { order.as_str() },
    );
    if let Some(limit) = options.limit {
        let limit = builder.bind_raw(Value::Integer(i64::from(limit)));
        let offset = builder.bind_raw(Value::Integer(i64::try_from(options.offset()).unwrap_or(i64::MAX)));
        sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
    }
    let params = builder.into_params();
    debug!(sql = %sql, params = params.len(), "Executing select");

    let fields: Vec<_> = entity.stored_fields().collect();
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter().map(Param)))?;
    let mut out = Vec::new();
    while let Some(raw) = rows.next()? {
        let mut row = Row::new();
        for (index, field) in fields.iter().enumerate() {
            let value = read_value(raw.get_ref(index)?);
            row.set(field.key(), field.converter().from_db(field.key(), value)?);
        }
        out.push(row);
    }
    Ok(out)
}

fn count(conn: &Connection, entity: &EntityDef, filter: Option<&FilterExpr>) -> Result<u64, Error> {
    let filter = prepare_option(filter, entity)?;
    let clause = SqlBuilder::new(entity, QuestionMark).where_clause(&filter)?;
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        quote_ident(entity.db_name()),
        clause.sql
    );
    debug!(sql = %sql, params = clause.params.len(), "Executing count");
    let count: i64 = conn.query_row(&sql, params_from_iter(clause.params.iter().map(Param)), |r| r.get(0))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

fn fetch(conn: &Connection, entity: &EntityDef, id: &EntityId) -> Result<Option<Row>, Error> {
    let options = FindOptions::new().with_filter(entity.id_filter(id)).with_limit(1);
    Ok(select(conn, entity, &options)?.into_iter().next())
}

/// Coerced stored columns of an input row, in input order.
fn stored_values(entity: &EntityDef, input: Row) -> Result<Vec<(String, Value)>, Error> {
    let mut values = Vec::new();
    for (key, value) in input {
        let field = entity.require_field(&key)?;
        if field.is_stored() {
            values.push((key, field.converter().coerce(field.key(), &value)?));
        }
    }
    Ok(values)
}

fn write_error(err: rusqlite::Error, entity: &EntityDef, id: &EntityId) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Error::DuplicateKey(describe_id(entity, id))
        }
        _ => Error::Sqlite(err),
    }
}

fn execute(conn: &Connection, sql: &str, params: &[Value]) -> rusqlite::Result<usize> {
    debug!(sql = %sql, params = params.len(), "Executing statement");
    conn.execute(sql, params_from_iter(params.iter().map(Param)))
}

fn insert(conn: &Connection, entity: &EntityDef, input: Row) -> Result<Row, Error> {
    let id_field = entity.id_field()?;
    let mut values = stored_values(entity, input)?;
    if id_field.is_auto_increment() {
        values.retain(|(key, value)| key != id_field.key() || !value.is_null());
    }
    let provided: Row = values.iter().cloned().collect();
    let generated = id_field.is_auto_increment() && !provided.contains(id_field.key());
    let id = entity.id_of(&provided)?;
    if !generated && id.components().iter().any(Value::is_null) {
        return Err(Error::invalid_value(entity.id_key(), "id is required"));
    }

    let mut builder = SqlBuilder::new(entity, QuestionMark);
    let mut columns = Vec::new();
    let mut tokens = Vec::new();
    for (key, value) in &values {
        let field = entity.require_field(key)?;
        columns.push(quote_ident(field.db_name()));
        tokens.push(builder.bind(field, value));
    }
    let table = quote_ident(entity.db_name());
    let sql = if columns.is_empty() {
        format!("INSERT INTO {table} DEFAULT VALUES")
    } else {
        format!("INSERT INTO {table} ({}) VALUES ({})", columns.join(", "), tokens.join(", "))
    };
    execute(conn, &sql, builder.params()).map_err(|e| write_error(e, entity, &id))?;

    let id = if generated {
        EntityId::Single(Value::Integer(conn.last_insert_rowid()))
    } else {
        id
    };
    fetch(conn, entity, &id)?.ok_or_else(|| Error::Provider(format!("inserted row {} vanished", describe_id(entity, &id))))
}

fn update(conn: &Connection, entity: &EntityDef, id: &EntityId, changes: Row) -> Result<Row, Error> {
    let id = entity.coerce_id(id)?;
    let mut after = fetch(conn, entity, &id)?.ok_or_else(|| Error::NotFound(describe_id(entity, &id)))?;
    let values = stored_values(entity, changes)?;
    if values.is_empty() {
        return Ok(after);
    }
    for (key, value) in &values {
        after.set(key.clone(), value.clone());
    }
    let new_id = entity.id_of(&after)?;
    if new_id.components().iter().any(Value::is_null) {
        return Err(Error::invalid_value(entity.id_key(), "id is required"));
    }

    let mut builder = SqlBuilder::new(entity, QuestionMark);
    let mut assignments = Vec::new();
    for (key, value) in &values {
        let field = entity.require_field(key)?;
        let token = builder.bind(field, value);
        assignments.push(format!("{} = {token}", quote_ident(field.db_name())));
    }
    let filter = prepare_option(Some(&entity.id_filter(&id)), entity)?;
    let condition = builder.condition(&filter)?;
    let sql = format!(
        "UPDATE {} SET {} WHERE {condition}",
        quote_ident(entity.db_name()),
        assignments.join(", ")
    );
    let changed = execute(conn, &sql, builder.params()).map_err(|e| write_error(e, entity, &new_id))?;
    if changed == 0 {
        return Err(Error::NotFound(describe_id(entity, &id)));
    }
    fetch(conn, entity, &new_id)?.ok_or_else(|| Error::NotFound(describe_id(entity, &new_id)))
}

fn delete(conn: &Connection, entity: &EntityDef, id: &EntityId) -> Result<(), Error> {
    let id = entity.coerce_id(id)?;
    let filter = prepare_option(Some(&entity.id_filter(&id)), entity)?;
    let clause = SqlBuilder::new(entity, QuestionMark).where_clause(&filter)?;
    let sql = format!("DELETE FROM {} WHERE {}", quote_ident(entity.db_name()), clause.sql);
    if execute(conn, &sql, &clause.params)? == 0 {
        return Err(Error::NotFound(describe_id(entity, &id)));
    }
    Ok(())
}

#[async_trait]
impl DataProvider for SqlDataProvider {
    async fn find(&self, entity: &EntityDef, options: &FindOptions) -> Result<Vec<Row>, Error> {
        let conn = self.conn.lock().await;
        select(&conn, entity, options)
    }

    async fn count(&self, entity: &EntityDef, filter: Option<&FilterExpr>) -> Result<u64, Error> {
        let conn = self.conn.lock().await;
        count(&conn, entity, filter)
    }

    async fn insert(&self, entity: &EntityDef, row: Row) -> Result<Row, Error> {
        let conn = self.conn.lock().await;
        insert(&conn, entity, row)
    }

    async fn update(&self, entity: &EntityDef, id: &EntityId, changes: Row) -> Result<Row, Error> {
        let conn = self.conn.lock().await;
        update(&conn, entity, id, changes)
    }

    async fn delete(&self, entity: &EntityDef, id: &EntityId) -> Result<(), Error> {
        let conn = self.conn.lock().await;
        delete(&conn, entity, id)
    }

    async fn begin(&self) -> Result<Arc<dyn Transaction>, Error> {
        let conn = self.conn.clone().lock_owned().await;
        conn.execute_batch("BEGIN")?;
        debug!("Begin SQL transaction");
        Ok(Arc::new(SqlTransaction {
            conn: parking_lot::Mutex::new(Some(conn)),
        }))
    }
}

/// Transaction holding the provider's connection.
///
/// Other users of the provider wait until it finishes.
pub struct SqlTransaction {
    conn: parking_lot::Mutex<Option<OwnedMutexGuard<Connection>>>,
}

impl SqlTransaction {
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T, Error>) -> Result<T, Error> {
        let guard = self.conn.lock();
        let conn = guard
            .as_ref()
            .ok_or_else(|| Error::Transaction("transaction already finished".into()))?;
        f(conn)
    }

    fn finish(&self, statement: &str) -> Result<(), Error> {
        let conn = self
            .conn
            .lock()
            .take()
            .ok_or_else(|| Error::Transaction("transaction already finished".into()))?;
        conn.execute_batch(statement)
            .map_err(|e| Error::Transaction(format!("{statement} failed: {e}")))
    }
}

#[async_trait]
impl DataProvider for SqlTransaction {
    async fn find(&self, entity: &EntityDef, options: &FindOptions) -> Result<Vec<Row>, Error> {
        self.with_conn(|conn| select(conn, entity, options))
    }

    async fn count(&self, entity: &EntityDef, filter: Option<&FilterExpr>) -> Result<u64, Error> {
        self.with_conn(|conn| count(conn, entity, filter))
    }

    async fn insert(&self, entity: &EntityDef, row: Row) -> Result<Row, Error> {
        self.with_conn(|conn| insert(conn, entity, row))
    }

    async fn update(&self, entity: &EntityDef, id: &EntityId, changes: Row) -> Result<Row, Error> {
        self.with_conn(|conn| update(conn, entity, id, changes))
    }

    async fn delete(&self, entity: &EntityDef, id: &EntityId) -> Result<(), Error> {
        self.with_conn(|conn| delete(conn, entity, id))
    }

    async fn begin(&self) -> Result<Arc<dyn Transaction>, Error> {
        Err(Error::Transaction("nested transactions are not supported".into()))
    }
}

#[async_trait]
impl Transaction for SqlTransaction {
    async fn commit(&self) -> Result<(), Error> {
        self.finish("COMMIT")
    }

    async fn rollback(&self) -> Result<(), Error> {
        self.finish("ROLLBACK")
    }

    fn as_provider(self: Arc<Self>) -> Arc<dyn DataProvider> {
        self
    }
}

impl Drop for SqlTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "Rollback of abandoned transaction failed");
            }
        }
    }
}
