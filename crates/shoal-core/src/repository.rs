//! Per-entity facade over a data provider.

use std::sync::Arc;

use shoal_proto::{EntityId, FilterExpr, FindOptions, Row, Value};
use tracing::debug;

use crate::catalog::{EntityDef, FieldDef};
use crate::error::{Error, ModelState};
use crate::provider::DataProvider;

/// Repository for one entity.
///
/// Validates writes, applies the entity's default order and evaluates
/// computed fields on every row it returns.
#[derive(Clone)]
pub struct Repository {
    entity: Arc<EntityDef>,
    provider: Arc<dyn DataProvider>,
}

impl Repository {
    /// Repository for an entity over a provider.
    pub fn new(entity: Arc<EntityDef>, provider: Arc<dyn DataProvider>) -> Self {
        Self { entity, provider }
    }

    /// Entity definition.
    pub fn entity(&self) -> &Arc<EntityDef> {
        &self.entity
    }

    /// Underlying provider.
    pub fn provider(&self) -> &Arc<dyn DataProvider> {
        &self.provider
    }

    /// Same entity on another provider, typically a transaction.
    pub fn with_provider(&self, provider: Arc<dyn DataProvider>) -> Self {
        Self {
            entity: self.entity.clone(),
            provider,
        }
    }

    /// Rows matching the options.
    pub async fn find(&self, options: &FindOptions) -> Result<Vec<Row>, Error> {
        let rows = if options.order_by.is_empty() && !self.entity.default_order().is_empty() {
            let mut ordered = options.clone();
            ordered.order_by = self.entity.default_order().to_vec();
            self.provider.find(&self.entity, &ordered).await?
        } else {
            self.provider.find(&self.entity, options).await?
        };
        Ok(rows.into_iter().map(|row| self.output(row)).collect())
    }

    /// Number of rows matching a filter.
    pub async fn count(&self, filter: Option<&FilterExpr>) -> Result<u64, Error> {
        self.provider.count(&self.entity, filter).await
    }

    /// First row matching a filter.
    pub async fn find_first(&self, filter: Option<&FilterExpr>) -> Result<Option<Row>, Error> {
        let mut options = FindOptions::new().with_limit(1);
        options.filter = filter.cloned();
        Ok(self.find(&options).await?.into_iter().next())
    }

    /// Row with the given id.
    pub async fn find_id(&self, id: &EntityId) -> Result<Option<Row>, Error> {
        let id = self.entity.coerce_id(id)?;
        self.find_first(Some(&self.entity.id_filter(&id))).await
    }

    /// Validate and insert a row.
    pub async fn insert(&self, row: Row) -> Result<Row, Error> {
        let row = self.validate(row, None)?;
        debug!(entity = %self.entity.name(), "Inserting row");
        let stored = self.provider.insert(&self.entity, row).await?;
        Ok(self.output(stored))
    }

    /// Validate and apply a partial update.
    pub async fn update(&self, id: &EntityId, changes: Row) -> Result<Row, Error> {
        let id = self.entity.coerce_id(id)?;
        let existing = self
            .find_id(&id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} {}", self.entity.name(), id.to_value())))?;
        let changes = self.validate(changes, Some(&existing))?;
        debug!(entity = %self.entity.name(), id = %id.to_value(), "Updating row");
        let stored = self.provider.update(&self.entity, &id, changes).await?;
        Ok(self.output(stored))
    }

    /// Delete a row.
    pub async fn delete(&self, id: &EntityId) -> Result<(), Error> {
        let id = self.entity.coerce_id(id)?;
        debug!(entity = %self.entity.name(), id = %id.to_value(), "Deleting row");
        self.provider.delete(&self.entity, &id).await
    }

    fn output(&self, mut row: Row) -> Row {
        self.entity.apply_computed(&mut row);
        row
    }

    /// Coerce input into stored columns and check every field, collecting
    /// all failures.
    ///
    /// `existing` is the current row for updates; only touched fields run
    /// their validators then.
    fn validate(&self, input: Row, existing: Option<&Row>) -> Result<Row, Error> {
        let entity = &self.entity;
        let mut state = ModelState::new();
        let mut stored = Row::new();
        let mut touched = Vec::new();

        for (key, value) in input {
            let field = entity.require_field(&key)?;
            if field.is_computed() {
                continue;
            }
            touched.push(key.clone());
            match entity.coerce_value(field, &value) {
                Ok(value) => split_into(field, value, &mut stored),
                Err(e) => state.add(key, field_message(e)),
            }
        }

        let mut merged = existing.cloned().unwrap_or_default();
        merged.merge(&stored);

        for field in entity.fields() {
            if field.is_computed() || state.get(field.key()).is_some() {
                continue;
            }
            let value = entity.field_value(field, &merged);
            if field.is_required() && !field.is_auto_increment() && is_missing(&value) {
                state.add(field.key(), format!("{} is required", field.caption()));
                continue;
            }
            let check = existing.is_none() || touched.iter().any(|k| k == field.key());
            if check {
                if let Err(message) = field.validate(&value, &merged) {
                    state.add(field.key(), message);
                }
            }
        }

        state.into_result()?;
        Ok(stored)
    }
}

fn split_into(field: &FieldDef, value: Value, row: &mut Row) {
    if !field.is_compound() {
        row.set(field.key(), value);
        return;
    }
    match value {
        Value::List(items) => {
            for (member, item) in field.members().iter().zip(items) {
                row.set(member.clone(), item);
            }
        }
        _ => {
            for member in field.members() {
                row.set(member.clone(), Value::Null);
            }
        }
    }
}

fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::List(items) => items.iter().any(is_missing),
        _ => false,
    }
}

fn field_message(err: Error) -> String {
    match err {
        Error::InvalidValue { message, .. } => message,
        other => other.to_string(),
    }
}
