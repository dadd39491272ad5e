//! Entity definitions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use shoal_proto::{EntityId, FilterExpr, OrderSpec, Row, Value};

use super::field::FieldDef;
use super::permissions::EntityPermissions;
use crate::error::Error;

/// Handler expanding a custom filter's arguments into a filter expression.
pub type CustomFilterFn = Arc<dyn Fn(&serde_json::Value) -> Result<FilterExpr, Error> + Send + Sync>;

/// An entity definition: ordered fields with a key index, the id field,
/// default ordering, API permissions and custom filters.
#[derive(Clone)]
pub struct EntityDef {
    name: String,
    db_name: String,
    id_field: String,
    fields: Vec<FieldDef>,
    index: HashMap<String, usize>,
    default_order: Vec<OrderSpec>,
    permissions: EntityPermissions,
    custom_filters: HashMap<String, CustomFilterFn>,
}

impl EntityDef {
    /// Create a new entity definition whose id is the field `id_field`.
    pub fn new(name: impl Into<String>, id_field: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            db_name: name.clone(),
            name,
            id_field: id_field.into(),
            fields: Vec::new(),
            index: HashMap::new(),
            default_order: Vec::new(),
            permissions: EntityPermissions::default(),
            custom_filters: HashMap::new(),
        }
    }

    /// Add a field to the entity.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.index.insert(field.key().to_string(), self.fields.len());
        self.fields.push(field);
        self
    }

    /// Add multiple fields.
    pub fn with_fields(self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        fields.into_iter().fold(self, Self::with_field)
    }

    /// Set the storage table name.
    pub fn with_db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = db_name.into();
        self
    }

    /// Add a default ordering key, used when a find specifies none.
    pub fn with_default_order(mut self, order: OrderSpec) -> Self {
        self.default_order.push(order);
        self
    }

    /// Set API permissions.
    pub fn with_permissions(mut self, permissions: EntityPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Register a custom filter handler.
    pub fn with_custom_filter<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<FilterExpr, Error> + Send + Sync + 'static,
    {
        self.custom_filters.insert(name.into(), Arc::new(handler));
        self
    }

    /// Entity name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage table name.
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// All fields in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Fields backed by a column, in declaration order.
    pub fn stored_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_stored())
    }

    /// Get a field by key.
    pub fn field(&self, key: &str) -> Option<&FieldDef> {
        self.index.get(key).map(|&i| &self.fields[i])
    }

    /// Get a field by key, failing with `UnknownField`.
    pub fn require_field(&self, key: &str) -> Result<&FieldDef, Error> {
        self.field(key).ok_or_else(|| Error::UnknownField {
            entity: self.name.clone(),
            field: key.to_string(),
        })
    }

    /// Typed accessor for one field.
    pub fn field_ref(&self, key: &str) -> Result<FieldRef, Error> {
        self.require_field(key).map(|f| FieldRef::new(f.key()))
    }

    /// Key of the id field.
    pub fn id_key(&self) -> &str {
        &self.id_field
    }

    /// The id field definition.
    pub fn id_field(&self) -> Result<&FieldDef, Error> {
        self.require_field(&self.id_field)
    }

    /// Stored fields making up the id, in component order.
    pub fn id_columns(&self) -> Result<Vec<&FieldDef>, Error> {
        let id = self.id_field()?;
        self.member_fields(id)
    }

    /// Stored fields behind a field: its members if compound, else itself.
    pub fn member_fields<'a>(&'a self, field: &'a FieldDef) -> Result<Vec<&'a FieldDef>, Error> {
        if field.is_compound() {
            field
                .members()
                .iter()
                .map(|key| self.require_field(key))
                .collect()
        } else {
            Ok(vec![field])
        }
    }

    /// Default ordering.
    pub fn default_order(&self) -> &[OrderSpec] {
        &self.default_order
    }

    /// API permissions.
    pub fn permissions(&self) -> &EntityPermissions {
        &self.permissions
    }

    /// Custom filter handler by name.
    pub fn custom_filter(&self, name: &str) -> Option<&CustomFilterFn> {
        self.custom_filters.get(name)
    }

    /// Names of registered custom filters.
    pub fn custom_filter_names(&self) -> impl Iterator<Item = &String> {
        self.custom_filters.keys()
    }

    /// Value of a field in a row; compound fields are assembled from members.
    pub fn field_value(&self, field: &FieldDef, row: &Row) -> Value {
        if field.is_compound() {
            Value::List(
                field
                    .members()
                    .iter()
                    .map(|m| row.get_or_null(m).clone())
                    .collect(),
            )
        } else {
            row.get_or_null(field.key()).clone()
        }
    }

    /// Id of a row.
    pub fn id_of(&self, row: &Row) -> Result<EntityId, Error> {
        let id = self.id_field()?;
        Ok(match self.field_value(id, row) {
            Value::List(components) => EntityId::Compound(components),
            value => EntityId::Single(value),
        })
    }

    /// Filter selecting the row with the given id.
    pub fn id_filter(&self, id: &EntityId) -> FilterExpr {
        FilterExpr::eq(self.id_field.clone(), id.to_value())
    }

    /// Normalize an id through the id field's converter, checking arity.
    pub fn coerce_id(&self, id: &EntityId) -> Result<EntityId, Error> {
        let field = self.id_field()?;
        Ok(match self.coerce_value(field, &id.to_value())? {
            Value::List(components) => EntityId::Compound(components),
            value => EntityId::Single(value),
        })
    }

    /// Parse an id from its URL input form (JSON array for compound ids).
    pub fn parse_id(&self, input: &str) -> Result<EntityId, Error> {
        let field = self.id_field()?;
        Ok(match self.value_from_input(field, input)? {
            Value::List(components) => EntityId::Compound(components),
            value => EntityId::Single(value),
        })
    }

    /// Render an id in its URL input form.
    pub fn id_to_input(&self, id: &EntityId) -> Result<String, Error> {
        let field = self.id_field()?;
        self.value_to_input(field, &id.to_value())
    }

    fn check_arity(field: &FieldDef, actual: usize) -> Result<(), Error> {
        let expected = field.members().len();
        if expected != actual {
            return Err(Error::CompoundArity {
                field: field.key().to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Convert a field value to its JSON wire form.
    pub fn value_to_json(&self, field: &FieldDef, value: &Value) -> Result<serde_json::Value, Error> {
        if !field.is_compound() {
            return Ok(field.converter().to_json(value));
        }
        let members = self.member_fields(field)?;
        match value {
            Value::List(items) => {
                Self::check_arity(field, items.len())?;
                Ok(serde_json::Value::Array(
                    members
                        .iter()
                        .zip(items)
                        .map(|(m, v)| m.converter().to_json(v))
                        .collect(),
                ))
            }
            Value::Null => Ok(serde_json::Value::Null),
            other => Err(Error::invalid_value(
                field.key(),
                format!("expected a list, got {}", other.type_name()),
            )),
        }
    }

    /// Convert a JSON wire value to a field value.
    pub fn value_from_json(&self, field: &FieldDef, json: &serde_json::Value) -> Result<Value, Error> {
        if !field.is_compound() {
            return field.converter().from_json(field.key(), json);
        }
        let members = self.member_fields(field)?;
        match json {
            serde_json::Value::Array(items) => {
                Self::check_arity(field, items.len())?;
                members
                    .iter()
                    .zip(items)
                    .map(|(m, v)| m.converter().from_json(m.key(), v))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            }
            serde_json::Value::Null => Ok(Value::Null),
            _ => Err(Error::invalid_value(field.key(), "expected a JSON array")),
        }
    }

    /// Convert a field value to its URL input string.
    pub fn value_to_input(&self, field: &FieldDef, value: &Value) -> Result<String, Error> {
        if field.is_compound() {
            return Ok(self.value_to_json(field, value)?.to_string());
        }
        Ok(field.converter().to_input(value))
    }

    /// Convert a URL input string to a field value.
    pub fn value_from_input(&self, field: &FieldDef, input: &str) -> Result<Value, Error> {
        if field.is_compound() {
            let json: serde_json::Value = serde_json::from_str(input)
                .map_err(|_| Error::invalid_value(field.key(), "expected a JSON array"))?;
            return self.value_from_json(field, &json);
        }
        field.converter().from_input(field.key(), input)
    }

    /// Normalize a loosely typed value for a field.
    pub fn coerce_value(&self, field: &FieldDef, value: &Value) -> Result<Value, Error> {
        if !field.is_compound() {
            return field.converter().coerce(field.key(), value);
        }
        let members = self.member_fields(field)?;
        match value {
            Value::List(items) => {
                Self::check_arity(field, items.len())?;
                members
                    .iter()
                    .zip(items)
                    .map(|(m, v)| m.converter().coerce(m.key(), v))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            }
            Value::Json(json) => self.value_from_json(field, json),
            Value::Null => Ok(Value::Null),
            _ => Err(Error::CompoundArity {
                field: field.key().to_string(),
                expected: members.len(),
                actual: 1,
            }),
        }
    }

    /// Render a row as a JSON object.
    ///
    /// With `api_only`, fields not readable through the API are left out.
    pub fn row_to_json(
        &self,
        row: &Row,
        api_only: bool,
    ) -> Result<serde_json::Map<String, serde_json::Value>, Error> {
        let mut out = serde_json::Map::new();
        for field in &self.fields {
            if api_only && !field.allow_api_read() {
                continue;
            }
            let value = self.field_value(field, row);
            out.insert(field.key().to_string(), self.value_to_json(field, &value)?);
        }
        Ok(out)
    }

    /// Parse a row from a JSON object.
    ///
    /// Compound values are split into their members. Unknown keys fail with
    /// `UnknownField`.
    pub fn row_from_json(&self, json: &serde_json::Value) -> Result<Row, Error> {
        let object = json
            .as_object()
            .ok_or_else(|| Error::InvalidFilter("expected a JSON object".into()))?;
        let mut row = Row::new();
        for (key, raw) in object {
            let field = self.require_field(key)?;
            let value = self.value_from_json(field, raw)?;
            if field.is_compound() {
                if let Value::List(items) = value {
                    for (member, item) in field.members().iter().zip(items) {
                        row.set(member.clone(), item);
                    }
                }
            } else {
                row.set(key.clone(), value);
            }
        }
        Ok(row)
    }

    /// Evaluate computed fields into the row.
    pub fn apply_computed(&self, row: &mut Row) {
        for field in &self.fields {
            if let Some(value) = field.compute(row) {
                row.set(field.key(), value);
            }
        }
    }
}

impl fmt::Debug for EntityDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.custom_filters.keys().collect();
        names.sort();
        f.debug_struct("EntityDef")
            .field("name", &self.name)
            .field("db_name", &self.db_name)
            .field("id_field", &self.id_field)
            .field("fields", &self.fields)
            .field("default_order", &self.default_order)
            .field("permissions", &self.permissions)
            .field("custom_filters", &names)
            .finish()
    }
}

/// Typed accessor bound to one field key, offering the filter builders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    key: String,
}

impl FieldRef {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }

    /// Field key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Field equals a value.
    pub fn eq(&self, value: impl Into<Value>) -> FilterExpr {
        FilterExpr::eq(self.key.clone(), value)
    }

    /// Field differs from a value; nulls match.
    pub fn ne(&self, value: impl Into<Value>) -> FilterExpr {
        FilterExpr::ne(self.key.clone(), value)
    }

    /// Field greater than a value.
    pub fn gt(&self, value: impl Into<Value>) -> FilterExpr {
        FilterExpr::gt(self.key.clone(), value)
    }

    /// Field greater than or equal to a value.
    pub fn gte(&self, value: impl Into<Value>) -> FilterExpr {
        FilterExpr::gte(self.key.clone(), value)
    }

    /// Field less than a value.
    pub fn lt(&self, value: impl Into<Value>) -> FilterExpr {
        FilterExpr::lt(self.key.clone(), value)
    }

    /// Field less than or equal to a value.
    pub fn lte(&self, value: impl Into<Value>) -> FilterExpr {
        FilterExpr::lte(self.key.clone(), value)
    }

    /// Case-insensitive substring match.
    pub fn contains(&self, value: impl Into<String>) -> FilterExpr {
        FilterExpr::contains(self.key.clone(), value)
    }

    /// Case-insensitive prefix match.
    pub fn starts_with(&self, value: impl Into<String>) -> FilterExpr {
        FilterExpr::starts_with(self.key.clone(), value)
    }

    /// Case-insensitive suffix match.
    pub fn ends_with(&self, value: impl Into<String>) -> FilterExpr {
        FilterExpr::ends_with(self.key.clone(), value)
    }

    /// Field is null.
    pub fn is_null(&self) -> FilterExpr {
        FilterExpr::is_null(self.key.clone())
    }

    /// Field is not null.
    pub fn is_not_null(&self) -> FilterExpr {
        FilterExpr::is_not_null(self.key.clone())
    }

    /// Field equals one of the values; an empty list matches nothing.
    pub fn in_list<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> FilterExpr {
        FilterExpr::in_list(self.key.clone(), values)
    }

    /// Ascending order on this field.
    pub fn asc(&self) -> OrderSpec {
        OrderSpec::asc(self.key.clone())
    }

    /// Descending order on this field.
    pub fn desc(&self) -> OrderSpec {
        OrderSpec::desc(self.key.clone())
    }
}
