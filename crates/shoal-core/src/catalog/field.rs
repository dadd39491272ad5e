//! Field definitions for entities.

use std::fmt;
use std::sync::Arc;

use shoal_proto::{Row, Value};

use super::converter::{converter_for, ValueConverter};
use super::types::ValueType;

/// Custom field validator: returns an error message when the value is rejected.
pub type Validator = Arc<dyn Fn(&Value, &Row) -> Result<(), String> + Send + Sync>;

/// Server-side computation of a virtual field from the fetched row.
pub type ComputedFn = Arc<dyn Fn(&Row) -> Value + Send + Sync>;

/// A field definition within an entity.
///
/// The key is fixed at construction. A field is either stored (backed by one
/// column), computed (evaluated after every fetch, never stored) or compound
/// (an ordered group of stored member fields, valued as a `Value::List`).
#[derive(Clone)]
pub struct FieldDef {
    key: String,
    caption: String,
    value_type: ValueType,
    db_name: String,
    allow_api_read: bool,
    allow_api_update: bool,
    required: bool,
    auto_increment: bool,
    converter: Arc<dyn ValueConverter>,
    validators: Vec<Validator>,
    computed: Option<ComputedFn>,
    members: Vec<String>,
}

impl FieldDef {
    /// Create an optional stored field.
    pub fn new(key: impl Into<String>, value_type: ValueType) -> Self {
        let key = key.into();
        Self {
            caption: humanize(&key),
            db_name: key.clone(),
            key,
            value_type,
            allow_api_read: true,
            allow_api_update: true,
            required: false,
            auto_increment: false,
            converter: converter_for(value_type),
            validators: Vec::new(),
            computed: None,
            members: Vec::new(),
        }
    }

    /// Create a string field.
    pub fn string(key: impl Into<String>) -> Self {
        Self::new(key, ValueType::String)
    }

    /// Create an integer field.
    pub fn integer(key: impl Into<String>) -> Self {
        Self::new(key, ValueType::Integer)
    }

    /// Create a floating point field.
    pub fn number(key: impl Into<String>) -> Self {
        Self::new(key, ValueType::Number)
    }

    /// Create a boolean field.
    pub fn boolean(key: impl Into<String>) -> Self {
        Self::new(key, ValueType::Boolean)
    }

    /// Create a timestamp field.
    pub fn date(key: impl Into<String>) -> Self {
        Self::new(key, ValueType::Date)
    }

    /// Create a calendar date field.
    pub fn date_only(key: impl Into<String>) -> Self {
        Self::new(key, ValueType::DateOnly)
    }

    /// Create a JSON document field.
    pub fn json(key: impl Into<String>) -> Self {
        Self::new(key, ValueType::Json)
    }

    /// Create a compound field over the given member field keys.
    pub fn compound<S: Into<String>>(
        key: impl Into<String>,
        members: impl IntoIterator<Item = S>,
    ) -> Self {
        let mut field = Self::new(key, ValueType::Json);
        field.members = members.into_iter().map(Into::into).collect();
        field
    }

    /// Create a computed (virtual) field.
    pub fn computed<F>(key: impl Into<String>, value_type: ValueType, compute: F) -> Self
    where
        F: Fn(&Row) -> Value + Send + Sync + 'static,
    {
        let mut field = Self::new(key, value_type);
        field.computed = Some(Arc::new(compute));
        field.allow_api_update = false;
        field
    }

    /// Set the display caption.
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = caption.into();
        self
    }

    /// Set the storage column name.
    pub fn with_db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = db_name.into();
        self
    }

    /// Replace the value converter.
    pub fn with_converter(mut self, converter: Arc<dyn ValueConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Add a validator.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value, &Row) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Mark as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as auto-increment. The API may not write it.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.allow_api_update = false;
        self
    }

    /// Forbid API writes to this field.
    pub fn read_only(mut self) -> Self {
        self.allow_api_update = false;
        self
    }

    /// Exclude from API responses, filters and sorting.
    pub fn hidden(mut self) -> Self {
        self.allow_api_read = false;
        self
    }

    /// Field key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Display caption.
    pub fn caption(&self) -> &str {
        &self.caption
    }

    /// Declared value type.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Storage column name.
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Whether the API may read this field.
    pub fn allow_api_read(&self) -> bool {
        self.allow_api_read
    }

    /// Whether the API may write this field.
    pub fn allow_api_update(&self) -> bool {
        self.allow_api_update
    }

    /// Whether a value must be present.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Whether the provider assigns the value on insert.
    pub fn is_auto_increment(&self) -> bool {
        self.auto_increment
    }

    /// Value converter.
    pub fn converter(&self) -> &dyn ValueConverter {
        self.converter.as_ref()
    }

    /// Run the custom validators against a value.
    pub fn validate(&self, value: &Value, row: &Row) -> Result<(), String> {
        self.validators.iter().try_for_each(|v| v(value, row))
    }

    /// Evaluate a computed field; `None` for stored fields.
    pub fn compute(&self, row: &Row) -> Option<Value> {
        self.computed.as_ref().map(|f| f(row))
    }

    /// Check if this is a computed field.
    pub fn is_computed(&self) -> bool {
        self.computed.is_some()
    }

    /// Check if this is a compound field.
    pub fn is_compound(&self) -> bool {
        !self.members.is_empty()
    }

    /// Check if this field is backed by its own column.
    pub fn is_stored(&self) -> bool {
        !self.is_computed() && !self.is_compound()
    }

    /// Member field keys of a compound field.
    pub fn members(&self) -> &[String] {
        &self.members
    }
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("key", &self.key)
            .field("value_type", &self.value_type)
            .field("db_name", &self.db_name)
            .field("allow_api_read", &self.allow_api_read)
            .field("allow_api_update", &self.allow_api_update)
            .field("required", &self.required)
            .field("auto_increment", &self.auto_increment)
            .field("computed", &self.is_computed())
            .field("members", &self.members)
            .finish()
    }
}

/// Turn `createdAt` or `created_at` into `Created at`.
pub fn humanize(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for ch in key.chars() {
        if ch == '_' || ch == '-' {
            if !out.ends_with(' ') && !out.is_empty() {
                out.push(' ');
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        if out.is_empty() {
            out.extend(ch.to_uppercase());
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    out.trim_end().to_string()
}
