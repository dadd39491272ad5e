//! Materialized rows and entity ids.

use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::value::Value;

/// A materialized row: field key to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: BTreeMap<String, Value>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a field value, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Get a field value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Get a field value, treating a missing field as null.
    pub fn get_or_null(&self, key: &str) -> &Value {
        const NULL: Value = Value::Null;
        self.values.get(key).unwrap_or(&NULL)
    }

    /// Remove a field value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Check if the row has a value for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Overwrite this row's values with the ones in `changes`.
    pub fn merge(&mut self, changes: &Row) {
        for (key, value) in changes.iter() {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Field keys present in this row.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Iterate over `(key, value)` pairs in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.values.iter()
    }

    /// Number of fields present.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if no field is present.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Identifier of one entity row.
///
/// Compound ids carry one component per id column, in declared order; they
/// are never encoded by joining components with a delimiter.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityId {
    /// Id of an entity with a single id column.
    Single(Value),
    /// Id of an entity with a compound id.
    Compound(Vec<Value>),
}

impl EntityId {
    /// Components of the id, in column order.
    pub fn components(&self) -> &[Value] {
        match self {
            EntityId::Single(value) => std::slice::from_ref(value),
            EntityId::Compound(values) => values,
        }
    }

    /// The id as the value of its id field (`List` for compound ids).
    pub fn to_value(&self) -> Value {
        match self {
            EntityId::Single(value) => value.clone(),
            EntityId::Compound(values) => Value::List(values.clone()),
        }
    }
}

impl From<Value> for EntityId {
    fn from(value: Value) -> Self {
        match value {
            Value::List(values) => EntityId::Compound(values),
            other => EntityId::Single(other),
        }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        EntityId::Single(Value::Integer(value))
    }
}

impl From<i32> for EntityId {
    fn from(value: i32) -> Self {
        EntityId::Single(Value::Integer(value as i64))
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId::Single(Value::String(value.to_string()))
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        EntityId::Single(Value::String(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_builder_and_merge() {
        let mut row = Row::new().with("id", 1).with("name", "a");
        assert_eq!(row.get("name"), Some(&Value::String("a".into())));
        assert_eq!(row.get_or_null("missing"), &Value::Null);

        row.merge(&Row::new().with("name", "b").with("done", true));
        assert_eq!(row.len(), 3);
        assert_eq!(row.get("name"), Some(&Value::String("b".into())));
    }

    #[test]
    fn test_row_from_iter() {
        let row: Row = [("id", Value::Integer(1)), ("name", Value::from("x"))]
            .into_iter()
            .collect();
        let keys: Vec<_> = row.keys().cloned().collect();
        assert_eq!(keys, vec!["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn test_entity_id_from_value() {
        assert_eq!(EntityId::from(3), EntityId::Single(Value::Integer(3)));
        let compound = EntityId::from(Value::List(vec![1.into(), "a".into()]));
        assert_eq!(compound.components().len(), 2);
        assert_eq!(
            compound.to_value(),
            Value::List(vec![Value::Integer(1), Value::String("a".into())])
        );
    }
}
