//! Value converters between in-memory, wire, URL input and storage forms.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use shoal_proto::{Value, DATE_FORMAT};

use super::types::ValueType;
use crate::error::Error;

const DATE_ONLY_FORMAT: &str = "%Y-%m-%d";

/// Bidirectional mapping for one field's values.
///
/// `field` arguments are only used to label errors.
pub trait ValueConverter: Send + Sync + fmt::Debug {
    /// In-memory value to its JSON wire form.
    fn to_json(&self, value: &Value) -> serde_json::Value;

    /// JSON wire form to an in-memory value.
    fn from_json(&self, field: &str, json: &serde_json::Value) -> Result<Value, Error>;

    /// In-memory value to its URL input string.
    fn to_input(&self, value: &Value) -> String;

    /// URL input string to an in-memory value.
    fn from_input(&self, field: &str, input: &str) -> Result<Value, Error>;

    /// In-memory value to the value bound to storage.
    fn to_db(&self, value: &Value) -> Value {
        value.clone()
    }

    /// Storage value to an in-memory value.
    fn from_db(&self, field: &str, value: Value) -> Result<Value, Error> {
        self.coerce(field, &value)
    }

    /// Normalize a loosely typed value (filter literal, row input).
    fn coerce(&self, field: &str, value: &Value) -> Result<Value, Error>;
}

/// Default converter for a value type.
pub fn converter_for(value_type: ValueType) -> Arc<dyn ValueConverter> {
    match value_type {
        ValueType::String => Arc::new(StringConverter),
        ValueType::Integer => Arc::new(IntegerConverter),
        ValueType::Number => Arc::new(NumberConverter),
        ValueType::Boolean => Arc::new(BooleanConverter),
        ValueType::Date => Arc::new(DateConverter),
        ValueType::DateOnly => Arc::new(DateOnlyConverter),
        ValueType::Json => Arc::new(JsonConverter),
    }
}

/// Type-agnostic JSON rendering of a value.
pub fn plain_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Date(d) => serde_json::Value::String(d.format(DATE_FORMAT).to_string()),
        Value::Json(json) => json.clone(),
        Value::List(items) => serde_json::Value::Array(items.iter().map(plain_json).collect()),
    }
}

fn mismatch(field: &str, expected: ValueType, found: &str) -> Error {
    Error::invalid_value(field, format!("expected {expected}, got {found}"))
}

fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Converter for [`ValueType::String`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StringConverter;

impl ValueConverter for StringConverter {
    fn to_json(&self, value: &Value) -> serde_json::Value {
        match value.to_text() {
            Some(text) => serde_json::Value::String(text),
            None => serde_json::Value::Null,
        }
    }

    fn from_json(&self, field: &str, json: &serde_json::Value) -> Result<Value, Error> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Number(n) => Ok(Value::String(n.to_string())),
            serde_json::Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(mismatch(field, ValueType::String, json_kind(other))),
        }
    }

    fn to_input(&self, value: &Value) -> String {
        value.to_text().unwrap_or_default()
    }

    fn from_input(&self, _field: &str, input: &str) -> Result<Value, Error> {
        Ok(Value::String(input.to_string()))
    }

    fn coerce(&self, field: &str, value: &Value) -> Result<Value, Error> {
        match value {
            Value::Null | Value::String(_) => Ok(value.clone()),
            Value::Bool(_) | Value::Integer(_) | Value::Float(_) | Value::Date(_) => {
                Ok(Value::String(value.to_text().unwrap_or_default()))
            }
            Value::Json(json) => self.from_json(field, json),
            Value::List(_) => Err(mismatch(field, ValueType::String, value.type_name())),
        }
    }
}

/// Converter for [`ValueType::Integer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerConverter;

impl ValueConverter for IntegerConverter {
    fn to_json(&self, value: &Value) -> serde_json::Value {
        plain_json(value)
    }

    fn from_json(&self, field: &str, json: &serde_json::Value) -> Result<Value, Error> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Ok(Value::Integer(i)),
                (None, Some(f)) => self.coerce(field, &Value::Float(f)),
                _ => Err(Error::invalid_value(field, "integer out of range")),
            },
            serde_json::Value::String(s) => self.from_input(field, s),
            other => Err(mismatch(field, ValueType::Integer, json_kind(other))),
        }
    }

    fn to_input(&self, value: &Value) -> String {
        value.to_text().unwrap_or_default()
    }

    fn from_input(&self, field: &str, input: &str) -> Result<Value, Error> {
        input
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| Error::invalid_value(field, format!("'{input}' is not an integer")))
    }

    fn coerce(&self, field: &str, value: &Value) -> Result<Value, Error> {
        match value {
            Value::Null | Value::Integer(_) => Ok(value.clone()),
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 => Ok(Value::Integer(*f as i64)),
            Value::String(s) => self.from_input(field, s),
            Value::Json(json) => self.from_json(field, json),
            other => Err(mismatch(field, ValueType::Integer, other.type_name())),
        }
    }
}

/// Converter for [`ValueType::Number`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberConverter;

impl ValueConverter for NumberConverter {
    fn to_json(&self, value: &Value) -> serde_json::Value {
        plain_json(value)
    }

    fn from_json(&self, field: &str, json: &serde_json::Value) -> Result<Value, Error> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| Error::invalid_value(field, "number out of range")),
            serde_json::Value::String(s) => self.from_input(field, s),
            other => Err(mismatch(field, ValueType::Number, json_kind(other))),
        }
    }

    fn to_input(&self, value: &Value) -> String {
        value.to_text().unwrap_or_default()
    }

    fn from_input(&self, field: &str, input: &str) -> Result<Value, Error> {
        input
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| Error::invalid_value(field, format!("'{input}' is not a number")))
    }

    fn coerce(&self, field: &str, value: &Value) -> Result<Value, Error> {
        match value {
            Value::Null | Value::Float(_) => Ok(value.clone()),
            Value::Integer(i) => Ok(Value::Float(*i as f64)),
            Value::String(s) => self.from_input(field, s),
            Value::Json(json) => self.from_json(field, json),
            other => Err(mismatch(field, ValueType::Number, other.type_name())),
        }
    }
}

/// Converter for [`ValueType::Boolean`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanConverter;

impl ValueConverter for BooleanConverter {
    fn to_json(&self, value: &Value) -> serde_json::Value {
        plain_json(value)
    }

    fn from_json(&self, field: &str, json: &serde_json::Value) -> Result<Value, Error> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => self.coerce(field, &Value::Integer(n.as_i64().unwrap_or(-1))),
            serde_json::Value::String(s) => self.from_input(field, s),
            other => Err(mismatch(field, ValueType::Boolean, json_kind(other))),
        }
    }

    fn to_input(&self, value: &Value) -> String {
        match value {
            Value::Bool(b) => b.to_string(),
            other => other.to_text().unwrap_or_default(),
        }
    }

    fn from_input(&self, field: &str, input: &str) -> Result<Value, Error> {
        match input.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(Error::invalid_value(field, format!("'{input}' is not a boolean"))),
        }
    }

    fn to_db(&self, value: &Value) -> Value {
        match value {
            Value::Bool(b) => Value::Integer(i64::from(*b)),
            other => other.clone(),
        }
    }

    fn coerce(&self, field: &str, value: &Value) -> Result<Value, Error> {
        match value {
            Value::Null | Value::Bool(_) => Ok(value.clone()),
            Value::Integer(0) => Ok(Value::Bool(false)),
            Value::Integer(1) => Ok(Value::Bool(true)),
            Value::String(s) => self.from_input(field, s),
            Value::Json(json) => self.from_json(field, json),
            other => Err(mismatch(field, ValueType::Boolean, other.type_name())),
        }
    }
}

fn truncate_millis(date: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(date.timestamp_millis()).unwrap_or(date)
}

fn parse_timestamp(field: &str, input: &str) -> Result<DateTime<Utc>, Error> {
    let input = input.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(input) {
        return Ok(truncate_millis(date.with_timezone(&Utc)));
    }
    parse_date_only(field, input)
}

fn parse_date_only(field: &str, input: &str) -> Result<DateTime<Utc>, Error> {
    NaiveDate::parse_from_str(input.trim(), DATE_ONLY_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| Error::invalid_value(field, format!("'{input}' is not a date")))
}

/// Converter for [`ValueType::Date`].
///
/// Dates are truncated to milliseconds and stored as [`DATE_FORMAT`] text.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateConverter;

impl ValueConverter for DateConverter {
    fn to_json(&self, value: &Value) -> serde_json::Value {
        plain_json(value)
    }

    fn from_json(&self, field: &str, json: &serde_json::Value) -> Result<Value, Error> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::String(s) => self.from_input(field, s),
            serde_json::Value::Number(n) => n
                .as_i64()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .map(Value::Date)
                .ok_or_else(|| Error::invalid_value(field, "timestamp out of range")),
            other => Err(mismatch(field, ValueType::Date, json_kind(other))),
        }
    }

    fn to_input(&self, value: &Value) -> String {
        value.to_text().unwrap_or_default()
    }

    fn from_input(&self, field: &str, input: &str) -> Result<Value, Error> {
        parse_timestamp(field, input).map(Value::Date)
    }

    fn to_db(&self, value: &Value) -> Value {
        match value {
            Value::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
            other => other.clone(),
        }
    }

    fn coerce(&self, field: &str, value: &Value) -> Result<Value, Error> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Date(d) => Ok(Value::Date(truncate_millis(*d))),
            Value::String(s) => self.from_input(field, s),
            Value::Json(json) => self.from_json(field, json),
            other => Err(mismatch(field, ValueType::Date, other.type_name())),
        }
    }
}

/// Converter for [`ValueType::DateOnly`]: dates at midnight UTC, `YYYY-MM-DD`
/// on the wire and in storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateOnlyConverter;

impl DateOnlyConverter {
    fn render(value: &Value) -> Option<String> {
        match value {
            Value::Date(d) => Some(d.format(DATE_ONLY_FORMAT).to_string()),
            _ => None,
        }
    }
}

impl ValueConverter for DateOnlyConverter {
    fn to_json(&self, value: &Value) -> serde_json::Value {
        match Self::render(value) {
            Some(text) => serde_json::Value::String(text),
            None => plain_json(value),
        }
    }

    fn from_json(&self, field: &str, json: &serde_json::Value) -> Result<Value, Error> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::String(s) => self.from_input(field, s),
            other => Err(mismatch(field, ValueType::DateOnly, json_kind(other))),
        }
    }

    fn to_input(&self, value: &Value) -> String {
        Self::render(value).unwrap_or_else(|| value.to_text().unwrap_or_default())
    }

    fn from_input(&self, field: &str, input: &str) -> Result<Value, Error> {
        let timestamp = parse_timestamp(field, input)?;
        let day = timestamp.format(DATE_ONLY_FORMAT).to_string();
        parse_date_only(field, &day).map(Value::Date)
    }

    fn to_db(&self, value: &Value) -> Value {
        match Self::render(value) {
            Some(text) => Value::String(text),
            None => value.clone(),
        }
    }

    fn coerce(&self, field: &str, value: &Value) -> Result<Value, Error> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Date(_) => self.from_input(field, &self.to_input(value)),
            Value::String(s) => self.from_input(field, s),
            Value::Json(json) => self.from_json(field, json),
            other => Err(mismatch(field, ValueType::DateOnly, other.type_name())),
        }
    }
}

/// Converter for [`ValueType::Json`]; stored as JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl ValueConverter for JsonConverter {
    fn to_json(&self, value: &Value) -> serde_json::Value {
        plain_json(value)
    }

    fn from_json(&self, _field: &str, json: &serde_json::Value) -> Result<Value, Error> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            other => Ok(Value::Json(other.clone())),
        }
    }

    fn to_input(&self, value: &Value) -> String {
        match value {
            Value::Null => String::new(),
            other => plain_json(other).to_string(),
        }
    }

    fn from_input(&self, field: &str, input: &str) -> Result<Value, Error> {
        match serde_json::from_str::<serde_json::Value>(input) {
            Ok(json) => self.from_json(field, &json),
            Err(_) => Ok(Value::Json(serde_json::Value::String(input.to_string()))),
        }
    }

    fn to_db(&self, value: &Value) -> Value {
        match value {
            Value::Null => Value::Null,
            other => Value::String(plain_json(other).to_string()),
        }
    }

    fn from_db(&self, field: &str, value: Value) -> Result<Value, Error> {
        match value {
            Value::String(text) => {
                let json: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|e| Error::invalid_value(field, e.to_string()))?;
                self.from_json(field, &json)
            }
            other => self.coerce(field, &other),
        }
    }

    fn coerce(&self, field: &str, value: &Value) -> Result<Value, Error> {
        self.from_json(field, &plain_json(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_integer_coercion() {
        let c = IntegerConverter;
        assert_eq!(c.coerce("n", &Value::from("5")).unwrap(), Value::Integer(5));
        assert_eq!(c.coerce("n", &Value::Float(3.0)).unwrap(), Value::Integer(3));
        assert!(c.coerce("n", &Value::Float(3.5)).is_err());
        assert!(c.from_input("n", "abc").is_err());
        assert_eq!(c.from_json("n", &json!("42")).unwrap(), Value::Integer(42));
    }

    #[test]
    fn test_boolean_storage_form() {
        let c = BooleanConverter;
        assert_eq!(c.to_db(&Value::Bool(true)), Value::Integer(1));
        assert_eq!(c.from_db("b", Value::Integer(0)).unwrap(), Value::Bool(false));
        assert_eq!(c.from_input("b", "TRUE").unwrap(), Value::Bool(true));
        assert_eq!(c.to_input(&Value::Bool(false)), "false");
    }

    #[test]
    fn test_date_truncates_to_millis() {
        let c = DateConverter;
        let parsed = c.from_input("d", "2024-03-01T10:20:30.123456Z").unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 20, 30).unwrap()
            + chrono::Duration::milliseconds(123);
        assert_eq!(parsed, Value::Date(expected));
        assert_eq!(
            c.to_db(&parsed),
            Value::String("2024-03-01T10:20:30.123Z".into())
        );
        assert_eq!(c.from_db("d", c.to_db(&parsed)).unwrap(), parsed);
    }

    #[test]
    fn test_date_accepts_plain_day() {
        let c = DateConverter;
        let parsed = c.from_input("d", "2024-03-01").unwrap();
        assert_eq!(
            parsed,
            Value::Date(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_date_only_drops_time() {
        let c = DateOnlyConverter;
        let value = c
            .coerce(
                "d",
                &Value::Date(Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap()),
            )
            .unwrap();
        assert_eq!(c.to_json(&value), json!("2024-03-01"));
        assert_eq!(c.to_db(&value), Value::String("2024-03-01".into()));
    }

    #[test]
    fn test_json_round_trips_through_text() {
        let c = JsonConverter;
        let value = c.from_json("j", &json!({"a": [1, 2]})).unwrap();
        let stored = c.to_db(&value);
        assert_eq!(stored, Value::String("{\"a\":[1,2]}".into()));
        assert_eq!(c.from_db("j", stored).unwrap(), value);
        assert_eq!(c.from_json("j", &json!(null)).unwrap(), Value::Null);
    }

    #[test]
    fn test_string_from_scalars() {
        let c = StringConverter;
        assert_eq!(c.coerce("s", &Value::Integer(7)).unwrap(), Value::from("7"));
        assert!(c.from_json("s", &json!([1])).is_err());
        assert_eq!(c.to_input(&Value::Null), "");
    }
}
