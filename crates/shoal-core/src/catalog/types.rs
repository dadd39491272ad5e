//! Value types declared by fields.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Declared value type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    /// UTF-8 text.
    String,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit floating point.
    Number,
    /// Boolean, stored as 0/1.
    Boolean,
    /// UTC timestamp with millisecond precision.
    Date,
    /// Calendar date without a time component.
    DateOnly,
    /// Arbitrary JSON document, stored as text.
    Json,
}

impl ValueType {
    /// Name used in schema files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Date => "date",
            ValueType::DateOnly => "dateOnly",
            ValueType::Json => "json",
        }
    }

    /// SQLite column type.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ValueType::Integer | ValueType::Boolean => "INTEGER",
            ValueType::Number => "REAL",
            ValueType::String | ValueType::Date | ValueType::DateOnly | ValueType::Json => "TEXT",
        }
    }

    /// Check if ordering operators agree across backends for this type.
    pub fn is_orderable(&self) -> bool {
        !matches!(self, ValueType::Json)
    }

    /// Check if text operators agree across backends for this type.
    ///
    /// Floats render differently in SQLite (`2.0`) and Rust (`2`).
    pub fn supports_text_match(&self) -> bool {
        !matches!(self, ValueType::Number)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_serde_names() {
        let json = serde_json::to_string(&ValueType::DateOnly).unwrap();
        assert_eq!(json, "\"dateOnly\"");
        let parsed: ValueType = serde_json::from_str("\"integer\"").unwrap();
        assert_eq!(parsed, ValueType::Integer);
    }

    #[test]
    fn test_sql_types() {
        assert_eq!(ValueType::Boolean.sql_type(), "INTEGER");
        assert_eq!(ValueType::Date.sql_type(), "TEXT");
        assert!(!ValueType::Json.is_orderable());
        assert!(!ValueType::Number.supports_text_match());
    }
}
