//! Filter expression model.
//!
//! A [`FilterExpr`] describes "which rows" independently of any storage
//! backend. Expressions are plain immutable values: builders return new nodes
//! and never mutate their inputs.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::value::Value;

/// Comparison operator of a single-field filter.
///
/// Set membership is modelled separately by [`FilterExpr::In`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// Field equals value.
    Eq,
    /// Field not equals value.
    Ne,
    /// Field greater than value.
    Gt,
    /// Field greater than or equal to value.
    Gte,
    /// Field less than value.
    Lt,
    /// Field less than or equal to value.
    Lte,
    /// Field text contains value.
    Contains,
    /// Field text starts with value.
    StartsWith,
    /// Field text ends with value.
    EndsWith,
}

impl CompareOp {
    /// All operators, in declaration order.
    pub const ALL: [CompareOp; 9] = [
        CompareOp::Eq,
        CompareOp::Ne,
        CompareOp::Gt,
        CompareOp::Gte,
        CompareOp::Lt,
        CompareOp::Lte,
        CompareOp::Contains,
        CompareOp::StartsWith,
        CompareOp::EndsWith,
    ];

    /// Canonical operator name (`eq`, `startsWith`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Gt => "gt",
            CompareOp::Gte => "gte",
            CompareOp::Lt => "lt",
            CompareOp::Lte => "lte",
            CompareOp::Contains => "contains",
            CompareOp::StartsWith => "startsWith",
            CompareOp::EndsWith => "endsWith",
        }
    }

    /// Check if this is an ordering operator (`gt`, `gte`, `lt`, `lte`).
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte
        )
    }

    /// Check if this operator works on the text form of the field.
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            CompareOp::Contains | CompareOp::StartsWith | CompareOp::EndsWith
        )
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompareOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompareOp::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| Error::UnknownOperator(s.to_string()))
    }
}

/// Filter expression for selecting rows.
///
/// An empty `And` matches every row and an empty `Or` matches none; see
/// [`FilterExpr::all`] and [`FilterExpr::none`].
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// Single-field comparison. A `None` value is "undefined" and places no
    /// constraint on the rows; use `Some(Value::Null)` to match nulls.
    Compare {
        field: String,
        op: CompareOp,
        value: Option<Value>,
    },
    /// Field is one of the listed values. An empty list matches nothing.
    In { field: String, values: Vec<Value> },
    /// All children must match.
    And(Vec<FilterExpr>),
    /// At least one child must match.
    Or(Vec<FilterExpr>),
    /// The child must not match.
    Not(Box<FilterExpr>),
    /// Named filter expanded by a handler registered on the entity.
    Custom {
        name: String,
        args: serde_json::Value,
    },
}

impl FilterExpr {
    /// Filter that matches every row.
    pub fn all() -> Self {
        FilterExpr::And(Vec::new())
    }

    /// Filter that matches no row.
    pub fn none() -> Self {
        FilterExpr::Or(Vec::new())
    }

    /// Check if this is the match-all filter.
    pub fn is_all(&self) -> bool {
        matches!(self, FilterExpr::And(children) if children.is_empty())
    }

    /// Check if this is the match-none filter.
    pub fn is_none(&self) -> bool {
        matches!(self, FilterExpr::Or(children) if children.is_empty())
    }

    /// Create a comparison whose value may be undefined.
    pub fn compare(field: impl Into<String>, op: CompareOp, value: Option<Value>) -> Self {
        FilterExpr::Compare {
            field: field.into(),
            op,
            value,
        }
    }

    fn defined(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::compare(field, op, Some(value.into()))
    }

    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::defined(field, CompareOp::Eq, value)
    }

    /// Create a not-equal filter.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::defined(field, CompareOp::Ne, value)
    }

    /// Create a greater-than filter.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::defined(field, CompareOp::Gt, value)
    }

    /// Create a greater-than-or-equal filter.
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::defined(field, CompareOp::Gte, value)
    }

    /// Create a less-than filter.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::defined(field, CompareOp::Lt, value)
    }

    /// Create a less-than-or-equal filter.
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::defined(field, CompareOp::Lte, value)
    }

    /// Create a substring filter.
    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::defined(field, CompareOp::Contains, value.into())
    }

    /// Create a prefix filter.
    pub fn starts_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::defined(field, CompareOp::StartsWith, value.into())
    }

    /// Create a suffix filter.
    pub fn ends_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::defined(field, CompareOp::EndsWith, value.into())
    }

    /// Create an IS NULL filter.
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::defined(field, CompareOp::Eq, Value::Null)
    }

    /// Create an IS NOT NULL filter.
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::defined(field, CompareOp::Ne, Value::Null)
    }

    /// Create an IN filter.
    pub fn in_list<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        FilterExpr::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a custom filter resolved by the entity's handler named `name`.
    pub fn custom(name: impl Into<String>, args: serde_json::Value) -> Self {
        FilterExpr::Custom {
            name: name.into(),
            args,
        }
    }

    /// Combine expressions with AND, flattening nested ANDs.
    pub fn and(exprs: impl IntoIterator<Item = FilterExpr>) -> Self {
        let mut children = Vec::new();
        for expr in exprs {
            match expr {
                FilterExpr::And(nested) => children.extend(nested),
                other => children.push(other),
            }
        }
        if children.len() == 1 {
            return children.remove(0);
        }
        FilterExpr::And(children)
    }

    /// Combine expressions with OR, flattening nested ORs.
    pub fn or(exprs: impl IntoIterator<Item = FilterExpr>) -> Self {
        let mut children = Vec::new();
        for expr in exprs {
            match expr {
                FilterExpr::Or(nested) => children.extend(nested),
                other => children.push(other),
            }
        }
        if children.len() == 1 {
            return children.remove(0);
        }
        FilterExpr::Or(children)
    }

    /// Negate an expression.
    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: FilterExpr) -> Self {
        FilterExpr::Not(Box::new(expr))
    }

    /// AND this expression with another.
    pub fn and_also(self, other: FilterExpr) -> Self {
        Self::and([self, other])
    }

    /// All field keys referenced by comparisons in this expression.
    ///
    /// Custom filters are not expanded, so their fields are not included.
    pub fn fields(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, fields: &mut BTreeSet<String>) {
        match self {
            FilterExpr::Compare { field, .. } | FilterExpr::In { field, .. } => {
                fields.insert(field.clone());
            }
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                for child in children {
                    child.collect_fields(fields);
                }
            }
            FilterExpr::Not(inner) => inner.collect_fields(fields),
            FilterExpr::Custom { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        assert_eq!(
            FilterExpr::eq("name", "a"),
            FilterExpr::Compare {
                field: "name".into(),
                op: CompareOp::Eq,
                value: Some(Value::String("a".into())),
            }
        );
        assert_eq!(
            FilterExpr::is_null("name"),
            FilterExpr::compare("name", CompareOp::Eq, Some(Value::Null))
        );
        assert_eq!(
            FilterExpr::in_list("id", [1, 3]),
            FilterExpr::In {
                field: "id".into(),
                values: vec![Value::Integer(1), Value::Integer(3)],
            }
        );
    }

    #[test]
    fn test_and_or_flatten() {
        let nested = FilterExpr::and([
            FilterExpr::and([FilterExpr::eq("a", 1), FilterExpr::eq("b", 2)]),
            FilterExpr::eq("c", 3),
        ]);
        if let FilterExpr::And(children) = &nested {
            assert_eq!(children.len(), 3);
        } else {
            panic!("Expected And filter");
        }

        let single = FilterExpr::or([FilterExpr::eq("a", 1)]);
        assert_eq!(single, FilterExpr::eq("a", 1));

        // OR does not absorb nested ANDs
        let mixed = FilterExpr::or([
            FilterExpr::and([FilterExpr::eq("a", 1), FilterExpr::eq("b", 2)]),
            FilterExpr::eq("c", 3),
        ]);
        if let FilterExpr::Or(children) = &mixed {
            assert_eq!(children.len(), 2);
        } else {
            panic!("Expected Or filter");
        }
    }

    #[test]
    fn test_identity_elements() {
        assert!(FilterExpr::all().is_all());
        assert!(FilterExpr::none().is_none());
        assert!(FilterExpr::and(Vec::new()).is_all());
        assert!(FilterExpr::or(Vec::new()).is_none());
    }

    #[test]
    fn test_fields_collects_nested_references() {
        let filter = FilterExpr::or([
            FilterExpr::eq("name", "a"),
            FilterExpr::not(FilterExpr::in_list("id", [1])),
            FilterExpr::custom("active", serde_json::Value::Null),
        ]);
        let fields: Vec<_> = filter.fields().into_iter().collect();
        assert_eq!(fields, vec!["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn test_operator_parse() {
        assert_eq!("startsWith".parse::<CompareOp>().unwrap(), CompareOp::StartsWith);
        assert!("like".parse::<CompareOp>().is_err());
        assert!(CompareOp::Gte.is_ordering());
        assert!(CompareOp::EndsWith.is_text());
        assert!(!CompareOp::Eq.is_text());
    }
}
