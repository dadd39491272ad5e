//! Filter preparation.
//!
//! Every translator runs [`prepare`] first: custom filters are expanded,
//! field references are checked, literals are coerced through the field's
//! converter and undefined comparisons are pruned. Translators then work on
//! the resulting [`PreparedFilter`], which is what keeps URL, in-memory and
//! SQL evaluation in agreement.

use std::collections::BTreeSet;

use shoal_proto::{CompareOp, FilterExpr, Value};
use tracing::trace;

use crate::catalog::{EntityDef, FieldDef};
use crate::error::Error;

/// Maximum nesting of custom filter expansions.
pub const MAX_CUSTOM_DEPTH: usize = 16;

/// A filter ready for translation.
///
/// `And` and `Or` always hold at least two children; `All` and `None` are
/// the identities.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedFilter {
    /// Matches every row.
    All,
    /// Matches no row.
    None,
    /// Comparison with a coerced, defined value.
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    /// Membership in a non-empty list of coerced values.
    In { field: String, values: Vec<Value> },
    And(Vec<PreparedFilter>),
    Or(Vec<PreparedFilter>),
    Not(Box<PreparedFilter>),
}

impl PreparedFilter {
    /// Check if this filter matches every row.
    pub fn is_all(&self) -> bool {
        matches!(self, PreparedFilter::All)
    }

    /// Check if this filter matches no row.
    pub fn is_none(&self) -> bool {
        matches!(self, PreparedFilter::None)
    }

    /// Field keys referenced by the filter.
    pub fn fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            PreparedFilter::All | PreparedFilter::None => {}
            PreparedFilter::Compare { field, .. } | PreparedFilter::In { field, .. } => {
                out.insert(field.clone());
            }
            PreparedFilter::And(children) | PreparedFilter::Or(children) => {
                children.iter().for_each(|c| c.collect_fields(out))
            }
            PreparedFilter::Not(inner) => inner.collect_fields(out),
        }
    }

    fn and(children: Vec<PreparedFilter>) -> Self {
        let mut kept = Vec::with_capacity(children.len());
        for child in children {
            match child {
                PreparedFilter::All => {}
                PreparedFilter::None => return PreparedFilter::None,
                PreparedFilter::And(nested) => kept.extend(nested),
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => PreparedFilter::All,
            1 => kept.remove(0),
            _ => PreparedFilter::And(kept),
        }
    }

    fn or(children: Vec<PreparedFilter>) -> Self {
        let mut kept = Vec::with_capacity(children.len());
        for child in children {
            match child {
                PreparedFilter::None => {}
                PreparedFilter::All => return PreparedFilter::All,
                PreparedFilter::Or(nested) => kept.extend(nested),
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => PreparedFilter::None,
            1 => kept.remove(0),
            _ => PreparedFilter::Or(kept),
        }
    }

    fn not(inner: PreparedFilter) -> Self {
        match inner {
            PreparedFilter::All => PreparedFilter::None,
            PreparedFilter::None => PreparedFilter::All,
            PreparedFilter::Not(inner) => *inner,
            other => PreparedFilter::Not(Box::new(other)),
        }
    }
}

/// Prepare an optional filter; no filter matches every row.
pub fn prepare_option(expr: Option<&FilterExpr>, entity: &EntityDef) -> Result<PreparedFilter, Error> {
    match expr {
        Some(expr) => prepare(expr, entity),
        None => Ok(PreparedFilter::All),
    }
}

/// Prepare a filter expression against an entity.
pub fn prepare(expr: &FilterExpr, entity: &EntityDef) -> Result<PreparedFilter, Error> {
    let mut preparer = Preparer {
        entity,
        stack: Vec::new(),
    };
    preparer.prepare(expr)
}

struct Preparer<'a> {
    entity: &'a EntityDef,
    /// Custom filters being expanded, as `(name, canonical args)`.
    stack: Vec<(String, String)>,
}

impl Preparer<'_> {
    fn prepare(&mut self, expr: &FilterExpr) -> Result<PreparedFilter, Error> {
        match expr {
            FilterExpr::Compare { field, op, value } => match value {
                Some(value) => self.compare(field, *op, value),
                None => Ok(PreparedFilter::All),
            },
            FilterExpr::In { field, values } => self.in_list(field, values),
            FilterExpr::And(children) => {
                let prepared = children
                    .iter()
                    .map(|c| self.prepare(c))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(PreparedFilter::and(prepared))
            }
            FilterExpr::Or(children) => {
                let prepared = children
                    .iter()
                    .map(|c| self.prepare(c))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(PreparedFilter::or(prepared))
            }
            FilterExpr::Not(inner) => Ok(PreparedFilter::not(self.prepare(inner)?)),
            FilterExpr::Custom { name, args } => self.custom(name, args),
        }
    }

    fn filterable_field(&self, key: &str) -> Result<&FieldDef, Error> {
        let field = self.entity.require_field(key)?;
        if field.is_computed() {
            return Err(Error::InvalidFilter(format!(
                "computed field '{key}' cannot be filtered"
            )));
        }
        Ok(field)
    }

    fn compare(&self, key: &str, op: CompareOp, value: &Value) -> Result<PreparedFilter, Error> {
        let field = self.filterable_field(key)?;
        let unsupported = || Error::UnsupportedOperator {
            field: key.to_string(),
            op: op.as_str().to_string(),
        };

        if field.is_compound() && !matches!(op, CompareOp::Eq | CompareOp::Ne) {
            return Err(unsupported());
        }

        if value.is_null() {
            if field.is_compound() {
                return Err(unsupported());
            }
            if !matches!(op, CompareOp::Eq | CompareOp::Ne) {
                return Err(Error::InvalidFilter(format!(
                    "operator '{op}' cannot compare '{key}' with null"
                )));
            }
            return Ok(PreparedFilter::Compare {
                field: key.to_string(),
                op,
                value: Value::Null,
            });
        }

        let value = if op.is_text() {
            if !field.value_type().supports_text_match() {
                return Err(unsupported());
            }
            Value::String(value.to_text().unwrap_or_default())
        } else {
            if op.is_ordering() && !field.value_type().is_orderable() {
                return Err(unsupported());
            }
            let coerced = self.entity.coerce_value(field, value)?;
            if coerced.is_null() {
                return Err(Error::invalid_value(key, "value converted to null"));
            }
            coerced
        };

        Ok(PreparedFilter::Compare {
            field: key.to_string(),
            op,
            value,
        })
    }

    fn in_list(&self, key: &str, values: &[Value]) -> Result<PreparedFilter, Error> {
        let field = self.filterable_field(key)?;
        if values.is_empty() {
            return Ok(PreparedFilter::None);
        }
        let values = values
            .iter()
            .map(|v| {
                if field.is_compound() && v.is_null() {
                    return Err(Error::UnsupportedOperator {
                        field: key.to_string(),
                        op: "in".to_string(),
                    });
                }
                self.entity.coerce_value(field, v)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PreparedFilter::In {
            field: key.to_string(),
            values,
        })
    }

    fn custom(&mut self, name: &str, args: &serde_json::Value) -> Result<PreparedFilter, Error> {
        let handler = self
            .entity
            .custom_filter(name)
            .ok_or_else(|| Error::InvalidFilter(format!("unknown custom filter '{name}'")))?
            .clone();

        let frame = (name.to_string(), args.to_string());
        if self.stack.contains(&frame) {
            return Err(Error::CircularFilter(format!(
                "'{name}' re-entered with arguments {args}"
            )));
        }
        if self.stack.len() >= MAX_CUSTOM_DEPTH {
            return Err(Error::CircularFilter(format!(
                "custom filters nested deeper than {MAX_CUSTOM_DEPTH} at '{name}'"
            )));
        }

        trace!(entity = self.entity.name(), filter = name, depth = self.stack.len(), "expanding custom filter");
        let expanded = handler(args)?;
        self.stack.push(frame);
        let result = self.prepare(&expanded);
        self.stack.pop();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldDef;
    use serde_json::json;

    fn tasks() -> EntityDef {
        EntityDef::new("tasks", "id")
            .with_field(FieldDef::integer("id"))
            .with_field(FieldDef::string("title"))
            .with_field(FieldDef::number("score"))
            .with_field(FieldDef::json("meta"))
            .with_field(FieldDef::computed("upper", crate::catalog::ValueType::String, |_| Value::Null))
            .with_custom_filter("titled", |args| {
                Ok(FilterExpr::eq("title", args["title"].as_str().unwrap_or_default()))
            })
            .with_custom_filter("loop", |args| Ok(FilterExpr::custom("loop", args.clone())))
            .with_custom_filter("deeper", |args| {
                let n = args.as_i64().unwrap_or(0);
                Ok(FilterExpr::custom("deeper", json!(n + 1)))
            })
    }

    #[test]
    fn test_literal_coercion() {
        let prepared = prepare(&FilterExpr::eq("id", "5"), &tasks()).unwrap();
        assert_eq!(
            prepared,
            PreparedFilter::Compare {
                field: "id".into(),
                op: CompareOp::Eq,
                value: Value::Integer(5),
            }
        );
        assert!(matches!(
            prepare(&FilterExpr::eq("id", "five"), &tasks()),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_undefined_comparisons_are_pruned() {
        let entity = tasks();
        let undefined = FilterExpr::compare("title", CompareOp::Eq, None);

        assert!(prepare(&undefined, &entity).unwrap().is_all());
        assert_eq!(
            prepare(&FilterExpr::and([undefined.clone(), FilterExpr::eq("id", 1)]), &entity).unwrap(),
            prepare(&FilterExpr::eq("id", 1), &entity).unwrap()
        );
        assert!(prepare(&FilterExpr::or([undefined.clone(), FilterExpr::eq("id", 1)]), &entity)
            .unwrap()
            .is_all());
        assert!(prepare(&FilterExpr::not(undefined), &entity).unwrap().is_none());
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let prepared = prepare(&FilterExpr::in_list("id", Vec::<i64>::new()), &tasks()).unwrap();
        assert!(prepared.is_none());
    }

    #[test]
    fn test_unknown_and_computed_fields() {
        let entity = tasks();
        assert!(matches!(
            prepare(&FilterExpr::eq("nope", 1), &entity),
            Err(Error::UnknownField { .. })
        ));
        assert!(matches!(
            prepare(&FilterExpr::eq("upper", "A"), &entity),
            Err(Error::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_operator_support() {
        let entity = tasks();
        assert!(matches!(
            prepare(&FilterExpr::contains("score", "1"), &entity),
            Err(Error::UnsupportedOperator { .. })
        ));
        assert!(matches!(
            prepare(&FilterExpr::gt("meta", 1), &entity),
            Err(Error::UnsupportedOperator { .. })
        ));
        assert!(matches!(
            prepare(&FilterExpr::gt("id", Value::Null), &entity),
            Err(Error::InvalidFilter(_))
        ));
        // Text operators keep the literal as text.
        assert_eq!(
            prepare(&FilterExpr::contains("id", "4"), &entity).unwrap(),
            PreparedFilter::Compare {
                field: "id".into(),
                op: CompareOp::Contains,
                value: Value::from("4"),
            }
        );
    }

    #[test]
    fn test_custom_filters_expand() {
        let prepared = prepare(&FilterExpr::custom("titled", json!({"title": "a"})), &tasks()).unwrap();
        assert_eq!(prepared, prepare(&FilterExpr::eq("title", "a"), &tasks()).unwrap());

        assert!(matches!(
            prepare(&FilterExpr::custom("missing", json!(null)), &tasks()),
            Err(Error::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_circular_custom_filters_fail() {
        assert!(matches!(
            prepare(&FilterExpr::custom("loop", json!(1)), &tasks()),
            Err(Error::CircularFilter(_))
        ));
        assert!(matches!(
            prepare(&FilterExpr::custom("deeper", json!(0)), &tasks()),
            Err(Error::CircularFilter(_))
        ));
    }

    #[test]
    fn test_simplification_flattens() {
        let entity = tasks();
        let prepared = prepare(
            &FilterExpr::And(vec![
                FilterExpr::And(vec![FilterExpr::eq("id", 1), FilterExpr::eq("id", 2)]),
                FilterExpr::not(FilterExpr::not(FilterExpr::eq("title", "x"))),
            ]),
            &entity,
        )
        .unwrap();
        match prepared {
            PreparedFilter::And(children) => {
                assert_eq!(children.len(), 3);
                assert!(matches!(children[2], PreparedFilter::Compare { .. }));
            }
            other => panic!("expected And, got {other:?}"),
        }
        assert!(prepare(&FilterExpr::and([FilterExpr::none(), FilterExpr::eq("id", 1)]), &entity)
            .unwrap()
            .is_none());
    }
}
