//! JSON serialization of filter expressions.
//!
//! The wire form is an object whose keys are field keys or logical
//! operators:
//!
//! - `{"name": "a"}` is equality; `{"name": null}` matches null.
//! - `{"age": {"$gte": 18, "$lt": 65}}` ANDs several operators on one field.
//! - `{"id": [1, 2]}` or `{"id": {"$in": [1, 2]}}` is set membership.
//! - `{"$and": [...]}`, `{"$or": [...]}`, `{"$not": {...}}` compose filters.
//! - `{"$custom": {"name": args}}` names a custom filter.
//!
//! All keys of one object are ANDed. The empty object matches every row.

use serde_json::{Map, Value as Json};
use shoal_proto::{CompareOp, FilterExpr, Value};

use crate::catalog::{EntityDef, FieldDef};
use crate::error::Error;

/// Serialize a filter expression.
///
/// Undefined comparisons are omitted and values go through the field's
/// converter. Unknown fields fail with `UnknownField`.
pub fn to_json(expr: &FilterExpr, entity: &EntityDef) -> Result<Json, Error> {
    encode(expr, entity).map(Json::Object)
}

fn single(key: impl Into<String>, value: Json) -> Map<String, Json> {
    let mut map = Map::new();
    map.insert(key.into(), value);
    map
}

fn encode(expr: &FilterExpr, entity: &EntityDef) -> Result<Map<String, Json>, Error> {
    match expr {
        FilterExpr::Compare { field, op, value } => {
            let field = entity.require_field(field)?;
            let Some(value) = value else {
                return Ok(Map::new());
            };
            let wire = wire_value(entity, field, *op, value)?;
            let plain_eq = *op == CompareOp::Eq && !(wire.is_array() || wire.is_object());
            if plain_eq {
                Ok(single(field.key(), wire))
            } else {
                Ok(single(field.key(), Json::Object(single(format!("${op}"), wire))))
            }
        }
        FilterExpr::In { field, values } => {
            let field = entity.require_field(field)?;
            let items = values
                .iter()
                .map(|v| wire_value(entity, field, CompareOp::Eq, v))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(single(field.key(), Json::Object(single("$in", Json::Array(items)))))
        }
        FilterExpr::And(children) => {
            let parts = children
                .iter()
                .map(|c| encode(c, entity))
                .collect::<Result<Vec<_>, _>>()?;
            let mut merged = Map::new();
            let collides = parts
                .iter()
                .flat_map(|p| p.keys())
                .any(|k| merged.insert(k.clone(), Json::Null).is_some());
            if collides {
                let parts = parts.into_iter().filter(|p| !p.is_empty()).map(Json::Object).collect();
                return Ok(single("$and", Json::Array(parts)));
            }
            Ok(parts.into_iter().flatten().collect())
        }
        FilterExpr::Or(children) => {
            let parts = children
                .iter()
                .map(|c| encode(c, entity).map(Json::Object))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(single("$or", Json::Array(parts)))
        }
        FilterExpr::Not(inner) => Ok(single("$not", Json::Object(encode(inner, entity)?))),
        FilterExpr::Custom { name, args } => {
            Ok(single("$custom", Json::Object(single(name.clone(), args.clone()))))
        }
    }
}

fn wire_value(entity: &EntityDef, field: &FieldDef, op: CompareOp, value: &Value) -> Result<Json, Error> {
    if op.is_text() {
        return Ok(value.to_text().map(Json::String).unwrap_or(Json::Null));
    }
    let coerced = entity.coerce_value(field, value)?;
    entity.value_to_json(field, &coerced)
}

/// Parse a filter expression.
///
/// Unknown fields fail with `UnknownField`; unknown operators and malformed
/// shapes fail with `InvalidFilter`.
pub fn from_json(json: &Json, entity: &EntityDef) -> Result<FilterExpr, Error> {
    let object = json
        .as_object()
        .ok_or_else(|| Error::InvalidFilter(format!("expected a filter object, got {json}")))?;

    let mut terms = Vec::new();
    for (key, value) in object {
        match key.as_str() {
            "$and" => terms.push(FilterExpr::And(parse_list(value, entity, key)?)),
            "$or" => terms.push(FilterExpr::Or(parse_list(value, entity, key)?)),
            "$not" => terms.push(FilterExpr::not(from_json(value, entity)?)),
            "$custom" => {
                let handlers = value
                    .as_object()
                    .filter(|handlers| !handlers.is_empty())
                    .ok_or_else(|| {
                        Error::InvalidFilter("$custom expects an object of name to arguments".into())
                    })?;
                for (name, args) in handlers {
                    terms.push(FilterExpr::custom(name.clone(), args.clone()));
                }
            }
            other if other.starts_with('$') => {
                return Err(Error::InvalidFilter(format!("unknown operator '{other}'")));
            }
            field => parse_field(field, value, entity, &mut terms)?,
        }
    }

    Ok(match terms.len() {
        1 => terms.remove(0),
        _ => FilterExpr::And(terms),
    })
}

fn parse_list(value: &Json, entity: &EntityDef, op: &str) -> Result<Vec<FilterExpr>, Error> {
    value
        .as_array()
        .ok_or_else(|| Error::InvalidFilter(format!("{op} expects an array")))?
        .iter()
        .map(|item| from_json(item, entity))
        .collect()
}

fn parse_in(field: &FieldDef, items: &[Json], entity: &EntityDef) -> Result<FilterExpr, Error> {
    let values = items
        .iter()
        .map(|item| entity.value_from_json(field, item))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FilterExpr::In {
        field: field.key().to_string(),
        values,
    })
}

fn parse_field(key: &str, value: &Json, entity: &EntityDef, terms: &mut Vec<FilterExpr>) -> Result<(), Error> {
    let field = entity.require_field(key)?;
    match value {
        Json::Array(items) => {
            // A flat array is one compound value; an array of arrays is a set.
            if field.is_compound() && !items.iter().all(Json::is_array) {
                terms.push(FilterExpr::eq(key, entity.value_from_json(field, value)?));
            } else {
                terms.push(parse_in(field, items, entity)?);
            }
        }
        Json::Object(ops) => {
            for (op_key, operand) in ops {
                let name = op_key.strip_prefix('$').ok_or_else(|| {
                    Error::InvalidFilter(format!("expected an operator for '{key}', got '{op_key}'"))
                })?;
                if name == "in" {
                    let items = operand
                        .as_array()
                        .ok_or_else(|| Error::InvalidFilter(format!("$in on '{key}' expects an array")))?;
                    terms.push(parse_in(field, items, entity)?);
                    continue;
                }
                let op: CompareOp = name
                    .parse()
                    .map_err(|_| Error::InvalidFilter(format!("unknown operator '{op_key}'")))?;
                let value = if op.is_text() {
                    match operand {
                        Json::Null => Value::Null,
                        Json::String(s) => Value::String(s.clone()),
                        other => Value::String(other.to_string()),
                    }
                } else {
                    entity.value_from_json(field, operand)?
                };
                terms.push(FilterExpr::compare(key, op, Some(value)));
            }
        }
        scalar => terms.push(FilterExpr::eq(key, entity.value_from_json(field, scalar)?)),
    }
    Ok(())
}
