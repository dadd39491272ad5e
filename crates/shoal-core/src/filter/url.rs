//! URL query-string translation of filters and find options.
//!
//! Simple conjunctions travel as flat parameters, one per comparison, with
//! the operator carried as a key suffix:
//!
//! | parameter          | meaning                    |
//! |--------------------|----------------------------|
//! | `name=x`           | `name` equals `x`          |
//! | `name_ne=x`        | not equal                  |
//! | `age_gt=3`         | greater than (also `_gte`, `_lt`, `_lte`) |
//! | `name_contains=x`  | contains `x`               |
//! | `name_st=x`        | starts with `x`            |
//! | `id_in=[1,2]`      | one of a JSON array        |
//!
//! Anything else (OR, NOT, custom filters, null tests, compound fields) is
//! sent as a single `where` parameter holding the JSON form. Parameters
//! starting with `_` are reserved for paging and ordering.

use shoal_proto::{CompareOp, FilterExpr, FindOptions, OrderDirection, OrderSpec};

use super::json;
use crate::catalog::EntityDef;
use crate::error::Error;

/// Page size used when `_page` is given without `_limit`.
pub const DEFAULT_PAGE_SIZE: u32 = 25;

/// Parameter carrying a JSON filter.
pub const WHERE_PARAM: &str = "where";

const SORT_PARAM: &str = "_sort";
const ORDER_PARAM: &str = "_order";
const LIMIT_PARAM: &str = "_limit";
const PAGE_PARAM: &str = "_page";

/// Key suffixes; `None` is set membership.
const SUFFIXES: [(&str, Option<CompareOp>); 8] = [
    ("_contains", Some(CompareOp::Contains)),
    ("_gte", Some(CompareOp::Gte)),
    ("_lte", Some(CompareOp::Lte)),
    ("_ne", Some(CompareOp::Ne)),
    ("_gt", Some(CompareOp::Gt)),
    ("_lt", Some(CompareOp::Lt)),
    ("_st", Some(CompareOp::StartsWith)),
    ("_in", None),
];

fn suffix_for(op: CompareOp) -> Option<&'static str> {
    match op {
        CompareOp::Eq => Some(""),
        CompareOp::EndsWith => None,
        op => SUFFIXES
            .iter()
            .find(|(_, candidate)| *candidate == Some(op))
            .map(|(suffix, _)| *suffix),
    }
}

pub type Params = Vec<(String, String)>;

/// Why a field key cannot travel as a flat parameter, if it cannot.
///
/// `where` and `_`-prefixed keys are reserved, and a key that reads as
/// another field plus an operator suffix would parse as that comparison.
pub fn url_key_conflict(key: &str, entity: &EntityDef) -> Option<String> {
    if key == WHERE_PARAM {
        return Some(format!("'{key}' is the JSON filter parameter"));
    }
    if key.starts_with('_') {
        return Some(format!("'{key}' uses the reserved '_' prefix"));
    }
    SUFFIXES.iter().find_map(|(suffix, _)| {
        let base = key.strip_suffix(suffix)?;
        entity
            .field(base)
            .map(|_| format!("'{key}' reads as '{base}' with the '{suffix}' operator"))
    })
}

/// Translate a filter into URL parameters.
pub fn to_url_params(expr: &FilterExpr, entity: &EntityDef) -> Result<Params, Error> {
    let mut terms = Vec::new();
    flatten_and(expr, &mut terms);

    let mut params = Params::new();
    for term in terms {
        match flat_param(term, entity)? {
            Some(param) => params.extend(param),
            None => {
                let json = json::to_json(expr, entity)?;
                return Ok(vec![(WHERE_PARAM.to_string(), json.to_string())]);
            }
        }
    }
    Ok(params)
}

fn flatten_and<'a>(expr: &'a FilterExpr, out: &mut Vec<&'a FilterExpr>) {
    match expr {
        FilterExpr::And(children) => children.iter().for_each(|c| flatten_and(c, out)),
        other => out.push(other),
    }
}

/// Flat form of one term; `None` when the term has no flat form.
fn flat_param(term: &FilterExpr, entity: &EntityDef) -> Result<Option<Option<(String, String)>>, Error> {
    match term {
        FilterExpr::Compare { field, op, value } => {
            let field = entity.require_field(field)?;
            let Some(value) = value else {
                return Ok(Some(None));
            };
            let Some(suffix) = suffix_for(*op) else {
                return Ok(None);
            };
            if field.is_compound() || value.is_null() {
                return Ok(None);
            }
            let text = if op.is_text() {
                value.to_text().unwrap_or_default()
            } else {
                let coerced = entity.coerce_value(field, value)?;
                if coerced.is_null() {
                    return Ok(None);
                }
                entity.value_to_input(field, &coerced)?
            };
            Ok(Some(Some((format!("{}{suffix}", field.key()), text))))
        }
        FilterExpr::In { field, values } => {
            let field = entity.require_field(field)?;
            if field.is_compound() {
                return Ok(None);
            }
            let items = values
                .iter()
                .map(|v| entity.coerce_value(field, v).and_then(|v| entity.value_to_json(field, &v)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(Some((
                format!("{}_in", field.key()),
                serde_json::Value::Array(items).to_string(),
            ))))
        }
        _ => Ok(None),
    }
}

/// Translate URL parameters back into a filter.
///
/// Returns `None` when no parameter constrains the rows. Keys starting with
/// `_` are ignored; any other key that names neither a field nor a field
/// with a known suffix fails with `UnknownField`.
pub fn from_url_params(params: &[(String, String)], entity: &EntityDef) -> Result<Option<FilterExpr>, Error> {
    let mut terms = Vec::new();
    for (key, value) in params {
        if key == WHERE_PARAM {
            let parsed: serde_json::Value = serde_json::from_str(value)
                .map_err(|e| Error::InvalidFilter(format!("malformed where parameter: {e}")))?;
            terms.push(json::from_json(&parsed, entity)?);
            continue;
        }
        if let Some(field) = entity.field(key) {
            terms.push(FilterExpr::eq(field.key(), entity.value_from_input(field, value)?));
            continue;
        }
        if key.starts_with('_') {
            continue;
        }
        terms.push(parse_suffixed(key, value, entity)?);
    }
    Ok((!terms.is_empty()).then(|| FilterExpr::and(terms)))
}

fn parse_suffixed(key: &str, value: &str, entity: &EntityDef) -> Result<FilterExpr, Error> {
    for (suffix, op) in SUFFIXES {
        let Some(field) = key.strip_suffix(suffix).and_then(|base| entity.field(base)) else {
            continue;
        };
        return match op {
            None => {
                let items: Vec<serde_json::Value> = serde_json::from_str(value)
                    .map_err(|_| Error::invalid_value(key, "expected a JSON array"))?;
                let values = items
                    .iter()
                    .map(|item| entity.value_from_json(field, item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(FilterExpr::In {
                    field: field.key().to_string(),
                    values,
                })
            }
            Some(op) if op.is_text() => Ok(FilterExpr::compare(field.key(), op, Some(value.into()))),
            Some(op) => Ok(FilterExpr::compare(
                field.key(),
                op,
                Some(entity.value_from_input(field, value)?),
            )),
        };
    }
    Err(Error::UnknownField {
        entity: entity.name().to_string(),
        field: key.to_string(),
    })
}

/// Translate find options into URL parameters.
pub fn find_options_to_params(options: &FindOptions, entity: &EntityDef) -> Result<Params, Error> {
    let mut params = match &options.filter {
        Some(filter) => to_url_params(filter, entity)?,
        None => Params::new(),
    };
    if !options.order_by.is_empty() {
        let fields: Vec<&str> = options.order_by.iter().map(|o| o.field.as_str()).collect();
        let directions: Vec<&str> = options.order_by.iter().map(|o| o.direction.as_str()).collect();
        params.push((SORT_PARAM.to_string(), fields.join(",")));
        params.push((ORDER_PARAM.to_string(), directions.join(",")));
    }
    if let Some(limit) = options.limit {
        params.push((LIMIT_PARAM.to_string(), limit.to_string()));
        params.push((PAGE_PARAM.to_string(), options.page().to_string()));
    }
    Ok(params)
}

/// Translate URL parameters into find options.
///
/// `_sort` and `_order` are comma-separated and matched by position; a
/// missing direction is ascending. `_page` without `_limit` pages by
/// `default_page_size`.
pub fn find_options_from_params(
    params: &[(String, String)],
    entity: &EntityDef,
    default_page_size: u32,
) -> Result<FindOptions, Error> {
    let mut options = FindOptions::new();
    options.filter = from_url_params(params, entity)?;

    let lookup = |name: &str| params.iter().rev().find(|(k, _)| k == name).map(|(_, v)| v.as_str());

    if let Some(sort) = lookup(SORT_PARAM) {
        let directions: Vec<&str> = lookup(ORDER_PARAM)
            .map(|o| o.split(',').map(str::trim).collect())
            .unwrap_or_default();
        for (position, key) in sort.split(',').map(str::trim).filter(|k| !k.is_empty()).enumerate() {
            let field = entity.require_field(key)?;
            let direction = match directions.get(position) {
                Some(d) if !d.is_empty() => d.parse::<OrderDirection>()?,
                _ => OrderDirection::Asc,
            };
            options.order_by.push(OrderSpec {
                field: field.key().to_string(),
                direction,
            });
        }
    }

    let number = |name: &str| -> Result<Option<u32>, Error> {
        lookup(name)
            .map(|raw| {
                raw.trim()
                    .parse::<u32>()
                    .map_err(|_| Error::invalid_value(name, format!("'{raw}' is not a non-negative integer")))
            })
            .transpose()
    };
    options.limit = number(LIMIT_PARAM)?;
    if let Some(page) = number(PAGE_PARAM)? {
        options.page = page.max(1);
        options.limit.get_or_insert(default_page_size);
    }
    Ok(options)
}

/// Encode parameters as a query string.
pub fn encode_query(params: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish()
}

/// Decode a query string into parameters.
pub fn parse_query(query: &str) -> Params {
    form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        .into_owned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldDef;
    use pretty_assertions::assert_eq;
    use shoal_proto::Value;

    fn tasks() -> EntityDef {
        EntityDef::new("tasks", "id")
            .with_field(FieldDef::integer("id"))
            .with_field(FieldDef::string("name"))
            .with_field(FieldDef::integer("age"))
            .with_field(FieldDef::integer("order"))
            .with_field(FieldDef::string("line"))
            .with_field(FieldDef::compound("pair", ["order", "line"]))
    }

    fn pairs(items: &[(&str, &str)]) -> Params {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_flat_params() {
        let entity = tasks();
        let filter = FilterExpr::and([
            FilterExpr::eq("name", "a b"),
            FilterExpr::gte("age", 3),
            FilterExpr::starts_with("name", "x"),
            FilterExpr::in_list("id", [1, 2]),
        ]);
        let params = to_url_params(&filter, &entity).unwrap();
        assert_eq!(
            params,
            pairs(&[("name", "a b"), ("age_gte", "3"), ("name_st", "x"), ("id_in", "[1,2]")])
        );
        assert_eq!(from_url_params(&params, &entity).unwrap(), Some(filter));
    }

    #[test]
    fn test_where_fallback() {
        let entity = tasks();
        let filter = FilterExpr::or([FilterExpr::eq("id", 1), FilterExpr::is_null("name")]);
        let params = to_url_params(&filter, &entity).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].0, WHERE_PARAM);
        assert_eq!(from_url_params(&params, &entity).unwrap(), Some(filter));

        let ends = to_url_params(&FilterExpr::ends_with("name", "z"), &entity).unwrap();
        assert_eq!(ends[0].0, WHERE_PARAM);

        let compound = FilterExpr::eq("pair", Value::List(vec![1.into(), "a".into()]));
        assert_eq!(to_url_params(&compound, &entity).unwrap()[0].0, WHERE_PARAM);
    }

    #[test]
    fn test_undefined_and_empty() {
        let entity = tasks();
        let undefined = FilterExpr::compare("name", CompareOp::Eq, None);
        assert!(to_url_params(&undefined, &entity).unwrap().is_empty());
        assert!(to_url_params(&FilterExpr::all(), &entity).unwrap().is_empty());
        assert_eq!(from_url_params(&[], &entity).unwrap(), None);
    }

    #[test]
    fn test_field_named_like_suffix() {
        // `order` is a field, so `order` must not be read as a suffix.
        let entity = tasks();
        let parsed = from_url_params(&pairs(&[("order", "4"), ("order_lt", "9")]), &entity).unwrap();
        assert_eq!(
            parsed,
            Some(FilterExpr::And(vec![FilterExpr::eq("order", 4), FilterExpr::lt("order", 9)]))
        );
    }

    #[test]
    fn test_unknown_and_reserved_keys() {
        let entity = tasks();
        assert!(matches!(
            from_url_params(&pairs(&[("bogus", "1")]), &entity),
            Err(Error::UnknownField { .. })
        ));
        assert_eq!(from_url_params(&pairs(&[("_ts", "1")]), &entity).unwrap(), None);
        assert!(matches!(
            from_url_params(&pairs(&[("age", "x")]), &entity),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_find_options_round_trip() {
        let entity = tasks();
        let options = FindOptions::new()
            .with_filter(FilterExpr::eq("name", "a"))
            .with_order(OrderSpec::desc("age"))
            .with_order(OrderSpec::asc("id"))
            .with_limit(10)
            .with_page(3);
        let params = find_options_to_params(&options, &entity).unwrap();
        assert_eq!(
            params,
            pairs(&[("name", "a"), ("_sort", "age,id"), ("_order", "desc,asc"), ("_limit", "10"), ("_page", "3")])
        );
        let parsed = find_options_from_params(&params, &entity, DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(parsed.filter, options.filter);
        assert_eq!(parsed.order_by, options.order_by);
        assert_eq!(parsed.limit, Some(10));
        assert_eq!(parsed.page, 3);
    }

    #[test]
    fn test_paging_defaults() {
        let entity = tasks();
        let parsed = find_options_from_params(&pairs(&[("_page", "2"), ("_sort", "name")]), &entity, 25).unwrap();
        assert_eq!(parsed.limit, Some(25));
        assert_eq!(parsed.offset(), 25);
        assert_eq!(parsed.order_by, vec![OrderSpec::asc("name")]);

        assert!(matches!(
            find_options_from_params(&pairs(&[("_limit", "ten")]), &entity, 25),
            Err(Error::InvalidValue { .. })
        ));
        assert!(matches!(
            find_options_from_params(&pairs(&[("_sort", "name"), ("_order", "sideways")]), &entity, 25),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_query_string_encoding() {
        let params = pairs(&[("name", "a&b c"), ("where", "{\"id\":1}")]);
        let query = encode_query(&params);
        assert_eq!(query, "name=a%26b+c&where=%7B%22id%22%3A1%7D");
        assert_eq!(parse_query(&format!("?{query}")), params);
    }
}
