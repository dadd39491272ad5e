//! In-memory filter evaluation, sorting and paging.

use std::cmp::Ordering;

use shoal_proto::{CompareOp, FindOptions, OrderDirection, OrderSpec, Row, Value};

use super::prepare::PreparedFilter;
use crate::catalog::{EntityDef, FieldDef};
use crate::error::Error;

/// Evaluates prepared filters against materialized rows.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Evaluate a prepared filter against a row.
    ///
    /// Returns `true` if the row matches. Missing and null field values never
    /// error; they simply fail comparisons other than null equality and `ne`.
    pub fn evaluate(filter: &PreparedFilter, entity: &EntityDef, row: &Row) -> bool {
        match filter {
            PreparedFilter::All => true,
            PreparedFilter::None => false,
            PreparedFilter::Compare { field, op, value } => match entity.field(field) {
                Some(field) => Self::compare_field(entity, field, *op, value, row),
                None => false,
            },
            PreparedFilter::In { field, values } => match entity.field(field) {
                Some(field) => {
                    let actual = entity.field_value(field, row);
                    values.iter().any(|v| Self::values_equal(&actual, v))
                }
                None => false,
            },
            PreparedFilter::And(children) => children
                .iter()
                .all(|c| Self::evaluate(c, entity, row)),
            PreparedFilter::Or(children) => children
                .iter()
                .any(|c| Self::evaluate(c, entity, row)),
            PreparedFilter::Not(inner) => !Self::evaluate(inner, entity, row),
        }
    }

    fn compare_field(
        entity: &EntityDef,
        field: &FieldDef,
        op: CompareOp,
        value: &Value,
        row: &Row,
    ) -> bool {
        let actual = entity.field_value(field, row);
        match op {
            CompareOp::Eq => Self::values_equal(&actual, value),
            CompareOp::Ne => !Self::values_equal(&actual, value),
            CompareOp::Gt => Self::ordered(&actual, value, Ordering::is_gt),
            CompareOp::Gte => Self::ordered(&actual, value, Ordering::is_ge),
            CompareOp::Lt => Self::ordered(&actual, value, Ordering::is_lt),
            CompareOp::Lte => Self::ordered(&actual, value, Ordering::is_le),
            CompareOp::Contains | CompareOp::StartsWith | CompareOp::EndsWith => {
                match (Self::stored_text(field, &actual), value.as_str()) {
                    (Some(text), Some(pattern)) => Self::text_match(op, &text, pattern),
                    _ => false,
                }
            }
        }
    }

    /// Equality where null only equals null and compound values compare
    /// component-wise.
    fn values_equal(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::List(x), Value::List(y)) => {
                x.len() == y.len() && x.iter().zip(y).all(|(p, q)| Self::values_equal(p, q))
            }
            _ => a.loose_eq(b),
        }
    }

    fn ordered(actual: &Value, value: &Value, accept: fn(Ordering) -> bool) -> bool {
        actual.compare(value).map(accept).unwrap_or(false)
    }

    /// Text form of a value as the storage layer holds it.
    fn stored_text(field: &FieldDef, value: &Value) -> Option<String> {
        field.converter().to_db(value).to_text()
    }

    /// ASCII case-insensitive text match.
    fn text_match(op: CompareOp, text: &str, pattern: &str) -> bool {
        let text = text.to_ascii_lowercase();
        let pattern = pattern.to_ascii_lowercase();
        match op {
            CompareOp::Contains => text.contains(&pattern),
            CompareOp::StartsWith => text.starts_with(&pattern),
            CompareOp::EndsWith => text.ends_with(&pattern),
            _ => false,
        }
    }
}

/// Resolve order keys to stored columns: compound fields expand into their
/// members and the id columns are appended as a tie-breaker.
///
/// JSON columns have no ordering shared by every backend and are rejected.
pub fn expand_order(entity: &EntityDef, order: &[OrderSpec]) -> Result<Vec<OrderSpec>, Error> {
    let mut expanded: Vec<OrderSpec> = Vec::new();
    let mut push = |key: &str, direction: OrderDirection| {
        if !expanded.iter().any(|o| o.field == key) {
            expanded.push(OrderSpec {
                field: key.to_string(),
                direction,
            });
        }
    };

    for spec in order {
        let field = entity.require_field(&spec.field)?;
        if field.is_computed() {
            return Err(Error::InvalidFilter(format!(
                "cannot order by computed field '{}'",
                spec.field
            )));
        }
        for column in entity.member_fields(field)? {
            if !column.value_type().is_orderable() {
                return Err(Error::UnsupportedOperator {
                    field: spec.field.clone(),
                    op: "orderBy".to_string(),
                });
            }
            push(column.key(), spec.direction);
        }
    }
    if !order.is_empty() {
        for column in entity.id_columns()? {
            push(column.key(), OrderDirection::Asc);
        }
    }
    Ok(expanded)
}

/// Stable multi-key sort. `order` must already be expanded.
pub fn sort_rows(rows: &mut [Row], order: &[OrderSpec]) {
    if order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for spec in order {
            let ord = a
                .get_or_null(&spec.field)
                .sort_cmp(b.get_or_null(&spec.field));
            let ord = match spec.direction {
                OrderDirection::Asc => ord,
                OrderDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Apply the paging of `options` to a filtered, sorted row list.
pub fn page_rows(rows: Vec<Row>, options: &FindOptions) -> Vec<Row> {
    let skip = usize::try_from(options.offset()).unwrap_or(usize::MAX);
    match options.limit {
        Some(limit) => rows.into_iter().skip(skip).take(limit as usize).collect(),
        None => rows,
    }
}

/// Filter, sort and page rows for a find.
pub fn select_rows<'a>(
    rows: impl IntoIterator<Item = &'a Row>,
    filter: &PreparedFilter,
    entity: &EntityDef,
    options: &FindOptions,
) -> Result<Vec<Row>, Error> {
    let order = expand_order(entity, &options.order_by)?;
    let mut matched: Vec<Row> = rows
        .into_iter()
        .filter(|row| FilterEvaluator::evaluate(filter, entity, row))
        .cloned()
        .collect();
    sort_rows(&mut matched, &order);
    Ok(page_rows(matched, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldDef;
    use crate::filter::prepare::prepare;
    use shoal_proto::FilterExpr;

    fn people() -> EntityDef {
        EntityDef::new("people", "id")
            .with_field(FieldDef::integer("id"))
            .with_field(FieldDef::string("name"))
            .with_field(FieldDef::integer("age"))
            .with_field(FieldDef::boolean("active"))
    }

    fn rows() -> Vec<Row> {
        vec![
            Row::new().with("id", 1).with("name", "Alice").with("age", 30).with("active", true),
            Row::new().with("id", 2).with("name", "bob").with("age", 25).with("active", false),
            Row::new().with("id", 3).with("name", Value::Null).with("age", 35).with("active", true),
        ]
    }

    fn ids(filter: FilterExpr) -> Vec<i64> {
        let entity = people();
        let prepared = prepare(&filter, &entity).unwrap();
        rows()
            .iter()
            .filter(|r| FilterEvaluator::evaluate(&prepared, &entity, r))
            .filter_map(|r| r.get("id").and_then(Value::as_i64))
            .collect()
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(ids(FilterExpr::eq("age", 30)), vec![1]);
        assert_eq!(ids(FilterExpr::gt("age", 28)), vec![1, 3]);
        assert_eq!(ids(FilterExpr::lte("age", 30)), vec![1, 2]);
        assert_eq!(ids(FilterExpr::eq("active", true)), vec![1, 3]);
    }

    #[test]
    fn test_ne_matches_null() {
        assert_eq!(ids(FilterExpr::ne("name", "bob")), vec![1, 3]);
        assert_eq!(ids(FilterExpr::is_null("name")), vec![3]);
        assert_eq!(ids(FilterExpr::is_not_null("name")), vec![1, 2]);
    }

    #[test]
    fn test_text_is_case_insensitive_and_null_safe() {
        assert_eq!(ids(FilterExpr::contains("name", "LI")), vec![1]);
        assert_eq!(ids(FilterExpr::starts_with("name", "B")), vec![2]);
        assert_eq!(ids(FilterExpr::ends_with("name", "CE")), vec![1]);
        // Integers match on their text form.
        assert_eq!(ids(FilterExpr::contains("age", "5")), vec![2, 3]);
    }

    #[test]
    fn test_logical_composition() {
        assert_eq!(
            ids(FilterExpr::or([FilterExpr::eq("id", 1), FilterExpr::eq("id", 3)])),
            vec![1, 3]
        );
        assert_eq!(ids(FilterExpr::not(FilterExpr::eq("name", "bob"))), vec![1, 3]);
        assert_eq!(ids(FilterExpr::in_list("id", [3, 1])), vec![1, 3]);
        assert_eq!(ids(FilterExpr::and(Vec::new())), vec![1, 2, 3]);
        assert!(ids(FilterExpr::or(Vec::new())).is_empty());
    }

    #[test]
    fn test_sort_and_page() {
        let entity = people();
        let options = FindOptions::new()
            .with_order(OrderSpec::desc("age"))
            .with_limit(2)
            .with_page(1);
        let page = select_rows(&rows(), &PreparedFilter::All, &entity, &options).unwrap();
        let got: Vec<_> = page.iter().filter_map(|r| r.get("id").and_then(Value::as_i64)).collect();
        assert_eq!(got, vec![3, 1]);

        let second = select_rows(&rows(), &PreparedFilter::All, &entity, &options.clone().with_page(2)).unwrap();
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_nulls_sort_first() {
        let entity = people();
        let options = FindOptions::new().with_order(OrderSpec::asc("name"));
        let sorted = select_rows(&rows(), &PreparedFilter::All, &entity, &options).unwrap();
        let got: Vec<_> = sorted.iter().filter_map(|r| r.get("id").and_then(Value::as_i64)).collect();
        assert_eq!(got, vec![3, 1, 2]);
    }

    #[test]
    fn test_expand_order_appends_id() {
        let entity = people();
        let expanded = expand_order(&entity, &[OrderSpec::desc("age")]).unwrap();
        assert_eq!(expanded, vec![OrderSpec::desc("age"), OrderSpec::asc("id")]);
        assert!(expand_order(&entity, &[]).unwrap().is_empty());
        assert!(expand_order(&entity, &[OrderSpec::asc("nope")]).is_err());
    }

    #[test]
    fn test_json_fields_are_not_orderable() {
        let entity = people().with_field(FieldDef::json("meta"));
        let err = expand_order(&entity, &[OrderSpec::asc("meta")]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperator { ref field, .. } if field == "meta"));
    }
}
