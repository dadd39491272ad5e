//! SQL WHERE clause builder.
//!
//! Values are always bound as parameters, never interpolated. Negation is
//! compiled as `NOT COALESCE((expr), FALSE)` so that SQL's three-valued logic
//! on null columns gives the same answer as the in-memory evaluator.

use shoal_proto::{CompareOp, OrderDirection, OrderSpec, Value};

use super::memory::expand_order;
use super::prepare::PreparedFilter;
use crate::catalog::{EntityDef, FieldDef};
use crate::error::Error;

/// Placeholder token style, called once per bound value with its 1-based
/// parameter index.
pub trait Placeholders {
    fn token(&mut self, index: usize) -> String;
}

/// `?` placeholders (SQLite, MySQL).
#[derive(Debug, Clone, Copy, Default)]
pub struct QuestionMark;

impl Placeholders for QuestionMark {
    fn token(&mut self, _index: usize) -> String {
        "?".to_string()
    }
}

/// `$1, $2, ...` placeholders (Postgres).
#[derive(Debug, Clone, Copy, Default)]
pub struct Numbered;

impl Placeholders for Numbered {
    fn token(&mut self, index: usize) -> String {
        format!("${index}")
    }
}

/// `:p1, :p2, ...` named placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct Named;

impl Placeholders for Named {
    fn token(&mut self, index: usize) -> String {
        format!(":p{index}")
    }
}

impl<F: FnMut(usize) -> String> Placeholders for F {
    fn token(&mut self, index: usize) -> String {
        self(index)
    }
}

/// A compiled WHERE condition with its bound parameters, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Quote an identifier with double quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Compile a prepared filter with `?` placeholders.
pub fn to_where_clause(filter: &PreparedFilter, entity: &EntityDef) -> Result<WhereClause, Error> {
    SqlBuilder::new(entity, QuestionMark).where_clause(filter)
}

/// Compile an ORDER BY list (without the keyword); empty for no ordering.
pub fn order_by_clause(entity: &EntityDef, order: &[OrderSpec]) -> Result<String, Error> {
    let expanded = expand_order(entity, order)?;
    let mut parts = Vec::with_capacity(expanded.len());
    for spec in &expanded {
        let field = entity.require_field(&spec.field)?;
        let direction = match spec.direction {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        };
        parts.push(format!("{} {direction}", quote_ident(field.db_name())));
    }
    Ok(parts.join(", "))
}

/// Incremental SQL builder collecting bound parameters.
pub struct SqlBuilder<'a, P> {
    entity: &'a EntityDef,
    placeholders: P,
    params: Vec<Value>,
}

impl<'a, P: Placeholders> SqlBuilder<'a, P> {
    /// Create a builder for an entity.
    pub fn new(entity: &'a EntityDef, placeholders: P) -> Self {
        Self {
            entity,
            placeholders,
            params: Vec::new(),
        }
    }

    /// Bind a raw storage value and return its placeholder token.
    pub fn bind_raw(&mut self, value: Value) -> String {
        self.params.push(value);
        self.placeholders.token(self.params.len())
    }

    /// Bind a field value through the field's converter.
    pub fn bind(&mut self, field: &FieldDef, value: &Value) -> String {
        self.bind_raw(field.converter().to_db(value))
    }

    /// Parameters bound so far.
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Consume the builder, returning its parameters.
    pub fn into_params(self) -> Vec<Value> {
        self.params
    }

    /// Compile a filter and finish.
    pub fn where_clause(mut self, filter: &PreparedFilter) -> Result<WhereClause, Error> {
        let sql = self.condition(filter)?;
        Ok(WhereClause {
            sql,
            params: self.params,
        })
    }

    /// Compile a filter into a condition, binding its values.
    pub fn condition(&mut self, filter: &PreparedFilter) -> Result<String, Error> {
        match filter {
            PreparedFilter::All => Ok("1 = 1".to_string()),
            PreparedFilter::None => Ok("1 = 0".to_string()),
            PreparedFilter::Compare { field, op, value } => {
                let field = self.entity.require_field(field)?;
                if field.is_compound() {
                    self.compound_compare(field, *op, value)
                } else {
                    Ok(self.compare(field, *op, value))
                }
            }
            PreparedFilter::In { field, values } => {
                let field = self.entity.require_field(field)?;
                if field.is_compound() {
                    self.compound_in(field, values)
                } else {
                    Ok(self.in_list(field, values))
                }
            }
            PreparedFilter::And(children) => self.join(children, " AND "),
            PreparedFilter::Or(children) => self.join(children, " OR "),
            PreparedFilter::Not(inner) => {
                let inner = self.condition(inner)?;
                Ok(format!("NOT COALESCE(({inner}), FALSE)"))
            }
        }
    }

    fn join(&mut self, children: &[PreparedFilter], separator: &str) -> Result<String, Error> {
        let parts = children
            .iter()
            .map(|c| self.condition(c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("({})", parts.join(separator)))
    }

    fn compare(&mut self, field: &FieldDef, op: CompareOp, value: &Value) -> String {
        let col = quote_ident(field.db_name());
        if value.is_null() {
            return match op {
                CompareOp::Ne => format!("{col} IS NOT NULL"),
                _ => format!("{col} IS NULL"),
            };
        }
        match op {
            CompareOp::Eq => format!("{col} = {}", self.bind(field, value)),
            CompareOp::Ne => format!("({col} <> {} OR {col} IS NULL)", self.bind(field, value)),
            CompareOp::Gt => format!("{col} > {}", self.bind(field, value)),
            CompareOp::Gte => format!("{col} >= {}", self.bind(field, value)),
            CompareOp::Lt => format!("{col} < {}", self.bind(field, value)),
            CompareOp::Lte => format!("{col} <= {}", self.bind(field, value)),
            CompareOp::Contains | CompareOp::StartsWith | CompareOp::EndsWith => {
                let text = escape_like(value.as_str().unwrap_or_default());
                let pattern = match op {
                    CompareOp::Contains => format!("%{text}%"),
                    CompareOp::StartsWith => format!("{text}%"),
                    _ => format!("%{text}"),
                };
                format!("{col} LIKE {} ESCAPE '\\'", self.bind_raw(Value::String(pattern)))
            }
        }
    }

    fn in_list(&mut self, field: &FieldDef, values: &[Value]) -> String {
        let col = quote_ident(field.db_name());
        let tokens: Vec<String> = values
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| self.bind(field, v))
            .collect();
        let has_null = values.iter().any(Value::is_null);
        match (tokens.is_empty(), has_null) {
            (false, false) => format!("{col} IN ({})", tokens.join(", ")),
            (false, true) => format!("({col} IN ({}) OR {col} IS NULL)", tokens.join(", ")),
            (true, true) => format!("{col} IS NULL"),
            (true, false) => "1 = 0".to_string(),
        }
    }

    /// Per-column equality group for one compound value.
    fn compound_group(&mut self, field: &FieldDef, value: &Value) -> Result<String, Error> {
        let members = self.entity.member_fields(field)?;
        let components = value.as_list().unwrap_or_default();
        if components.len() != members.len() {
            return Err(Error::CompoundArity {
                field: field.key().to_string(),
                expected: members.len(),
                actual: components.len(),
            });
        }
        let mut parts = Vec::with_capacity(members.len());
        for (member, component) in members.into_iter().zip(components) {
            let col = quote_ident(member.db_name());
            if component.is_null() {
                parts.push(format!("{col} IS NULL"));
            } else {
                parts.push(format!("{col} = {}", self.bind(member, component)));
            }
        }
        Ok(format!("({})", parts.join(" AND ")))
    }

    fn compound_compare(&mut self, field: &FieldDef, op: CompareOp, value: &Value) -> Result<String, Error> {
        let group = self.compound_group(field, value)?;
        match op {
            CompareOp::Eq => Ok(group),
            CompareOp::Ne => Ok(format!("NOT COALESCE({group}, FALSE)")),
            other => Err(Error::UnsupportedOperator {
                field: field.key().to_string(),
                op: other.as_str().to_string(),
            }),
        }
    }

    fn compound_in(&mut self, field: &FieldDef, values: &[Value]) -> Result<String, Error> {
        if values.is_empty() {
            return Ok("1 = 0".to_string());
        }
        let groups = values
            .iter()
            .map(|v| self.compound_group(field, v))
            .collect::<Result<Vec<_>, _>>()?;
        if groups.len() == 1 {
            return Ok(groups.into_iter().next().unwrap_or_default());
        }
        Ok(format!("({})", groups.join(" OR ")))
    }
}
