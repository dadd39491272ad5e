//! Filter translation.
//!
//! A [`FilterExpr`](shoal_proto::FilterExpr) is first prepared against an
//! entity (custom filters expanded, values coerced, undefined comparisons
//! pruned) and then handed to one of the translators:
//!
//! - [`memory`] evaluates it against rows,
//! - [`sql`] renders a parameterized `WHERE` clause,
//! - [`url`] and [`json`] serialize it for transport.

pub mod json;
pub mod memory;
pub mod prepare;
pub mod sql;
pub mod url;

pub use memory::{expand_order, select_rows, sort_rows, FilterEvaluator};
pub use prepare::{prepare, prepare_option, PreparedFilter, MAX_CUSTOM_DEPTH};
pub use sql::{
    order_by_clause, quote_ident, to_where_clause, Named, Numbered, Placeholders, QuestionMark,
    SqlBuilder, WhereClause,
};
pub use url::{
    encode_query, find_options_from_params, find_options_to_params, from_url_params,
    parse_query, to_url_params, DEFAULT_PAGE_SIZE,
};
