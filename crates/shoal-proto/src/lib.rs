//! Shoal protocol types.
//!
//! This crate defines the backend-independent vocabulary shared by the data
//! access layer, its translators and the Data API:
//!
//! - [`value`] - Runtime values stored in rows and used as filter operands
//! - [`filter`] - The filter expression tree
//! - [`query`] - Ordering and paging options for find operations
//! - [`row`] - Materialized rows and entity ids
//! - [`error`] - Parse errors for operators and directions

pub mod error;
pub mod filter;
pub mod query;
pub mod row;
pub mod value;

pub use error::Error;

pub use filter::{CompareOp, FilterExpr};
pub use query::{FindOptions, OrderDirection, OrderSpec};
pub use row::{EntityId, Row};
pub use value::{Value, DATE_FORMAT};
