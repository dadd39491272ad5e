//! Protocol error types.

use thiserror::Error;

/// Errors raised while parsing protocol values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Operator name is not one of the known comparison operators.
    #[error("unknown filter operator: {0}")]
    UnknownOperator(String),

    /// Sort direction is neither `asc` nor `desc`.
    #[error("invalid sort direction: {0}")]
    InvalidDirection(String),
}
