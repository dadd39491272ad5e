//! Query options for find operations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::filter::FilterExpr;

/// Order specification for sorting results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSpec {
    /// Field key to order by.
    pub field: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

impl OrderSpec {
    /// Create an ascending order spec.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending order spec.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

impl OrderDirection {
    /// Lowercase name as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "asc",
            OrderDirection::Desc => "desc",
        }
    }
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(OrderDirection::Asc),
            "desc" => Ok(OrderDirection::Desc),
            other => Err(Error::InvalidDirection(other.to_string())),
        }
    }
}

/// Options accepted by find operations.
///
/// `page` is 1-based; values below 1 are treated as 1. A missing `limit`
/// means no limit.
#[derive(Debug, Clone, PartialEq)]
pub struct FindOptions {
    /// Optional row filter.
    pub filter: Option<FilterExpr>,
    /// Ordering specification, primary key first.
    pub order_by: Vec<OrderSpec>,
    /// Maximum number of rows to return.
    pub limit: Option<u32>,
    /// 1-based page number; only meaningful together with `limit`.
    pub page: u32,
    /// Opaque provider-specific parameters, passed through untouched.
    pub additional_parameters: Option<serde_json::Value>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            filter: None,
            order_by: Vec::new(),
            limit: None,
            page: 1,
            additional_parameters: None,
        }
    }
}

impl FindOptions {
    /// Create empty find options (all rows, storage order).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a filter.
    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Add ordering.
    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set the page size.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the 1-based page number.
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    /// Set provider-specific parameters.
    pub fn with_additional_parameters(mut self, params: serde_json::Value) -> Self {
        self.additional_parameters = Some(params);
        self
    }

    /// Normalized page number (at least 1).
    pub fn page(&self) -> u32 {
        self.page.max(1)
    }

    /// Number of rows to skip: `(page - 1) * limit`, or 0 without a limit.
    pub fn offset(&self) -> u64 {
        match self.limit {
            Some(limit) => (self.page() as u64 - 1) * limit as u64,
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_options_builder() {
        let options = FindOptions::new()
            .with_filter(FilterExpr::eq("active", true))
            .with_order(OrderSpec::asc("name"))
            .with_limit(10)
            .with_page(3);

        assert!(options.filter.is_some());
        assert_eq!(options.order_by.len(), 1);
        assert_eq!(options.offset(), 20);
    }

    #[test]
    fn test_page_below_one_normalizes() {
        let options = FindOptions::new().with_limit(5).with_page(0);
        assert_eq!(options.page(), 1);
        assert_eq!(options.offset(), 0);

        let unlimited = FindOptions::new().with_page(4);
        assert_eq!(unlimited.offset(), 0);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("DESC".parse::<OrderDirection>().unwrap(), OrderDirection::Desc);
        assert_eq!(" asc".parse::<OrderDirection>().unwrap(), OrderDirection::Asc);
        assert!("up".parse::<OrderDirection>().is_err());
    }
}
