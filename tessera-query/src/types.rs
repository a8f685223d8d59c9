//! Common types used in query building.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sort order for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortOrder {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

impl SortOrder {
    /// Get the SQL keyword for this sort order.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

/// Null placement in sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NullsOrder {
    /// Nulls appear first in the results.
    First,
    /// Nulls appear last in the results.
    Last,
}

impl NullsOrder {
    /// Get the SQL clause for this null order.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::First => "NULLS FIRST",
            Self::Last => "NULLS LAST",
        }
    }
}

/// Direction and null placement of one ORDER BY key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrderSpec {
    /// The sort order.
    pub order: SortOrder,
    /// Null placement (optional).
    pub nulls: Option<NullsOrder>,
}

impl OrderSpec {
    /// Ascending order.
    pub fn asc() -> Self {
        Self::default()
    }

    /// Descending order.
    pub fn desc() -> Self {
        Self {
            order: SortOrder::Desc,
            nulls: None,
        }
    }

    /// Set null placement.
    pub fn nulls(mut self, nulls: NullsOrder) -> Self {
        self.nulls = Some(nulls);
        self
    }
}

impl From<SortOrder> for OrderSpec {
    fn from(order: SortOrder) -> Self {
        Self { order, nulls: None }
    }
}
