//! The driver seam.
//!
//! The engine never talks to a database directly. A [`Driver`] supplies the
//! dialect descriptor, executes statements with positional parameters and
//! reports whether a transaction is open. Rows come back as maps keyed by
//! column alias.

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use crate::dialect::Dialect;
use crate::error::QueryResult;
use crate::value::{Row, Value};

/// Database access used by the engine.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Capability descriptor of the connected database.
    fn dialect(&self) -> Dialect;

    /// Run a statement returning rows.
    async fn query(&self, sql: &str, params: Vec<Value>) -> QueryResult<Vec<Row>>;

    /// Run a statement returning the number of affected rows.
    async fn execute(&self, sql: &str, params: Vec<Value>) -> QueryResult<u64>;

    /// Whether a transaction is currently open on this connection.
    fn is_transaction_active(&self) -> bool;
}

/// Why a statement is sent, recorded in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The statement the caller asked for.
    Main,
    /// Distinct primary keys of one page.
    PageIds,
    /// Relation-id side-load.
    RelationId,
    /// Relation-count side-load.
    RelationCount,
    /// Total count.
    Count,
    /// Relation mutation, update or delete.
    Mutation,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Main => "main",
            Self::PageIds => "page-ids",
            Self::RelationId => "relation-id",
            Self::RelationCount => "relation-count",
            Self::Count => "count",
            Self::Mutation => "mutation",
        })
    }
}

/// Send a row-returning statement, logging it.
pub(crate) async fn query(
    driver: &dyn Driver,
    phase: Phase,
    sql: String,
    params: Vec<Value>,
) -> QueryResult<Vec<Row>> {
    let start = Instant::now();
    debug!(phase = %phase, sql = %sql, params = params.len(), "sending query");
    let rows = driver.query(&sql, params).await?;
    debug!(
        phase = %phase,
        rows = rows.len(),
        elapsed_us = start.elapsed().as_micros() as u64,
        "query completed"
    );
    Ok(rows)
}

/// Send a statement returning an affected row count, logging it.
pub(crate) async fn execute(
    driver: &dyn Driver,
    phase: Phase,
    sql: String,
    params: Vec<Value>,
) -> QueryResult<u64> {
    let start = Instant::now();
    debug!(phase = %phase, sql = %sql, params = params.len(), "sending statement");
    let affected = driver.execute(&sql, params).await?;
    debug!(
        phase = %phase,
        affected,
        elapsed_us = start.elapsed().as_micros() as u64,
        "statement completed"
    );
    Ok(affected)
}
