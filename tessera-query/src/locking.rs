//! Lock modes and their checks.
//!
//! Pessimistic modes render dialect clauses and require a transaction that
//! the caller has already opened on the driver; the engine only checks it.
//! Optimistic locking compares a fetched version or update timestamp with
//! the value the caller expects and fails on mismatch without retrying.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;

use crate::dialect::Dialect;
use crate::error::{QueryError, QueryResult};
use crate::metadata::EntityMetadata;
use crate::value::{Row, Value};

/// Expected value of an optimistic lock.
#[derive(Debug, Clone, PartialEq)]
pub enum LockVersion {
    /// Expected value of the version column.
    Version(i64),
    /// Expected value of the update timestamp column.
    UpdatedAt(DateTime<Utc>),
}

impl From<i64> for LockVersion {
    fn from(v: i64) -> Self {
        Self::Version(v)
    }
}

impl From<DateTime<Utc>> for LockVersion {
    fn from(v: DateTime<Utc>) -> Self {
        Self::UpdatedAt(v)
    }
}

impl From<&LockVersion> for Value {
    fn from(v: &LockVersion) -> Self {
        match v {
            LockVersion::Version(v) => Value::Int(*v),
            LockVersion::UpdatedAt(at) => Value::String(at.to_rfc3339()),
        }
    }
}

/// Lock mode of a select query.
#[derive(Debug, Clone, PartialEq)]
pub enum LockMode {
    /// Client-side version check after fetching.
    Optimistic(LockVersion),
    /// Shared row lock.
    PessimisticRead,
    /// Exclusive row lock.
    PessimisticWrite,
    /// Exclusive lock skipping locked rows.
    PessimisticPartialWrite,
    /// Exclusive lock failing on locked rows.
    PessimisticWriteOrFail,
    /// Exclusive lock not blocking key-share locks.
    ForNoKeyUpdate,
    /// Read uncommitted rows.
    DirtyRead,
}

impl LockMode {
    /// Whether the mode takes database locks and needs a transaction.
    pub fn is_pessimistic(&self) -> bool {
        !matches!(self, Self::Optimistic(_) | Self::DirtyRead)
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Optimistic(_) => "optimistic",
            Self::PessimisticRead => "pessimistic_read",
            Self::PessimisticWrite => "pessimistic_write",
            Self::PessimisticPartialWrite => "pessimistic_partial_write",
            Self::PessimisticWriteOrFail => "pessimistic_write_or_fail",
            Self::ForNoKeyUpdate => "for_no_key_update",
            Self::DirtyRead => "dirty_read",
        };
        f.write_str(name)
    }
}

/// Validate a lock mode before any statement is sent.
///
/// `single` is true for `get_one` style terminals; optimistic locks are
/// rejected everywhere else.
pub fn check_lock(
    mode: &LockMode,
    dialect: &Dialect,
    entity: &EntityMetadata,
    transaction_active: bool,
    single: bool,
) -> QueryResult<()> {
    match mode {
        LockMode::Optimistic(version) => {
            if !single {
                return Err(QueryError::optimistic_lock_cannot_be_used());
            }
            let column = match version {
                LockVersion::Version(_) => entity.version_column(),
                LockVersion::UpdatedAt(_) => entity.update_date_column(),
            };
            if column.is_none() {
                return Err(QueryError::no_version_or_update_column(&entity.name));
            }
            Ok(())
        }
        mode => {
            dialect.lock_clause(mode)?;
            if mode.is_pessimistic() && !transaction_active {
                return Err(QueryError::lock_without_transaction());
            }
            Ok(())
        }
    }
}

/// Compare the fetched row of `alias` with the expected lock version.
pub fn verify_version(
    entity: &EntityMetadata,
    alias: &str,
    row: &Row,
    expected: &LockVersion,
) -> QueryResult<()> {
    match expected {
        LockVersion::Version(version) => {
            let column = entity
                .version_column()
                .ok_or_else(|| QueryError::no_version_or_update_column(&entity.name))?;
            let key = format!("{}_{}", alias, column.database_name);
            let actual = row.get(&key).cloned().unwrap_or(JsonValue::Null);
            let actual_value = Value::from_json(&actual);
            let expected_value = Value::Int(*version);
            // REAL version columns come back as floats
            if !actual_value.loosely_equals(&expected_value) {
                return Err(QueryError::version_mismatch(
                    &entity.name,
                    expected_value,
                    actual_value,
                ));
            }
        }
        LockVersion::UpdatedAt(at) => {
            let column = entity
                .update_date_column()
                .ok_or_else(|| QueryError::no_version_or_update_column(&entity.name))?;
            let key = format!("{}_{}", alias, column.database_name);
            let actual = row.get(&key).cloned().unwrap_or(JsonValue::Null);
            let matches = parse_timestamp(&actual)
                .map(|stored| stored.timestamp_millis() == at.timestamp_millis())
                .unwrap_or(false);
            if !matches {
                return Err(QueryError::version_mismatch(
                    &entity.name,
                    Value::String(at.to_rfc3339()),
                    Value::from_json(&actual),
                ));
            }
        }
    }
    Ok(())
}

/// Parse a timestamp as drivers return it: RFC 3339, a naive
/// `YYYY-MM-DD HH:MM:SS[.fff]` taken as UTC, or epoch milliseconds.
pub(crate) fn parse_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        JsonValue::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}
