//! Error types for query building, execution and hydration.
//!
//! Every failure carries an [`ErrorCode`] for programmatic handling, an
//! [`ErrorContext`] describing where it happened, and an optional source
//! error (driver failures are passed through untouched as the source).
//!
//! # Error Codes
//!
//! Error codes follow a pattern: T{category}{number}
//! - 1xxx: Build errors (aliases, relations, parameters, query shape)
//! - 4xxx: Locking errors (pessimistic and optimistic)
//! - 5xxx: Execution errors (driver failures, missing rows)
//! - 6xxx: Data errors (deserialization of hydrated entities)
//! - 7xxx: Configuration errors
//! - 9xxx: Internal errors
//!
//! ```rust
//! use tessera_query::{ErrorCode, QueryError};
//!
//! let err = QueryError::unknown_alias("author");
//! assert_eq!(err.code, ErrorCode::UnknownAlias);
//! assert!(err.to_string().contains("author"));
//! ```

use std::fmt;
use thiserror::Error;

use crate::value::Value;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Build errors (1xxx)
    /// An alias was referenced before being registered (T1001).
    UnknownAlias = 1001,
    /// No main alias was set before building (T1002).
    AliasNotSet = 1002,
    /// Two aliases with the same name were registered (T1003).
    DuplicateAlias = 1003,
    /// A relation path named a property that is not a relation (T1004).
    RelationNotFound = 1004,
    /// No entity metadata is registered under the given name (T1005).
    EntityNotFound = 1005,
    /// A named parameter was referenced but never set (T1006).
    MissingParameter = 1006,
    /// A clause is not legal for the query type (T1007).
    InvalidQueryShape = 1007,
    /// Entity metadata is inconsistent (T1008).
    InvalidMetadata = 1008,

    // Locking errors (4xxx)
    /// The dialect has no syntax for the requested lock mode (T4001).
    UnsupportedLockOnDialect = 4001,
    /// A pessimistic lock was requested outside a transaction (T4002).
    LockWithoutTransaction = 4002,
    /// Optimistic lock requested on a plural result (T4003).
    OptimisticLockCannotBeUsed = 4003,
    /// Optimistic lock requested on an entity without version or update date (T4004).
    NoVersionOrUpdateColumn = 4004,
    /// The fetched version differs from the expected one (T4005).
    OptimisticLockVersionMismatch = 4005,

    // Execution errors (5xxx)
    /// The driver failed to execute a statement (T5001).
    DatabaseError = 5001,
    /// A single record was required but none matched (T5002).
    RecordNotFound = 5002,

    // Data errors (6xxx)
    /// A hydrated entity could not be deserialized (T6001).
    DeserializationError = 6001,

    // Configuration errors (7xxx)
    /// Invalid engine configuration (T7001).
    InvalidConfiguration = 7001,

    // Internal errors (9xxx)
    /// Internal error (T9001).
    Internal = 9001,
}

impl ErrorCode {
    /// Get the error code string (e.g., "T1001").
    pub fn code(&self) -> String {
        format!("T{}", *self as u16)
    }

    /// Get a short description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::UnknownAlias => "Unknown alias",
            Self::AliasNotSet => "Main alias not set",
            Self::DuplicateAlias => "Duplicate alias",
            Self::RelationNotFound => "Relation not found",
            Self::EntityNotFound => "Entity metadata not found",
            Self::MissingParameter => "Missing parameter",
            Self::InvalidQueryShape => "Invalid query shape",
            Self::InvalidMetadata => "Invalid entity metadata",
            Self::UnsupportedLockOnDialect => "Lock mode not supported by dialect",
            Self::LockWithoutTransaction => "Pessimistic lock outside transaction",
            Self::OptimisticLockCannotBeUsed => "Optimistic lock on plural result",
            Self::NoVersionOrUpdateColumn => "No version or update date column",
            Self::OptimisticLockVersionMismatch => "Optimistic lock version mismatch",
            Self::DatabaseError => "Database error",
            Self::RecordNotFound => "Record not found",
            Self::DeserializationError => "Deserialization error",
            Self::InvalidConfiguration => "Invalid configuration",
            Self::Internal => "Internal error",
        }
    }

    /// Whether this error is raised while building, before any statement is sent.
    pub fn is_build_error(&self) -> bool {
        (*self as u16) < 2000
            || matches!(
                self,
                Self::UnsupportedLockOnDialect
                    | Self::LockWithoutTransaction
                    | Self::OptimisticLockCannotBeUsed
                    | Self::NoVersionOrUpdateColumn
            )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Expected and actual lock versions of an optimistic lock mismatch.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionMismatch {
    /// The version the caller expected.
    pub expected: Value,
    /// The version stored in the fetched row.
    pub actual: Value,
}

/// Additional context for an error.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The operation that was being performed.
    pub operation: Option<String>,
    /// The entity involved.
    pub entity: Option<String>,
    /// The alias involved.
    pub alias: Option<String>,
    /// The relation property involved.
    pub relation: Option<String>,
    /// The SQL statement (if available).
    pub sql: Option<String>,
    /// Suggestions for fixing the error.
    pub suggestions: Vec<String>,
    /// Version details of an optimistic lock mismatch.
    pub mismatch: Option<VersionMismatch>,
}

/// Errors that can occur while building or executing a query.
#[derive(Error, Debug)]
pub struct QueryError {
    /// The error code.
    pub code: ErrorCode,
    /// The error message.
    pub message: String,
    /// Additional context.
    pub context: ErrorContext,
    /// The source error (if any).
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl QueryError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Add context about the operation.
    pub fn with_context(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    /// Add a suggestion for fixing the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context.suggestions.push(suggestion.into());
        self
    }

    /// Set the entity.
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.context.entity = Some(entity.into());
        self
    }

    /// Set the alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.context.alias = Some(alias.into());
        self
    }

    /// Set the relation property.
    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.context.relation = Some(relation.into());
        self
    }

    /// Set the SQL statement.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.context.sql = Some(sql.into());
        self
    }

    /// Set the source error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// A copy of this error without its source.
    pub(crate) fn detached(&self) -> Self {
        Self {
            code: self.code,
            message: self.message.clone(),
            context: self.context.clone(),
            source: None,
        }
    }

    // ============== Constructor Functions ==============

    /// An alias was referenced but never registered.
    pub fn unknown_alias(alias: impl Into<String>) -> Self {
        let alias = alias.into();
        Self::new(
            ErrorCode::UnknownAlias,
            format!("Alias \"{}\" is not registered in this query", alias),
        )
        .with_alias(&alias)
        .with_suggestion("Register the alias with from() or a join before referencing it")
    }

    /// The query has no main alias.
    pub fn alias_not_set() -> Self {
        Self::new(ErrorCode::AliasNotSet, "Main alias is not set")
            .with_suggestion("Call from() with an entity, table or sub-query before building")
    }

    /// An alias name was registered twice.
    pub fn duplicate_alias(alias: impl Into<String>) -> Self {
        let alias = alias.into();
        Self::new(
            ErrorCode::DuplicateAlias,
            format!("Alias \"{}\" is already registered in this query", alias),
        )
        .with_alias(&alias)
    }

    /// A relation path does not name a declared relation.
    pub fn relation_not_found(entity: impl Into<String>, property: impl Into<String>) -> Self {
        let entity = entity.into();
        let property = property.into();
        Self::new(
            ErrorCode::RelationNotFound,
            format!("Relation \"{}\" was not found on entity {}", property, entity),
        )
        .with_entity(&entity)
        .with_relation(&property)
    }

    /// No metadata is registered for an entity name.
    pub fn entity_not_found(entity: impl Into<String>) -> Self {
        let entity = entity.into();
        Self::new(
            ErrorCode::EntityNotFound,
            format!("No metadata registered for entity {}", entity),
        )
        .with_entity(&entity)
    }

    /// A named parameter was referenced in SQL text but never set.
    pub fn missing_parameter(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::MissingParameter,
            format!("Parameter \":{}\" is referenced but has no value", name),
        )
        .with_suggestion(format!("Call set_parameter(\"{}\", value)", name))
    }

    /// A clause is not legal for the query type.
    pub fn invalid_query_shape(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidQueryShape, message)
    }

    /// Entity metadata is inconsistent.
    pub fn invalid_metadata(entity: impl Into<String>, message: impl Into<String>) -> Self {
        let entity = entity.into();
        Self::new(
            ErrorCode::InvalidMetadata,
            format!("Invalid metadata for {}: {}", entity, message.into()),
        )
        .with_entity(&entity)
    }

    /// The dialect cannot express the lock mode.
    pub fn unsupported_lock(dialect: &str, mode: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::UnsupportedLockOnDialect,
            format!("Lock mode {} is not supported by the {} dialect", mode, dialect),
        )
    }

    /// A pessimistic lock was requested without an active transaction.
    pub fn lock_without_transaction() -> Self {
        Self::new(
            ErrorCode::LockWithoutTransaction,
            "Pessimistic locks can only be used inside an active transaction",
        )
        .with_suggestion("Begin a transaction on the driver before executing the query")
    }

    /// Optimistic locking was requested on a plural result.
    pub fn optimistic_lock_cannot_be_used() -> Self {
        Self::new(
            ErrorCode::OptimisticLockCannotBeUsed,
            "Optimistic locking can only be used with get_one() or get_one_or_fail()",
        )
    }

    /// Optimistic locking was requested on an entity lacking a version column.
    pub fn no_version_or_update_column(entity: impl Into<String>) -> Self {
        let entity = entity.into();
        Self::new(
            ErrorCode::NoVersionOrUpdateColumn,
            format!("Entity {} has no version or update date column", entity),
        )
        .with_entity(&entity)
    }

    /// The fetched entity's version does not match the expected version.
    pub fn version_mismatch(entity: impl Into<String>, expected: Value, actual: Value) -> Self {
        let entity = entity.into();
        let mut err = Self::new(
            ErrorCode::OptimisticLockVersionMismatch,
            format!(
                "The optimistic lock on entity {} failed, version {} was expected, but is actually {}",
                entity, expected, actual
            ),
        )
        .with_entity(&entity);
        err.context.mismatch = Some(VersionMismatch { expected, actual });
        err
    }

    /// A driver failure.
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// No record matched where one was required.
    pub fn not_found(entity: impl Into<String>) -> Self {
        let entity = entity.into();
        Self::new(
            ErrorCode::RecordNotFound,
            format!("No {} record found matching the query", entity),
        )
        .with_entity(&entity)
        .with_suggestion("Use get_one() to receive None instead of an error")
    }

    /// A hydrated entity did not deserialize into the requested type.
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DeserializationError, message)
    }

    /// Invalid configuration value.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    /// Internal invariant violation.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    // ============== Predicates ==============

    /// Expected and actual versions, when this is an optimistic lock mismatch.
    pub fn version_mismatch_details(&self) -> Option<&VersionMismatch> {
        self.context.mismatch.as_ref()
    }

    /// Check if this is an unknown alias error.
    pub fn is_unknown_alias(&self) -> bool {
        self.code == ErrorCode::UnknownAlias
    }

    /// Check if this is a relation not found error.
    pub fn is_relation_not_found(&self) -> bool {
        self.code == ErrorCode::RelationNotFound
    }

    /// Check if this error is related to locking.
    pub fn is_lock_error(&self) -> bool {
        (4000..5000).contains(&(self.code as u16))
    }

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::RecordNotFound
    }

    /// Render the error with its context for display.
    pub fn display_full(&self) -> String {
        let mut out = format!("Error [{}]: {}", self.code.code(), self.message);
        if let Some(op) = &self.context.operation {
            out.push_str(&format!("\n  operation: {}", op));
        }
        if let Some(entity) = &self.context.entity {
            out.push_str(&format!("\n  entity: {}", entity));
        }
        if let Some(alias) = &self.context.alias {
            out.push_str(&format!("\n  alias: {}", alias));
        }
        if let Some(sql) = &self.context.sql {
            out.push_str(&format!("\n  sql: {}", sql));
        }
        for suggestion in &self.context.suggestions {
            out.push_str(&format!("\n  help: {}", suggestion));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::UnknownAlias.code(), "T1001");
        assert_eq!(ErrorCode::OptimisticLockVersionMismatch.code(), "T4005");
        assert_eq!(ErrorCode::Internal.to_string(), "T9001");
    }

    #[test]
    fn test_build_error_classification() {
        assert!(ErrorCode::UnknownAlias.is_build_error());
        assert!(ErrorCode::LockWithoutTransaction.is_build_error());
        assert!(!ErrorCode::OptimisticLockVersionMismatch.is_build_error());
        assert!(!ErrorCode::DatabaseError.is_build_error());
    }

    #[test]
    fn test_version_mismatch_carries_values() {
        let err = QueryError::version_mismatch("Post", Value::Int(2), Value::Int(3));
        assert_eq!(err.code, ErrorCode::OptimisticLockVersionMismatch);
        let details = err.version_mismatch_details().unwrap();
        assert_eq!(details.expected, Value::Int(2));
        assert_eq!(details.actual, Value::Int(3));
        assert!(err.is_lock_error());
    }

    #[test]
    fn test_relation_not_found_context() {
        let err = QueryError::relation_not_found("Post", "tags");
        assert!(err.is_relation_not_found());
        assert_eq!(err.context.entity.as_deref(), Some("Post"));
        assert_eq!(err.context.relation.as_deref(), Some("tags"));
    }

    #[test]
    fn test_display_full() {
        let err = QueryError::unknown_alias("c").with_sql("SELECT 1");
        let full = err.display_full();
        assert!(full.contains("T1001"));
        assert!(full.contains("alias: c"));
        assert!(full.contains("sql: SELECT 1"));
        assert!(full.contains("help:"));
    }
}
