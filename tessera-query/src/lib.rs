//! # tessera-query
//!
//! Relational query builder and result hydration engine.
//!
//! This crate turns a fluent description of a query over entity metadata into
//! SQL, runs it through an injected [`Driver`] and rebuilds nested entity
//! graphs from the flat rows:
//! - Aliases, joins by relation path, partial and full selections
//! - Two-step pagination when joins multiply rows
//! - Relation-id and relation-count side-loads
//! - Pessimistic and optimistic locking
//! - UPDATE, DELETE and relation mutations
//! - Dialect descriptors for PostgreSQL, MySQL, SQLite, SQL Server and Oracle
//!
//! ## Metadata
//!
//! Entities are described once and validated into a [`Schema`]:
//!
//! ```rust
//! use tessera_query::{ColumnMetadata, EntityMetadata, RelationMetadata, Schema};
//!
//! let schema = Schema::builder()
//!     .entity(
//!         EntityMetadata::new("User", "users")
//!             .column(ColumnMetadata::primary("id"))
//!             .column(ColumnMetadata::new("name"))
//!             .relation(RelationMetadata::one_to_many("posts", "Post", "author")),
//!     )
//!     .entity(
//!         EntityMetadata::new("Post", "posts")
//!             .column(ColumnMetadata::primary("id"))
//!             .column(ColumnMetadata::mapped("createdAt", "created_at"))
//!             .relation(RelationMetadata::many_to_one("author", "User").join_column("author_id", "id")),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert!(schema.has_entity("Post"));
//! ```
//!
//! ## Parameters
//!
//! Fragments use named parameters; they become the dialect's positional
//! placeholders in a final pass:
//!
//! ```rust
//! use indexmap::IndexMap;
//! use tessera_query::{Dialect, Value, bind_named};
//!
//! let mut params = IndexMap::new();
//! params.insert("id".to_string(), Value::Int(7));
//! params.insert("ids".to_string(), Value::List(vec![Value::Int(1), Value::Int(2)]));
//!
//! let (sql, values) = bind_named(
//!     "SELECT * FROM posts WHERE author_id = :id OR id IN (:...ids)",
//!     &params,
//!     &Dialect::postgres(),
//! )
//! .unwrap();
//! assert_eq!(sql, "SELECT * FROM posts WHERE author_id = $1 OR id IN ($2, $3)");
//! assert_eq!(values.len(), 3);
//! ```
//!
//! ## Querying
//!
//! ```rust,ignore
//! let source = DataSource::new(schema, driver);
//! let users = source
//!     .select("user")
//!     .from("User", "user")
//!     .left_join_and_select("user.posts", "post")
//!     .order_by("user.id", SortOrder::Asc)
//!     .take(10)
//!     .get_many()
//!     .await?;
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use tessera_query::{ErrorCode, QueryError};
//!
//! let err = QueryError::unknown_alias("post");
//! assert_eq!(err.code, ErrorCode::UnknownAlias);
//! ```

pub mod alias;
pub mod builder;
pub mod config;
pub mod data_source;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod expression;
pub mod hydrate;
pub mod locking;
pub mod logging;
pub mod metadata;
pub(crate) mod pagination;
pub mod resolver;
pub(crate) mod side_load;
pub mod sql;
pub mod types;
pub mod value;

#[cfg(test)]
mod test_support;

pub use alias::{Alias, AliasKind, AliasRegistry, AliasTarget};
pub use builder::{
    DeleteQueryBuilder, JoinSpec, JoinTarget, RelationQueryBuilder, SelectQueryBuilder,
    UpdateQueryBuilder,
};
pub use config::{EngineConfig, EnvSource, MapEnvSource, StdEnvSource};
pub use data_source::{DataSource, LoadListener};
pub use dialect::{CountDistinctStyle, Dialect, LimitStyle, LockClause, LockSyntax, PlaceholderStyle};
pub use driver::{Driver, Phase};
pub use error::{ErrorCode, ErrorContext, QueryError, QueryResult, VersionMismatch};
pub use expression::{JoinDirection, QueryExpression, QueryType};
pub use hydrate::{EntityGraph, EntityNode, Link, NodeId};
pub use locking::{LockMode, LockVersion};
pub use metadata::{
    ColumnMetadata, EntityMetadata, JoinColumn, JunctionMetadata, ParentTable, RelationKind,
    RelationMetadata, Schema, SchemaBuilder,
};
pub use sql::params::bind_named;
pub use types::{NullsOrder, OrderSpec, SortOrder};
pub use value::{Row, Value};

/// Prelude for building and running queries.
pub mod prelude {
    pub use crate::builder::{JoinSpec, SelectQueryBuilder};
    pub use crate::data_source::DataSource;
    pub use crate::dialect::Dialect;
    pub use crate::driver::Driver;
    pub use crate::error::{QueryError, QueryResult};
    pub use crate::locking::{LockMode, LockVersion};
    pub use crate::metadata::{ColumnMetadata, EntityMetadata, RelationMetadata, Schema};
    pub use crate::types::{NullsOrder, SortOrder};
    pub use crate::value::Value;
}
