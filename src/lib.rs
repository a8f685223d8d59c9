//! # Tessera
//!
//! Relational query building and entity hydration for Rust.
//!
//! Tessera provides:
//! - Fluent select, update, delete and relation builders over entity metadata
//! - Joins by relation path with automatic junction tables
//! - Correct pagination over one-to-many and many-to-many joins
//! - Relation ids and counts loaded alongside entities
//! - Pessimistic and optimistic locking
//! - Dialect descriptors for PostgreSQL, MySQL, SQLite, SQL Server and Oracle
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tessera::prelude::*;
//! use tessera::sqlite::SqliteDriver;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tessera::QueryError> {
//!     let driver = SqliteDriver::memory().await?;
//!     let source = DataSource::new(schema(), Arc::new(driver));
//!
//!     let posts = source
//!         .select("post")
//!         .from("Post", "post")
//!         .left_join_and_select("post.categories", "category")
//!         .r#where("category.name = :name")
//!         .set_parameter("name", "rust")
//!         .take(10)
//!         .get_many()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use tessera_query::*;

/// SQLite driver.
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite {
    pub use tessera_sqlite::*;
}
