//! SQLite driver for the Tessera query engine.
//!
//! Implements [`tessera_query::Driver`] over `tokio-rusqlite`, so query
//! builders can run against in-memory or file-based SQLite databases.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tessera_query::DataSource;
//! use tessera_sqlite::{SqliteConfig, SqliteDriver};
//!
//! let driver = SqliteDriver::open(SqliteConfig::from_url("sqlite://./blog.db")?).await?;
//! let source = DataSource::new(schema, Arc::new(driver));
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod types;

pub use config::{DatabasePath, JournalMode, SqliteConfig};
pub use driver::SqliteDriver;
pub use error::{SqliteError, SqliteResult};
