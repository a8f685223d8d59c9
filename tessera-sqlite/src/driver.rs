//! The SQLite driver.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rusqlite::params_from_iter;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use tessera_query::{Dialect, Driver, QueryResult, Row, Value};

use crate::config::{DatabasePath, SqliteConfig};
use crate::error::{SqliteError, SqliteResult};
use crate::types::{read_row, to_sqlite};

/// A [`Driver`] over one SQLite connection.
///
/// Statements run on the connection's background thread. Cloning shares the
/// connection and its transaction state.
#[derive(Clone)]
pub struct SqliteDriver {
    conn: Connection,
    in_transaction: Arc<AtomicBool>,
}

impl SqliteDriver {
    /// Open a connection and apply the configuration's pragmas.
    pub async fn open(config: SqliteConfig) -> SqliteResult<Self> {
        let conn = match &config.path {
            DatabasePath::Memory => Connection::open_in_memory().await?,
            DatabasePath::File(path) => Connection::open(path).await?,
        };
        let init = config.init_sql();
        conn.call(move |c| Ok(c.execute_batch(&init)?)).await?;
        info!(path = ?config.path, "sqlite connection opened");
        Ok(Self {
            conn,
            in_transaction: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Open an in-memory database.
    pub async fn memory() -> SqliteResult<Self> {
        Self::open(SqliteConfig::memory()).await
    }

    /// Run several statements without parameters, e.g. a schema script.
    pub async fn execute_batch(&self, sql: &str) -> SqliteResult<()> {
        let sql = sql.to_string();
        debug!(sql = %sql, "executing batch");
        self.conn.call(move |c| Ok(c.execute_batch(&sql)?)).await?;
        Ok(())
    }

    /// Start a transaction.
    pub async fn begin(&self) -> SqliteResult<()> {
        if self.in_transaction.load(Ordering::SeqCst) {
            return Err(SqliteError::transaction("a transaction is already open"));
        }
        self.execute_batch("BEGIN").await?;
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Commit the open transaction.
    pub async fn commit(&self) -> SqliteResult<()> {
        self.finish("COMMIT").await
    }

    /// Roll back the open transaction.
    pub async fn rollback(&self) -> SqliteResult<()> {
        self.finish("ROLLBACK").await
    }

    async fn finish(&self, statement: &str) -> SqliteResult<()> {
        if !self.in_transaction.load(Ordering::SeqCst) {
            return Err(SqliteError::transaction("no transaction is open"));
        }
        let result = self.execute_batch(statement).await;
        self.in_transaction.store(false, Ordering::SeqCst);
        result
    }
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("in_transaction", &self.in_transaction.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::sqlite()
    }

    async fn query(&self, sql: &str, params: Vec<Value>) -> QueryResult<Vec<Row>> {
        let sql = sql.to_string();
        let params: Vec<_> = params.iter().map(to_sqlite).collect();
        let rows = self
            .conn
            .call(move |c| {
                let mut stmt = c.prepare(&sql)?;
                let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
                let rows = stmt.query_map(params_from_iter(params.iter()), |row| Ok(read_row(row, &columns)))?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(rows)
    }

    async fn execute(&self, sql: &str, params: Vec<Value>) -> QueryResult<u64> {
        let sql = sql.to_string();
        let params: Vec<_> = params.iter().map(to_sqlite).collect();
        let affected = self
            .conn
            .call(move |c| Ok(c.execute(&sql, params_from_iter(params.iter()))?))
            .await
            .map_err(SqliteError::from)?;
        Ok(affected as u64)
    }

    fn is_transaction_active(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn driver() -> SqliteDriver {
        let driver = SqliteDriver::memory().await.unwrap();
        driver
            .execute_batch("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT, score REAL);")
            .await
            .unwrap();
        driver
    }

    #[tokio::test]
    async fn test_execute_and_query() {
        let driver = driver().await;
        let affected = driver
            .execute(
                "INSERT INTO notes (id, body, score) VALUES (?, ?, ?), (?, ?, ?)",
                vec![
                    Value::Int(1),
                    Value::from("first"),
                    Value::Float(1.5),
                    Value::Int(2),
                    Value::Null,
                    Value::Null,
                ],
            )
            .await
            .unwrap();
        assert_eq!(affected, 2);

        let rows = driver
            .query("SELECT id AS \"n_id\", body FROM notes WHERE id >= ? ORDER BY id", vec![Value::Int(1)])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["n_id"], json!(1));
        assert_eq!(rows[0]["body"], json!("first"));
        assert_eq!(rows[1]["body"], json!(null));
    }

    #[tokio::test]
    async fn test_transaction_state() {
        let driver = driver().await;
        assert!(!driver.is_transaction_active());
        driver.begin().await.unwrap();
        assert!(driver.is_transaction_active());
        assert!(driver.begin().await.is_err());
        driver
            .execute("INSERT INTO notes (id) VALUES (?)", vec![Value::Int(9)])
            .await
            .unwrap();
        driver.rollback().await.unwrap();
        assert!(!driver.is_transaction_active());

        let rows = driver.query("SELECT COUNT(*) AS cnt FROM notes", vec![]).await.unwrap();
        assert_eq!(rows[0]["cnt"], json!(0));
        assert!(driver.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_errors_map_to_query_errors() {
        let driver = driver().await;
        let err = driver.query("SELECT * FROM missing", vec![]).await.unwrap_err();
        assert_eq!(err.code, tessera_query::ErrorCode::DatabaseError);
    }
}
