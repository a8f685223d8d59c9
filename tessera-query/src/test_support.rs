//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::dialect::Dialect;
use crate::driver::Driver;
use crate::error::{QueryError, QueryResult};
use crate::metadata::{
    ColumnMetadata, EntityMetadata, JunctionMetadata, RelationMetadata, Schema,
};
use crate::value::{Row, Value};

/// Users, posts, categories and comments.
pub(crate) fn blog_schema() -> Schema {
    Schema::builder()
        .entity(
            EntityMetadata::new("User", "users")
                .column(ColumnMetadata::primary("id"))
                .column(ColumnMetadata::new("name"))
                .relation(RelationMetadata::one_to_many("posts", "Post", "author")),
        )
        .entity(
            EntityMetadata::new("Post", "posts")
                .column(ColumnMetadata::primary("id"))
                .column(ColumnMetadata::new("title"))
                .column(ColumnMetadata::new("version").version())
                .column(ColumnMetadata::mapped("updatedAt", "updated_at").update_date())
                .relation(RelationMetadata::many_to_one("author", "User").join_column("author_id", "id"))
                .relation(
                    RelationMetadata::many_to_many("categories", "Category").junction(
                        JunctionMetadata::new("post_categories")
                            .owner_column("post_id", "id")
                            .inverse_column("category_id", "id"),
                    ),
                )
                .relation(RelationMetadata::one_to_many("comments", "Comment", "post")),
        )
        .entity(
            EntityMetadata::new("Category", "categories")
                .column(ColumnMetadata::primary("id"))
                .column(ColumnMetadata::new("name"))
                .relation(RelationMetadata::many_to_many("posts", "Post").inverse_of("categories")),
        )
        .entity(
            EntityMetadata::new("PostCategory", "post_categories")
                .column(ColumnMetadata::primary("post_id"))
                .column(ColumnMetadata::primary("category_id")),
        )
        .entity(
            EntityMetadata::new("Comment", "comments")
                .column(ColumnMetadata::primary("id"))
                .column(ColumnMetadata::new("body"))
                .relation(RelationMetadata::many_to_one("post", "Post").join_column("post_id", "id")),
        )
        .build()
        .expect("blog schema is valid")
}

/// Build a row from a JSON object literal.
pub(crate) fn row(value: JsonValue) -> Row {
    match value {
        JsonValue::Object(map) => map,
        other => panic!("row fixture must be an object, got {}", other),
    }
}

/// In-memory driver returning canned rows and recording every statement.
pub(crate) struct MockDriver {
    dialect: Dialect,
    responses: Mutex<Vec<(String, Vec<Row>)>>,
    failures: Mutex<Vec<String>>,
    transaction: AtomicBool,
    log: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MockDriver {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            responses: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            transaction: AtomicBool::new(false),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Answer statements containing `needle` with `rows`; first match wins.
    pub fn respond(self, needle: &str, rows: Vec<Row>) -> Self {
        self.responses.lock().push((needle.to_string(), rows));
        self
    }

    /// Fail statements containing `needle`.
    pub fn fail_on(self, needle: &str) -> Self {
        self.failures.lock().push(needle.to_string());
        self
    }

    pub fn in_transaction(self) -> Self {
        self.transaction.store(true, Ordering::SeqCst);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Statements sent so far.
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().iter().map(|(sql, _)| sql.clone()).collect()
    }

    /// Parameters of the n-th statement.
    pub fn params(&self, index: usize) -> Vec<Value> {
        self.log.lock()[index].1.clone()
    }

    fn record(&self, sql: &str, params: Vec<Value>) -> QueryResult<()> {
        self.log.lock().push((sql.to_string(), params));
        if self.failures.lock().iter().any(|needle| sql.contains(needle.as_str())) {
            return Err(QueryError::database("mock failure").with_sql(sql));
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn query(&self, sql: &str, params: Vec<Value>) -> QueryResult<Vec<Row>> {
        self.record(sql, params)?;
        Ok(self
            .responses
            .lock()
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn execute(&self, sql: &str, params: Vec<Value>) -> QueryResult<u64> {
        self.record(sql, params)?;
        Ok(1)
    }

    fn is_transaction_active(&self) -> bool {
        self.transaction.load(Ordering::SeqCst)
    }
}
