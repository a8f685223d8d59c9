//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use tessera::sqlite::SqliteDriver;
use tessera::{ColumnMetadata, DataSource, EntityMetadata, JunctionMetadata, RelationMetadata, Schema};

const TABLES: &str = "
CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE posts (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT,
    author_id INTEGER REFERENCES users (id)
);
CREATE TABLE categories (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE post_categories (
    post_id INTEGER NOT NULL REFERENCES posts (id),
    category_id INTEGER NOT NULL REFERENCES categories (id),
    PRIMARY KEY (post_id, category_id)
);
CREATE TABLE comments (
    id INTEGER PRIMARY KEY,
    body TEXT NOT NULL,
    post_id INTEGER REFERENCES posts (id)
);
";

/// Users write posts; posts have categories and comments.
pub fn schema() -> Schema {
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
            EntityMetadata::new("Comment", "comments")
                .column(ColumnMetadata::primary("id"))
                .column(ColumnMetadata::new("body"))
                .relation(RelationMetadata::many_to_one("post", "Post").join_column("post_id", "id")),
        )
        .build()
        .expect("test schema is valid")
}

/// An in-memory database with empty tables.
pub async fn setup() -> (DataSource, SqliteDriver) {
    let driver = SqliteDriver::memory().await.expect("sqlite opens");
    driver.execute_batch(TABLES).await.expect("tables are created");
    let source = DataSource::new(schema(), Arc::new(driver.clone()));
    (source, driver)
}

/// Run a seeding script.
pub async fn seed(driver: &SqliteDriver, sql: &str) {
    driver.execute_batch(sql).await.expect("seed data is inserted");
}
