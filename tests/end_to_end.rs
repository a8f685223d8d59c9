//! End-to-end tests against SQLite.
//!
//! These tests verify:
//! - Many-to-many joins hydrate one parent with all children
//! - Relation ids and counts are side-loaded
//! - Relation mutations, updates and deletes reach the database

mod common;

use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::json;
use tessera::{ErrorCode, SortOrder, Value};

use common::{seed, setup};

#[derive(Debug, Deserialize, PartialEq)]
struct Category {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: i64,
    title: String,
    #[serde(default)]
    categories: Vec<Category>,
}

#[tokio::test]
async fn test_post_with_two_categories_hydrates_once() {
    let (source, driver) = setup().await;
    seed(
        &driver,
        "INSERT INTO posts (id, title) VALUES (1, 'Hello');
         INSERT INTO categories (id, name) VALUES (1, 'rust'), (2, 'databases');",
    )
    .await;
    source
        .relation("Post", "categories")
        .of([1])
        .add([1, 2])
        .await
        .unwrap();

    let query = source
        .select("post")
        .from("Post", "post")
        .left_join_and_select("post.categories", "category")
        .r#where("post.id = :id")
        .set_parameter("id", 1)
        .order_by("category.id", SortOrder::Asc);

    let raw = query.get_raw_many().await.unwrap();
    assert_eq!(raw.len(), 2);

    let posts: Vec<Post> = query.get_many_as().await.unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].id, 1);
    assert_eq!(posts[0].title, "Hello");
    assert_eq!(
        posts[0].categories,
        vec![
            Category {
                id: 1,
                name: "rust".into()
            },
            Category {
                id: 2,
                name: "databases".into()
            },
        ]
    );
}

#[tokio::test]
async fn test_join_sql_snapshot() {
    let (source, _driver) = setup().await;
    let sql = source
        .select("post")
        .from("Post", "post")
        .left_join_and_select("post.categories", "category")
        .r#where("post.id = :id")
        .get_query()
        .unwrap();
    insta::assert_snapshot!(sql, @r#"SELECT "post"."id" AS "post_id", "post"."title" AS "post_title", "post"."version" AS "post_version", "post"."updated_at" AS "post_updated_at", "post"."author_id" AS "post_author_id", "category"."id" AS "category_id", "category"."name" AS "category_name" FROM "posts" "post" LEFT JOIN "post_categories" "post_categories" ON "post_categories"."post_id" = "post"."id" LEFT JOIN "categories" "category" ON "category"."id" = "post_categories"."category_id" WHERE "post"."id" = :id"#);
}

/// Side-loaded ids in ascending order.
fn ids(value: &serde_json::Value) -> Vec<i64> {
    let mut ids: Vec<i64> = value
        .as_array()
        .map(|items| items.iter().filter_map(|v| v.as_i64()).collect())
        .unwrap_or_default();
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn test_relation_ids_and_counts_are_side_loaded() {
    let (source, driver) = setup().await;
    seed(
        &driver,
        "INSERT INTO posts (id, title) VALUES (1, 'a'), (2, 'b'), (3, 'c');
         INSERT INTO categories (id, name) VALUES (1, 'x'), (2, 'y');
         INSERT INTO post_categories (post_id, category_id) VALUES (1, 1), (1, 2), (2, 2);
         INSERT INTO comments (id, body, post_id) VALUES (1, 'first', 1), (2, 'second', 1), (3, 'third', 3);",
    )
    .await;

    let posts = source
        .select("post")
        .from("Post", "post")
        .load_relation_count_and_map("post.categoryCount", "post.categories")
        .load_relation_id_and_map("post.commentIds", "post.comments")
        .order_by("post.id", SortOrder::Asc)
        .get_many()
        .await
        .unwrap();

    let summary: Vec<_> = posts
        .iter()
        .map(|p| (p["id"].clone(), p["categoryCount"].clone(), ids(&p["commentIds"])))
        .collect();
    assert_eq!(
        summary,
        vec![
            (json!(1), json!(2), vec![1, 2]),
            (json!(2), json!(1), vec![]),
            (json!(3), json!(0), vec![3]),
        ]
    );

    let categories = source
        .select("category")
        .from("Category", "category")
        .load_relation_id_and_map("category.postIds", "category.posts")
        .order_by("category.id", SortOrder::Asc)
        .get_many()
        .await
        .unwrap();
    assert_eq!(ids(&categories[0]["postIds"]), vec![1]);
    assert_eq!(ids(&categories[1]["postIds"]), vec![1, 2]);
}

#[tokio::test]
async fn test_relation_mutations() {
    let (source, driver) = setup().await;
    seed(
        &driver,
        "INSERT INTO users (id, name) VALUES (1, 'ann'), (2, 'bob');
         INSERT INTO posts (id, title) VALUES (1, 'a'), (2, 'b');
         INSERT INTO categories (id, name) VALUES (1, 'x'), (2, 'y'), (3, 'z');",
    )
    .await;

    source.relation("Post", "author").of([1]).set(2).await.unwrap();
    source.relation("User", "posts").of([1]).add([2]).await.unwrap();
    source
        .relation("Category", "posts")
        .of([3])
        .add([1, 2])
        .await
        .unwrap();
    source
        .relation("Post", "categories")
        .of([2])
        .add_and_remove([1], [3])
        .await
        .unwrap();

    let rows = source
        .select("post.id")
        .add_select("post.author")
        .from("Post", "post")
        .order_by("post.id", SortOrder::Asc)
        .get_raw_many()
        .await
        .unwrap();
    let authors: Vec<_> = rows.iter().map(|r| r["post_author_id"].clone()).collect();
    assert_eq!(authors, vec![json!(2), json!(1)]);

    let links = source
        .select("pc.post_id")
        .add_select("pc.category_id")
        .from_table("post_categories", "pc")
        .order_by("pc.post_id", SortOrder::Asc)
        .add_order_by("pc.category_id", SortOrder::Asc)
        .get_raw_many()
        .await
        .unwrap();
    let pairs: Vec<_> = links
        .iter()
        .map(|r| (r["post_id"].clone(), r["category_id"].clone()))
        .collect();
    assert_eq!(pairs, vec![(json!(1), json!(3)), (json!(2), json!(1))]);
}

#[tokio::test]
async fn test_update_bumps_version_and_delete_removes_rows() {
    let (source, driver) = setup().await;
    seed(
        &driver,
        "INSERT INTO posts (id, title) VALUES (1, 'a');
         INSERT INTO comments (id, body, post_id) VALUES (1, 'spam', 1), (2, 'ham', 1);",
    )
    .await;

    let affected = source
        .update("Post")
        .set("title", "renamed")
        .where_in_ids([1])
        .execute()
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let post = source
        .select("post")
        .from("Post", "post")
        .get_one_or_fail()
        .await
        .unwrap();
    assert_eq!(post["title"], json!("renamed"));
    assert_eq!(post["version"], json!(2));
    assert!(post["updatedAt"].is_string());

    let deleted = source
        .delete_from("Comment")
        .r#where("Comment.body = :body")
        .set_parameter("body", Value::from("spam"))
        .execute()
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(source.select("c").from("Comment", "c").get_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_build_errors_never_reach_the_database() {
    let (source, _driver) = setup().await;
    let err = source
        .select("post")
        .from("Post", "post")
        .left_join_and_select("post.tags", "tag")
        .get_many()
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RelationNotFound);

    let err = source
        .select("post")
        .from("Post", "post")
        .left_join_and_select("missing.things", "thing")
        .get_many()
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::UnknownAlias);

    let err = source
        .select("post")
        .from("Post", "post")
        .r#where("post.id = :id")
        .get_many()
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingParameter);
}
