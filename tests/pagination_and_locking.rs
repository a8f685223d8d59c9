//! Integration tests for paging over joins and for locking.

mod common;

use pretty_assertions::assert_eq;
use serde_json::json;
use tessera::{ErrorCode, LockMode, LockVersion, SortOrder, Value};

use common::{seed, setup};

const FAN_OUT: &str = "
INSERT INTO posts (id, title) VALUES (1, 'a'), (2, 'b'), (3, 'c'), (4, 'd');
INSERT INTO categories (id, name) VALUES (1, 'x'), (2, 'y'), (3, 'z');
INSERT INTO post_categories (post_id, category_id) VALUES
    (1, 1), (1, 2), (1, 3),
    (2, 1), (2, 2),
    (3, 3),
    (4, 1), (4, 2), (4, 3);
";

#[tokio::test]
async fn test_take_counts_entities_not_rows() {
    let (source, driver) = setup().await;
    seed(&driver, FAN_OUT).await;

    let page = source
        .select("post")
        .from("Post", "post")
        .left_join_and_select("post.categories", "category")
        .order_by("post.id", SortOrder::Desc)
        .skip(1)
        .take(2);

    let posts = page.get_many().await.unwrap();
    let ids: Vec<_> = posts.iter().map(|p| p["id"].clone()).collect();
    assert_eq!(ids, vec![json!(3), json!(2)]);
    assert_eq!(posts[0]["categories"].as_array().map(Vec::len), Some(1));
    assert_eq!(posts[1]["categories"].as_array().map(Vec::len), Some(2));

    let (posts, total) = page.get_many_and_count().await.unwrap();
    assert_eq!(posts.len(), 2);
    assert_eq!(total, 4);
}

#[tokio::test]
async fn test_page_past_the_end_is_empty() {
    let (source, driver) = setup().await;
    seed(&driver, FAN_OUT).await;

    let posts = source
        .select("post")
        .from("Post", "post")
        .left_join_and_select("post.categories", "category")
        .load_relation_count_and_map("post.categoryCount", "post.categories")
        .skip(10)
        .take(5)
        .get_many()
        .await
        .unwrap();
    assert!(posts.is_empty());
}

#[tokio::test]
async fn test_filtered_page_with_joined_condition() {
    let (source, driver) = setup().await;
    seed(&driver, FAN_OUT).await;

    let posts = source
        .select("post")
        .from("Post", "post")
        .inner_join_and_select("post.categories", "category")
        .r#where("category.name IN (:...names)")
        .set_parameter("names", Value::List(vec![Value::from("x"), Value::from("y")]))
        .order_by("post.id", SortOrder::Asc)
        .take(2)
        .get_many()
        .await
        .unwrap();
    let ids: Vec<_> = posts.iter().map(|p| p["id"].clone()).collect();
    assert_eq!(ids, vec![json!(1), json!(2)]);
    assert_eq!(posts[0]["categories"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_optimistic_lock_compares_versions() {
    let (source, driver) = setup().await;
    seed(&driver, "INSERT INTO posts (id, title, version) VALUES (1, 'a', 3);").await;

    let query = |version: i64| {
        source
            .select("post")
            .from("Post", "post")
            .r#where("post.id = :id")
            .set_parameter("id", 1)
            .set_lock(LockMode::Optimistic(LockVersion::from(version)))
    };

    let post = query(3).get_one().await.unwrap();
    assert_eq!(post.map(|p| p["title"].clone()), Some(json!("a")));

    let err = query(2).get_one().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::OptimisticLockVersionMismatch);
    let mismatch = err.version_mismatch_details().unwrap();
    assert_eq!(mismatch.expected, Value::Int(2));
    assert_eq!(mismatch.actual, Value::Int(3));

    let err = query(3).get_many().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::OptimisticLockCannotBeUsed);
}

#[tokio::test]
async fn test_pessimistic_locks_are_rejected_by_sqlite() {
    let (source, driver) = setup().await;
    driver.begin().await.unwrap();
    let err = source
        .select("post")
        .from("Post", "post")
        .set_lock(LockMode::PessimisticWrite)
        .get_many()
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::UnsupportedLockOnDialect);
    driver.rollback().await.unwrap();
}
