//! Joins, aggregate counts and subrequests across schemas.

use atrium_db::Database;
use atrium_schema::{Definitions, MediaConfig, Migrator, Query, Registry, RequestValues};

const DEFS: &str = r#"{
    "article": {
        "table": "articles",
        "canDelete": true,
        "fields": [
            {"key": "id", "type": "ID"},
            {"key": "title", "type": "String", "isName": true},
            {"key": "categoryId", "type": "Number", "isKey": true}
        ],
        "joins": [
            {
                "key": "category",
                "table": "categories",
                "leftKey": "id",
                "rightKey": "categoryId",
                "fields": [{"key": "name", "type": "String"}]
            }
        ],
        "counts": [
            {"key": "commentCount", "table": "comments", "column": "articleId"}
        ],
        "subrequests": [
            {"key": "comments", "schema": "comment", "column": "articleId", "orderBy": "body"}
        ]
    },
    "category": {
        "table": "categories",
        "fields": [
            {"key": "id", "type": "ID"},
            {"key": "name", "type": "String", "isName": true}
        ]
    },
    "comment": {
        "table": "comments",
        "fields": [
            {"key": "id", "type": "ID"},
            {"key": "articleId", "type": "Number", "isKey": true},
            {"key": "body", "type": "String"}
        ]
    }
}"#;

async fn registry() -> Registry {
    let db = Database::connect_memory().await.unwrap();
    let definitions = Definitions::from_json(DEFS).unwrap();
    let registry = Registry::new(db, &definitions, MediaConfig::default()).unwrap();
    Migrator::new(registry.database(), registry.structures())
        .apply()
        .await
        .unwrap();
    registry
}

#[tokio::test]
async fn joined_fields_carry_their_prefix() {
    let registry = registry().await;
    let categories = registry.schema("category").unwrap();
    let articles = registry.schema("article").unwrap();

    let news = categories
        .create(&RequestValues::new().with("name", "News"))
        .await
        .unwrap();
    articles
        .create(&RequestValues::new().with("title", "Launch").with("categoryId", news))
        .await
        .unwrap();

    let all = articles.get_all(None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].str("title"), Some("Launch"));
    assert_eq!(all[0].str("categoryName"), Some("News"));
}

#[tokio::test]
async fn missing_join_target_yields_empty_fields() {
    let registry = registry().await;
    let articles = registry.schema("article").unwrap();

    articles
        .create(&RequestValues::new().with("title", "Orphan").with("categoryId", 999))
        .await
        .unwrap();

    let all = articles.get_all(None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].str("categoryName").unwrap_or_default(), "");
}

#[tokio::test]
async fn counts_default_to_zero() {
    let registry = registry().await;
    let articles = registry.schema("article").unwrap();
    let comments = registry.schema("comment").unwrap();

    let quiet = articles
        .create(&RequestValues::new().with("title", "Quiet"))
        .await
        .unwrap();
    let busy = articles
        .create(&RequestValues::new().with("title", "Busy"))
        .await
        .unwrap();
    for n in 0..3 {
        comments
            .create(
                &RequestValues::new()
                    .with("articleId", busy)
                    .with("body", format!("comment {}", n)),
            )
            .await
            .unwrap();
    }

    let all = articles.get_all(None).await.unwrap();
    let by_id = |id: i64| all.iter().find(|r| r.id() == id).unwrap();
    assert_eq!(by_id(quiet).int("commentCount"), Some(0));
    assert_eq!(by_id(busy).int("commentCount"), Some(3));
}

#[tokio::test]
async fn subrequests_attach_children_in_declared_order() {
    let registry = registry().await;
    let articles = registry.schema("article").unwrap();
    let comments = registry.schema("comment").unwrap();

    let id = articles
        .create(&RequestValues::new().with("title", "Thread"))
        .await
        .unwrap();
    // Inserted out of order; the declared order column sorts them.
    for body in ["beta", "alpha"] {
        comments
            .create(&RequestValues::new().with("articleId", id).with("body", body))
            .await
            .unwrap();
    }

    let record = articles.get_by_id(id).await.unwrap();
    let children = record.get("comments").and_then(|v| v.as_array()).unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0]["body"], "alpha");
    assert_eq!(children[1]["body"], "beta");
}

#[tokio::test]
async fn joined_columns_filter_and_order() {
    let registry = registry().await;
    let categories = registry.schema("category").unwrap();
    let articles = registry.schema("article").unwrap();

    let news = categories
        .create(&RequestValues::new().with("name", "News"))
        .await
        .unwrap();
    let sport = categories
        .create(&RequestValues::new().with("name", "Sport"))
        .await
        .unwrap();
    articles
        .create(&RequestValues::new().with("title", "Match").with("categoryId", sport))
        .await
        .unwrap();
    articles
        .create(&RequestValues::new().with("title", "Launch").with("categoryId", news))
        .await
        .unwrap();

    let filtered = articles
        .get_all(Some(&Query::create("categoryName", "=", "Sport")))
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].str("title"), Some("Match"));

    let ordered = articles
        .get_all(Some(&Query::create_order_by("categoryName", false)))
        .await
        .unwrap();
    let names: Vec<&str> = ordered.iter().filter_map(|r| r.str("categoryName")).collect();
    assert_eq!(names, vec!["News", "Sport"]);
}
