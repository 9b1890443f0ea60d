//! End-to-end CRUD against an in-memory database.

use atrium_db::Database;
use atrium_schema::{Definitions, MediaConfig, Migrator, Query, Registry, RequestValues};

const DEFS: &str = r#"{
    "article": {
        "table": "articles",
        "hasStatus": true,
        "hasTimestamps": true,
        "canDelete": true,
        "fields": [
            {"key": "id", "type": "ID"},
            {"key": "title", "type": "String", "length": 120, "isName": true},
            {"key": "price", "type": "Price"},
            {"key": "views", "type": "Number", "default": 0}
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
async fn create_and_read_back() {
    let registry = registry().await;
    let schema = registry.schema("article").unwrap();

    let id = schema
        .create(
            &RequestValues::new()
                .with("title", "First")
                .with("price", "12.34")
                .with("views", "3"),
        )
        .await
        .unwrap();
    assert_eq!(id, 1);

    let record = schema.get_by_id(id).await.unwrap();
    assert_eq!(record.id(), 1);
    assert_eq!(record.str("title"), Some("First"));
    assert_eq!(record.float("price"), Some(12.34));
    assert_eq!(record.str("priceFormat"), Some("12,34"));
    assert_eq!(record.int("priceCents"), Some(1234));
    assert_eq!(record.int("views"), Some(3));
    assert!(record.bool("isActive"));
    assert_eq!(record.str("statusName"), Some("Active"));
    assert!(record.int("createdTime").unwrap_or(0) > 0);
}

#[tokio::test]
async fn edit_updates_matching_rows() {
    let registry = registry().await;
    let schema = registry.schema("article").unwrap();

    let id = schema
        .create(&RequestValues::new().with("title", "Draft"))
        .await
        .unwrap();
    let affected = schema
        .edit(
            &Query::create("id", "=", id),
            &RequestValues::new().with("title", "Published"),
        )
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let record = schema.get_by_id(id).await.unwrap();
    assert_eq!(record.str("title"), Some("Published"));
}

#[tokio::test]
async fn soft_delete_hides_rows_from_reads() {
    let registry = registry().await;
    let schema = registry.schema("article").unwrap();

    let keep = schema
        .create(&RequestValues::new().with("title", "Keep"))
        .await
        .unwrap();
    let gone = schema
        .create(&RequestValues::new().with("title", "Gone"))
        .await
        .unwrap();

    assert!(schema.delete(&Query::create("id", "=", gone)).await.unwrap());

    let all = schema.get_all(None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id(), keep);
    assert!(schema.get_by_id(gone).await.unwrap().is_empty());
    assert_eq!(schema.get_total(None).await.unwrap(), 1);

    // The row survives physically and shows up when deleted rows are included.
    let everything = schema.get_all_filtered(None, false).await.unwrap();
    assert_eq!(everything.len(), 2);
    let deleted = everything.iter().find(|r| r.id() == gone).unwrap();
    assert_eq!(deleted.int("isDeleted"), Some(1));

    // Deleting an already-deleted row is a no-op.
    assert!(!schema.delete(&Query::create("id", "=", gone)).await.unwrap());
}

#[tokio::test]
async fn remove_deletes_physically() {
    let registry = registry().await;
    let schema = registry.schema("article").unwrap();

    let id = schema
        .create(&RequestValues::new().with("title", "Temp"))
        .await
        .unwrap();
    assert_eq!(schema.remove(&Query::create("id", "=", id)).await.unwrap(), 1);
    let everything = schema.get_all_filtered(None, false).await.unwrap();
    assert!(everything.is_empty());
}

#[tokio::test]
async fn aggregates_and_column_reads() {
    let registry = registry().await;
    let schema = registry.schema("article").unwrap();

    for (title, views) in [("A", 10), ("B", 20), ("C", 5)] {
        schema
            .create(&RequestValues::new().with("title", title).with("views", views))
            .await
            .unwrap();
    }

    assert_eq!(schema.get_total(None).await.unwrap(), 3);
    assert_eq!(schema.get_sum("views", None).await.unwrap(), 35);

    let busy = schema
        .get_total(Some(&Query::create("views", ">=", 10)))
        .await
        .unwrap();
    assert_eq!(busy, 2);

    let titles = schema.get_column("title", None).await.unwrap();
    assert_eq!(titles.len(), 3);
}

#[tokio::test]
async fn select_pairs_ordered_by_name() {
    let registry = registry().await;
    let schema = registry.schema("article").unwrap();

    for title in ["Zebra", "Apple", "Mango"] {
        schema
            .create(&RequestValues::new().with("title", title))
            .await
            .unwrap();
    }

    let options = schema.get_select(None).await.unwrap();
    let names: Vec<&str> = options.iter().filter_map(|r| r.str("name")).collect();
    assert_eq!(names, vec!["Apple", "Mango", "Zebra"]);
    assert!(options.iter().all(|r| r.id() > 0));
}

#[tokio::test]
async fn search_matches_name_fields_case_insensitively() {
    let registry = registry().await;
    let schema = registry.schema("article").unwrap();

    schema
        .create(&RequestValues::new().with("title", "Rust in Production"))
        .await
        .unwrap();
    schema
        .create(&RequestValues::new().with("title", "Cooking Basics"))
        .await
        .unwrap();

    let hits = schema.get_search("RUST", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].str("title"), Some("Rust in Production"));

    let none = schema.get_search("quantum", 10).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn map_keyed_by_field() {
    let registry = registry().await;
    let schema = registry.schema("article").unwrap();

    schema
        .create(&RequestValues::new().with("title", "Alpha"))
        .await
        .unwrap();
    schema
        .create(&RequestValues::new().with("title", "Beta"))
        .await
        .unwrap();

    let map = schema.get_map(None, Some("title")).await.unwrap();
    assert_eq!(map.len(), 2);
    assert!(map.contains_key("Alpha"));
    assert_eq!(map["Beta"].str("title"), Some("Beta"));
}

#[tokio::test]
async fn batch_inserts_many_rows() {
    let registry = registry().await;
    let schema = registry.schema("article").unwrap();

    let requests: Vec<RequestValues> = (0..50)
        .map(|n| RequestValues::new().with("title", format!("Row {}", n)))
        .collect();
    let inserted = schema.batch(&requests).await.unwrap();
    assert_eq!(inserted, 50);
    assert_eq!(schema.get_total(None).await.unwrap(), 50);
}

#[tokio::test]
async fn actor_recorded_on_writes() {
    let db = Database::connect_memory().await.unwrap();
    let defs = r#"{
        "note": {
            "table": "notes",
            "hasUsers": true,
            "fields": [
                {"key": "id", "type": "ID"},
                {"key": "body", "type": "String"}
            ]
        }
    }"#;
    let definitions = Definitions::from_json(defs).unwrap();
    let registry = Registry::new(db, &definitions, MediaConfig::default()).unwrap();
    Migrator::new(registry.database(), registry.structures())
        .apply()
        .await
        .unwrap();

    let schema = registry.schema("note").unwrap().with_actor(42);
    let id = schema
        .create(&RequestValues::new().with("body", "hello"))
        .await
        .unwrap();
    let record = schema.get_by_id(id).await.unwrap();
    assert_eq!(record.int("createdUser"), Some(42));
}
