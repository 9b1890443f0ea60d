//! Position density and flag uniqueness under real writes.

use atrium_db::Database;
use atrium_schema::{Definitions, MediaConfig, Migrator, Query, Registry, RequestValues, Schema};

const DEFS: &str = r#"{
    "page": {
        "table": "pages",
        "hasPosition": true,
        "canDelete": true,
        "fields": [
            {"key": "id", "type": "ID"},
            {"key": "title", "type": "String", "isName": true},
            {"key": "isFeatured", "type": "Boolean", "default": 0}
        ]
    }
}"#;

async fn schema() -> Schema {
    let db = Database::connect_memory().await.unwrap();
    let definitions = Definitions::from_json(DEFS).unwrap();
    let registry = Registry::new(db, &definitions, MediaConfig::default()).unwrap();
    Migrator::new(registry.database(), registry.structures())
        .apply()
        .await
        .unwrap();
    registry.schema("page").unwrap()
}

async fn positions(schema: &Schema) -> Vec<(String, i64)> {
    let mut query = Query::new();
    query.order_by("position", false);
    schema
        .get_all(Some(&query))
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.str("title").unwrap_or_default().to_string(), r.int("position").unwrap()))
        .collect()
}

#[tokio::test]
async fn creates_append_at_the_end() {
    let schema = schema().await;
    for title in ["A", "B", "C"] {
        schema
            .create(&RequestValues::new().with("title", title))
            .await
            .unwrap();
    }
    assert_eq!(
        positions(&schema).await,
        vec![("A".into(), 1), ("B".into(), 2), ("C".into(), 3)]
    );
}

#[tokio::test]
async fn moving_a_row_shifts_the_range_between() {
    let schema = schema().await;
    let mut ids = Vec::new();
    for title in ["A", "B", "C"] {
        ids.push(
            schema
                .create(&RequestValues::new().with("title", title))
                .await
                .unwrap(),
        );
    }

    // B moves to the front; A slides down, C is untouched.
    schema
        .edit(
            &Query::create("id", "=", ids[1]),
            &RequestValues::new().with("position", 1),
        )
        .await
        .unwrap();
    assert_eq!(
        positions(&schema).await,
        vec![("B".into(), 1), ("A".into(), 2), ("C".into(), 3)]
    );

    // Deleting A closes the gap.
    schema.delete(&Query::create("id", "=", ids[0])).await.unwrap();
    assert_eq!(
        positions(&schema).await,
        vec![("B".into(), 1), ("C".into(), 2)]
    );
}

#[tokio::test]
async fn explicit_position_on_create_inserts_into_the_slot() {
    let schema = schema().await;
    for title in ["A", "B", "C"] {
        schema
            .create(&RequestValues::new().with("title", title))
            .await
            .unwrap();
    }
    schema
        .create(&RequestValues::new().with("title", "D").with("position", 2))
        .await
        .unwrap();
    assert_eq!(
        positions(&schema).await,
        vec![("A".into(), 1), ("D".into(), 2), ("B".into(), 3), ("C".into(), 4)]
    );
}

#[tokio::test]
async fn out_of_range_position_clamps_to_the_end() {
    let schema = schema().await;
    let mut ids = Vec::new();
    for title in ["A", "B", "C"] {
        ids.push(
            schema
                .create(&RequestValues::new().with("title", title))
                .await
                .unwrap(),
        );
    }
    schema
        .edit(
            &Query::create("id", "=", ids[0]),
            &RequestValues::new().with("position", 99),
        )
        .await
        .unwrap();
    assert_eq!(
        positions(&schema).await,
        vec![("B".into(), 1), ("C".into(), 2), ("A".into(), 3)]
    );
}

#[tokio::test]
async fn unique_flag_moves_between_rows() {
    let schema = schema().await;
    let mut ids = Vec::new();
    for title in ["A", "B", "C"] {
        ids.push(
            schema
                .create(&RequestValues::new().with("title", title))
                .await
                .unwrap(),
        );
    }

    schema.ensure_unique("isFeatured", ids[1], true, None).await.unwrap();
    let featured: Vec<i64> = schema
        .get_all(Some(&Query::create("isFeatured", "=", 1)))
        .await
        .unwrap()
        .iter()
        .map(|r| r.id())
        .collect();
    assert_eq!(featured, vec![ids[1]]);

    // Enabling elsewhere clears the previous holder.
    schema.ensure_unique("isFeatured", ids[2], true, None).await.unwrap();
    let featured: Vec<i64> = schema
        .get_all(Some(&Query::create("isFeatured", "=", 1)))
        .await
        .unwrap()
        .iter()
        .map(|r| r.id())
        .collect();
    assert_eq!(featured, vec![ids[2]]);

    // Disabling the holder promotes the first row by natural order.
    schema.ensure_unique("isFeatured", ids[2], false, None).await.unwrap();
    let featured: Vec<i64> = schema
        .get_all(Some(&Query::create("isFeatured", "=", 1)))
        .await
        .unwrap()
        .iter()
        .map(|r| r.id())
        .collect();
    assert_eq!(featured, vec![ids[0]]);
}

#[tokio::test]
async fn disabling_with_no_candidates_leaves_zero_holders() {
    let schema = schema().await;
    let id = schema
        .create(&RequestValues::new().with("title", "Only"))
        .await
        .unwrap();
    schema.ensure_unique("isFeatured", id, true, None).await.unwrap();
    schema.ensure_unique("isFeatured", id, false, None).await.unwrap();

    let holders = schema
        .get_total(Some(&Query::create("isFeatured", "=", 1)))
        .await
        .unwrap();
    assert_eq!(holders, 0);
}
