use std::sync::Arc;

use mnemo_store::{
    AgentStore, ColumnDef, ColumnType, StoreConfig, StoreError, TableSchema,
};
use mnemo_store_sqlite::SqliteBinding;
use serde_json::{json, Map, Value};

async fn store() -> AgentStore {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("sqlite in-memory pool should connect");
    let store = AgentStore::new(
        Arc::new(SqliteBinding::from_pool(pool)),
        StoreConfig::default(),
    );
    store.init().await.expect("store should initialize");
    store
}

fn record(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn test_schema() -> TableSchema {
    TableSchema::new(vec![
        ("id".into(), ColumnDef::new(ColumnType::Text).primary_key()),
        ("title".into(), ColumnDef::new(ColumnType::Text)),
        ("data".into(), ColumnDef::new(ColumnType::Text).nullable()),
        ("resource_id".into(), ColumnDef::new(ColumnType::Text)),
        (
            "created_at".into(),
            ColumnDef::new(ColumnType::Timestamp).nullable(),
        ),
    ])
}

#[tokio::test]
async fn create_table_then_insert_and_load() {
    let store = store().await;
    store
        .create_table("test_table", test_schema())
        .await
        .expect("table should create");

    store
        .insert(
            "test_table",
            &record(&[
                ("id", json!("test1")),
                ("title", json!("Test Thread")),
                ("data", json!("test-data")),
                ("resource_id", json!("resource-1")),
            ]),
        )
        .await
        .expect("insert should succeed");

    let loaded = store
        .load("test_table", &record(&[("id", json!("test1"))]))
        .await
        .expect("load should succeed")
        .expect("row should exist");
    assert_eq!(loaded["title"], json!("Test Thread"));
    assert_eq!(loaded["resource_id"], json!("resource-1"));
}

#[tokio::test]
async fn tables_are_independent() {
    let store = store().await;
    store
        .create_table("test_table", test_schema())
        .await
        .expect("first table should create");
    store
        .create_table(
            "test_table2",
            TableSchema::new(vec![
                ("id".into(), ColumnDef::new(ColumnType::Text).primary_key()),
                ("thread_id".into(), ColumnDef::new(ColumnType::Text)),
                ("data".into(), ColumnDef::new(ColumnType::Text).nullable()),
            ]),
        )
        .await
        .expect("second table should create");

    store
        .insert(
            "test_table2",
            &record(&[
                ("id", json!("test2")),
                ("thread_id", json!("thread-1")),
                ("data", json!("test-data-2")),
            ]),
        )
        .await
        .expect("insert should succeed");

    let loaded = store
        .load(
            "test_table2",
            &record(&[("id", json!("test2")), ("thread_id", json!("thread-1"))]),
        )
        .await
        .expect("load should succeed")
        .expect("row should exist");
    assert_eq!(loaded["data"], json!("test-data-2"));
}

#[tokio::test]
async fn create_table_is_idempotent() {
    let store = store().await;
    store
        .create_table("test_table", test_schema())
        .await
        .expect("first create should succeed");
    store
        .create_table("test_table", test_schema())
        .await
        .expect("re-invocation should be a no-op");
}

#[tokio::test]
async fn create_table_rejects_incompatible_primary_key() {
    let store = store().await;
    store
        .create_table("test_table", test_schema())
        .await
        .expect("table should create");

    let conflicting = TableSchema::new(vec![
        (
            "other_id".into(),
            ColumnDef::new(ColumnType::Text).primary_key(),
        ),
        ("data".into(), ColumnDef::new(ColumnType::Text).nullable()),
    ]);
    let err = store
        .create_table("test_table", conflicting)
        .await
        .expect_err("conflicting redefinition should fail");
    assert!(matches!(err, StoreError::Schema { .. }));
}

#[tokio::test]
async fn clear_table_removes_rows_and_keeps_schema() {
    let store = store().await;
    store
        .create_table("test_table", test_schema())
        .await
        .expect("table should create");
    store
        .insert(
            "test_table",
            &record(&[
                ("id", json!("test1")),
                ("title", json!("t")),
                ("data", json!("test-data")),
                ("resource_id", json!("r")),
            ]),
        )
        .await
        .expect("insert should succeed");

    store
        .clear_table("test_table")
        .await
        .expect("clear should succeed");

    let loaded = store
        .load("test_table", &record(&[("id", json!("test1"))]))
        .await
        .expect("load should succeed");
    assert!(loaded.is_none());

    // Schema survives the clear.
    store
        .insert(
            "test_table",
            &record(&[
                ("id", json!("test1")),
                ("title", json!("t")),
                ("resource_id", json!("r")),
            ]),
        )
        .await
        .expect("re-insert after clear should succeed");
}

#[tokio::test]
async fn clear_missing_table_is_an_error() {
    let store = store().await;
    let err = store
        .clear_table("no_such_table")
        .await
        .expect_err("clearing a missing table should fail");
    assert!(matches!(err, StoreError::TableNotFound { .. }));
}

#[tokio::test]
async fn drop_table_removes_everything() {
    let store = store().await;
    store
        .create_table("test_table", test_schema())
        .await
        .expect("table should create");
    store
        .drop_table("test_table")
        .await
        .expect("drop should succeed");

    assert!(!store
        .has_column("test_table", "id")
        .await
        .expect("probe should succeed"));
}

#[tokio::test]
async fn has_column_probes_live_schema() {
    let store = store().await;
    store
        .create_table("temp_test_table", test_schema())
        .await
        .expect("table should create");

    assert!(store
        .has_column("temp_test_table", "resource_id")
        .await
        .expect("probe should succeed"));
    assert!(!store
        .has_column("temp_test_table", "missing_column")
        .await
        .expect("probe should succeed"));
}

#[tokio::test]
async fn ensure_column_adds_nullable_column_once() {
    let store = store().await;
    store
        .create_table("test_table", test_schema())
        .await
        .expect("table should create");

    store
        .ensure_column("test_table", "extra", ColumnDef::new(ColumnType::Text))
        .await
        .expect("migration should succeed");
    assert!(store
        .has_column("test_table", "extra")
        .await
        .expect("probe should succeed"));

    // Re-running the migration is a no-op.
    store
        .ensure_column("test_table", "extra", ColumnDef::new(ColumnType::Text))
        .await
        .expect("repeat migration should be a no-op");
}

#[tokio::test]
async fn table_prefix_namespaces_all_tables() {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("sqlite in-memory pool should connect");
    let store = AgentStore::new(
        Arc::new(SqliteBinding::from_pool(pool)),
        StoreConfig::with_table_prefix("test_"),
    );
    store.init().await.expect("store should initialize");

    assert_eq!(store.table_name("threads"), "test_threads");
    assert!(store
        .has_column("threads", "resource_id")
        .await
        .expect("prefixed built-in table should exist"));
}

#[tokio::test]
async fn insert_rejects_duplicate_primary_key() {
    let store = store().await;
    store
        .create_table("test_table", test_schema())
        .await
        .expect("table should create");

    let row = record(&[
        ("id", json!("dup")),
        ("title", json!("t")),
        ("resource_id", json!("r")),
    ]);
    store
        .insert("test_table", &row)
        .await
        .expect("first insert should succeed");
    let err = store
        .insert("test_table", &row)
        .await
        .expect_err("duplicate primary key should fail");
    assert!(matches!(err, StoreError::Constraint { .. }));
}

#[tokio::test]
async fn insert_rejects_missing_non_nullable_column() {
    let store = store().await;
    store
        .create_table("test_table", test_schema())
        .await
        .expect("table should create");

    let err = store
        .insert("test_table", &record(&[("id", json!("x"))]))
        .await
        .expect_err("missing non-nullable column should fail");
    assert!(matches!(err, StoreError::Constraint { .. }));
}

#[tokio::test]
async fn batch_insert_is_all_or_nothing() {
    let store = store().await;
    store
        .create_table("test_table", test_schema())
        .await
        .expect("table should create");

    let good = record(&[
        ("id", json!("a")),
        ("title", json!("t")),
        ("resource_id", json!("r")),
    ]);
    let duplicate = record(&[
        ("id", json!("a")),
        ("title", json!("t2")),
        ("resource_id", json!("r")),
    ]);

    store
        .batch_insert("test_table", &[good.clone(), duplicate])
        .await
        .expect_err("duplicate key inside batch should fail the batch");

    let loaded = store
        .load("test_table", &record(&[("id", json!("a"))]))
        .await
        .expect("load should succeed");
    assert!(loaded.is_none(), "no row from the failed batch may remain");
}

#[tokio::test]
async fn upsert_with_only_key_columns_keeps_one_row() {
    let store = store().await;
    store
        .create_table(
            "key_only",
            TableSchema::new(vec![
                ("a".into(), ColumnDef::new(ColumnType::Text).primary_key()),
                ("b".into(), ColumnDef::new(ColumnType::Text).primary_key()),
            ]),
        )
        .await
        .expect("table should create");

    let row = record(&[("a", json!("x")), ("b", json!("y"))]);
    store
        .upsert("key_only", &row, &[])
        .await
        .expect("first upsert should succeed");
    store
        .upsert("key_only", &row, &[])
        .await
        .expect("conflicting upsert with nothing to update should succeed");

    let loaded = store
        .load("key_only", &row)
        .await
        .expect("load should succeed");
    assert!(loaded.is_some());
}

#[tokio::test]
async fn load_requires_key_columns() {
    let store = store().await;
    let err = store
        .load("threads", &Map::new())
        .await
        .expect_err("empty key set should be rejected");
    assert!(matches!(err, StoreError::InvalidRequest(_)));
}
