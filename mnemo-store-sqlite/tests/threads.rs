use std::sync::Arc;

use chrono::Utc;
use mnemo_store::{
    AgentStore, Message, MessageContent, MessageFormat, MessageRole, StoreConfig, StoreError,
    Thread,
};
use mnemo_store_sqlite::SqliteBinding;
use serde_json::{json, Map, Value};
use uuid::Uuid;

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

fn sample_thread() -> Thread {
    let now = Utc::now();
    let mut metadata = Map::new();
    metadata.insert("key".to_string(), json!("value"));
    Thread {
        id: Uuid::new_v4().to_string(),
        resource_id: Uuid::new_v4().to_string(),
        title: Some("Test Thread".to_string()),
        metadata,
        created_at: now,
        updated_at: now,
    }
}

fn sample_message(thread_id: &str) -> Message {
    Message {
        id: Uuid::new_v4().to_string(),
        thread_id: thread_id.to_string(),
        resource_id: Some("resource-1".to_string()),
        role: MessageRole::User,
        content: MessageContent::text("hello"),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn save_and_retrieve_thread() {
    let store = store().await;
    let thread = sample_thread();

    let saved = store
        .save_thread(&thread)
        .await
        .expect("save should succeed");
    assert_eq!(saved, thread);

    let retrieved = store
        .get_thread_by_id(&thread.id)
        .await
        .expect("lookup should succeed")
        .expect("thread should exist");
    assert_eq!(retrieved, thread);
}

#[tokio::test]
async fn missing_thread_returns_none() {
    let store = store().await;
    let result = store
        .get_thread_by_id("non-existent")
        .await
        .expect("lookup should succeed");
    assert!(result.is_none());
}

#[tokio::test]
async fn big_number_identifiers_survive_round_trip() {
    let store = store().await;
    let mut thread = sample_thread();
    thread.id = "1346362547862769664".to_string();
    thread.resource_id = "532374164040974346".to_string();

    store
        .save_thread(&thread)
        .await
        .expect("save should succeed");
    let retrieved = store
        .get_thread_by_id("1346362547862769664")
        .await
        .expect("lookup should succeed")
        .expect("thread should exist");
    assert_eq!(retrieved.id, "1346362547862769664");
    assert_eq!(retrieved.resource_id, "532374164040974346");
    assert_eq!(retrieved.created_at, thread.created_at);
    assert_eq!(retrieved.updated_at, thread.updated_at);
}

#[tokio::test]
async fn threads_list_by_resource_id() {
    let store = store().await;
    let thread1 = sample_thread();
    let thread2 = Thread {
        resource_id: thread1.resource_id.clone(),
        ..sample_thread()
    };

    store
        .save_thread(&thread1)
        .await
        .expect("first save should succeed");
    store
        .save_thread(&thread2)
        .await
        .expect("second save should succeed");

    let threads = store
        .get_threads_by_resource_id(&thread1.resource_id)
        .await
        .expect("listing should succeed");
    assert_eq!(threads.len(), 2);
    let ids: Vec<&str> = threads.iter().map(|thread| thread.id.as_str()).collect();
    assert!(ids.contains(&thread1.id.as_str()));
    assert!(ids.contains(&thread2.id.as_str()));
}

#[tokio::test]
async fn save_thread_replaces_existing_row() {
    let store = store().await;
    let mut thread = sample_thread();
    store
        .save_thread(&thread)
        .await
        .expect("save should succeed");

    thread.title = Some("Replaced".to_string());
    store
        .save_thread(&thread)
        .await
        .expect("second save should succeed");

    let threads = store
        .get_threads_by_resource_id(&thread.resource_id)
        .await
        .expect("listing should succeed");
    assert_eq!(threads.len(), 1, "upsert must not create a second row");
    assert_eq!(threads[0].title.as_deref(), Some("Replaced"));
}

#[tokio::test]
async fn update_thread_merges_metadata_shallowly() {
    let store = store().await;
    let thread = sample_thread();
    store
        .save_thread(&thread)
        .await
        .expect("save should succeed");

    let mut patch = Map::new();
    patch.insert("newKey".to_string(), json!("newValue"));
    let updated = store
        .update_thread(&thread.id, Some("Updated Title".to_string()), patch)
        .await
        .expect("update should succeed");

    assert_eq!(updated.title.as_deref(), Some("Updated Title"));
    assert_eq!(updated.metadata["key"], json!("value"));
    assert_eq!(updated.metadata["newKey"], json!("newValue"));
    assert!(updated.updated_at >= thread.updated_at);

    let retrieved = store
        .get_thread_by_id(&thread.id)
        .await
        .expect("lookup should succeed")
        .expect("thread should exist");
    assert_eq!(retrieved.metadata["newKey"], json!("newValue"));
}

#[tokio::test]
async fn update_missing_thread_fails() {
    let store = store().await;
    let err = store
        .update_thread("non-existent", None, Map::new())
        .await
        .expect_err("updating a missing thread should fail");
    assert!(matches!(err, StoreError::ThreadNotFound(_)));
}

#[tokio::test]
async fn delete_thread_cascades_to_messages() {
    let store = store().await;
    let thread = sample_thread();
    store
        .save_thread(&thread)
        .await
        .expect("save should succeed");
    store
        .save_messages(
            &[sample_message(&thread.id), sample_message(&thread.id)],
            MessageFormat::V2,
        )
        .await
        .expect("messages should save");

    store
        .delete_thread(&thread.id)
        .await
        .expect("delete should succeed");

    assert!(store
        .get_thread_by_id(&thread.id)
        .await
        .expect("lookup should succeed")
        .is_none());
    assert!(store
        .get_threads_by_resource_id(&thread.resource_id)
        .await
        .expect("listing should succeed")
        .is_empty());
    assert!(store
        .get_messages(&thread.id, MessageFormat::V2)
        .await
        .expect("message read should succeed")
        .is_empty());
}

#[tokio::test]
async fn absent_metadata_normalizes_to_empty_map() {
    let store = store().await;
    let thread = Thread {
        metadata: Map::new(),
        ..sample_thread()
    };
    store
        .save_thread(&thread)
        .await
        .expect("save should succeed");

    let threads = store
        .get_threads_by_resource_id(&thread.resource_id)
        .await
        .expect("listing should succeed");
    assert_eq!(threads.len(), 1);
    assert!(threads[0].metadata.is_empty());
}

#[tokio::test]
async fn special_characters_round_trip() {
    let store = store().await;
    let thread = Thread {
        title: Some("Special 'quotes' and \"double quotes\" and emoji 🎉".to_string()),
        ..sample_thread()
    };
    store
        .save_thread(&thread)
        .await
        .expect("save should succeed");

    let retrieved = store
        .get_thread_by_id(&thread.id)
        .await
        .expect("lookup should succeed")
        .expect("thread should exist");
    assert_eq!(retrieved.title, thread.title);
}

#[tokio::test]
async fn large_metadata_round_trips() {
    let store = store().await;
    let mut thread = sample_thread();
    let large: Vec<Value> = (0..1000)
        .map(|index| json!({"index": index, "data": "test".repeat(100)}))
        .collect();
    thread
        .metadata
        .insert("largeArray".to_string(), Value::Array(large));

    store
        .save_thread(&thread)
        .await
        .expect("save should succeed");
    let retrieved = store
        .get_thread_by_id(&thread.id)
        .await
        .expect("lookup should succeed")
        .expect("thread should exist");
    assert_eq!(retrieved.metadata, thread.metadata);
}

#[tokio::test]
async fn concurrent_thread_saves_all_land() {
    let store = Arc::new(store().await);
    let threads: Vec<Thread> = (0..10).map(|_| sample_thread()).collect();

    let mut handles = Vec::new();
    for thread in &threads {
        let store = Arc::clone(&store);
        let thread = thread.clone();
        handles.push(tokio::spawn(async move { store.save_thread(&thread).await }));
    }
    for handle in handles {
        handle
            .await
            .expect("task should not panic")
            .expect("save should succeed");
    }

    for thread in &threads {
        let retrieved = store
            .get_thread_by_id(&thread.id)
            .await
            .expect("lookup should succeed")
            .expect("thread should exist");
        assert_eq!(retrieved.id, thread.id);
    }
}
