//! Thread repository: upsert-by-id saves, partial updates with shallow
//! metadata merging, and the explicit cascade delete over messages.

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::debug;

use crate::binding::{SqlStatement, SqlValue};
use crate::codec::{record_datetime, record_text, JsonOrRaw};
use crate::domain::Thread;
use crate::error::{Result, StoreError};
use crate::query::{Filter, OrderBy};
use crate::schema::{MESSAGES_TABLE, THREADS_TABLE};
use crate::store::AgentStore;

fn thread_record(thread: &Thread) -> Result<Map<String, Value>> {
    let mut record = Map::new();
    record.insert("id".to_string(), Value::String(thread.id.clone()));
    record.insert(
        "resource_id".to_string(),
        Value::String(thread.resource_id.clone()),
    );
    record.insert(
        "title".to_string(),
        thread
            .title
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    record.insert(
        "metadata".to_string(),
        Value::String(serde_json::to_string(&thread.metadata)?),
    );
    record.insert(
        "created_at".to_string(),
        Value::String(thread.created_at.to_rfc3339()),
    );
    record.insert(
        "updated_at".to_string(),
        Value::String(thread.updated_at.to_rfc3339()),
    );
    Ok(record)
}

fn thread_from_record(record: &Map<String, Value>) -> Result<Thread> {
    // Absent or undecodable metadata normalizes to an empty map, never null.
    let metadata = record
        .get("metadata")
        .and_then(Value::as_str)
        .map(JsonOrRaw::<Map<String, Value>>::parse)
        .and_then(|parsed| match parsed {
            JsonOrRaw::Decoded(map) => Some(map),
            JsonOrRaw::Raw(_) => None,
        })
        .unwrap_or_default();

    Ok(Thread {
        id: record_text(record, "id")?.to_string(),
        resource_id: record_text(record, "resource_id")?.to_string(),
        title: record
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string),
        metadata,
        created_at: record_datetime(record, "created_at")?,
        updated_at: record_datetime(record, "updated_at")?,
    })
}

impl AgentStore {
    /// Upserts the thread by id: insert if absent, full replace otherwise.
    pub async fn save_thread(&self, thread: &Thread) -> Result<Thread> {
        let record = thread_record(thread)?;
        self.upsert(THREADS_TABLE, &record, &[]).await?;
        Ok(thread.clone())
    }

    pub async fn get_thread_by_id(&self, thread_id: &str) -> Result<Option<Thread>> {
        let mut keys = Map::new();
        keys.insert("id".to_string(), Value::String(thread_id.to_string()));
        self.load(THREADS_TABLE, &keys)
            .await?
            .map(|record| thread_from_record(&record))
            .transpose()
    }

    /// All threads owned by `resource_id`, in creation order.
    pub async fn get_threads_by_resource_id(&self, resource_id: &str) -> Result<Vec<Thread>> {
        let filters = [Filter::Eq(
            "resource_id".to_string(),
            SqlValue::Text(resource_id.to_string()),
        )];
        let page = self
            .query(
                THREADS_TABLE,
                &filters,
                Some(OrderBy::asc("created_at")),
                None,
            )
            .await?;
        page.items
            .iter()
            .map(thread_from_record)
            .collect()
    }

    /// Applies a partial patch: the title is replaced when given, metadata is
    /// shallow-merged (new keys override, others are preserved), and
    /// `updated_at` is always refreshed.
    pub async fn update_thread(
        &self,
        thread_id: &str,
        title: Option<String>,
        metadata: Map<String, Value>,
    ) -> Result<Thread> {
        let mut thread = self
            .get_thread_by_id(thread_id)
            .await?
            .ok_or_else(|| StoreError::ThreadNotFound(thread_id.to_string()))?;

        if let Some(title) = title {
            thread.title = Some(title);
        }
        thread.metadata.extend(metadata);
        thread.updated_at = Utc::now();

        self.save_thread(&thread).await
    }

    /// Deletes the thread and every message referencing it, as one atomic
    /// batch. The cascade is enforced here; the tables carry no foreign-key
    /// constraint.
    pub async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        debug!(thread_id, "deleting thread and its messages");
        let messages = self.table_name(MESSAGES_TABLE);
        let threads = self.table_name(THREADS_TABLE);
        let statements = vec![
            SqlStatement::new(
                format!("DELETE FROM {messages} WHERE thread_id = ?"),
                vec![SqlValue::Text(thread_id.to_string())],
            ),
            SqlStatement::new(
                format!("DELETE FROM {threads} WHERE id = ?"),
                vec![SqlValue::Text(thread_id.to_string())],
            ),
        ];
        self.run_batch("delete_thread", THREADS_TABLE, statements)
            .await?;
        Ok(())
    }
}
