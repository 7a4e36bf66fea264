//! Message repository: atomic batch saves with referential validation and
//! write-sequence assignment, and chronologically ordered reads.

use serde_json::{Map, Value};
use tracing::debug;

use crate::binding::SqlValue;
use crate::codec::{record_datetime, record_text};
use crate::domain::{Message, MessageContent, MessageFormat, MessageRole};
use crate::error::{Result, StoreError};
use crate::query::{Filter, OrderBy};
use crate::schema::{messages_schema, MESSAGES_TABLE, WRITE_SEQ_COLUMN};
use crate::store::AgentStore;

fn message_record(message: &Message) -> Result<Map<String, Value>> {
    let content_text = match &message.content {
        // Legacy scalar strings are stored bare, the way v1 writers wrote
        // them; everything else is JSON text.
        MessageContent::V1(Value::String(text)) => text.clone(),
        content => serde_json::to_string(content)?,
    };

    let mut record = Map::new();
    record.insert("id".to_string(), Value::String(message.id.clone()));
    record.insert(
        "thread_id".to_string(),
        Value::String(message.thread_id.clone()),
    );
    record.insert(
        "resource_id".to_string(),
        message
            .resource_id
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    record.insert("content".to_string(), Value::String(content_text));
    record.insert(
        "role".to_string(),
        Value::String(message.role.as_str().to_string()),
    );
    record.insert(
        "created_at".to_string(),
        Value::String(message.created_at.to_rfc3339()),
    );
    Ok(record)
}

fn message_from_record(record: &Map<String, Value>, format: MessageFormat) -> Result<Message> {
    let content_text = record_text(record, "content")?;
    let content = serde_json::from_str::<MessageContent>(content_text)
        .unwrap_or_else(|_| MessageContent::V1(Value::String(content_text.to_string())));

    let role_text = record_text(record, "role")?;
    let role = MessageRole::from_db(role_text).ok_or_else(|| {
        StoreError::InvalidRequest(format!("unknown message role: {role_text}"))
    })?;

    Ok(Message {
        id: record_text(record, "id")?.to_string(),
        thread_id: record_text(record, "thread_id")?.to_string(),
        resource_id: record
            .get("resource_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        role,
        content: content.into_format(format),
        created_at: record_datetime(record, "created_at")?,
    })
}

impl AgentStore {
    /// Saves a batch of messages atomically. Every message's `thread_id` must
    /// resolve to an existing thread and every id must be non-empty before
    /// any row is written; a failing row fails the whole batch.
    ///
    /// Write-sequence numbers are assigned per row in call order, inside the
    /// batch's transaction. Two concurrent calls are each atomic, but their
    /// relative order is whichever batch commits first; callers needing a
    /// cross-call order must serialize the calls themselves.
    pub async fn save_messages(
        &self,
        messages: &[Message],
        format: MessageFormat,
    ) -> Result<Vec<Message>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        for message in messages {
            if message.id.is_empty() {
                return Err(StoreError::Constraint {
                    table: MESSAGES_TABLE.to_string(),
                    reason: "message id must not be empty".to_string(),
                });
            }
        }

        let mut checked_threads: Vec<&str> = Vec::new();
        for message in messages {
            if checked_threads.contains(&message.thread_id.as_str()) {
                continue;
            }
            if self.get_thread_by_id(&message.thread_id).await?.is_none() {
                return Err(StoreError::Referential {
                    message_id: message.id.clone(),
                    thread_id: message.thread_id.clone(),
                });
            }
            checked_threads.push(&message.thread_id);
        }

        let schema = messages_schema();
        let statements = messages
            .iter()
            .map(|message| {
                let record = message_record(message)?;
                self.insert_statement(
                    MESSAGES_TABLE,
                    &schema,
                    &record,
                    Some(WRITE_SEQ_COLUMN),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(count = messages.len(), "saving message batch");
        self.run_batch("save_messages", MESSAGES_TABLE, statements)
            .await?;

        Ok(messages
            .iter()
            .map(|message| {
                let mut message = message.clone();
                message.content = message.content.into_format(format);
                message
            })
            .collect())
    }

    /// Messages for a thread in chronological order, with the write-sequence
    /// number breaking timestamp ties so insertion order is deterministic.
    pub async fn get_messages(
        &self,
        thread_id: &str,
        format: MessageFormat,
    ) -> Result<Vec<Message>> {
        let filters = [Filter::Eq(
            "thread_id".to_string(),
            SqlValue::Text(thread_id.to_string()),
        )];
        let order = OrderBy::asc("created_at").then_asc(WRITE_SEQ_COLUMN);
        let page = self
            .query(MESSAGES_TABLE, &filters, Some(order), None)
            .await?;
        page.items
            .iter()
            .map(|record| message_from_record(record, format))
            .collect()
    }
}
