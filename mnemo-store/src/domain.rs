//! Domain records persisted by the store: conversation threads, messages,
//! execution traces, and workflow run snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::JsonOrRaw;

/// A conversation thread. Messages reference it by `thread_id`; deleting the
/// thread cascades to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub resource_id: String,
    pub title: Option<String>,
    /// Free-form metadata; absent metadata is normalized to an empty map on
    /// read, never `null`.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// One typed part of a rich (v2) message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ToolCall {
        tool_name: String,
        arguments: Value,
    },
    ToolResult {
        tool_name: String,
        output: Value,
    },
}

/// Rich message body: a format tag (always 2) plus typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentV2 {
    pub format: u8,
    pub parts: Vec<ContentPart>,
}

/// Message body in either of its two wire shapes. The legacy v1 shape is a
/// bare scalar (or whatever older writers produced); v2 is the rich
/// parts form. Untagged so stored JSON decodes to whichever shape it is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    V2(ContentV2),
    V1(Value),
}

/// Requested content shape for message reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageFormat {
    V1,
    #[default]
    V2,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::V2(ContentV2 {
            format: 2,
            parts: vec![ContentPart::Text { text: text.into() }],
        })
    }

    /// Converts to the requested shape. v2 → v1 flattens text parts to a
    /// scalar; v1 → v2 wraps the scalar in a single text part.
    pub fn into_format(self, format: MessageFormat) -> Self {
        match (format, self) {
            (MessageFormat::V1, MessageContent::V2(content)) => {
                let text: String = content
                    .parts
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                MessageContent::V1(Value::String(text))
            }
            (MessageFormat::V2, MessageContent::V1(value)) => {
                let text = match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                MessageContent::text(text)
            }
            (_, content) => content,
        }
    }
}

/// A message belonging to exactly one thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub role: MessageRole,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
}

/// An execution trace span. The JSON-bearing fields keep whatever older
/// writers stored, so each is independently [`JsonOrRaw`]. Start and end
/// times are nanosecond counts carried as text to preserve precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub id: String,
    pub parent_span_id: Option<String>,
    pub trace_id: String,
    pub name: String,
    pub scope: String,
    pub kind: i64,
    pub status: JsonOrRaw,
    pub events: JsonOrRaw,
    pub links: JsonOrRaw,
    pub attributes: JsonOrRaw,
    pub other: JsonOrRaw,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Workflow run state document: a `value` mapping, a numeric timestamp, and
/// whatever else the workflow engine put there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub value: Map<String, Value>,
    pub timestamp: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Read projection over one workflow snapshot row. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: String,
    pub workflow_name: String,
    pub resource_id: Option<String>,
    pub snapshot: JsonOrRaw<WorkflowState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
