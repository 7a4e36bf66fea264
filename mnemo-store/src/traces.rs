//! Trace repository: single and batch inserts, plus name/scope/attribute
//! filtered queries. JSON-bearing fields degrade to raw text on read instead
//! of failing, since traces may come from writers with different schemas.

use serde_json::{Map, Value};

use crate::binding::SqlValue;
use crate::codec::{record_datetime, record_text, JsonOrRaw};
use crate::domain::Trace;
use crate::error::Result;
use crate::query::{Filter, Page, Pagination};
use crate::schema::TRACES_TABLE;
use crate::store::AgentStore;

/// Filter arguments for [`AgentStore::get_traces`].
#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    /// Name prefix match.
    pub name: Option<String>,
    /// Exact scope match.
    pub scope: Option<String>,
    /// Pairs the decoded attributes object must contain.
    pub attributes: Option<Map<String, Value>>,
    pub pagination: Option<Pagination>,
}

fn json_field(record: &Map<String, Value>, column: &str) -> JsonOrRaw {
    match record.get(column) {
        Some(Value::String(text)) => JsonOrRaw::parse(text),
        _ => JsonOrRaw::Decoded(Value::Null),
    }
}

fn trace_record(trace: &Trace) -> Result<Map<String, Value>> {
    let mut record = Map::new();
    record.insert("id".to_string(), Value::String(trace.id.clone()));
    record.insert(
        "parent_span_id".to_string(),
        trace
            .parent_span_id
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    record.insert(
        "trace_id".to_string(),
        Value::String(trace.trace_id.clone()),
    );
    record.insert("name".to_string(), Value::String(trace.name.clone()));
    record.insert("scope".to_string(), Value::String(trace.scope.clone()));
    record.insert("kind".to_string(), Value::Number(trace.kind.into()));
    for (column, field) in [
        ("status", &trace.status),
        ("events", &trace.events),
        ("links", &trace.links),
        ("attributes", &trace.attributes),
        ("other", &trace.other),
    ] {
        record.insert(column.to_string(), Value::String(field.to_text()?));
    }
    record.insert(
        "start_time".to_string(),
        trace
            .start_time
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    record.insert(
        "end_time".to_string(),
        trace
            .end_time
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    record.insert(
        "created_at".to_string(),
        Value::String(trace.created_at.to_rfc3339()),
    );
    Ok(record)
}

fn trace_from_record(record: &Map<String, Value>) -> Result<Trace> {
    // Absent attributes normalize to an empty mapping on read.
    let attributes = match record.get("attributes") {
        Some(Value::String(text)) => JsonOrRaw::parse(text),
        _ => JsonOrRaw::Decoded(Value::Object(Map::new())),
    };

    Ok(Trace {
        id: record_text(record, "id")?.to_string(),
        parent_span_id: record
            .get("parent_span_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        trace_id: record_text(record, "trace_id")?.to_string(),
        name: record_text(record, "name")?.to_string(),
        scope: record_text(record, "scope")?.to_string(),
        kind: record.get("kind").and_then(Value::as_i64).unwrap_or(0),
        status: json_field(record, "status"),
        events: json_field(record, "events"),
        links: json_field(record, "links"),
        attributes,
        other: json_field(record, "other"),
        start_time: record
            .get("start_time")
            .and_then(Value::as_str)
            .map(str::to_string),
        end_time: record
            .get("end_time")
            .and_then(Value::as_str)
            .map(str::to_string),
        created_at: record_datetime(record, "created_at")?,
    })
}

impl AgentStore {
    pub async fn insert_trace(&self, trace: &Trace) -> Result<()> {
        let record = trace_record(trace)?;
        self.insert(TRACES_TABLE, &record).await
    }

    /// Inserts a batch of traces atomically.
    pub async fn insert_traces(&self, traces: &[Trace]) -> Result<()> {
        let records = traces
            .iter()
            .map(trace_record)
            .collect::<Result<Vec<_>>>()?;
        self.batch_insert(TRACES_TABLE, &records).await
    }

    /// Traces matching the filter, newest first, with the total count across
    /// all pages.
    pub async fn get_traces(&self, filter: TraceFilter) -> Result<Page<Trace>> {
        let mut filters = Vec::new();
        if let Some(name) = filter.name {
            filters.push(Filter::Prefix("name".to_string(), name));
        }
        if let Some(scope) = filter.scope {
            filters.push(Filter::Eq("scope".to_string(), SqlValue::Text(scope)));
        }
        if let Some(attributes) = filter.attributes {
            filters.push(Filter::AttrContains("attributes".to_string(), attributes));
        }

        let page = self
            .query(TRACES_TABLE, &filters, None, filter.pagination)
            .await?;
        let total = page.total;
        let items = page
            .items
            .iter()
            .map(trace_from_record)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page { items, total })
    }
}
