//! Record codec: lowering between JSON-shaped records and the flat
//! [`SqlValue`] rows the binding understands, plus the fail-safe JSON field
//! decoding used by the domain repositories.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::binding::{SqlRow, SqlValue};
use crate::error::{Result, StoreError};
use crate::schema::{ColumnType, TableSchema};

/// A JSON-text field read back from storage: either the decoded value, or the
/// original text when decoding fails. Fields like trace `status` may have
/// been written as plain strings by a different writer version, so decode
/// failures degrade instead of erroring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonOrRaw<T = Value> {
    Decoded(T),
    Raw(String),
}

impl<T: DeserializeOwned> JsonOrRaw<T> {
    /// Decodes `text` as JSON, collapsing to `Raw` on failure.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str(text) {
            Ok(value) => JsonOrRaw::Decoded(value),
            Err(_) => JsonOrRaw::Raw(text.to_string()),
        }
    }
}

impl<T: Serialize> JsonOrRaw<T> {
    /// Text representation as stored: decoded values re-serialize to JSON,
    /// raw text round-trips unchanged.
    pub fn to_text(&self) -> Result<String> {
        match self {
            JsonOrRaw::Decoded(value) => Ok(serde_json::to_string(value)?),
            JsonOrRaw::Raw(text) => Ok(text.clone()),
        }
    }
}

impl<T> JsonOrRaw<T> {
    pub fn decoded(&self) -> Option<&T> {
        match self {
            JsonOrRaw::Decoded(value) => Some(value),
            JsonOrRaw::Raw(_) => None,
        }
    }
}

impl<T> From<T> for JsonOrRaw<T> {
    fn from(value: T) -> Self {
        JsonOrRaw::Decoded(value)
    }
}

/// Parses a stored timestamp, accepting RFC 3339 or the space-separated
/// SQL form some backends emit.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Normalizes a caller-supplied timestamp value (RFC 3339 text or epoch
/// milliseconds) to a `DateTime<Utc>`.
pub fn timestamp_from_value(value: &Value) -> Result<DateTime<Utc>> {
    match value {
        Value::String(text) => parse_timestamp(text)
            .ok_or_else(|| StoreError::InvalidRequest(format!("invalid timestamp: {text}"))),
        Value::Number(number) => number
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| StoreError::InvalidRequest(format!("invalid timestamp: {number}"))),
        other => Err(StoreError::InvalidRequest(format!(
            "invalid timestamp value: {other}"
        ))),
    }
}

/// Lowers one record field to its storage representation for `column_type`.
pub fn encode_value(column_type: ColumnType, value: &Value) -> Result<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    let encoded = match column_type {
        ColumnType::Timestamp => SqlValue::Text(timestamp_from_value(value)?.to_rfc3339()),
        // Big numbers stay textual so they never round through f64.
        ColumnType::BigNumber => match value {
            Value::String(text) => SqlValue::Text(text.clone()),
            Value::Number(number) => SqlValue::Text(number.to_string()),
            other => {
                return Err(StoreError::InvalidRequest(format!(
                    "invalid big-number value: {other}"
                )))
            }
        },
        ColumnType::Boolean => match value {
            Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
            Value::Number(number) if number.is_i64() => {
                SqlValue::Integer(number.as_i64().unwrap_or_default())
            }
            other => {
                return Err(StoreError::InvalidRequest(format!(
                    "invalid boolean value: {other}"
                )))
            }
        },
        ColumnType::Integer => match value.as_i64() {
            Some(int) => SqlValue::Integer(int),
            None => {
                return Err(StoreError::InvalidRequest(format!(
                    "invalid integer value: {value}"
                )))
            }
        },
        ColumnType::Float => match value.as_f64() {
            Some(real) => SqlValue::Real(real),
            None => {
                return Err(StoreError::InvalidRequest(format!(
                    "invalid float value: {value}"
                )))
            }
        },
        ColumnType::Text => match value {
            Value::String(text) => SqlValue::Text(text.clone()),
            // Composite fields land here: serialize to JSON text.
            composite => SqlValue::Text(serde_json::to_string(composite)?),
        },
    };
    Ok(encoded)
}

/// Lifts a storage value back to its record representation. JSON-text columns
/// come back as plain strings here; their structured decoding (and the
/// raw-string fallback) is the repositories' concern via [`JsonOrRaw`].
pub fn decode_value(column_type: ColumnType, value: &SqlValue) -> Value {
    match (column_type, value) {
        (_, SqlValue::Null) => Value::Null,
        (ColumnType::Boolean, SqlValue::Integer(int)) => Value::Bool(*int != 0),
        (ColumnType::Timestamp, SqlValue::Text(text)) => match parse_timestamp(text) {
            Some(ts) => Value::String(ts.to_rfc3339()),
            None => Value::String(text.clone()),
        },
        (_, SqlValue::Integer(int)) => Value::Number((*int).into()),
        (_, SqlValue::Real(real)) => serde_json::Number::from_f64(*real)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        (_, SqlValue::Text(text)) => Value::String(text.clone()),
    }
}

/// Validates `record` against `schema` and lowers it to column/value pairs in
/// schema order. Missing nullable columns are skipped; a missing or null
/// non-nullable column is a constraint failure.
pub fn encode_record(
    table: &str,
    schema: &TableSchema,
    record: &Map<String, Value>,
    skip: &[&str],
) -> Result<Vec<(String, SqlValue)>> {
    let mut columns = Vec::new();
    for (name, def) in schema.columns() {
        if skip.contains(&name) {
            continue;
        }
        let value = record.get(name).unwrap_or(&Value::Null);
        if value.is_null() {
            if !def.nullable && !def.primary_key {
                return Err(StoreError::Constraint {
                    table: table.to_string(),
                    reason: format!("column '{name}' is not nullable"),
                });
            }
            if def.primary_key {
                return Err(StoreError::Constraint {
                    table: table.to_string(),
                    reason: format!("primary key column '{name}' is missing"),
                });
            }
            columns.push((name.to_string(), SqlValue::Null));
            continue;
        }
        columns.push((name.to_string(), encode_value(def.column_type, value)?));
    }
    Ok(columns)
}

/// Required text field of a decoded record.
pub(crate) fn record_text<'a>(record: &'a Map<String, Value>, column: &str) -> Result<&'a str> {
    record
        .get(column)
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::InvalidRequest(format!("missing column '{column}'")))
}

/// Required timestamp field of a decoded record.
pub(crate) fn record_datetime(
    record: &Map<String, Value>,
    column: &str,
) -> Result<DateTime<Utc>> {
    let text = record_text(record, column)?;
    parse_timestamp(text)
        .ok_or_else(|| StoreError::InvalidRequest(format!("invalid timestamp in '{column}'")))
}

/// Lifts a binding row to a record, driven by the schema's column types.
/// Columns the schema does not know about are carried through as-is.
pub fn decode_row(schema: &TableSchema, row: &SqlRow) -> Map<String, Value> {
    let mut record = Map::new();
    for (name, value) in row {
        let column_type = schema
            .column(name)
            .map(|def| def.column_type)
            .unwrap_or(ColumnType::Text);
        record.insert(name.clone(), decode_value(column_type, value));
    }
    record
}
