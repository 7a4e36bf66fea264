//! Table schemas: the closed column-type vocabulary, DDL rendering, and the
//! built-in tables the store creates at initialization.

use serde::{Deserialize, Serialize};

pub const THREADS_TABLE: &str = "threads";
pub const MESSAGES_TABLE: &str = "messages";
pub const TRACES_TABLE: &str = "traces";
pub const WORKFLOW_SNAPSHOT_TABLE: &str = "workflow_snapshot";

/// Name of the write-sequence column on the messages table. Assigned by the
/// engine inside the insert batch, never supplied by callers.
pub const WRITE_SEQ_COLUMN: &str = "seq";

/// Semantic column types. `BigNumber` values are text end-to-end so large
/// numeric identifiers never pass through binary floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    BigNumber,
}

impl ColumnType {
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Text | ColumnType::Timestamp | ColumnType::BigNumber => "TEXT",
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Float => "REAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub column_type: ColumnType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            nullable: false,
            primary_key: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// Ordered column mapping for one table. Immutable once created; the only
/// permitted evolution is adding nullable columns via `ensure_column`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    columns: Vec<(String, ColumnDef)>,
}

impl TableSchema {
    pub fn new(columns: Vec<(String, ColumnDef)>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &ColumnDef)> {
        self.columns.iter().map(|(name, def)| (name.as_str(), def))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, def)| def)
    }

    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(_, def)| def.primary_key)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// CREATE TABLE IF NOT EXISTS statement for this schema. A composite
    /// primary key is emitted as a trailing table constraint.
    pub fn create_sql(&self, table: &str) -> String {
        let pk = self.primary_key();
        let single_pk = pk.len() == 1;

        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|(name, def)| {
                let mut part = format!("{name} {}", def.column_type.sql_type());
                if def.primary_key && single_pk {
                    part.push_str(" PRIMARY KEY");
                } else if !def.nullable {
                    part.push_str(" NOT NULL");
                }
                part
            })
            .collect();

        if pk.len() > 1 {
            parts.push(format!("PRIMARY KEY ({})", pk.join(", ")));
        }

        format!("CREATE TABLE IF NOT EXISTS {table} ({})", parts.join(", "))
    }
}

pub(crate) fn threads_schema() -> TableSchema {
    TableSchema::new(vec![
        ("id".into(), ColumnDef::new(ColumnType::Text).primary_key()),
        ("resource_id".into(), ColumnDef::new(ColumnType::Text)),
        ("title".into(), ColumnDef::new(ColumnType::Text).nullable()),
        ("metadata".into(), ColumnDef::new(ColumnType::Text).nullable()),
        ("created_at".into(), ColumnDef::new(ColumnType::Timestamp)),
        ("updated_at".into(), ColumnDef::new(ColumnType::Timestamp)),
    ])
}

pub(crate) fn messages_schema() -> TableSchema {
    TableSchema::new(vec![
        ("id".into(), ColumnDef::new(ColumnType::Text).primary_key()),
        ("thread_id".into(), ColumnDef::new(ColumnType::Text)),
        (
            "resource_id".into(),
            ColumnDef::new(ColumnType::Text).nullable(),
        ),
        ("content".into(), ColumnDef::new(ColumnType::Text)),
        ("role".into(), ColumnDef::new(ColumnType::Text)),
        ("created_at".into(), ColumnDef::new(ColumnType::Timestamp)),
        (
            WRITE_SEQ_COLUMN.into(),
            ColumnDef::new(ColumnType::Integer).nullable(),
        ),
    ])
}

pub(crate) fn traces_schema() -> TableSchema {
    TableSchema::new(vec![
        ("id".into(), ColumnDef::new(ColumnType::Text).primary_key()),
        (
            "parent_span_id".into(),
            ColumnDef::new(ColumnType::Text).nullable(),
        ),
        ("trace_id".into(), ColumnDef::new(ColumnType::Text)),
        ("name".into(), ColumnDef::new(ColumnType::Text)),
        ("scope".into(), ColumnDef::new(ColumnType::Text)),
        ("kind".into(), ColumnDef::new(ColumnType::Integer)),
        ("status".into(), ColumnDef::new(ColumnType::Text).nullable()),
        ("events".into(), ColumnDef::new(ColumnType::Text).nullable()),
        ("links".into(), ColumnDef::new(ColumnType::Text).nullable()),
        (
            "attributes".into(),
            ColumnDef::new(ColumnType::Text).nullable(),
        ),
        ("other".into(), ColumnDef::new(ColumnType::Text).nullable()),
        (
            "start_time".into(),
            ColumnDef::new(ColumnType::BigNumber).nullable(),
        ),
        (
            "end_time".into(),
            ColumnDef::new(ColumnType::BigNumber).nullable(),
        ),
        ("created_at".into(), ColumnDef::new(ColumnType::Timestamp)),
    ])
}

pub(crate) fn workflow_snapshot_schema() -> TableSchema {
    TableSchema::new(vec![
        (
            "workflow_name".into(),
            ColumnDef::new(ColumnType::Text).primary_key(),
        ),
        (
            "run_id".into(),
            ColumnDef::new(ColumnType::Text).primary_key(),
        ),
        (
            "resource_id".into(),
            ColumnDef::new(ColumnType::Text).nullable(),
        ),
        ("snapshot".into(), ColumnDef::new(ColumnType::Text)),
        ("created_at".into(), ColumnDef::new(ColumnType::Timestamp)),
        ("updated_at".into(), ColumnDef::new(ColumnType::Timestamp)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_sql_renders_single_primary_key_inline() {
        let schema = TableSchema::new(vec![
            ("id".into(), ColumnDef::new(ColumnType::Text).primary_key()),
            ("data".into(), ColumnDef::new(ColumnType::Text).nullable()),
        ]);

        assert_eq!(
            schema.create_sql("t"),
            "CREATE TABLE IF NOT EXISTS t (id TEXT PRIMARY KEY, data TEXT)"
        );
    }

    #[test]
    fn create_sql_renders_composite_primary_key_as_constraint() {
        let sql = workflow_snapshot_schema().create_sql("workflow_snapshot");
        assert!(sql.contains("workflow_name TEXT NOT NULL"));
        assert!(sql.contains("run_id TEXT NOT NULL"));
        assert!(sql.ends_with("PRIMARY KEY (workflow_name, run_id))"));
    }

    #[test]
    fn big_number_columns_are_text() {
        assert_eq!(ColumnType::BigNumber.sql_type(), "TEXT");
        assert_eq!(ColumnType::Boolean.sql_type(), "INTEGER");
    }

    #[test]
    fn primary_key_lists_columns_in_schema_order() {
        assert_eq!(
            workflow_snapshot_schema().primary_key(),
            vec!["workflow_name", "run_id"]
        );
    }
}
