//! The generic table engine: table lifecycle, additive migration, and the
//! insert/load/query operations every domain repository is built on.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::binding::{ExecResult, SqlBinding, SqlStatement, SqlValue};
use crate::codec::{decode_row, encode_record, encode_value, JsonOrRaw};
use crate::error::{Result, StoreError};
use crate::query::{
    attrs_contain, build_count, build_select, partition_filters, Filter, OrderBy, Page,
    Pagination,
};
use crate::schema::{
    messages_schema, threads_schema, traces_schema, workflow_snapshot_schema, ColumnDef,
    ColumnType, TableSchema, MESSAGES_TABLE, THREADS_TABLE, TRACES_TABLE,
    WORKFLOW_SNAPSHOT_TABLE,
};

/// Store configuration. The table prefix namespaces every table (built-in and
/// caller-defined) so multiple logical stores can share one database; it is
/// threaded explicitly, never ambient.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub table_prefix: Option<String>,
}

impl StoreConfig {
    pub fn with_table_prefix(prefix: impl Into<String>) -> Self {
        Self {
            table_prefix: Some(prefix.into()),
        }
    }
}

/// Schema-driven store over a [`SqlBinding`]. All domain repositories are
/// implemented as methods on this type (see the `threads`, `messages`,
/// `traces`, and `workflows` modules).
pub struct AgentStore {
    binding: Arc<dyn SqlBinding>,
    config: StoreConfig,
    // Registry of created schemas, used for insert validation and row
    // decoding. Metadata only; table state itself is never cached.
    schemas: RwLock<HashMap<String, TableSchema>>,
}

impl AgentStore {
    pub fn new(binding: Arc<dyn SqlBinding>, config: StoreConfig) -> Self {
        Self {
            binding,
            config,
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// Creates the built-in tables (threads, messages, traces,
    /// workflow_snapshot). Safe to call repeatedly.
    pub async fn init(&self) -> Result<()> {
        info!(prefix = ?self.config.table_prefix, "initializing agent store");
        self.create_table(THREADS_TABLE, threads_schema()).await?;
        self.create_table(MESSAGES_TABLE, messages_schema()).await?;
        self.create_table(TRACES_TABLE, traces_schema()).await?;
        self.create_table(WORKFLOW_SNAPSHOT_TABLE, workflow_snapshot_schema())
            .await?;
        Ok(())
    }

    /// Physical (prefixed) name for a logical table.
    pub fn table_name(&self, table: &str) -> String {
        match &self.config.table_prefix {
            Some(prefix) => format!("{prefix}{table}"),
            None => table.to_string(),
        }
    }

    fn schema(&self, table: &str) -> Result<TableSchema> {
        self.schemas
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(table)
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound {
                table: table.to_string(),
            })
    }

    fn register_schema(&self, table: &str, schema: TableSchema) {
        self.schemas
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(table.to_string(), schema);
    }

    pub(crate) async fn execute(
        &self,
        operation: &'static str,
        table: &str,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<ExecResult> {
        self.binding
            .execute(sql, params)
            .await
            .map_err(|err| StoreError::from_binding(operation, table, err))
    }

    pub(crate) async fn run_batch(
        &self,
        operation: &'static str,
        table: &str,
        statements: Vec<SqlStatement>,
    ) -> Result<Vec<ExecResult>> {
        self.binding
            .execute_batch(&statements)
            .await
            .map_err(|err| StoreError::from_binding(operation, table, err))
    }

    // ---- table lifecycle -------------------------------------------------

    /// Creates `table` if absent. Re-invocation with the same schema is a
    /// no-op; an existing table whose live columns are missing one of the
    /// schema's primary-key columns is an incompatible redefinition.
    pub async fn create_table(&self, table: &str, schema: TableSchema) -> Result<()> {
        let physical = self.table_name(table);
        let live_columns = self
            .binding
            .column_names(&physical)
            .await
            .map_err(|err| StoreError::from_binding("create_table", table, err))?;

        if live_columns.is_empty() {
            let sql = schema.create_sql(&physical);
            debug!(table = %physical, "creating table");
            self.execute("create_table", table, &sql, &[]).await?;
        } else {
            for key_column in schema.primary_key() {
                if !live_columns.iter().any(|column| column == key_column) {
                    return Err(StoreError::Schema {
                        table: table.to_string(),
                        reason: format!(
                            "existing table lacks primary key column '{key_column}'"
                        ),
                    });
                }
            }
        }

        self.register_schema(table, schema);
        Ok(())
    }

    /// Deletes all rows, preserving the schema. Fails if the table does not
    /// exist.
    pub async fn clear_table(&self, table: &str) -> Result<()> {
        let physical = self.table_name(table);
        let live_columns = self
            .binding
            .column_names(&physical)
            .await
            .map_err(|err| StoreError::from_binding("clear_table", table, err))?;
        if live_columns.is_empty() {
            return Err(StoreError::TableNotFound {
                table: table.to_string(),
            });
        }
        self.execute("clear_table", table, &format!("DELETE FROM {physical}"), &[])
            .await?;
        Ok(())
    }

    /// Removes the table and its registered schema entirely.
    pub async fn drop_table(&self, table: &str) -> Result<()> {
        let physical = self.table_name(table);
        self.execute(
            "drop_table",
            table,
            &format!("DROP TABLE IF EXISTS {physical}"),
            &[],
        )
        .await?;
        self.schemas
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(table);
        Ok(())
    }

    /// Probes the live schema metadata for `column`, not the in-memory
    /// registry, so drift after an upgrade is visible.
    pub async fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let physical = self.table_name(table);
        let live_columns = self
            .binding
            .column_names(&physical)
            .await
            .map_err(|err| StoreError::from_binding("has_column", table, err))?;
        Ok(live_columns.iter().any(|name| name == column))
    }

    /// Additive migration: adds `column` as nullable if the live table lacks
    /// it. Never modifies or drops existing columns.
    pub async fn ensure_column(&self, table: &str, column: &str, def: ColumnDef) -> Result<()> {
        if self.has_column(table, column).await? {
            return Ok(());
        }
        let physical = self.table_name(table);
        debug!(table = %physical, column, "adding column");
        self.execute(
            "ensure_column",
            table,
            &format!(
                "ALTER TABLE {physical} ADD COLUMN {column} {}",
                def.column_type.sql_type()
            ),
            &[],
        )
        .await?;

        let mut registry = self
            .schemas
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let extended = registry.get(table).filter(|schema| {
            schema.column(column).is_none()
        }).map(|schema| {
            let mut columns: Vec<(String, ColumnDef)> = schema
                .columns()
                .map(|(name, def)| (name.to_string(), def.clone()))
                .collect();
            columns.push((column.to_string(), def.nullable()));
            TableSchema::new(columns)
        });
        if let Some(schema) = extended {
            registry.insert(table.to_string(), schema);
        }
        Ok(())
    }

    // ---- generic writes --------------------------------------------------

    pub(crate) fn insert_statement(
        &self,
        table: &str,
        schema: &TableSchema,
        record: &Map<String, Value>,
        seq_column: Option<&str>,
    ) -> Result<SqlStatement> {
        let skip: Vec<&str> = seq_column.into_iter().collect();
        let encoded = encode_record(table, schema, record, &skip)?;
        let physical = self.table_name(table);

        let mut names: Vec<&str> = encoded.iter().map(|(name, _)| name.as_str()).collect();
        let mut placeholders: Vec<String> = vec!["?".to_string(); encoded.len()];
        if let Some(seq) = seq_column {
            // Write-sequence assignment happens inside the batch's
            // transaction, so the counter is database-backed and contiguous
            // per call even across concurrent store instances.
            names.push(seq);
            placeholders.push(format!(
                "(SELECT COALESCE(MAX({seq}), 0) + 1 FROM {physical})"
            ));
        }

        let sql = format!(
            "INSERT INTO {physical} ({}) VALUES ({})",
            names.join(", "),
            placeholders.join(", ")
        );
        let params = encoded.into_iter().map(|(_, value)| value).collect();
        Ok(SqlStatement::new(sql, params))
    }

    /// Single-row insert. Fails with a constraint error if the primary key
    /// already exists or a non-nullable column is missing.
    pub async fn insert(&self, table: &str, record: &Map<String, Value>) -> Result<()> {
        let schema = self.schema(table)?;
        let statement = self.insert_statement(table, &schema, record, None)?;
        self.execute("insert", table, &statement.sql, &statement.params)
            .await?;
        Ok(())
    }

    /// Inserts all records as one atomic batch: every row is validated and
    /// encoded before any statement is issued, and the binding commits all of
    /// them or none.
    pub async fn batch_insert(&self, table: &str, records: &[Map<String, Value>]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let schema = self.schema(table)?;
        let statements = records
            .iter()
            .map(|record| self.insert_statement(table, &schema, record, None))
            .collect::<Result<Vec<_>>>()?;
        self.run_batch("batch_insert", table, statements).await?;
        Ok(())
    }

    /// Insert-or-replace by the table's primary key. Columns named in
    /// `preserve` keep their existing value on conflict (e.g. `created_at`).
    pub async fn upsert(
        &self,
        table: &str,
        record: &Map<String, Value>,
        preserve: &[&str],
    ) -> Result<()> {
        let schema = self.schema(table)?;
        let encoded = encode_record(table, &schema, record, &[])?;
        let physical = self.table_name(table);
        let key = schema.primary_key();
        if key.is_empty() {
            return Err(StoreError::Schema {
                table: table.to_string(),
                reason: "upsert requires a primary key".to_string(),
            });
        }

        let names: Vec<&str> = encoded.iter().map(|(name, _)| name.as_str()).collect();
        let placeholders = vec!["?"; encoded.len()].join(", ");
        let updates: Vec<String> = names
            .iter()
            .filter(|name| !key.contains(name) && !preserve.contains(name))
            .map(|name| format!("{name} = excluded.{name}"))
            .collect();

        // A table whose columns are all key or preserved columns has nothing
        // to update on conflict.
        let action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        let sql = format!(
            "INSERT INTO {physical} ({}) VALUES ({placeholders}) \
             ON CONFLICT({}) {action}",
            names.join(", "),
            key.join(", ")
        );
        let params: Vec<SqlValue> = encoded.into_iter().map(|(_, value)| value).collect();
        self.execute("upsert", table, &sql, &params).await?;
        Ok(())
    }

    // ---- generic reads ---------------------------------------------------

    /// Loads the single row matching the exact-match key predicate, or `None`
    /// if no row matches. An empty key set is a malformed request.
    pub async fn load(
        &self,
        table: &str,
        keys: &Map<String, Value>,
    ) -> Result<Option<Map<String, Value>>> {
        if keys.is_empty() {
            return Err(StoreError::InvalidRequest(
                "load requires at least one key column".to_string(),
            ));
        }
        let schema = self.schema(table)?;
        let physical = self.table_name(table);

        let mut clauses = Vec::new();
        let mut params = Vec::new();
        for (column, value) in keys {
            let column_type = schema
                .column(column)
                .map(|def| def.column_type)
                .unwrap_or(ColumnType::Text);
            clauses.push(format!("{column} = ?"));
            params.push(encode_value(column_type, value)?);
        }

        let sql = format!(
            "SELECT * FROM {physical} WHERE {} LIMIT 1",
            clauses.join(" AND ")
        );
        let result = self.execute("load", table, &sql, &params).await?;
        Ok(result.rows.first().map(|row| decode_row(&schema, row)))
    }

    /// Filtered, paginated listing. Returns the requested page and the total
    /// count across all pages.
    pub async fn query(
        &self,
        table: &str,
        filters: &[Filter],
        order: Option<OrderBy>,
        pagination: Option<Pagination>,
    ) -> Result<Page<Map<String, Value>>> {
        let schema = self.schema(table)?;
        let physical = self.table_name(table);
        let order = order.unwrap_or_default();
        let (sql_filters, attr_filters) = partition_filters(filters);
        let window = pagination.map(Pagination::window);

        if attr_filters.is_empty() {
            let (count_sql, count_params) = build_count(&physical, &sql_filters);
            let count = self
                .execute("query", table, &count_sql, &count_params)
                .await?;
            let total = count
                .rows
                .first()
                .and_then(|row| row.get("total"))
                .and_then(|value| match value {
                    SqlValue::Integer(total) => Some(*total as u64),
                    _ => None,
                })
                .unwrap_or(0);

            let (sql, params) = build_select(&physical, &sql_filters, &order, window);
            let result = self.execute("query", table, &sql, &params).await?;
            let items = result
                .rows
                .iter()
                .map(|row| decode_row(&schema, row))
                .collect();
            return Ok(Page { items, total });
        }

        // Attribute sub-matching happens after JSON decoding, so fetch the
        // full SQL-filtered set, filter in memory, then apply the window.
        let (sql, params) = build_select(&physical, &sql_filters, &order, None);
        let result = self.execute("query", table, &sql, &params).await?;
        let matching: Vec<Map<String, Value>> = result
            .rows
            .iter()
            .map(|row| decode_row(&schema, row))
            .filter(|record| {
                attr_filters.iter().all(|(column, pairs)| {
                    let decoded = record
                        .get(column.as_str())
                        .and_then(Value::as_str)
                        .map(|text| JsonOrRaw::<Value>::parse(text));
                    match &decoded {
                        Some(JsonOrRaw::Decoded(value)) => attrs_contain(Some(value), pairs),
                        _ => false,
                    }
                })
            })
            .collect();

        let total = matching.len() as u64;
        let items = match window {
            Some((limit, offset)) => matching
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect(),
            None => matching,
        };
        Ok(Page { items, total })
    }
}
