//! SQLite implementation of the mnemo [`SqlBinding`], backed by
//! `sqlx::SqlitePool`. Batches execute inside a single transaction, which is
//! what gives the store its all-or-nothing batch-write guarantee.

use async_trait::async_trait;
use mnemo_store::{BindingError, ExecResult, SqlBinding, SqlRow, SqlStatement, SqlValue};
use sqlx::error::ErrorKind;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};

#[derive(Debug, Clone)]
pub struct SqliteBinding {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct SqliteBindingBuilder {
    database_url: String,
    max_connections: u32,
}

impl SqliteBinding {
    pub fn builder(database_url: impl Into<String>) -> SqliteBindingBuilder {
        SqliteBindingBuilder {
            database_url: database_url.into(),
            max_connections: 1,
        }
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl SqliteBindingBuilder {
    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub async fn build(self) -> Result<SqliteBinding, BindingError> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await
            .map_err(|error| BindingError::Backend(Box::new(error)))?;
        Ok(SqliteBinding { pool })
    }
}

fn map_sqlx_error(error: sqlx::Error) -> BindingError {
    if let sqlx::Error::Database(db_error) = &error {
        match db_error.kind() {
            ErrorKind::UniqueViolation => {
                return BindingError::UniqueViolation(db_error.message().to_string());
            }
            ErrorKind::NotNullViolation => {
                return BindingError::NotNullViolation(db_error.message().to_string());
            }
            _ => {}
        }
    }
    BindingError::Backend(Box::new(error))
}

fn build_query<'q>(
    sql: &'q str,
    params: &[SqlValue],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Integer(int) => query.bind(*int),
            SqlValue::Real(real) => query.bind(*real),
            SqlValue::Text(text) => query.bind(text.clone()),
        };
    }
    query
}

fn row_to_map(row: &SqliteRow) -> Result<SqlRow, BindingError> {
    let mut map = SqlRow::new();
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row
            .try_get_raw(index)
            .map_err(|error| BindingError::Backend(Box::new(error)))?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" => SqlValue::Integer(
                    row.try_get::<i64, _>(index)
                        .map_err(|error| BindingError::Backend(Box::new(error)))?,
                ),
                "REAL" => SqlValue::Real(
                    row.try_get::<f64, _>(index)
                        .map_err(|error| BindingError::Backend(Box::new(error)))?,
                ),
                _ => SqlValue::Text(
                    row.try_get::<String, _>(index)
                        .map_err(|error| BindingError::Backend(Box::new(error)))?,
                ),
            }
        };
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

// Statements that produce a result set are fetched; everything else is
// executed for its affected-row count.
fn returns_rows(sql: &str) -> bool {
    let head = sql.trim_start().get(..6).unwrap_or("").to_ascii_uppercase();
    head.starts_with("SELECT") || head.starts_with("PRAGMA") || head.starts_with("WITH")
}

async fn run_statement<'e, E>(
    executor: E,
    sql: &str,
    params: &[SqlValue],
) -> Result<ExecResult, BindingError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    if returns_rows(sql) {
        let rows = build_query(sql, params)
            .fetch_all(executor)
            .await
            .map_err(map_sqlx_error)?;
        let rows = rows
            .iter()
            .map(row_to_map)
            .collect::<Result<Vec<_>, _>>()?;
        let rows_affected = rows.len() as u64;
        Ok(ExecResult {
            rows,
            rows_affected,
        })
    } else {
        let result = build_query(sql, params)
            .execute(executor)
            .await
            .map_err(map_sqlx_error)?;
        Ok(ExecResult {
            rows: Vec::new(),
            rows_affected: result.rows_affected(),
        })
    }
}

#[async_trait]
impl SqlBinding for SqliteBinding {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<ExecResult, BindingError> {
        run_statement(&self.pool, sql, params).await
    }

    async fn execute_batch(
        &self,
        statements: &[SqlStatement],
    ) -> Result<Vec<ExecResult>, BindingError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| BindingError::Backend(Box::new(error)))?;

        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            match run_statement(tx.as_mut(), &statement.sql, &statement.params).await {
                Ok(result) => results.push(result),
                Err(error) => {
                    tx.rollback()
                        .await
                        .map_err(|error| BindingError::Backend(Box::new(error)))?;
                    return Err(error);
                }
            }
        }

        tx.commit()
            .await
            .map_err(|error| BindingError::Backend(Box::new(error)))?;
        Ok(results)
    }

    async fn column_names(&self, table: &str) -> Result<Vec<String>, BindingError> {
        let result = run_statement(
            &self.pool,
            "SELECT name FROM pragma_table_info(?)",
            &[SqlValue::Text(table.to_string())],
        )
        .await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.get("name"))
            .filter_map(|value| value.as_text())
            .map(str::to_string)
            .collect())
    }
}
