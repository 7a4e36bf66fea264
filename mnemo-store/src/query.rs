//! The fixed filter/pagination vocabulary and the parameterized SELECT
//! builder behind the generic query path. This is deliberately not a query
//! planner: four clause kinds, one ordering, window pagination.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::binding::SqlValue;

/// One filter clause. `AttrContains` is evaluated in memory after the JSON
/// attributes column is decoded; the other clauses compile to SQL.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Exact match on a column.
    Eq(String, SqlValue),
    /// Name-style prefix match (`LIKE 'prefix%'`).
    Prefix(String, String),
    /// The decoded JSON object in `column` must contain every given pair.
    AttrContains(String, Map<String, Value>),
    /// Inclusive timestamp range; either bound optional.
    DateRange {
        column: String,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    },
}

impl Filter {
    fn is_sql(&self) -> bool {
        !matches!(self, Filter::AttrContains(..))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Result ordering. Listing queries default to creation time descending;
/// message reads override this with their chronological + write-sequence
/// ordering.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub columns: Vec<(String, Direction)>,
}

impl OrderBy {
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            columns: vec![(column.into(), Direction::Desc)],
        }
    }

    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            columns: vec![(column.into(), Direction::Asc)],
        }
    }

    pub fn then_asc(mut self, column: impl Into<String>) -> Self {
        self.columns.push((column.into(), Direction::Asc));
        self
    }

    fn render(&self) -> String {
        let parts: Vec<String> = self
            .columns
            .iter()
            .map(|(column, direction)| match direction {
                Direction::Asc => format!("{column} ASC"),
                Direction::Desc => format!("{column} DESC"),
            })
            .collect();
        format!(" ORDER BY {}", parts.join(", "))
    }
}

impl Default for OrderBy {
    fn default() -> Self {
        OrderBy::desc("created_at")
    }
}

/// Page-window selection, in either of the two accepted spellings.
#[derive(Debug, Clone, Copy)]
pub enum Pagination {
    /// Zero-indexed page of `per_page` rows.
    Page { page: u64, per_page: u64 },
    /// Explicit limit/offset window.
    Window { limit: u64, offset: u64 },
}

impl Pagination {
    pub fn window(self) -> (u64, u64) {
        match self {
            Pagination::Page { page, per_page } => (per_page, page.saturating_mul(per_page)),
            Pagination::Window { limit, offset } => (limit, offset),
        }
    }
}

/// One page of results plus the total count across all pages.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
        }
    }
}

/// Splits `filters` into the SQL-compiled clauses and the in-memory
/// attribute clauses.
pub(crate) fn partition_filters(
    filters: &[Filter],
) -> (Vec<&Filter>, Vec<(&String, &Map<String, Value>)>) {
    let sql = filters.iter().filter(|filter| filter.is_sql()).collect();
    let attrs = filters
        .iter()
        .filter_map(|filter| match filter {
            Filter::AttrContains(column, pairs) => Some((column, pairs)),
            _ => None,
        })
        .collect();
    (sql, attrs)
}

fn render_where(filters: &[&Filter], params: &mut Vec<SqlValue>) -> String {
    let mut clauses = Vec::new();
    for filter in filters {
        match filter {
            Filter::Eq(column, value) => {
                clauses.push(format!("{column} = ?"));
                params.push(value.clone());
            }
            Filter::Prefix(column, prefix) => {
                clauses.push(format!("{column} LIKE ?"));
                params.push(SqlValue::Text(format!("{prefix}%")));
            }
            Filter::DateRange { column, from, to } => {
                if let Some(from) = from {
                    clauses.push(format!("{column} >= ?"));
                    params.push(SqlValue::Text(from.to_rfc3339()));
                }
                if let Some(to) = to {
                    clauses.push(format!("{column} <= ?"));
                    params.push(SqlValue::Text(to.to_rfc3339()));
                }
            }
            Filter::AttrContains(..) => {}
        }
    }
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

pub(crate) fn build_select(
    table: &str,
    filters: &[&Filter],
    order: &OrderBy,
    window: Option<(u64, u64)>,
) -> (String, Vec<SqlValue>) {
    let mut params = Vec::new();
    let mut sql = format!("SELECT * FROM {table}");
    sql.push_str(&render_where(filters, &mut params));
    sql.push_str(&order.render());
    if let Some((limit, offset)) = window {
        sql.push_str(" LIMIT ? OFFSET ?");
        params.push(SqlValue::Integer(limit as i64));
        params.push(SqlValue::Integer(offset as i64));
    }
    (sql, params)
}

pub(crate) fn build_count(table: &str, filters: &[&Filter]) -> (String, Vec<SqlValue>) {
    let mut params = Vec::new();
    let mut sql = format!("SELECT COUNT(*) AS total FROM {table}");
    sql.push_str(&render_where(filters, &mut params));
    (sql, params)
}

/// In-memory attribute sub-match: every pair in `pairs` must be present in
/// the decoded object. Raw (undecodable) attribute fields never match.
pub(crate) fn attrs_contain(decoded: Option<&Value>, pairs: &Map<String, Value>) -> bool {
    let Some(Value::Object(object)) = decoded else {
        return false;
    };
    pairs
        .iter()
        .all(|(key, expected)| object.get(key) == Some(expected))
}
