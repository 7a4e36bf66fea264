//! Workflow repository: snapshot upserts keyed by (workflow_name, run_id)
//! and the WorkflowRun read projection with filtered, paginated listings.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::binding::SqlValue;
use crate::codec::{record_datetime, record_text, JsonOrRaw};
use crate::domain::{WorkflowRun, WorkflowState};
use crate::error::Result;
use crate::query::{Filter, Page, Pagination};
use crate::schema::WORKFLOW_SNAPSHOT_TABLE;
use crate::store::AgentStore;

/// Filter arguments for [`AgentStore::get_workflow_runs`].
#[derive(Debug, Clone, Default)]
pub struct WorkflowRunFilter {
    pub workflow_name: Option<String>,
    pub resource_id: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub pagination: Option<Pagination>,
}

fn run_from_record(record: &Map<String, Value>) -> Result<WorkflowRun> {
    let snapshot = match record.get("snapshot") {
        Some(Value::String(text)) => JsonOrRaw::parse(text),
        _ => JsonOrRaw::Raw(String::new()),
    };

    Ok(WorkflowRun {
        run_id: record_text(record, "run_id")?.to_string(),
        workflow_name: record_text(record, "workflow_name")?.to_string(),
        resource_id: record
            .get("resource_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        snapshot,
        created_at: record_datetime(record, "created_at")?,
        updated_at: record_datetime(record, "updated_at")?,
    })
}

impl AgentStore {
    /// Upserts the snapshot for `(workflow_name, run_id)`: the snapshot
    /// document is fully replaced (never merged), `updated_at` is refreshed,
    /// and `created_at` and `resource_id` keep their original values.
    pub async fn persist_workflow_snapshot(
        &self,
        workflow_name: &str,
        run_id: &str,
        snapshot: &WorkflowState,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut record = Map::new();
        record.insert(
            "workflow_name".to_string(),
            Value::String(workflow_name.to_string()),
        );
        record.insert("run_id".to_string(), Value::String(run_id.to_string()));
        record.insert(
            "snapshot".to_string(),
            Value::String(serde_json::to_string(snapshot)?),
        );
        record.insert("created_at".to_string(), Value::String(now.clone()));
        record.insert("updated_at".to_string(), Value::String(now));

        self.upsert(
            WORKFLOW_SNAPSHOT_TABLE,
            &record,
            &["created_at", "resource_id"],
        )
        .await
    }

    /// The stored snapshot document, or `None` if the key has never been
    /// persisted. Snapshots written by older writers that are not valid JSON
    /// come back as [`JsonOrRaw::Raw`].
    pub async fn load_workflow_snapshot(
        &self,
        workflow_name: &str,
        run_id: &str,
    ) -> Result<Option<JsonOrRaw<WorkflowState>>> {
        let mut keys = Map::new();
        keys.insert(
            "workflow_name".to_string(),
            Value::String(workflow_name.to_string()),
        );
        keys.insert("run_id".to_string(), Value::String(run_id.to_string()));

        let Some(record) = self.load(WORKFLOW_SNAPSHOT_TABLE, &keys).await? else {
            return Ok(None);
        };
        Ok(Some(match record.get("snapshot") {
            Some(Value::String(text)) => JsonOrRaw::parse(text),
            _ => JsonOrRaw::Raw(String::new()),
        }))
    }

    /// Run projections matching the filter, newest first, with the total
    /// count across all pages.
    pub async fn get_workflow_runs(
        &self,
        filter: WorkflowRunFilter,
    ) -> Result<Page<WorkflowRun>> {
        let mut filters = Vec::new();
        if let Some(workflow_name) = filter.workflow_name {
            filters.push(Filter::Eq(
                "workflow_name".to_string(),
                SqlValue::Text(workflow_name),
            ));
        }
        if let Some(resource_id) = filter.resource_id {
            filters.push(Filter::Eq(
                "resource_id".to_string(),
                SqlValue::Text(resource_id),
            ));
        }
        if filter.from_date.is_some() || filter.to_date.is_some() {
            filters.push(Filter::DateRange {
                column: "created_at".to_string(),
                from: filter.from_date,
                to: filter.to_date,
            });
        }

        let page = self
            .query(WORKFLOW_SNAPSHOT_TABLE, &filters, None, filter.pagination)
            .await?;
        let total = page.total;
        let items = page
            .items
            .iter()
            .map(run_from_record)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page { items, total })
    }

    /// A single run projection, or `None` if no row matches.
    pub async fn get_workflow_run_by_id(
        &self,
        run_id: &str,
        workflow_name: Option<&str>,
    ) -> Result<Option<WorkflowRun>> {
        let mut filters = vec![Filter::Eq(
            "run_id".to_string(),
            SqlValue::Text(run_id.to_string()),
        )];
        if let Some(workflow_name) = workflow_name {
            filters.push(Filter::Eq(
                "workflow_name".to_string(),
                SqlValue::Text(workflow_name.to_string()),
            ));
        }

        let page = self
            .query(
                WORKFLOW_SNAPSHOT_TABLE,
                &filters,
                None,
                Some(Pagination::Window {
                    limit: 1,
                    offset: 0,
                }),
            )
            .await?;
        page.items.first().map(run_from_record).transpose()
    }
}
