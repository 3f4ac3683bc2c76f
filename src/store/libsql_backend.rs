//! libSQL task catalog.
//!
//! One row per task. The kind-specific spec and result are stored as JSON
//! columns so both job kinds share a table.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::MetaError;
use crate::store::migrations;
use crate::store::traits::MetaStore;
use crate::task::{JobResult, JobSpec, JobState, TaskId, TaskRecord};

const SELECT_COLUMNS: &str = "task_id, cluster_id, state, node_id, version, fail_reason, spec, \
                              result, updated_at";

/// libSQL-backed [`MetaStore`].
///
/// `libsql::Connection` is `Send + Sync`, so a single connection serves all
/// concurrent callers.
pub struct LibSqlMetaStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlMetaStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, MetaError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MetaError::Connection(format!("Failed to create database directory: {e}"))
                })?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| MetaError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Task catalog opened");
        Ok(store)
    }

    /// Create an in-memory catalog (for tests).
    pub async fn new_memory() -> Result<Self, MetaError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                MetaError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, MetaError> {
        let conn = db
            .connect()
            .map_err(|e| MetaError::Connection(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Parse an RFC 3339 timestamp; unreadable values sort first.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn row_to_task(row: &libsql::Row) -> Result<TaskRecord, MetaError> {
    let read = |e: libsql::Error| MetaError::Query(format!("Failed to read task row: {e}"));

    let task_id: i64 = row.get(0).map_err(read)?;
    let state_str: String = row.get(2).map_err(read)?;
    let spec_json: String = row.get(6).map_err(read)?;
    let result_json: Option<String> = row.get(7).map_err(read)?;
    let updated_str: String = row.get(8).map_err(read)?;

    let state = JobState::parse(&state_str).ok_or_else(|| {
        MetaError::Serialization(format!("task {task_id}: unknown state '{state_str}'"))
    })?;
    let spec: JobSpec = serde_json::from_str(&spec_json)
        .map_err(|e| MetaError::Serialization(format!("task {task_id}: bad spec: {e}")))?;
    let result: Option<JobResult> = match result_json {
        Some(json) if !json.is_empty() => Some(
            serde_json::from_str(&json)
                .map_err(|e| MetaError::Serialization(format!("task {task_id}: bad result: {e}")))?,
        ),
        _ => None,
    };

    Ok(TaskRecord {
        task_id,
        cluster_id: row.get(1).map_err(read)?,
        state,
        node_id: row.get::<Option<i64>>(3).map_err(read)?,
        version: row.get(4).map_err(read)?,
        fail_reason: row.get(5).map_err(read)?,
        spec,
        result,
        updated_at: parse_datetime(&updated_str),
        dirty: false,
    })
}

#[async_trait]
impl MetaStore for LibSqlMetaStore {
    async fn load_all_tasks(&self) -> Result<Vec<TaskRecord>, MetaError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SELECT_COLUMNS} FROM task_records ORDER BY task_id"),
                (),
            )
            .await
            .map_err(|e| MetaError::Query(format!("load_all_tasks: {e}")))?;

        let mut tasks = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| MetaError::Query(format!("load_all_tasks: {e}")))?
        {
            tasks.push(row_to_task(&row)?);
        }
        debug!(count = tasks.len(), "Loaded task records");
        Ok(tasks)
    }

    async fn save_task(&self, record: &TaskRecord) -> Result<(), MetaError> {
        let spec = serde_json::to_string(&record.spec)
            .map_err(|e| MetaError::Serialization(format!("spec: {e}")))?;
        let result = record
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| MetaError::Serialization(format!("result: {e}")))?;

        self.conn()
            .execute(
                "INSERT OR REPLACE INTO task_records \
                 (task_id, job_type, cluster_id, state, node_id, version, fail_reason, spec, result, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.task_id,
                    record.job_type().as_str(),
                    record.cluster_id.as_str(),
                    record.state.as_str(),
                    record.node_id,
                    record.version,
                    record.fail_reason.as_str(),
                    spec,
                    result,
                    record.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| MetaError::Query(format!("save_task: {e}")))?;
        Ok(())
    }

    async fn delete_task(&self, task_id: TaskId) -> Result<(), MetaError> {
        self.conn()
            .execute(
                "DELETE FROM task_records WHERE task_id = ?1",
                params![task_id],
            )
            .await
            .map_err(|e| MetaError::Query(format!("delete_task: {e}")))?;
        Ok(())
    }
}
