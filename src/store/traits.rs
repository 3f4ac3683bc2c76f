//! Catalog and segment-metadata traits consumed by the scheduler.

use async_trait::async_trait;

use crate::error::MetaError;
use crate::task::{SegmentId, TaskId, TaskRecord};

/// Durable task catalog: one record per task, keyed by task id.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Load every persisted task record.
    async fn load_all_tasks(&self) -> Result<Vec<TaskRecord>, MetaError>;

    /// Insert or replace the record for `record.task_id`.
    async fn save_task(&self, record: &TaskRecord) -> Result<(), MetaError>;

    /// Delete a task record. Deleting a missing record is not an error.
    async fn delete_task(&self, task_id: TaskId) -> Result<(), MetaError>;
}

/// Read-only view of segment health.
pub trait SegmentMeta: Send + Sync {
    /// `false` once the segment has been dropped.
    fn is_segment_healthy(&self, segment_id: SegmentId) -> bool;
}
