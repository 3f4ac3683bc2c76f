//! Task registry: the scheduler's in-memory set of live task records.
//!
//! Each entry carries a generation stamped at insert time. Transitions work
//! on a snapshot and write back only if the entry they read is still the one
//! registered, so a task removed (or removed and re-enqueued) while its
//! transition was in flight is never resurrected or clobbered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::SchedulerError;
use crate::task::{JobState, TaskId, TaskRecord};

/// A task record as seen by one tick.
#[derive(Debug, Clone)]
pub struct RegisteredTask {
    pub generation: u64,
    pub record: TaskRecord,
}

/// What a transition decided for one task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Store the (possibly unchanged) record.
    Update(TaskRecord),
    /// Drop the task from the registry.
    Remove,
}

/// Task counts per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub total: usize,
    pub init: usize,
    pub in_progress: usize,
    pub retry: usize,
    pub finished: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, RegisteredTask>>,
    next_generation: AtomicU64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn stamp(&self, record: TaskRecord) -> RegisteredTask {
        RegisteredTask {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            record,
        }
    }

    /// Register a new task. Rejects an id that is already present.
    pub async fn insert(&self, record: TaskRecord) -> Result<(), SchedulerError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&record.task_id) {
            return Err(SchedulerError::DuplicateTask {
                task_id: record.task_id,
            });
        }
        let task_id = record.task_id;
        tasks.insert(task_id, self.stamp(record));
        Ok(())
    }

    /// Register a task restored from the catalog, replacing any entry with the same id.
    pub async fn insert_loaded(&self, record: TaskRecord) {
        let task_id = record.task_id;
        let entry = self.stamp(record);
        self.tasks.write().await.insert(task_id, entry);
    }

    pub async fn get(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.tasks
            .read()
            .await
            .get(&task_id)
            .map(|entry| entry.record.clone())
    }

    /// Copy of every entry, ordered by task id.
    pub async fn snapshot(&self) -> Vec<RegisteredTask> {
        let mut entries: Vec<RegisteredTask> = self.tasks.read().await.values().cloned().collect();
        entries.sort_by_key(|entry| entry.record.task_id);
        entries
    }

    /// Apply a transition outcome. Returns `false` when the entry the
    /// transition started from is gone.
    pub async fn apply(&self, task_id: TaskId, generation: u64, outcome: Outcome) -> bool {
        let mut tasks = self.tasks.write().await;
        if tasks.get(&task_id).map(|entry| entry.generation) != Some(generation) {
            return false;
        }
        match outcome {
            Outcome::Update(record) => {
                if let Some(entry) = tasks.get_mut(&task_id) {
                    entry.record = record;
                }
            }
            Outcome::Remove => {
                tasks.remove(&task_id);
            }
        }
        true
    }

    /// Remove every task matching `predicate`, returning the removed records.
    pub async fn remove_where<F>(&self, predicate: F) -> Vec<TaskRecord>
    where
        F: Fn(&TaskRecord) -> bool,
    {
        let mut tasks = self.tasks.write().await;
        let ids: Vec<TaskId> = tasks
            .values()
            .filter(|entry| predicate(&entry.record))
            .map(|entry| entry.record.task_id)
            .collect();
        let mut removed: Vec<TaskRecord> = ids
            .iter()
            .filter_map(|id| tasks.remove(id))
            .map(|entry| entry.record)
            .collect();
        removed.sort_by_key(|record| record.task_id);
        removed
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    pub async fn summary(&self) -> TaskSummary {
        let tasks = self.tasks.read().await;
        let mut summary = TaskSummary {
            total: tasks.len(),
            ..Default::default()
        };
        for entry in tasks.values() {
            match entry.record.state {
                JobState::Init | JobState::None => summary.init += 1,
                JobState::InProgress => summary.in_progress += 1,
                JobState::Retry => summary.retry += 1,
                JobState::Finished => summary.finished += 1,
                JobState::Failed => summary.failed += 1,
            }
        }
        summary
    }
}
