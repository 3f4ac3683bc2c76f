//! Tick-driven task scheduler.
//!
//! A background driver wakes every `schedule_interval`, snapshots the
//! registry and runs one transition per task (in-progress tasks are polled
//! in batches). Ticks never overlap, so each task's transitions are strictly
//! sequential. No registry lock is held across an RPC.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::scheduler::reconcile;
use crate::scheduler::registry::{Outcome, RegisteredTask, TaskRegistry, TaskSummary};
use crate::scheduler::transition::{PollKey, TransitionContext};
use crate::store::{MetaStore, SegmentMeta};
use crate::task::{JobState, SegmentId, TaskId, TaskRecord};
use crate::worker::{JobFacade, WorkerManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

/// One unit of work within a tick.
enum Work {
    Single(RegisteredTask),
    Batch(PollKey, Vec<RegisteredTask>),
}

/// Owns the task registry and drives every task to completion.
pub struct TaskScheduler {
    ctx: TransitionContext,
    registry: TaskRegistry,
    lifecycle: Mutex<Lifecycle>,
    shutdown_tx: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
    tick_lock: tokio::sync::Mutex<()>,
    enqueue_lock: tokio::sync::Mutex<()>,
}

impl TaskScheduler {
    /// Build a scheduler and load its active tasks from the catalog.
    pub async fn new(
        config: SchedulerConfig,
        meta: Arc<dyn MetaStore>,
        segments: Arc<dyn SegmentMeta>,
        workers: Arc<dyn WorkerManager>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let ctx = TransitionContext {
            meta,
            segments,
            workers,
            facade: JobFacade::new(config.rpc_timeout),
            config,
        };

        let registry = TaskRegistry::new();
        for record in reconcile::load_active_tasks(&ctx).await? {
            registry.insert_loaded(record).await;
        }

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Arc::new(Self {
            ctx,
            registry,
            lifecycle: Mutex::new(Lifecycle::Created),
            shutdown_tx,
            driver: Mutex::new(None),
            tick_lock: tokio::sync::Mutex::new(()),
            enqueue_lock: tokio::sync::Mutex::new(()),
        }))
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
            .lock()
            .map(|l| *l)
            .unwrap_or(Lifecycle::Stopped)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.ctx.config
    }

    /// Spawn the background driver.
    pub fn start(self: &Arc<Self>) -> std::result::Result<(), SchedulerError> {
        let shutdown_rx = {
            let mut lifecycle = self
                .lifecycle
                .lock()
                .map_err(|_| SchedulerError::Stopped)?;
            match *lifecycle {
                Lifecycle::Running => return Err(SchedulerError::AlreadyStarted),
                Lifecycle::Stopped => return Err(SchedulerError::Stopped),
                Lifecycle::Created => *lifecycle = Lifecycle::Running,
            }
            // Subscribed while `stop()` is locked out, so its signal is never missed.
            self.shutdown_tx.subscribe()
        };

        let handle = self.spawn_driver(shutdown_rx);
        if let Ok(mut driver) = self.driver.lock() {
            *driver = Some(handle);
        }
        Ok(())
    }

    fn spawn_driver(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let period = scheduler.ctx.config.schedule_interval;
            info!(interval_ms = period.as_millis() as u64, "Task scheduler started");

            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = interval.tick() => {}
                }
                scheduler.tick().await;
            }
            info!("Task scheduler stopped");
        })
    }

    /// Stop the driver after its in-flight tick completes. Idempotent.
    pub async fn stop(&self) {
        if let Ok(mut lifecycle) = self.lifecycle.lock() {
            *lifecycle = Lifecycle::Stopped;
        }
        let _ = self.shutdown_tx.send(true);

        let handle = self.driver.lock().ok().and_then(|mut d| d.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler driver ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    /// Record a new task in the catalog and register it in `Init`.
    /// Allowed before `start`, rejected after `stop`.
    pub async fn enqueue(&self, mut task: TaskRecord) -> std::result::Result<(), SchedulerError> {
        if self.lifecycle() == Lifecycle::Stopped {
            return Err(SchedulerError::Stopped);
        }
        if task.state != JobState::Init {
            return Err(SchedulerError::InvalidTask {
                task_id: task.task_id,
                reason: format!("new tasks must be in init, got {}", task.state),
            });
        }
        if task.cluster_id.is_empty() {
            task.cluster_id = self.ctx.config.cluster_id.clone();
        }
        task.reset_node();
        task.dirty = false;

        let task_id = task.task_id;
        if !self.ctx.segments_healthy(&task) {
            return Err(SchedulerError::InvalidTask {
                task_id,
                reason: "a referenced segment has been dropped".to_string(),
            });
        }

        let _guard = self.enqueue_lock.lock().await;
        if self.registry.get(task_id).await.is_some() {
            return Err(SchedulerError::DuplicateTask { task_id });
        }
        self.ctx
            .persist(&task)
            .await
            .map_err(|source| SchedulerError::Persist { task_id, source })?;

        let job_type = task.job_type();
        self.registry.insert(task).await?;
        info!(task_id, job_type = %job_type, "Task enqueued");
        Ok(())
    }

    /// Remove every task referencing a dropped segment. No worker is contacted.
    pub async fn on_segment_dropped(&self, segment_id: SegmentId) -> Vec<TaskId> {
        let removed = self
            .registry
            .remove_where(|task| task.spec.references_segment(segment_id))
            .await;
        let ids: Vec<TaskId> = removed.iter().map(|t| t.task_id).collect();
        for task_id in &ids {
            self.ctx.forget(*task_id).await;
        }
        if !ids.is_empty() {
            info!(segment_id, tasks = ?ids, "Removed tasks for dropped segment");
        }
        ids
    }

    /// Run one scheduling pass. Concurrent callers queue behind each other.
    pub async fn tick(&self) {
        let _guard = self.tick_lock.lock().await;
        if self.lifecycle() == Lifecycle::Stopped {
            return;
        }

        let snapshot = self.registry.snapshot().await;
        if snapshot.is_empty() {
            debug!("No tasks to schedule");
            return;
        }

        let mut units = Vec::new();
        let mut batches: HashMap<PollKey, Vec<RegisteredTask>> = HashMap::new();
        for entry in snapshot {
            if !self.ctx.segments_healthy(&entry.record) {
                self.drop_orphan(entry).await;
                continue;
            }
            match entry.record.state {
                JobState::InProgress => batches
                    .entry(PollKey::of(&entry.record))
                    .or_default()
                    .push(entry),
                _ => units.push(Work::Single(entry)),
            }
        }
        units.extend(
            batches
                .into_iter()
                .map(|(key, entries)| Work::Batch(key, entries)),
        );

        debug!(units = units.len(), "Scheduling tick");
        futures::stream::iter(units)
            .for_each_concurrent(self.ctx.config.max_concurrent_transitions, |unit| {
                self.run(unit)
            })
            .await;
    }

    async fn drop_orphan(&self, entry: RegisteredTask) {
        let mut record = entry.record;
        record.set_state(JobState::None, "segment dropped");
        if self
            .registry
            .apply(record.task_id, entry.generation, Outcome::Remove)
            .await
        {
            info!(task_id = record.task_id, "Segment dropped, task removed");
            self.ctx.forget(record.task_id).await;
        }
    }

    async fn run(&self, unit: Work) {
        match unit {
            Work::Single(entry) => {
                let task_id = entry.record.task_id;
                let outcome = match entry.record.state {
                    JobState::Init => self.ctx.process_init(entry.record).await,
                    JobState::Retry => self.ctx.process_retry(entry.record).await,
                    JobState::Finished | JobState::Failed => {
                        self.ctx.process_terminal(entry.record).await
                    }
                    JobState::None => Outcome::Remove,
                    JobState::InProgress => Outcome::Update(entry.record),
                };
                self.commit(task_id, entry.generation, outcome).await;
            }
            Work::Batch(key, entries) => {
                let generations: HashMap<TaskId, u64> = entries
                    .iter()
                    .map(|e| (e.record.task_id, e.generation))
                    .collect();
                let records = entries.into_iter().map(|e| e.record).collect();
                for (task_id, outcome) in self.ctx.process_in_progress(&key, records).await {
                    if let Some(generation) = generations.get(&task_id) {
                        self.commit(task_id, *generation, outcome).await;
                    }
                }
            }
        }
    }

    /// Apply a transition outcome. A task removed while its transition ran
    /// may have been written back by that transition, so its record is
    /// deleted again.
    async fn commit(&self, task_id: TaskId, generation: u64, outcome: Outcome) {
        if self.registry.apply(task_id, generation, outcome).await {
            return;
        }
        if self.registry.get(task_id).await.is_none() {
            debug!(task_id, "Task removed during its transition, discarding record");
            self.ctx.forget(task_id).await;
        }
    }

    pub async fn get_task(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.registry.get(task_id).await
    }

    /// Records for the requested ids, skipping unknown ones.
    pub async fn query_jobs(&self, task_ids: &[TaskId]) -> Vec<TaskRecord> {
        let mut found = Vec::with_capacity(task_ids.len());
        for task_id in task_ids {
            if let Some(record) = self.registry.get(*task_id).await {
                found.push(record);
            }
        }
        found
    }

    pub async fn list_tasks(&self) -> Vec<TaskRecord> {
        self.registry
            .snapshot()
            .await
            .into_iter()
            .map(|e| e.record)
            .collect()
    }

    pub async fn stats(&self) -> TaskSummary {
        self.registry.summary().await
    }
}
