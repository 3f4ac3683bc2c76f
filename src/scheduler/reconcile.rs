//! Startup reconciliation: rebuild the registry from the catalog.

use tracing::{debug, info};

use crate::error::MetaError;
use crate::scheduler::transition::TransitionContext;
use crate::task::{JobState, TaskRecord};

/// Load the tasks the scheduler still has to drive.
///
/// Terminal records are history and stay in the catalog untouched. Records
/// whose segments were dropped are deleted, as is any leftover `None` record.
pub async fn load_active_tasks(ctx: &TransitionContext) -> Result<Vec<TaskRecord>, MetaError> {
    let timeout = ctx.config.rpc_timeout;
    let records = tokio::time::timeout(timeout, ctx.meta.load_all_tasks())
        .await
        .map_err(|_| MetaError::Timeout(timeout))??;

    let total = records.len();
    let mut active = Vec::new();
    let mut pruned = 0usize;

    for mut record in records {
        if record.state.is_terminal() {
            continue;
        }
        if record.state == JobState::None || !ctx.segments_healthy(&record) {
            debug!(task_id = record.task_id, state = %record.state, "Pruning discarded task");
            ctx.forget(record.task_id).await;
            pruned += 1;
            continue;
        }
        if record.state == JobState::Init {
            record.reset_node();
        }
        active.push(record);
    }

    info!(
        loaded = active.len(),
        pruned,
        skipped = total - active.len() - pruned,
        "Task catalog reconciled"
    );
    Ok(active)
}
