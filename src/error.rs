//! Error types for the index coordinator.

use std::time::Duration;

use crate::task::{NodeId, TaskId};

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Meta error: {0}")]
    Meta(#[from] MetaError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Durable catalog errors.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Catalog call timed out after {0:?}")]
    Timeout(Duration),
}

/// Worker RPC errors.
///
/// The scheduler treats every variant the same way: the call did not
/// succeed and the state machine takes its failure edge.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker node {node_id} not found")]
    NodeNotFound { node_id: NodeId },

    #[error("Transport failure talking to node {node_id}: {reason}")]
    Transport { node_id: NodeId, reason: String },

    #[error("Node {node_id} rejected the request: {reason}")]
    Rejected { node_id: NodeId, reason: String },

    #[error("Node {node_id} did not answer within {timeout:?}")]
    Timeout { node_id: NodeId, timeout: Duration },

    #[error("Invalid response from node {node_id}: {reason}")]
    InvalidResponse { node_id: NodeId, reason: String },
}

/// Caller-visible scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Task {task_id} is already registered")]
    DuplicateTask { task_id: TaskId },

    #[error("Task {task_id} cannot be enqueued: {reason}")]
    InvalidTask { task_id: TaskId, reason: String },

    #[error("Task {task_id} could not be recorded in the catalog: {source}")]
    Persist { task_id: TaskId, source: MetaError },

    #[error("Scheduler is already running")]
    AlreadyStarted,

    #[error("Scheduler has been stopped")]
    Stopped,
}

/// Result type alias for the coordinator.
pub type Result<T> = std::result::Result<T, Error>;
