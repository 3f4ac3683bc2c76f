//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::task::NodeId;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Correlation token stamped on tasks and sent with every worker RPC.
    pub cluster_id: String,
    /// Period of the scheduling tick.
    pub schedule_interval: Duration,
    /// Upper bound on a single worker RPC or catalog call.
    pub rpc_timeout: Duration,
    /// Maximum number of transitions (or batched polls) running at once within a tick.
    pub max_concurrent_transitions: usize,
    /// Index builds on segments with fewer rows finish without remote work.
    pub min_segment_rows_to_index: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cluster_id: "by-dev".to_string(),
            schedule_interval: Duration::from_secs(1),
            rpc_timeout: Duration::from_secs(10),
            max_concurrent_transitions: 16,
            min_segment_rows_to_index: 1024,
        }
    }
}

impl SchedulerConfig {
    /// Build from `INDEX_COORD_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            cluster_id: std::env::var("INDEX_COORD_CLUSTER_ID").unwrap_or(defaults.cluster_id),
            schedule_interval: env_parse::<u64>("INDEX_COORD_SCHEDULE_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.schedule_interval),
            rpc_timeout: env_parse::<u64>("INDEX_COORD_RPC_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.rpc_timeout),
            max_concurrent_transitions: env_parse("INDEX_COORD_MAX_CONCURRENT_TRANSITIONS")?
                .unwrap_or(defaults.max_concurrent_transitions),
            min_segment_rows_to_index: env_parse("INDEX_COORD_MIN_SEGMENT_ROWS_TO_INDEX")?
                .unwrap_or(defaults.min_segment_rows_to_index),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduling loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schedule_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "schedule_interval".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.rpc_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "rpc_timeout".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.max_concurrent_transitions == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent_transitions".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// A worker node the coordinator may assign jobs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEndpoint {
    pub node_id: NodeId,
    pub base_url: String,
}

impl FromStr for WorkerEndpoint {
    type Err = ConfigError;

    /// Parse `"<node_id>=<base_url>"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| ConfigError::InvalidValue {
            key: "INDEX_COORD_WORKERS".to_string(),
            message: format!("{message}: {s:?}"),
        };

        let (id, url) = s
            .split_once('=')
            .ok_or_else(|| invalid("expected <node_id>=<url>"))?;
        let node_id = id
            .trim()
            .parse::<NodeId>()
            .map_err(|_| invalid("node id is not an integer"))?;
        if node_id <= 0 {
            return Err(invalid("node id must be positive"));
        }
        let base_url = url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(invalid("empty url"));
        }
        Ok(Self { node_id, base_url })
    }
}

/// Configuration of the coordinator binary.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub db_path: PathBuf,
    pub http_port: u16,
    pub workers: Vec<WorkerEndpoint>,
    pub scheduler: SchedulerConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path = std::env::var("INDEX_COORD_DB_PATH")
            .unwrap_or_else(|_| "./data/index-coord.db".to_string());
        let http_port = env_parse("INDEX_COORD_HTTP_PORT")?.unwrap_or(8090);
        let workers = match std::env::var("INDEX_COORD_WORKERS") {
            Ok(raw) => parse_workers(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            db_path: PathBuf::from(db_path),
            http_port,
            workers,
            scheduler: SchedulerConfig::from_env()?,
        })
    }
}

/// Parse a comma-separated worker list.
pub fn parse_workers(raw: &str) -> Result<Vec<WorkerEndpoint>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("cannot parse {raw:?}"),
            }),
        Err(_) => Ok(None),
    }
}
