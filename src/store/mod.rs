//! Persistence: the durable task catalog and segment metadata.

pub mod libsql_backend;
pub mod migrations;
pub mod segments;
pub mod traits;

pub use libsql_backend::LibSqlMetaStore;
pub use segments::SegmentRegistry;
pub use traits::{MetaStore, SegmentMeta};
