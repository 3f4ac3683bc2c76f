//! Worker side of the coordinator.
//!
//! - `client`: RPC message types and the `WorkerClient` trait
//! - `http`: JSON-over-HTTP `WorkerClient`
//! - `manager`: node discovery and selection
//! - `facade`: submit / poll / cancel with per-call timeouts

pub mod client;
pub mod facade;
pub mod http;
pub mod manager;

pub use client::{JobReport, RpcStatus, WorkerClient};
pub use facade::JobFacade;
pub use http::HttpWorkerClient;
pub use manager::{StaticWorkerManager, WorkerManager};
