use std::sync::Arc;

use anyhow::Context;

use index_coord::api::coordinator_routes;
use index_coord::config::ServiceConfig;
use index_coord::scheduler::TaskScheduler;
use index_coord::store::{LibSqlMetaStore, MetaStore, SegmentRegistry};
use index_coord::worker::{HttpWorkerClient, StaticWorkerManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env().context("invalid configuration")?;

    eprintln!("Index coordinator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Cluster: {}", config.scheduler.cluster_id);
    eprintln!("   Catalog: {}", config.db_path.display());
    eprintln!("   API: http://0.0.0.0:{}/api/v1/jobs", config.http_port);
    eprintln!("   Workers: {}", config.workers.len());

    // ── Catalog ──────────────────────────────────────────────────────────
    let meta: Arc<dyn MetaStore> = Arc::new(
        LibSqlMetaStore::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open catalog at {}", config.db_path.display()))?,
    );

    // ── Workers ──────────────────────────────────────────────────────────
    let workers = Arc::new(StaticWorkerManager::new());
    for endpoint in &config.workers {
        workers.add_node(
            endpoint.node_id,
            Arc::new(HttpWorkerClient::new(endpoint.node_id, &endpoint.base_url)),
        );
    }
    if config.workers.is_empty() {
        tracing::warn!("No workers configured (INDEX_COORD_WORKERS); tasks will wait in init");
    }

    // ── Scheduler ────────────────────────────────────────────────────────
    let segments = Arc::new(SegmentRegistry::new());
    let scheduler = TaskScheduler::new(
        config.scheduler.clone(),
        meta,
        segments.clone(),
        workers,
    )
    .await
    .context("failed to start task scheduler")?;
    scheduler.start()?;

    // ── HTTP API ─────────────────────────────────────────────────────────
    let app = coordinator_routes(Arc::clone(&scheduler), segments);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port))
        .await
        .with_context(|| format!("failed to bind port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "Coordinator API started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await
        .context("API server failed")?;

    scheduler.stop().await;
    Ok(())
}
