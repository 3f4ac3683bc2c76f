//! Version-tracked schema migrations for the task catalog.
//!
//! `run_migrations()` reads the highest applied version from `_migrations`
//! and applies every newer step in order.

use libsql::Connection;

use crate::error::MetaError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "task_records",
    sql: r#"
            CREATE TABLE IF NOT EXISTS task_records (
                task_id INTEGER PRIMARY KEY,
                job_type TEXT NOT NULL,
                cluster_id TEXT NOT NULL,
                state TEXT NOT NULL,
                node_id INTEGER,
                version INTEGER NOT NULL DEFAULT 0,
                fail_reason TEXT NOT NULL DEFAULT '',
                spec TEXT NOT NULL,
                result TEXT,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_task_records_state ON task_records(state);
            CREATE INDEX IF NOT EXISTS idx_task_records_job_type ON task_records(job_type);
        "#,
}];

/// Run all pending migrations against the given connection.
pub async fn run_migrations(conn: &Connection) -> Result<(), MetaError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| MetaError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        conn.execute_batch(migration.sql).await.map_err(|e| {
            MetaError::Migration(format!(
                "Migration V{} ({}) failed: {e}",
                migration.version, migration.name
            ))
        })?;
        record_version(conn, migration.version, migration.name).await?;
    }

    Ok(())
}

/// Highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, MetaError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| MetaError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| MetaError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| MetaError::Migration(format!("Failed to parse migration version: {e}"))),
        None => Ok(0),
    }
}

async fn record_version(conn: &Connection, version: i64, name: &str) -> Result<(), MetaError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| MetaError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
