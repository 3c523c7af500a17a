//! Schema creation for the service's own session/config store.
//!
//! One `CREATE TABLE IF NOT EXISTS` / `CREATE INDEX IF NOT EXISTS` block per
//! concern, run in dependency order; additive `ALTER TABLE ... ADD COLUMN`
//! calls are tolerated to fail (duplicate column) so the same schema module
//! can be re-run against an older database on every startup.

use catnorm_db::{DbPool, Result};
use tracing::info;

/// Create every table and index this crate owns, idempotently.
pub async fn ensure_schema(pool: &DbPool) -> Result<()> {
    create_catalog_registration_tables(pool).await?;
    create_catalog_item_tables(pool).await?;
    create_normalized_tables(pool).await?;
    create_session_tables(pool).await?;
    create_stage_output_tables(pool).await?;
    create_benchmark_tables(pool).await?;
    create_pending_database_tables(pool).await?;
    info!("catnorm_state schema verified");
    Ok(())
}

async fn create_catalog_registration_tables(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS clients (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            country TEXT,
            created_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL REFERENCES clients(id),
            name TEXT NOT NULL,
            project_type TEXT NOT NULL CHECK (project_type IN ('nomenclature', 'counterparty')),
            created_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_projects_client ON projects(client_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS source_databases (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id),
            display_name TEXT NOT NULL,
            path TEXT NOT NULL,
            database_type TEXT NOT NULL CHECK (database_type IN ('nomenclature', 'counterparty')),
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'bound', 'active', 'inactive')),
            file_size INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(project_id, path)
        )"#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_source_databases_project ON source_databases(project_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_source_databases_status ON source_databases(status)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_catalog_item_tables(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS catalog_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_database_id TEXT NOT NULL REFERENCES source_databases(id),
            source_reference TEXT NOT NULL,
            source_name TEXT NOT NULL,
            code TEXT,
            attributes_json TEXT NOT NULL DEFAULT '{}',
            ingested_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_catalog_items_source_db ON catalog_items(source_database_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_normalized_tables(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS normalized_data (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            source_item_id INTEGER NOT NULL,
            source_reference TEXT NOT NULL,
            source_name TEXT NOT NULL,
            code TEXT,
            normalized_name TEXT NOT NULL,
            normalized_reference TEXT,
            category TEXT NOT NULL DEFAULT '',
            merged_count INTEGER NOT NULL DEFAULT 0,
            ai_confidence REAL NOT NULL DEFAULT 0.0,
            ai_reasoning TEXT,
            processing_level TEXT NOT NULL CHECK (processing_level IN ('basic', 'ai_enhanced', 'benchmark')),
            classification_code TEXT,
            classification_name TEXT,
            classification_confidence REAL,
            stage_version INTEGER NOT NULL,
            stage TEXT NOT NULL CHECK (stage IN ('preprocess', 'patterns', 'ai', 'categorize')),
            created_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_normalized_session ON normalized_data(session_id, project_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_normalized_stage_version ON normalized_data(session_id, stage, stage_version)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_normalized_source_item ON normalized_data(source_item_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS normalized_item_attributes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            normalized_item_id TEXT NOT NULL REFERENCES normalized_data(id) ON DELETE CASCADE,
            attr_key TEXT NOT NULL,
            attr_value TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_normalized_attrs_item ON normalized_item_attributes(normalized_item_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_session_tables(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            source_database_id TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('pending', 'running', 'stopped', 'completed', 'failed')),
            priority INTEGER NOT NULL DEFAULT 0,
            timeout_seconds INTEGER NOT NULL DEFAULT 0,
            started_at TEXT,
            finished_at TEXT,
            last_activity_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_project_db ON sessions(project_id, source_database_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status)")
        .execute(pool)
        .await?;

    // Additive: older rows predate the priority/timeout columns.
    let _ = sqlx::query("ALTER TABLE sessions ADD COLUMN priority INTEGER NOT NULL DEFAULT 0")
        .execute(pool)
        .await;
    let _ = sqlx::query("ALTER TABLE sessions ADD COLUMN timeout_seconds INTEGER NOT NULL DEFAULT 0")
        .execute(pool)
        .await;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS session_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            stage TEXT NOT NULL CHECK (stage IN ('preprocess', 'patterns', 'ai', 'categorize')),
            version INTEGER NOT NULL,
            rows_in INTEGER NOT NULL,
            rows_out INTEGER NOT NULL,
            rows_failed INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            error TEXT
        )"#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_session_history_session ON session_history(session_id, started_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_stage_output_tables(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS stage_outputs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            stage TEXT NOT NULL CHECK (stage IN ('preprocess', 'patterns', 'ai', 'categorize')),
            version INTEGER NOT NULL,
            rows_in INTEGER NOT NULL,
            rows_out INTEGER NOT NULL,
            rows_failed INTEGER NOT NULL,
            stats_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            UNIQUE(session_id, stage, version)
        )"#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_stage_outputs_session_stage ON stage_outputs(session_id, stage)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_benchmark_tables(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS benchmarks (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL REFERENCES clients(id),
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(client_id, name)
        )"#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_benchmarks_client ON benchmarks(client_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_pending_database_tables(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS pending_databases (
            id TEXT PRIMARY KEY,
            candidate_name TEXT NOT NULL,
            path TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            discovered_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catnorm_db::{create_pool, DbConfig};

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let pool = create_pool(DbConfig::in_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        ensure_schema(&pool).await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='sessions'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 1);
    }
}
