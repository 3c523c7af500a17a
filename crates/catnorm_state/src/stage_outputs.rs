//! Stage-output repository: one row per `(session_id, stage, version)`.
//!
//! `revert_to` in [`crate::normalized`] deletes the rows this module writes;
//! this module only inserts and lists them.

use crate::models::StageOutputRow;
use catnorm_db::{DbPool, DbTimestamp, Result};
use catnorm_ids::SessionId;
use catnorm_protocol::Stage;

pub struct NewStageOutput {
    pub session_id: SessionId,
    pub stage: Stage,
    pub version: i64,
    pub rows_in: u64,
    pub rows_out: u64,
    pub rows_failed: u64,
    pub stats: serde_json::Value,
}

/// Record one stage's output, overwriting any prior row for the same
/// `(session_id, stage, version)` (stages are idempotent on re-run).
pub async fn insert(pool: &DbPool, output: NewStageOutput) -> Result<()> {
    let now = DbTimestamp::now();
    let stats_json = serde_json::to_string(&output.stats)?;
    sqlx::query(
        r#"INSERT INTO stage_outputs
           (session_id, stage, version, rows_in, rows_out, rows_failed, stats_json, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(session_id, stage, version)
           DO UPDATE SET rows_in = excluded.rows_in, rows_out = excluded.rows_out,
               rows_failed = excluded.rows_failed, stats_json = excluded.stats_json,
               created_at = excluded.created_at"#,
    )
    .bind(output.session_id.to_string())
    .bind(output.stage.as_str())
    .bind(output.version)
    .bind(output.rows_in as i64)
    .bind(output.rows_out as i64)
    .bind(output.rows_failed as i64)
    .bind(stats_json)
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_for_session(pool: &DbPool, session_id: SessionId) -> Result<Vec<StageOutputRow>> {
    let rows = sqlx::query(
        "SELECT session_id, stage, version, rows_in, rows_out, rows_failed, stats_json, created_at \
         FROM stage_outputs WHERE session_id = ? ORDER BY stage, version",
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(StageOutputRow::from_row).collect()
}

/// The latest recorded version for `stage`, if the stage has ever run for
/// this session. Used by `resume` to find the first stage whose output is
/// missing or stale.
pub async fn latest_version(pool: &DbPool, session_id: SessionId, stage: Stage) -> Result<Option<i64>> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT MAX(version) FROM stage_outputs WHERE session_id = ? AND stage = ?")
            .bind(session_id.to_string())
            .bind(stage.as_str())
            .fetch_optional(pool)
            .await?;
    Ok(row.and_then(|(v,)| if v == 0 { None } else { Some(v) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use catnorm_db::{create_pool, DbConfig};
    use catnorm_protocol::ProjectType;

    async fn session_fixture() -> (DbPool, SessionId) {
        let pool = create_pool(DbConfig::in_memory()).await.unwrap();
        crate::schema::ensure_schema(&pool).await.unwrap();
        let client_id = crate::clients::create(&pool, "Acme", None).await.unwrap();
        let project_id = crate::projects::create(&pool, client_id, "Bolts", ProjectType::Nomenclature)
            .await
            .unwrap();
        let source_id = crate::source_databases::create(
            &pool,
            project_id,
            "export",
            "/data/export.db",
            ProjectType::Nomenclature,
            4096,
        )
        .await
        .unwrap();
        let session_id = crate::sessions::create(&pool, project_id, source_id, 0, 3600).await.unwrap();
        (pool, session_id)
    }

    #[tokio::test]
    async fn insert_is_idempotent_per_version() {
        let (pool, session_id) = session_fixture().await;
        insert(
            &pool,
            NewStageOutput {
                session_id,
                stage: Stage::Preprocess,
                version: 1,
                rows_in: 10,
                rows_out: 10,
                rows_failed: 0,
                stats: serde_json::json!({}),
            },
        )
        .await
        .unwrap();
        insert(
            &pool,
            NewStageOutput {
                session_id,
                stage: Stage::Preprocess,
                version: 1,
                rows_in: 10,
                rows_out: 9,
                rows_failed: 1,
                stats: serde_json::json!({}),
            },
        )
        .await
        .unwrap();

        let rows = list_for_session(&pool, session_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rows_failed, 1);
    }

    #[tokio::test]
    async fn latest_version_tracks_reruns() {
        let (pool, session_id) = session_fixture().await;
        assert_eq!(latest_version(&pool, session_id, Stage::Preprocess).await.unwrap(), None);
        insert(
            &pool,
            NewStageOutput {
                session_id,
                stage: Stage::Preprocess,
                version: 1,
                rows_in: 1,
                rows_out: 1,
                rows_failed: 0,
                stats: serde_json::json!({}),
            },
        )
        .await
        .unwrap();
        assert_eq!(latest_version(&pool, session_id, Stage::Preprocess).await.unwrap(), Some(1));
    }
}
