//! Session repository: `sessions` + `session_history`.
//!
//! Status transitions are validated against `SessionStatus::can_transition_to`
//! before being written; callers (the session controller) own the decision of
//! *which* transition to attempt, this module only enforces that it is legal
//! and persists it.

use crate::models::{Session, SessionHistoryEntry};
use catnorm_db::{DbError, DbPool, DbTimestamp, Result};
use catnorm_ids::{ProjectId, SessionId, SourceDatabaseId};
use catnorm_protocol::{SessionStatus, Stage};

/// Create a new session in `pending`. Fails if another session targeting the
/// same (project, source-database) pair is already `running`.
pub async fn create(
    pool: &DbPool,
    project_id: ProjectId,
    source_database_id: SourceDatabaseId,
    priority: i32,
    timeout_seconds: u64,
) -> Result<SessionId> {
    let (running,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM sessions WHERE project_id = ? AND source_database_id = ? AND status = 'running'",
    )
    .bind(project_id.to_string())
    .bind(source_database_id.to_string())
    .fetch_one(pool)
    .await?;
    if running > 0 {
        return Err(DbError::constraint(format!(
            "a session is already running for project {project_id} / source database {source_database_id}"
        )));
    }

    let id = SessionId::new();
    let now = DbTimestamp::now();
    sqlx::query(
        r#"INSERT INTO sessions
           (id, project_id, source_database_id, status, priority, timeout_seconds, last_activity_at, created_at)
           VALUES (?, ?, ?, 'pending', ?, ?, ?, ?)"#,
    )
    .bind(id.to_string())
    .bind(project_id.to_string())
    .bind(source_database_id.to_string())
    .bind(priority)
    .bind(timeout_seconds as i64)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn get(pool: &DbPool, id: SessionId) -> Result<Session> {
    let row = sqlx::query(
        "SELECT id, project_id, source_database_id, status, priority, timeout_seconds, \
         started_at, finished_at, last_activity_at, created_at FROM sessions WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DbError::not_found(format!("session {id}")))?;
    Session::from_row(&row)
}

pub async fn list_for_project(pool: &DbPool, project_id: ProjectId) -> Result<Vec<Session>> {
    let rows = sqlx::query(
        "SELECT id, project_id, source_database_id, status, priority, timeout_seconds, \
         started_at, finished_at, last_activity_at, created_at FROM sessions \
         WHERE project_id = ? ORDER BY created_at",
    )
    .bind(project_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(Session::from_row).collect()
}

/// Move a session to `next` status. Rejects transitions not allowed by
/// `SessionStatus::can_transition_to`. Stamps `started_at`/`finished_at` on
/// the edges that define them.
pub async fn transition(pool: &DbPool, id: SessionId, next: SessionStatus) -> Result<()> {
    let current = get(pool, id).await?;
    if !current.status.can_transition_to(next) {
        return Err(DbError::invalid_state(format!(
            "session {id} cannot move from {} to {next}",
            current.status
        )));
    }

    let now = DbTimestamp::now();
    match next {
        SessionStatus::Running if current.started_at.is_none() => {
            sqlx::query("UPDATE sessions SET status = ?, started_at = ?, last_activity_at = ? WHERE id = ?")
                .bind(next.as_str())
                .bind(now.to_rfc3339())
                .bind(now.to_rfc3339())
                .bind(id.to_string())
                .execute(pool)
                .await?;
        }
        SessionStatus::Stopped | SessionStatus::Completed | SessionStatus::Failed => {
            sqlx::query("UPDATE sessions SET status = ?, finished_at = ?, last_activity_at = ? WHERE id = ?")
                .bind(next.as_str())
                .bind(now.to_rfc3339())
                .bind(now.to_rfc3339())
                .bind(id.to_string())
                .execute(pool)
                .await?;
        }
        SessionStatus::Pending => {
            // revert_to rewinds a session to pending: clear the finished marker
            // so a subsequent start() can stamp a fresh started_at.
            sqlx::query(
                "UPDATE sessions SET status = 'pending', started_at = NULL, finished_at = NULL, last_activity_at = ? \
                 WHERE id = ?",
            )
            .bind(now.to_rfc3339())
            .bind(id.to_string())
            .execute(pool)
            .await?;
        }
        _ => {
            sqlx::query("UPDATE sessions SET status = ?, last_activity_at = ? WHERE id = ?")
                .bind(next.as_str())
                .bind(now.to_rfc3339())
                .bind(id.to_string())
                .execute(pool)
                .await?;
        }
    }
    Ok(())
}

pub async fn touch_last_activity(pool: &DbPool, id: SessionId) -> Result<()> {
    let now = DbTimestamp::now();
    sqlx::query("UPDATE sessions SET last_activity_at = ? WHERE id = ?")
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Append one stage outcome to the audit trail.
pub async fn record_history(
    pool: &DbPool,
    session_id: SessionId,
    outcome: &catnorm_protocol::StageOutcome,
) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO session_history
           (session_id, stage, version, rows_in, rows_out, rows_failed, started_at, finished_at, error)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(session_id.to_string())
    .bind(outcome.stage.as_str())
    .bind(outcome.version)
    .bind(outcome.rows_in as i64)
    .bind(outcome.rows_out as i64)
    .bind(outcome.rows_failed as i64)
    .bind(DbTimestamp::from_chrono(outcome.started_at).to_rfc3339())
    .bind(outcome.finished_at.map(|t| DbTimestamp::from_chrono(t).to_rfc3339()))
    .bind(&outcome.error)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn history(pool: &DbPool, session_id: SessionId) -> Result<Vec<catnorm_protocol::StageOutcome>> {
    let rows = sqlx::query(
        "SELECT session_id, stage, version, rows_in, rows_out, rows_failed, started_at, finished_at, error \
         FROM session_history WHERE session_id = ? ORDER BY started_at",
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| SessionHistoryEntry::from_row(row).map(|entry| entry.to_stage_outcome()))
        .collect()
}

/// Drop every history entry for stages strictly after `target_stage`, as
/// part of `revert_to`.
pub async fn truncate_history_after(pool: &DbPool, session_id: SessionId, target_stage: Stage) -> Result<()> {
    for stage in Stage::ORDER {
        if stage > target_stage {
            sqlx::query("DELETE FROM session_history WHERE session_id = ? AND stage = ?")
                .bind(session_id.to_string())
                .bind(stage.as_str())
                .execute(pool)
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catnorm_db::{create_pool, DbConfig};
    use catnorm_protocol::ProjectType;

    async fn fixture() -> (DbPool, ProjectId, SourceDatabaseId) {
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
        (pool, project_id, source_id)
    }

    #[tokio::test]
    async fn second_concurrent_session_is_rejected() {
        let (pool, project_id, source_id) = fixture().await;
        let first = create(&pool, project_id, source_id, 0, 3600).await.unwrap();
        transition(&pool, first, SessionStatus::Running).await.unwrap();

        assert!(create(&pool, project_id, source_id, 0, 3600).await.is_err());
    }

    #[tokio::test]
    async fn rejects_illegal_transition() {
        let (pool, project_id, source_id) = fixture().await;
        let id = create(&pool, project_id, source_id, 0, 3600).await.unwrap();
        assert!(transition(&pool, id, SessionStatus::Completed).await.is_err());
        assert!(transition(&pool, id, SessionStatus::Running).await.is_ok());
        assert!(transition(&pool, id, SessionStatus::Completed).await.is_ok());
    }

    #[tokio::test]
    async fn history_round_trips() {
        let (pool, project_id, source_id) = fixture().await;
        let id = create(&pool, project_id, source_id, 0, 3600).await.unwrap();
        let outcome = catnorm_protocol::StageOutcome {
            stage: Stage::Preprocess,
            version: 1,
            rows_in: 10,
            rows_out: 10,
            rows_failed: 0,
            started_at: chrono::Utc::now(),
            finished_at: Some(chrono::Utc::now()),
            error: None,
        };
        record_history(&pool, id, &outcome).await.unwrap();
        let entries = history(&pool, id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].stage, Stage::Preprocess);
    }
}
