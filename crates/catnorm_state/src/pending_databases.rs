//! Staging area for source databases discovered but not yet bound to a
//! project, mirroring the teacher's staging-before-active pattern.

use catnorm_db::{DbError, DbPool, DbTimestamp, Result};
use catnorm_ids::SourceDatabaseId;

#[derive(Debug, Clone)]
pub struct PendingDatabase {
    pub id: SourceDatabaseId,
    pub candidate_name: String,
    pub path: String,
    pub file_size: u64,
    pub discovered_at: DbTimestamp,
}

impl PendingDatabase {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self> {
        use sqlx::Row;
        let id: String = row.try_get("id")?;
        let file_size: i64 = row.try_get("file_size")?;
        let discovered_at: String = row.try_get("discovered_at")?;
        Ok(Self {
            id: id.parse().map_err(|e| DbError::InvalidState(format!("invalid source database id {id:?}: {e}")))?,
            candidate_name: row.try_get("candidate_name")?,
            path: row.try_get("path")?,
            file_size: file_size.max(0) as u64,
            discovered_at: DbTimestamp::from_rfc3339(&discovered_at).map_err(|e| DbError::InvalidState(e.to_string()))?,
        })
    }
}

pub async fn discover(pool: &DbPool, candidate_name: &str, path: &str, file_size: u64) -> Result<SourceDatabaseId> {
    let id = SourceDatabaseId::new();
    let now = DbTimestamp::now();
    sqlx::query("INSERT INTO pending_databases (id, candidate_name, path, file_size, discovered_at) VALUES (?, ?, ?, ?, ?)")
        .bind(id.to_string())
        .bind(candidate_name)
        .bind(path)
        .bind(file_size as i64)
        .bind(now.to_rfc3339())
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn list(pool: &DbPool) -> Result<Vec<PendingDatabase>> {
    let rows = sqlx::query("SELECT id, candidate_name, path, file_size, discovered_at FROM pending_databases ORDER BY discovered_at")
        .fetch_all(pool)
        .await?;
    rows.iter().map(PendingDatabase::from_row).collect()
}

/// Remove a pending entry once it has been bound into a real SourceDatabase
/// (or discarded by the operator).
pub async fn remove(pool: &DbPool, id: SourceDatabaseId) -> Result<()> {
    sqlx::query("DELETE FROM pending_databases WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catnorm_db::{create_pool, DbConfig};

    #[tokio::test]
    async fn discover_then_remove() {
        let pool = create_pool(DbConfig::in_memory()).await.unwrap();
        crate::schema::ensure_schema(&pool).await.unwrap();
        let id = discover(&pool, "export", "/data/export.db", 4096).await.unwrap();
        assert_eq!(list(&pool).await.unwrap().len(), 1);
        remove(&pool, id).await.unwrap();
        assert!(list(&pool).await.unwrap().is_empty());
    }
}
