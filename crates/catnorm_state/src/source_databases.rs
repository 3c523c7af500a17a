//! Source-database repository.
//!
//! A file becomes "bound" to exactly one project; re-uploading a file whose
//! name already exists for that project gets a unique path by appending a
//! timestamp suffix, rather than rejecting the upload.

use crate::models::{SourceDatabase, SourceDatabaseStatus};
use catnorm_db::{DbError, DbPool, DbTimestamp, Result};
use catnorm_ids::{ProjectId, SourceDatabaseId};
use catnorm_protocol::ProjectType;

/// Resolve the display name for a source database: prefer the catalog's own
/// name when present and non-empty, falling back to the file name (sans
/// extension) otherwise (Open Question 1).
pub fn resolve_display_name(catalog_name: Option<&str>, file_name: &str) -> String {
    if let Some(name) = catalog_name {
        let trimmed = name.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    std::path::Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string())
}

/// Produce a path unique among the project's existing source databases by
/// appending a timestamp suffix on collision.
async fn unique_path(pool: &DbPool, project_id: ProjectId, path: &str) -> Result<String> {
    let (exists,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM source_databases WHERE project_id = ? AND path = ?")
        .bind(project_id.to_string())
        .bind(path)
        .fetch_one(pool)
        .await?;
    if exists == 0 {
        return Ok(path.to_string());
    }

    let suffix = DbTimestamp::now().unix_millis();
    let candidate = std::path::Path::new(path);
    let parent = candidate.parent().map(|p| p.to_string_lossy().into_owned());
    let stem = candidate.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = candidate.extension().map(|e| e.to_string_lossy().into_owned());

    let new_name = match ext {
        Some(ext) => format!("{stem}_{suffix}.{ext}"),
        None => format!("{stem}_{suffix}"),
    };
    Ok(match parent {
        Some(parent) if !parent.is_empty() => format!("{parent}/{new_name}"),
        _ => new_name,
    })
}

pub async fn create(
    pool: &DbPool,
    project_id: ProjectId,
    display_name: &str,
    path: &str,
    database_type: ProjectType,
    file_size: u64,
) -> Result<SourceDatabaseId> {
    let id = SourceDatabaseId::new();
    let now = DbTimestamp::now();
    let path = unique_path(pool, project_id, path).await?;
    sqlx::query(
        r#"INSERT INTO source_databases
           (id, project_id, display_name, path, database_type, status, file_size, created_at)
           VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)"#,
    )
    .bind(id.to_string())
    .bind(project_id.to_string())
    .bind(display_name)
    .bind(&path)
    .bind(database_type.as_str())
    .bind(file_size as i64)
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn get(pool: &DbPool, id: SourceDatabaseId) -> Result<SourceDatabase> {
    let row = sqlx::query(
        "SELECT id, project_id, display_name, path, database_type, status, file_size, created_at \
         FROM source_databases WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DbError::not_found(format!("source database {id}")))?;
    SourceDatabase::from_row(&row)
}

pub async fn list_for_project(pool: &DbPool, project_id: ProjectId) -> Result<Vec<SourceDatabase>> {
    let rows = sqlx::query(
        "SELECT id, project_id, display_name, path, database_type, status, file_size, created_at \
         FROM source_databases WHERE project_id = ? ORDER BY created_at",
    )
    .bind(project_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(SourceDatabase::from_row).collect()
}

pub async fn list_active_for_project(pool: &DbPool, project_id: ProjectId) -> Result<Vec<SourceDatabase>> {
    let rows = sqlx::query(
        "SELECT id, project_id, display_name, path, database_type, status, file_size, created_at \
         FROM source_databases WHERE project_id = ? AND status = 'active' ORDER BY created_at",
    )
    .bind(project_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(SourceDatabase::from_row).collect()
}

pub async fn set_status(pool: &DbPool, id: SourceDatabaseId, status: SourceDatabaseStatus) -> Result<()> {
    let affected = sqlx::query("UPDATE source_databases SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id.to_string())
        .execute(pool)
        .await?
        .rows_affected();
    if affected == 0 {
        return Err(DbError::not_found(format!("source database {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catnorm_db::{create_pool, DbConfig};

    #[test]
    fn display_name_prefers_catalog_name() {
        assert_eq!(resolve_display_name(Some("Основной склад"), "export_2024.db"), "Основной склад");
        assert_eq!(resolve_display_name(Some("  "), "export_2024.db"), "export_2024");
        assert_eq!(resolve_display_name(None, "export_2024.db"), "export_2024");
    }

    async fn pool_with_project() -> (DbPool, ProjectId) {
        let pool = create_pool(DbConfig::in_memory()).await.unwrap();
        crate::schema::ensure_schema(&pool).await.unwrap();
        let client_id = crate::clients::create(&pool, "Acme", None).await.unwrap();
        let project_id = crate::projects::create(&pool, client_id, "Bolts", ProjectType::Nomenclature)
            .await
            .unwrap();
        (pool, project_id)
    }

    #[tokio::test]
    async fn reupload_gets_a_unique_path() {
        let (pool, project_id) = pool_with_project().await;
        create(&pool, project_id, "export", "/data/export.db", ProjectType::Nomenclature, 4096)
            .await
            .unwrap();
        let second = create(&pool, project_id, "export", "/data/export.db", ProjectType::Nomenclature, 4096)
            .await
            .unwrap();
        let db = get(&pool, second).await.unwrap();
        assert_ne!(db.path, "/data/export.db");
        assert!(db.path.starts_with("/data/export_"));
    }

    #[tokio::test]
    async fn set_status_transitions_and_filters_active_listing() {
        let (pool, project_id) = pool_with_project().await;
        let id = create(&pool, project_id, "export", "/data/export.db", ProjectType::Nomenclature, 4096)
            .await
            .unwrap();
        assert!(list_active_for_project(&pool, project_id).await.unwrap().is_empty());
        set_status(&pool, id, SourceDatabaseStatus::Active).await.unwrap();
        assert_eq!(list_active_for_project(&pool, project_id).await.unwrap().len(), 1);
    }
}
