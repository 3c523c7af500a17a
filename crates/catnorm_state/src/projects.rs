//! Project repository.

use crate::models::Project;
use catnorm_db::{DbError, DbPool, DbTimestamp, Result};
use catnorm_ids::{ClientId, ProjectId};
use catnorm_protocol::ProjectType;

pub async fn create(pool: &DbPool, client_id: ClientId, name: &str, project_type: ProjectType) -> Result<ProjectId> {
    let id = ProjectId::new();
    let now = DbTimestamp::now();
    sqlx::query("INSERT INTO projects (id, client_id, name, project_type, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(id.to_string())
        .bind(client_id.to_string())
        .bind(name)
        .bind(project_type.as_str())
        .bind(now.to_rfc3339())
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn get(pool: &DbPool, id: ProjectId) -> Result<Project> {
    let row = sqlx::query("SELECT id, client_id, name, project_type, created_at FROM projects WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::not_found(format!("project {id}")))?;
    Project::from_row(&row)
}

pub async fn list_for_client(pool: &DbPool, client_id: ClientId) -> Result<Vec<Project>> {
    let rows = sqlx::query(
        "SELECT id, client_id, name, project_type, created_at FROM projects WHERE client_id = ? ORDER BY created_at",
    )
    .bind(client_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(Project::from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use catnorm_db::{create_pool, DbConfig};

    #[tokio::test]
    async fn create_then_list_for_client() {
        let pool = create_pool(DbConfig::in_memory()).await.unwrap();
        crate::schema::ensure_schema(&pool).await.unwrap();
        let client_id = crate::clients::create(&pool, "Acme", None).await.unwrap();
        create(&pool, client_id, "Bolts", ProjectType::Nomenclature).await.unwrap();
        let projects = list_for_client(&pool, client_id).await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].project_type, ProjectType::Nomenclature);
    }
}
