//! Client registration repository.

use crate::models::Client;
use catnorm_db::{DbError, DbPool, DbTimestamp, Result};
use catnorm_ids::ClientId;

pub async fn create(pool: &DbPool, name: &str, country: Option<&str>) -> Result<ClientId> {
    let id = ClientId::new();
    let now = DbTimestamp::now();
    sqlx::query("INSERT INTO clients (id, name, country, created_at) VALUES (?, ?, ?, ?)")
        .bind(id.to_string())
        .bind(name)
        .bind(country)
        .bind(now.to_rfc3339())
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn get(pool: &DbPool, id: ClientId) -> Result<Client> {
    let row = sqlx::query("SELECT id, name, country, created_at FROM clients WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::not_found(format!("client {id}")))?;
    Client::from_row(&row)
}

pub async fn list(pool: &DbPool) -> Result<Vec<Client>> {
    let rows = sqlx::query("SELECT id, name, country, created_at FROM clients ORDER BY created_at")
        .fetch_all(pool)
        .await?;
    rows.iter().map(Client::from_row).collect()
}

/// Deletion is forbidden while the client still owns any projects.
pub async fn delete(pool: &DbPool, id: ClientId) -> Result<()> {
    let (project_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM projects WHERE client_id = ?")
        .bind(id.to_string())
        .fetch_one(pool)
        .await?;
    if project_count > 0 {
        return Err(DbError::constraint(format!(
            "cannot delete client {id}: {project_count} project(s) still reference it"
        )));
    }
    sqlx::query("DELETE FROM clients WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catnorm_db::{create_pool, DbConfig};

    async fn pool() -> DbPool {
        let pool = create_pool(DbConfig::in_memory()).await.unwrap();
        crate::schema::ensure_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let pool = pool().await;
        let id = create(&pool, "Acme", Some("RU")).await.unwrap();
        let client = get(&pool, id).await.unwrap();
        assert_eq!(client.name, "Acme");
        assert_eq!(client.country.as_deref(), Some("RU"));
    }

    #[tokio::test]
    async fn delete_rejected_while_projects_exist() {
        let pool = pool().await;
        let client_id = create(&pool, "Acme", None).await.unwrap();
        crate::projects::create(&pool, client_id, "Nuts and bolts", catnorm_protocol::ProjectType::Nomenclature)
            .await
            .unwrap();
        assert!(delete(&pool, client_id).await.is_err());
    }
}
