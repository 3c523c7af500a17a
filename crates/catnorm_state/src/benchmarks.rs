//! Client-curated benchmark repository: exemplars that short-circuit the AI
//! stage on an exact name match.

use crate::models::Benchmark;
use catnorm_db::{DbError, DbPool, DbTimestamp, Result};
use catnorm_ids::{BenchmarkId, ClientId};

pub async fn create(pool: &DbPool, client_id: ClientId, name: &str, category: &str) -> Result<BenchmarkId> {
    let id = BenchmarkId::new();
    let now = DbTimestamp::now();
    sqlx::query("INSERT INTO benchmarks (id, client_id, name, category, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(id.to_string())
        .bind(client_id.to_string())
        .bind(name)
        .bind(category)
        .bind(now.to_rfc3339())
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn get(pool: &DbPool, id: BenchmarkId) -> Result<Benchmark> {
    let row = sqlx::query("SELECT id, client_id, name, category, created_at FROM benchmarks WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::not_found(format!("benchmark {id}")))?;
    Benchmark::from_row(&row)
}

/// Exact-name lookup used by the AI stage's short-circuit: a pre-AI name
/// that matches a client benchmark exactly skips the LLM call entirely.
pub async fn find_exact(pool: &DbPool, client_id: ClientId, name: &str) -> Result<Option<Benchmark>> {
    let row = sqlx::query("SELECT id, client_id, name, category, created_at FROM benchmarks WHERE client_id = ? AND name = ?")
        .bind(client_id.to_string())
        .bind(name)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(Benchmark::from_row).transpose()
}

pub async fn list_for_client(pool: &DbPool, client_id: ClientId) -> Result<Vec<Benchmark>> {
    let rows = sqlx::query("SELECT id, client_id, name, category, created_at FROM benchmarks WHERE client_id = ? ORDER BY name")
        .bind(client_id.to_string())
        .fetch_all(pool)
        .await?;
    rows.iter().map(Benchmark::from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use catnorm_db::{create_pool, DbConfig};

    #[tokio::test]
    async fn exact_lookup_matches_only_same_client() {
        let pool = create_pool(DbConfig::in_memory()).await.unwrap();
        crate::schema::ensure_schema(&pool).await.unwrap();
        let client_a = crate::clients::create(&pool, "Acme", None).await.unwrap();
        let client_b = crate::clients::create(&pool, "Globex", None).await.unwrap();
        create(&pool, client_a, "болт м6", "fasteners").await.unwrap();

        assert!(find_exact(&pool, client_a, "болт м6").await.unwrap().is_some());
        assert!(find_exact(&pool, client_b, "болт м6").await.unwrap().is_none());
        assert!(find_exact(&pool, client_a, "болт м8").await.unwrap().is_none());
    }
}
