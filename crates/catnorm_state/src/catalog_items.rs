//! Raw catalog-item repository. Items are immutable once ingested.

use catnorm_db::{DbPool, DbTimestamp, Result};
use catnorm_ids::{CatalogItemId, SourceDatabaseId};
use futures_util::TryStreamExt;
use std::collections::HashMap;

pub async fn insert(
    pool: &DbPool,
    source_database_id: SourceDatabaseId,
    source_reference: &str,
    source_name: &str,
    code: Option<&str>,
    attributes: &HashMap<String, Vec<String>>,
) -> Result<CatalogItemId> {
    let attributes_json = serde_json::to_string(attributes)?;
    let now = DbTimestamp::now();
    let result = sqlx::query(
        r#"INSERT INTO catalog_items
           (source_database_id, source_reference, source_name, code, attributes_json, ingested_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(source_database_id.to_string())
    .bind(source_reference)
    .bind(source_name)
    .bind(code)
    .bind(attributes_json)
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(CatalogItemId(result.last_insert_rowid()))
}

/// Stream every catalog item for `source_database_id` in insertion order,
/// so the preprocess stage never materializes a full source database's
/// rows in memory at once.
pub fn stream_for_source(
    pool: &DbPool,
    source_database_id: SourceDatabaseId,
) -> impl futures_util::Stream<Item = Result<crate::models::CatalogItem>> + '_ {
    sqlx::query(
        "SELECT id, source_database_id, source_reference, source_name, code, attributes_json, ingested_at \
         FROM catalog_items WHERE source_database_id = ? ORDER BY id",
    )
    .bind(source_database_id.to_string())
    .fetch(pool)
    .map_err(catnorm_db::DbError::from)
    .and_then(|row| async move { crate::models::CatalogItem::from_row(&row) })
}

pub async fn count_for_source(pool: &DbPool, source_database_id: SourceDatabaseId) -> Result<u64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM catalog_items WHERE source_database_id = ?")
        .bind(source_database_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use catnorm_db::{create_pool, DbConfig};
    use catnorm_protocol::ProjectType;

    async fn pool_with_source() -> (DbPool, SourceDatabaseId) {
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
        (pool, source_id)
    }

    #[tokio::test]
    async fn insert_then_stream_round_trips() {
        let (pool, source_id) = pool_with_source().await;
        let mut attrs = HashMap::new();
        attrs.insert("unit".to_string(), vec!["kg".to_string()]);
        insert(&pool, source_id, "1", "Болт М6", Some("001"), &attrs).await.unwrap();

        let rows: Vec<_> = stream_for_source(&pool, source_id).try_collect().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_name, "Болт М6");
        assert_eq!(count_for_source(&pool, source_id).await.unwrap(), 1);
    }
}
