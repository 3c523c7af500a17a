//! Normalized-output repository: `normalized_data` + `normalized_item_attributes`.
//!
//! Every row carries a `stage_version`; stages never overwrite a prior
//! version in place, they write a new one. `revert_to` truncates forward.

use crate::models::NormalizedItem;
use catnorm_db::{DbError, DbPool, DbTimestamp, Result};
use catnorm_ids::{CatalogItemId, NormalizedItemId, ProjectId, SessionId};
use catnorm_protocol::{ProcessingLevel, Stage};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct NewNormalizedItem {
    pub session_id: SessionId,
    pub project_id: ProjectId,
    pub source_item_id: CatalogItemId,
    pub source_reference: String,
    pub source_name: String,
    pub code: Option<String>,
    pub normalized_name: String,
    pub normalized_reference: Option<String>,
    pub category: String,
    pub merged_count: u32,
    pub ai_confidence: f64,
    pub ai_reasoning: Option<String>,
    pub processing_level: ProcessingLevel,
    pub classification_code: Option<String>,
    pub classification_name: Option<String>,
    pub classification_confidence: Option<f64>,
    pub stage_version: i64,
    pub stage: Stage,
    pub attributes: HashMap<String, Vec<String>>,
}

/// Insert one normalized item and its attribute bag, returning the new id.
pub async fn insert(pool: &DbPool, item: NewNormalizedItem) -> Result<NormalizedItemId> {
    let id = NormalizedItemId::new();
    let now = DbTimestamp::now();
    sqlx::query(
        r#"INSERT INTO normalized_data
           (id, session_id, project_id, source_item_id, source_reference, source_name, code,
            normalized_name, normalized_reference, category, merged_count, ai_confidence, ai_reasoning,
            processing_level, classification_code, classification_name, classification_confidence,
            stage_version, stage, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(id.to_string())
    .bind(item.session_id.to_string())
    .bind(item.project_id.to_string())
    .bind(item.source_item_id.0)
    .bind(&item.source_reference)
    .bind(&item.source_name)
    .bind(&item.code)
    .bind(&item.normalized_name)
    .bind(&item.normalized_reference)
    .bind(&item.category)
    .bind(item.merged_count as i64)
    .bind(item.ai_confidence)
    .bind(&item.ai_reasoning)
    .bind(item.processing_level.as_str())
    .bind(&item.classification_code)
    .bind(&item.classification_name)
    .bind(item.classification_confidence)
    .bind(item.stage_version)
    .bind(item.stage.as_str())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;

    for (key, values) in &item.attributes {
        for value in values {
            sqlx::query(
                "INSERT INTO normalized_item_attributes (normalized_item_id, attr_key, attr_value) VALUES (?, ?, ?)",
            )
            .bind(id.to_string())
            .bind(key)
            .bind(value)
            .execute(pool)
            .await?;
        }
    }

    Ok(id)
}

pub async fn get(pool: &DbPool, id: NormalizedItemId) -> Result<NormalizedItem> {
    let row = sqlx::query(
        "SELECT id, session_id, project_id, source_item_id, source_reference, source_name, code, \
         normalized_name, normalized_reference, category, merged_count, ai_confidence, ai_reasoning, \
         processing_level, classification_code, classification_name, classification_confidence, \
         stage_version, stage, created_at FROM normalized_data WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DbError::not_found(format!("normalized item {id}")))?;
    NormalizedItem::from_row(&row)
}

/// Attribute bag for a normalized item, reassembled from the key/value table.
pub async fn attributes(pool: &DbPool, id: NormalizedItemId) -> Result<HashMap<String, Vec<String>>> {
    let rows = sqlx::query("SELECT attr_key, attr_value FROM normalized_item_attributes WHERE normalized_item_id = ?")
        .bind(id.to_string())
        .fetch_all(pool)
        .await?;
    let mut attrs: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        use sqlx::Row;
        let key: String = row.try_get("attr_key")?;
        let value: String = row.try_get("attr_value")?;
        attrs.entry(key).or_default().push(value);
    }
    Ok(attrs)
}

/// Every normalized item written for a session, regardless of stage/version.
pub async fn list_for_session(pool: &DbPool, session_id: SessionId) -> Result<Vec<NormalizedItem>> {
    let rows = sqlx::query(
        "SELECT id, session_id, project_id, source_item_id, source_reference, source_name, code, \
         normalized_name, normalized_reference, category, merged_count, ai_confidence, ai_reasoning, \
         processing_level, classification_code, classification_name, classification_confidence, \
         stage_version, stage, created_at FROM normalized_data WHERE session_id = ? ORDER BY created_at",
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.iter().map(NormalizedItem::from_row).collect()
}

/// The latest version of each row for a session at or before `stage`, i.e.
/// the working set a stage executor should read as its input.
pub async fn latest_for_stage(pool: &DbPool, session_id: SessionId, stage: Stage) -> Result<Vec<NormalizedItem>> {
    // Restrict the candidate rows to stage <= `stage` *before* taking the
    // per-item max rowid, otherwise a session that already has later-stage
    // output would hand that later output back as an earlier stage's input.
    let allowed_stages: Vec<&'static str> = Stage::ORDER
        .into_iter()
        .filter(|s| *s <= stage)
        .map(|s| s.as_str())
        .collect();
    let placeholders = allowed_stages.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let sql = format!(
        "SELECT id, session_id, project_id, source_item_id, source_reference, source_name, code, \
         normalized_name, normalized_reference, category, merged_count, ai_confidence, ai_reasoning, \
         processing_level, classification_code, classification_name, classification_confidence, \
         stage_version, stage, created_at \
         FROM normalized_data \
         WHERE session_id = ? AND rowid IN ( \
             SELECT MAX(rowid) FROM normalized_data \
             WHERE session_id = ? AND stage IN ({placeholders}) \
             GROUP BY source_item_id \
         ) \
         ORDER BY source_item_id"
    );

    let mut query = sqlx::query(&sql).bind(session_id.to_string()).bind(session_id.to_string());
    for s in &allowed_stages {
        query = query.bind(*s);
    }
    let rows = query.fetch_all(pool).await?;
    rows.iter().map(NormalizedItem::from_row).collect()
}

/// Roll a session back to `target_stage`: delete stage outputs strictly
/// after it and the normalized items they produced, leaving the target
/// stage's last version as the new frontier.
///
/// Benchmark-derived rows are tagged `processing_level = benchmark` but are
/// written during the AI stage, so `revert_to(Patterns)` removes them the
/// same as any other AI-stage row (Open Question resolution).
pub async fn revert_to(pool: &DbPool, session_id: SessionId, target_stage: Stage) -> Result<()> {
    let mut tx = pool.begin().await?;
    for stage in Stage::ORDER {
        if stage > target_stage {
            sqlx::query("DELETE FROM normalized_data WHERE session_id = ? AND stage = ?")
                .bind(session_id.to_string())
                .bind(stage.as_str())
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM stage_outputs WHERE session_id = ? AND stage = ?")
                .bind(session_id.to_string())
                .bind(stage.as_str())
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM session_history WHERE session_id = ? AND stage = ?")
                .bind(session_id.to_string())
                .bind(stage.as_str())
                .execute(&mut *tx)
                .await?;
        }
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catnorm_db::{create_pool, DbConfig};
    use catnorm_protocol::ProjectType;

    async fn session_fixture() -> (DbPool, SessionId, ProjectId) {
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
        (pool, session_id, project_id)
    }

    fn item(session_id: SessionId, project_id: ProjectId, stage: Stage, version: i64, name: &str) -> NewNormalizedItem {
        NewNormalizedItem {
            session_id,
            project_id,
            source_item_id: CatalogItemId(1),
            source_reference: "1".into(),
            source_name: "Болт М6".into(),
            code: Some("001".into()),
            normalized_name: name.into(),
            normalized_reference: None,
            category: String::new(),
            merged_count: 0,
            ai_confidence: 0.0,
            ai_reasoning: None,
            processing_level: ProcessingLevel::Basic,
            classification_code: None,
            classification_name: None,
            classification_confidence: None,
            stage_version: version,
            stage,
            attributes: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips_attributes() {
        let (pool, session_id, project_id) = session_fixture().await;
        let mut row = item(session_id, project_id, Stage::Preprocess, 1, "болт м6");
        row.attributes.insert("unit".into(), vec!["kg".into()]);
        let id = insert(&pool, row).await.unwrap();
        let fetched = get(&pool, id).await.unwrap();
        assert_eq!(fetched.normalized_name, "болт м6");
        let attrs = attributes(&pool, id).await.unwrap();
        assert_eq!(attrs.get("unit"), Some(&vec!["kg".to_string()]));
    }

    #[tokio::test]
    async fn revert_to_removes_later_stages_only() {
        let (pool, session_id, project_id) = session_fixture().await;
        insert(&pool, item(session_id, project_id, Stage::Preprocess, 1, "a")).await.unwrap();
        insert(&pool, item(session_id, project_id, Stage::Patterns, 1, "b")).await.unwrap();
        insert(&pool, item(session_id, project_id, Stage::Ai, 1, "c")).await.unwrap();

        revert_to(&pool, session_id, Stage::Patterns).await.unwrap();

        let remaining = list_for_session(&pool, session_id).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|r| r.stage <= Stage::Patterns));
    }
}
