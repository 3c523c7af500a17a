//! Read-only pre-run statistics over a project's source databases (§4.10).
//!
//! Opens each active source database directly, read-only, independent of
//! whether anything has ever been ingested into [`catnorm_state`] for it —
//! this is meant to answer "what am I about to process" before a session
//! exists. Never writes, never holds a connection past the scan that
//! needs it.

use catnorm_db::{AccessMode, DbConfig};
use catnorm_ids::{ProjectId, SourceDatabaseId};
use catnorm_protocol::defaults::PREVIEW_SHORT_CIRCUIT_ROWS;
use catnorm_protocol::ProjectType;
use catnorm_state::models::SourceDatabase;
use catnorm_text::{normalize, NormalizeOptions};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

pub type Result<T> = std::result::Result<T, PreviewError>;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("database error: {0}")]
    Db(#[from] catnorm_db::DbError),
}

/// Completeness keys checked per project type (§4.10): identifier/address/
/// contacts for counterparty catalogs, articles/units/descriptions for
/// nomenclature ones. Presence is read off the attribute tags
/// `catnorm_stages::preprocess` would itself extract from the raw name.
fn completeness_keys(database_type: ProjectType) -> &'static [&'static str] {
    match database_type {
        ProjectType::Counterparty => &["identifier", "address", "contacts"],
        ProjectType::Nomenclature => &["article", "unit", "description"],
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceDatabasePreview {
    pub source_database_id: SourceDatabaseId,
    pub display_name: String,
    pub database_type: ProjectType,
    pub file_size: u64,
    pub accessible: bool,
    pub row_count: u64,
    pub estimated_duplicate_count: u64,
    /// Percentage (0-100) of rows carrying each completeness key; empty
    /// when the scan was short-circuited for size.
    pub completeness_percent: HashMap<String, f64>,
    pub short_circuited: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectPreview {
    pub project_id: ProjectId,
    pub databases: Vec<SourceDatabasePreview>,
    pub total_row_count: u64,
    pub total_estimated_duplicates: u64,
    pub accessible_count: usize,
    pub inaccessible_count: usize,
}

pub async fn preview_project(pool: &catnorm_db::DbPool, project_id: ProjectId) -> Result<ProjectPreview> {
    let sources = catnorm_state::source_databases::list_active_for_project(pool, project_id).await?;

    let mut databases = Vec::with_capacity(sources.len());
    for source in &sources {
        databases.push(preview_source(source).await);
    }

    let accessible_count = databases.iter().filter(|d| d.accessible).count();
    let inaccessible_count = databases.len() - accessible_count;
    let total_row_count = databases.iter().map(|d| d.row_count).sum();
    let total_estimated_duplicates = databases.iter().map(|d| d.estimated_duplicate_count).sum();

    Ok(ProjectPreview {
        project_id,
        databases,
        total_row_count,
        total_estimated_duplicates,
        accessible_count,
        inaccessible_count,
    })
}

async fn preview_source(source: &SourceDatabase) -> SourceDatabasePreview {
    if let Err(err) = catnorm_db::validate_source_database(Path::new(&source.path)) {
        warn!(source_database = %source.id, error = %err, "source database failed validation, skipping preview scan");
        return SourceDatabasePreview {
            source_database_id: source.id,
            display_name: source.display_name.clone(),
            database_type: source.database_type,
            file_size: source.file_size,
            accessible: false,
            row_count: 0,
            estimated_duplicate_count: 0,
            completeness_percent: HashMap::new(),
            short_circuited: false,
        };
    }

    match scan_source(source).await {
        Ok(preview) => preview,
        Err(err) => {
            warn!(source_database = %source.id, error = %err, "preview scan failed to open source database");
            SourceDatabasePreview {
                source_database_id: source.id,
                display_name: source.display_name.clone(),
                database_type: source.database_type,
                file_size: source.file_size,
                accessible: false,
                row_count: 0,
                estimated_duplicate_count: 0,
                completeness_percent: HashMap::new(),
                short_circuited: false,
            }
        }
    }
}

struct RawRow {
    name: String,
    code: Option<String>,
}

async fn scan_source(source: &SourceDatabase) -> Result<SourceDatabasePreview> {
    let config = DbConfig::read_only(source.path.clone(), 1);
    debug_assert_eq!(config.access_mode, AccessMode::ReadOnly);
    let pool = catnorm_db::create_pool(config).await?;

    let (row_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM catalog_items")
        .fetch_one(&pool)
        .await?;
    let row_count = row_count.max(0) as u64;

    if row_count > PREVIEW_SHORT_CIRCUIT_ROWS {
        pool.close().await;
        let estimated = estimate_duplicate_density(row_count);
        return Ok(SourceDatabasePreview {
            source_database_id: source.id,
            display_name: source.display_name.clone(),
            database_type: source.database_type,
            file_size: source.file_size,
            accessible: true,
            row_count,
            estimated_duplicate_count: estimated,
            completeness_percent: HashMap::new(),
            short_circuited: true,
        });
    }

    let rows: Vec<(String, Option<String>)> =
        sqlx::query_as("SELECT source_name, code FROM catalog_items")
            .fetch_all(&pool)
            .await?;
    pool.close().await;

    let rows: Vec<RawRow> = rows
        .into_iter()
        .map(|(name, code)| RawRow { name, code })
        .collect();

    let completeness_percent = completeness(&rows, source.database_type);
    let estimated_duplicate_count = estimate_exact_duplicates(&rows);

    Ok(SourceDatabasePreview {
        source_database_id: source.id,
        display_name: source.display_name.clone(),
        database_type: source.database_type,
        file_size: source.file_size,
        accessible: true,
        row_count,
        estimated_duplicate_count,
        completeness_percent,
        short_circuited: false,
    })
}

fn estimate_duplicate_density(row_count: u64) -> u64 {
    (row_count as f64 * catnorm_protocol::defaults::PREVIEW_ESTIMATED_DUPLICATE_DENSITY).round() as u64
}

/// Count exact-match duplicates by normalizing every name and grouping:
/// a cheap approximation standing in for the full three-way (exact,
/// fuzzy, semantic) analysis `catnorm_dedup` runs once a session exists.
fn estimate_exact_duplicates(rows: &[RawRow]) -> u64 {
    let options = NormalizeOptions::default();
    let mut groups: HashMap<String, u64> = HashMap::new();
    for row in rows {
        if let Ok(normalized) = normalize(&row.name, &options) {
            *groups.entry(normalized).or_insert(0) += 1;
        }
    }
    groups.values().filter(|count| **count > 1).map(|count| count - 1).sum()
}

fn completeness(rows: &[RawRow], database_type: ProjectType) -> HashMap<String, f64> {
    let keys = completeness_keys(database_type);
    let mut present: HashMap<&str, u64> = keys.iter().map(|k| (*k, 0)).collect();
    let total = rows.len().max(1) as f64;

    for row in rows {
        for key in keys {
            if row_has_attribute(row, key) {
                *present.get_mut(key).unwrap() += 1;
            }
        }
    }

    present
        .into_iter()
        .map(|(key, count)| (key.to_string(), (count as f64 / total) * 100.0))
        .collect()
}

/// Whether a completeness tag is present: either an embedded `<key>...`
/// marker in the name (mirroring `catnorm_stages::preprocess`'s XML-tag
/// extraction) or, for the identifier key, a non-empty code column.
fn row_has_attribute(row: &RawRow, key: &str) -> bool {
    if key == "identifier" {
        return row.code.as_deref().is_some_and(|c| !c.trim().is_empty());
    }
    let open_tag = format!("<{key}>");
    row.name.to_lowercase().contains(&open_tag)
}
