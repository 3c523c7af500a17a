//! Pipeline-driving logic shared by a full run and a single manual
//! stage re-run (`apply_patterns`/`apply_ai`/`apply_categorization`).
//!
//! Kept separate from [`crate::controller`] so the state-machine/event
//! bookkeeping in that module stays readable; this module only knows how
//! to turn one stage's input rows into persisted output plus stats.

use crate::error::Result;
use catnorm_db::DbPool;
use catnorm_dedup::{DedupItem, DuplicateConfig};
use catnorm_ids::{ClientId, ProjectId, SessionId};
use catnorm_protocol::{CancellationToken, ProjectType, Stage};
use catnorm_stages::{
    AiExecutor, CategorizeExecutor, ClassificationReference, PatternsExecutor, PreprocessExecutor, StageConfig,
    StageContext, StageExecutor, StageRow, StageStats,
};
use catnorm_state::models::{CatalogItem, NormalizedItem};
use futures_util::TryStreamExt;
use std::collections::HashMap;
use std::sync::Arc;

/// The row a stage other than Preprocess starts from: the prior stage's
/// latest persisted output, reassembled into the shared `StageRow` shape.
async fn stage_row_from_normalized(pool: &DbPool, item: &NormalizedItem) -> Result<StageRow> {
    let attributes = catnorm_state::normalized::attributes(pool, item.id).await?;
    Ok(StageRow {
        source_item_id: item.source_item_id,
        source_reference: item.source_reference.clone(),
        source_name: item.source_name.clone(),
        code: item.code.clone(),
        normalized_name: item.normalized_name.clone(),
        normalized_reference: item.normalized_reference.clone(),
        category: item.category.clone(),
        merged_count: item.merged_count,
        ai_confidence: item.ai_confidence,
        ai_reasoning: item.ai_reasoning.clone(),
        processing_level: item.processing_level,
        classification_code: item.classification_code.clone(),
        classification_name: item.classification_name.clone(),
        classification_confidence: item.classification_confidence,
        attributes,
    })
}

/// Input rows for `stage`: raw catalog items for Preprocess, or the
/// previous stage's latest output for everything after it.
pub async fn load_input_rows(
    pool: &DbPool,
    session_id: SessionId,
    source_database_id: catnorm_ids::SourceDatabaseId,
    stage: Stage,
) -> Result<Vec<StageRow>> {
    match stage.previous() {
        None => {
            let items: Vec<CatalogItem> =
                catnorm_state::catalog_items::stream_for_source(pool, source_database_id)
                    .try_collect()
                    .await?;
            Ok(items.iter().map(StageRow::from_catalog_item).collect())
        }
        Some(previous) => {
            let items = catnorm_state::normalized::latest_for_stage(pool, session_id, previous).await?;
            let mut rows = Vec::with_capacity(items.len());
            for item in &items {
                rows.push(stage_row_from_normalized(pool, item).await?);
            }
            Ok(rows)
        }
    }
}

fn build_executor(stage: Stage, classification: Arc<dyn ClassificationReference>) -> Box<dyn StageExecutor> {
    match stage {
        Stage::Preprocess => Box::new(PreprocessExecutor),
        Stage::Patterns => Box::new(PatternsExecutor),
        Stage::Ai => Box::new(AiExecutor),
        Stage::Categorize => Box::new(CategorizeExecutor::new(classification)),
    }
}

/// A stage's output, staged in memory until the caller decides whether to
/// persist it (the controller always does, after deciding the version).
pub struct StageRunOutcome {
    pub rows: Vec<StageRow>,
    pub stats: StageStats,
}

#[allow(clippy::too_many_arguments)]
pub async fn run_one_stage(
    pool: &DbPool,
    llm: Option<Arc<catnorm_llm::LlmGateway>>,
    classification: Arc<dyn ClassificationReference>,
    session_id: SessionId,
    project_id: ProjectId,
    client_id: ClientId,
    project_type: ProjectType,
    version: i64,
    config: StageConfig,
    cancel: CancellationToken,
    stage: Stage,
    rows: Vec<StageRow>,
) -> Result<StageRunOutcome> {
    let executor = build_executor(stage, classification);
    let ctx = StageContext {
        session_id,
        project_id,
        client_id,
        project_type,
        version,
        config,
        db: pool.clone(),
        llm,
        cancel,
    };
    let result = executor.run(&ctx, rows).await?;
    Ok(StageRunOutcome {
        rows: result.rows,
        stats: result.stats,
    })
}

/// Persist one stage's output rows as a new `normalized_data` generation.
pub async fn persist_stage_output(
    pool: &DbPool,
    session_id: SessionId,
    project_id: ProjectId,
    stage: Stage,
    version: i64,
    rows: &[StageRow],
) -> Result<()> {
    for row in rows {
        let attributes: HashMap<String, Vec<String>> = row.attributes.clone();
        catnorm_state::normalized::insert(
            pool,
            catnorm_state::normalized::NewNormalizedItem {
                session_id,
                project_id,
                source_item_id: row.source_item_id,
                source_reference: row.source_reference.clone(),
                source_name: row.source_name.clone(),
                code: row.code.clone(),
                normalized_name: row.normalized_name.clone(),
                normalized_reference: row.normalized_reference.clone(),
                category: row.category.clone(),
                merged_count: row.merged_count,
                ai_confidence: row.ai_confidence,
                ai_reasoning: row.ai_reasoning.clone(),
                processing_level: row.processing_level,
                classification_code: row.classification_code.clone(),
                classification_name: row.classification_name.clone(),
                classification_confidence: row.classification_confidence,
                stage_version: version,
                stage,
                attributes,
            },
        )
        .await?;
    }
    Ok(())
}

/// Refresh duplicate groups for the session after Patterns/AI (§4.5): the
/// groups themselves are transient (never persisted as first-class rows),
/// so this only reports how many were found for the stage's stats.
pub async fn refresh_duplicate_groups(pool: &DbPool, session_id: SessionId, stage: Stage) -> Result<usize> {
    let items = catnorm_state::normalized::latest_for_stage(pool, session_id, stage).await?;
    let mut dedup_items = Vec::with_capacity(items.len());
    for item in &items {
        let attributes = catnorm_state::normalized::attributes(pool, item.id).await?;
        let attribute_count: u32 = attributes.values().map(|v| v.len() as u32).sum();
        dedup_items.push(DedupItem {
            id: item.id,
            normalized_name: item.normalized_name.clone(),
            category: item.category.clone(),
            quality_score: quality_score(item),
            processing_level: item.processing_level,
            merged_count: item.merged_count,
            attribute_count,
        });
    }
    let groups = catnorm_dedup::analyze(&dedup_items, &DuplicateConfig::default())?;
    Ok(groups.len())
}

/// A row's standalone quality signal feeding the master-record score
/// (§4.3): the mean of whichever confidence fields this row actually
/// carries, defaulting to zero for a purely deterministic match.
fn quality_score(item: &NormalizedItem) -> f64 {
    match item.classification_confidence {
        Some(classification_confidence) => {
            ((item.ai_confidence + classification_confidence) / 2.0).clamp(0.0, 1.0)
        }
        None => item.ai_confidence.clamp(0.0, 1.0),
    }
}

/// First stage whose output is missing for this session — where a fresh
/// `start` or a `resume` of a stopped/failed session should begin (§4.6).
pub async fn first_incomplete_stage(pool: &DbPool, session_id: SessionId) -> Result<Option<Stage>> {
    for stage in Stage::ORDER {
        if catnorm_state::stage_outputs::latest_version(pool, session_id, stage).await?.is_none() {
            return Ok(Some(stage));
        }
    }
    Ok(None)
}

pub async fn next_version(pool: &DbPool, session_id: SessionId, stage: Stage) -> Result<i64> {
    Ok(catnorm_state::stage_outputs::latest_version(pool, session_id, stage)
        .await?
        .unwrap_or(0)
        + 1)
}
