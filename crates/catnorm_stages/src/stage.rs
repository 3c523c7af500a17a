//! Common shapes every stage executor reads and writes, plus the
//! `StageExecutor` trait that lets the session controller drive all four
//! concrete stages uniformly (the same one-trait-many-variants shape used
//! for LLM providers in `catnorm_llm`).

use async_trait::async_trait;
use catnorm_ids::{CatalogItemId, ClientId, ProjectId, SessionId};
use catnorm_protocol::{CancellationToken, ProcessingLevel, ProjectType, Stage};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// A row as it flows between stages: the union of every field a stage
/// might read or write. Stages that don't touch a field just pass it
/// through unchanged.
#[derive(Debug, Clone)]
pub struct StageRow {
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
    pub attributes: HashMap<String, Vec<String>>,
}

impl StageRow {
    /// The row a Preprocess stage starts from: everything downstream of
    /// raw ingestion is empty until a stage fills it in.
    pub fn from_catalog_item(item: &catnorm_state::models::CatalogItem) -> Self {
        Self {
            source_item_id: item.id,
            source_reference: item.source_reference.clone(),
            source_name: item.source_name.clone(),
            code: item.code.clone(),
            normalized_name: String::new(),
            normalized_reference: None,
            category: String::new(),
            merged_count: 0,
            ai_confidence: 0.0,
            ai_reasoning: None,
            processing_level: ProcessingLevel::Basic,
            classification_code: None,
            classification_name: None,
            classification_confidence: None,
            attributes: item.attributes.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("database error: {0}")]
    Db(#[from] catnorm_db::DbError),
    #[error("stage config invalid: {0}")]
    ConfigInvalid(String),
}

/// Per-project tuning a stage reads from; owned by the session controller,
/// threaded down rather than re-fetched by each stage.
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Pattern-phase confidence below which the AI stage is invoked.
    pub ai_confidence_threshold: f64,
    /// C2 similarity below which Categorize treats a match as ambiguous
    /// and (if available) asks the LLM gateway to disambiguate.
    pub categorize_similarity_threshold: f64,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            ai_confidence_threshold: 0.8,
            categorize_similarity_threshold: 0.85,
            model: "generic-chat-v1".to_string(),
            max_tokens: 256,
        }
    }
}

/// Everything a stage needs beyond its input rows: identity, tuning,
/// shared services, and the cooperative cancellation signal.
pub struct StageContext {
    pub session_id: SessionId,
    pub project_id: ProjectId,
    pub client_id: ClientId,
    pub project_type: ProjectType,
    pub version: i64,
    pub config: StageConfig,
    pub db: catnorm_db::DbPool,
    pub llm: Option<Arc<catnorm_llm::LlmGateway>>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Default)]
pub struct StageStats {
    pub rows_in: u64,
    pub rows_out: u64,
    pub rows_failed: u64,
    pub extra: serde_json::Value,
}

pub struct StageRunResult {
    pub rows: Vec<StageRow>,
    pub stats: StageStats,
}

#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> Stage;

    async fn run(&self, ctx: &StageContext, rows: Vec<StageRow>) -> Result<StageRunResult, StageError>;
}
