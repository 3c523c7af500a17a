//! Categorize stage: assign a classification code from an external
//! reference collaborator (KPVED/OKPD2-style hierarchy). That reference
//! lives outside this workspace, so it is expressed as a capability trait
//! here — the same "one trait, many concrete variants" shape `catnorm_llm`
//! uses for chat providers — and the executor is generic over whichever
//! implementation the binary wires in.

use crate::stage::{StageContext, StageError, StageExecutor, StageRow, StageRunResult, StageStats};
use async_trait::async_trait;
use catnorm_llm::{ChatMessage, CompletionRequest};
use catnorm_protocol::{NormalizationReply, Stage};
use catnorm_strmetrics::damerau_levenshtein_similarity;
use catnorm_worker::{WorkerPool, WorkerPoolConfig};
use std::sync::Arc;

/// One entry in the external classification hierarchy.
#[derive(Debug, Clone)]
pub struct ClassificationCandidate {
    pub code: String,
    pub name: String,
    /// Depth in the hierarchy; higher is more specific. Used to break ties
    /// between equally-similar candidates in favor of the more specific one.
    pub level: u8,
}

/// The reference collaborator this stage defers to for lookups. Concrete
/// KPVED/OKPD2 loading is outside this crate's scope; implementations are
/// wired in by the binary crate.
pub trait ClassificationReference: Send + Sync {
    /// An exact match on the normalized name, if the reference carries one.
    fn exact_match(&self, normalized_name: &str) -> Option<ClassificationCandidate>;

    /// Candidate entries worth scoring against the normalized name. Callers
    /// rank these by C2 similarity; an empty result means "no reference
    /// available" rather than "no match", and the row passes through
    /// unclassified.
    fn candidates(&self, normalized_name: &str) -> Vec<ClassificationCandidate>;
}

/// Reference implementation for when no classification hierarchy is
/// configured: every lookup comes back empty and rows pass through
/// unclassified.
pub struct NoopClassificationReference;

impl ClassificationReference for NoopClassificationReference {
    fn exact_match(&self, _normalized_name: &str) -> Option<ClassificationCandidate> {
        None
    }

    fn candidates(&self, _normalized_name: &str) -> Vec<ClassificationCandidate> {
        Vec::new()
    }
}

pub struct CategorizeExecutor {
    reference: Arc<dyn ClassificationReference>,
}

impl CategorizeExecutor {
    pub fn new(reference: Arc<dyn ClassificationReference>) -> Self {
        Self { reference }
    }
}

impl Default for CategorizeExecutor {
    fn default() -> Self {
        Self::new(Arc::new(NoopClassificationReference))
    }
}

/// Best candidate by C2 similarity, ties broken by the more specific
/// (higher) hierarchy level.
fn best_candidate(name: &str, candidates: &[ClassificationCandidate]) -> Option<(&ClassificationCandidate, f64)> {
    candidates
        .iter()
        .map(|candidate| (candidate, damerau_levenshtein_similarity(name, &candidate.name)))
        .max_by(|(a_candidate, a_score), (b_candidate, b_score)| {
            a_score
                .partial_cmp(b_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a_candidate.level.cmp(&b_candidate.level))
        })
}

fn build_prompt(row: &StageRow, candidates: &[ClassificationCandidate]) -> Vec<ChatMessage> {
    let options = candidates
        .iter()
        .map(|c| format!("{} - {}", c.code, c.name))
        .collect::<Vec<_>>()
        .join("\n");
    vec![
        ChatMessage::system(
            "You pick the single best classification code for a catalog item from a \
             short list of candidates. Respond with JSON only: \
             {\"normalized_name\": string, \"category\": string, \"classification_code\": string|null, \
             \"confidence\": number between 0 and 1, \"reasoning\": string|null}.",
        ),
        ChatMessage::user(format!(
            "Item name: {}\nCandidates:\n{}",
            row.normalized_name, options
        )),
    ]
}

async fn disambiguate(
    gateway: &catnorm_llm::LlmGateway,
    row: &StageRow,
    candidates: &[ClassificationCandidate],
    model: &str,
    max_tokens: u32,
    cancel: &catnorm_protocol::CancellationToken,
) -> Result<(String, String, f64), String> {
    let request = CompletionRequest {
        model: model.to_string(),
        messages: build_prompt(row, candidates),
        max_tokens,
        temperature: Some(0.0),
    };
    let completion = gateway.complete(request, cancel).await.map_err(|e| e.to_string())?;
    let reply = NormalizationReply::parse(&completion.text).map_err(|e| format!("malformed classification response: {e}"))?;
    let code = reply.classification_code.ok_or_else(|| "no classification_code in response".to_string())?;
    Ok((code, reply.category, reply.confidence))
}

#[async_trait]
impl StageExecutor for CategorizeExecutor {
    fn stage(&self) -> Stage {
        Stage::Categorize
    }

    async fn run(&self, ctx: &StageContext, rows: Vec<StageRow>) -> Result<StageRunResult, StageError> {
        let rows_in = rows.len() as u64;
        let threshold = ctx.config.categorize_similarity_threshold;

        let mut final_rows: Vec<Option<StageRow>> = Vec::with_capacity(rows.len());
        let mut ambiguous: Vec<(usize, StageRow, Vec<ClassificationCandidate>)> = Vec::new();

        for (index, mut row) in rows.into_iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                final_rows.push(Some(row));
                continue;
            }

            if let Some(exact) = self.reference.exact_match(&row.normalized_name) {
                row.classification_code = Some(exact.code);
                row.classification_name = Some(exact.name);
                row.classification_confidence = Some(1.0);
                final_rows.push(Some(row));
                continue;
            }

            let candidates = self.reference.candidates(&row.normalized_name);
            if candidates.is_empty() {
                final_rows.push(Some(row));
                continue;
            }

            match best_candidate(&row.normalized_name, &candidates) {
                Some((candidate, score)) if score >= threshold => {
                    row.classification_code = Some(candidate.code.clone());
                    row.classification_name = Some(candidate.name.clone());
                    row.classification_confidence = Some(score);
                    final_rows.push(Some(row));
                }
                Some(_) => {
                    final_rows.push(None);
                    ambiguous.push((index, row, candidates));
                }
                None => {
                    final_rows.push(Some(row));
                }
            }
        }

        let mut failed = 0u64;

        if let Some(gateway) = ctx.llm.clone() {
            if !ambiguous.is_empty() {
                let pool = WorkerPool::new(WorkerPoolConfig {
                    worker_count: 2,
                    queue_depth: 32,
                    max_row_failures: ambiguous.len() as u32 + 1,
                });
                let model = ctx.config.model.clone();
                let max_tokens = ctx.config.max_tokens;
                let cancel_for_calls = ctx.cancel.clone();
                let output = pool
                    .run(ambiguous, ctx.cancel.clone(), move |(index, row, candidates)| {
                        let gateway = gateway.clone();
                        let model = model.clone();
                        let cancel = cancel_for_calls.clone();
                        async move {
                            let resolved = disambiguate(&gateway, &row, &candidates, &model, max_tokens, &cancel).await;
                            resolved.map(|(code, category, confidence)| {
                                let mut row = row;
                                row.classification_code = Some(code);
                                if !category.is_empty() {
                                    row.category = category;
                                }
                                row.classification_confidence = Some(confidence);
                                (index, row)
                            })
                        }
                    })
                    .await;

                for outcome in output.outcomes {
                    match outcome.result {
                        Ok((index, row)) => final_rows[index] = Some(row),
                        Err(failure) => {
                            tracing::warn!(error = %failure.message, "categorize disambiguation failed, leaving row unclassified");
                            failed += 1;
                        }
                    }
                }
            }
        } else {
            for (index, row, _) in ambiguous {
                final_rows[index] = Some(row);
            }
        }

        let out: Vec<StageRow> = final_rows.into_iter().flatten().collect();

        Ok(StageRunResult {
            stats: StageStats {
                rows_in,
                rows_out: out.len() as u64,
                rows_failed: failed,
                extra: serde_json::json!({}),
            },
            rows: out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catnorm_ids::CatalogItemId;
    use catnorm_protocol::{ProcessingLevel, ProjectType};
    use std::collections::HashMap;

    fn row(normalized_name: &str) -> StageRow {
        StageRow {
            source_item_id: CatalogItemId(1),
            source_reference: "1".into(),
            source_name: normalized_name.into(),
            code: None,
            normalized_name: normalized_name.into(),
            normalized_reference: None,
            category: String::new(),
            merged_count: 0,
            ai_confidence: 0.0,
            ai_reasoning: None,
            processing_level: ProcessingLevel::Basic,
            classification_code: None,
            classification_name: None,
            classification_confidence: None,
            attributes: HashMap::new(),
        }
    }

    fn ctx() -> StageContext {
        StageContext {
            session_id: catnorm_ids::SessionId::new(),
            project_id: catnorm_ids::ProjectId::new(),
            client_id: catnorm_ids::ClientId::new(),
            project_type: ProjectType::Nomenclature,
            version: 1,
            config: crate::stage::StageConfig::default(),
            db: sqlx::SqlitePool::connect_lazy("sqlite::memory:").unwrap(),
            llm: None,
            cancel: catnorm_protocol::CancellationToken::new(),
        }
    }

    struct FixedReference {
        exact: Option<ClassificationCandidate>,
        candidates: Vec<ClassificationCandidate>,
    }

    impl ClassificationReference for FixedReference {
        fn exact_match(&self, _normalized_name: &str) -> Option<ClassificationCandidate> {
            self.exact.clone()
        }

        fn candidates(&self, _normalized_name: &str) -> Vec<ClassificationCandidate> {
            self.candidates.clone()
        }
    }

    #[tokio::test]
    async fn exact_match_wins_outright() {
        let reference = Arc::new(FixedReference {
            exact: Some(ClassificationCandidate {
                code: "26.11".into(),
                name: "болт м6".into(),
                level: 3,
            }),
            candidates: Vec::new(),
        });
        let executor = CategorizeExecutor::new(reference);
        let result = executor.run(&ctx(), vec![row("болт м6")]).await.unwrap();
        assert_eq!(result.rows[0].classification_code.as_deref(), Some("26.11"));
        assert_eq!(result.rows[0].classification_confidence, Some(1.0));
    }

    #[tokio::test]
    async fn no_reference_passes_row_through_unclassified() {
        let executor = CategorizeExecutor::default();
        let result = executor.run(&ctx(), vec![row("болт м6")]).await.unwrap();
        assert!(result.rows[0].classification_code.is_none());
    }

    #[tokio::test]
    async fn close_candidate_above_threshold_is_used_without_llm() {
        let reference = Arc::new(FixedReference {
            exact: None,
            candidates: vec![ClassificationCandidate {
                code: "26.11".into(),
                name: "болт м6".into(),
                level: 3,
            }],
        });
        let executor = CategorizeExecutor::new(reference);
        let result = executor.run(&ctx(), vec![row("болт м6")]).await.unwrap();
        assert_eq!(result.rows[0].classification_code.as_deref(), Some("26.11"));
    }

    #[tokio::test]
    async fn ambiguous_candidate_without_llm_stays_unclassified() {
        let reference = Arc::new(FixedReference {
            exact: None,
            candidates: vec![ClassificationCandidate {
                code: "26.11".into(),
                name: "совершенно другое значение".into(),
                level: 3,
            }],
        });
        let executor = CategorizeExecutor::new(reference);
        let result = executor.run(&ctx(), vec![row("болт м6")]).await.unwrap();
        assert!(result.rows[0].classification_code.is_none());
    }
}
