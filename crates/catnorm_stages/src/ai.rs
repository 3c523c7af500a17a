//! AI stage: for rows whose pattern-phase confidence is still low, ask the
//! LLM gateway for a normalized form and category. A client benchmark that
//! exact-matches the pre-AI name short-circuits the call entirely.

use crate::stage::{StageContext, StageError, StageExecutor, StageRow, StageRunResult, StageStats};
use async_trait::async_trait;
use catnorm_llm::{ChatMessage, CompletionRequest};
use catnorm_protocol::{NormalizationReply, ProcessingLevel, Stage};
use catnorm_worker::{WorkerPool, WorkerPoolConfig};

pub struct AiExecutor;

fn build_prompt(row: &StageRow) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You normalize catalog item names. Respond with JSON only: \
             {\"normalized_name\": string, \"category\": string, \"classification_code\": string|null, \
             \"confidence\": number between 0 and 1, \"reasoning\": string|null}.",
        ),
        ChatMessage::user(format!(
            "Source name: {}\nCode: {}\nCurrent normalized form: {}",
            row.source_name,
            row.code.as_deref().unwrap_or(""),
            row.normalized_name
        )),
    ]
}

async fn call_llm(
    gateway: &catnorm_llm::LlmGateway,
    row: &StageRow,
    model: &str,
    max_tokens: u32,
    cancel: &catnorm_protocol::CancellationToken,
) -> Result<StageRow, String> {
    let request = CompletionRequest {
        model: model.to_string(),
        messages: build_prompt(row),
        max_tokens,
        temperature: Some(0.0),
    };
    let completion = gateway.complete(request, cancel).await.map_err(|e| e.to_string())?;
    let reply = NormalizationReply::parse(&completion.text).map_err(|e| format!("malformed AI response: {e}"))?;

    let mut updated = row.clone();
    updated.normalized_name = reply.normalized_name;
    updated.category = reply.category;
    updated.classification_code = reply.classification_code;
    updated.ai_confidence = reply.confidence;
    updated.ai_reasoning = reply.reasoning;
    updated.processing_level = ProcessingLevel::AiEnhanced;
    Ok(updated)
}

#[async_trait]
impl StageExecutor for AiExecutor {
    fn stage(&self) -> Stage {
        Stage::Ai
    }

    async fn run(&self, ctx: &StageContext, rows: Vec<StageRow>) -> Result<StageRunResult, StageError> {
        let rows_in = rows.len() as u64;
        let threshold = ctx.config.ai_confidence_threshold;

        let mut final_rows: Vec<Option<StageRow>> = Vec::with_capacity(rows.len());
        let mut llm_candidates: Vec<(usize, StageRow)> = Vec::new();

        for (index, mut row) in rows.into_iter().enumerate() {
            if row.ai_confidence >= threshold {
                final_rows.push(Some(row));
                continue;
            }

            let benchmark = catnorm_state::benchmarks::find_exact(&ctx.db, ctx.client_id, &row.normalized_name).await?;
            if let Some(benchmark) = benchmark {
                row.category = benchmark.category;
                row.ai_confidence = 1.0;
                row.processing_level = ProcessingLevel::Benchmark;
                final_rows.push(Some(row));
                continue;
            }

            final_rows.push(None);
            llm_candidates.push((index, row));
        }

        let mut failed = 0u64;

        if let Some(gateway) = ctx.llm.clone() {
            if !llm_candidates.is_empty() {
                let pool = WorkerPool::new(WorkerPoolConfig {
                    worker_count: 2,
                    queue_depth: 32,
                    max_row_failures: llm_candidates.len() as u32 + 1,
                });
                let model = ctx.config.model.clone();
                let max_tokens = ctx.config.max_tokens;
                let cancel_for_calls = ctx.cancel.clone();
                let output = pool
                    .run(llm_candidates, ctx.cancel.clone(), move |(index, row)| {
                        let gateway = gateway.clone();
                        let model = model.clone();
                        let cancel = cancel_for_calls.clone();
                        async move {
                            let updated = call_llm(&gateway, &row, &model, max_tokens, &cancel).await;
                            updated.map(|r| (index, r)).map_err(|e| e)
                        }
                    })
                    .await;

                for outcome in output.outcomes {
                    match outcome.result {
                        Ok((index, row)) => final_rows[index] = Some(row),
                        Err(failure) => {
                            tracing::warn!(error = %failure.message, "AI stage row failed, retaining prior value");
                            failed += 1;
                        }
                    }
                }
            }
        } else if !llm_candidates.is_empty() {
            tracing::debug!(count = llm_candidates.len(), "no LLM gateway configured, passing rows through unchanged");
            for (index, row) in llm_candidates {
                final_rows[index] = Some(row);
            }
        }

        // Any candidate still unresolved (gateway missing, or failed without a
        // replacement) keeps its prior value instead of being dropped.
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
