//! Patterns stage: deterministic regex and dictionary rewrites. Any row
//! that actually matched a rule earns confidence 1.0; everything else
//! passes through unchanged at whatever confidence it already carried.

use crate::stage::{StageContext, StageError, StageExecutor, StageRow, StageRunResult, StageStats};
use async_trait::async_trait;
use catnorm_protocol::{ProjectType, Stage};
use regex::Regex;
use std::sync::OnceLock;

pub struct PatternsExecutor;

/// Common unit abbreviations normalized to a canonical short form.
const UNIT_DICTIONARY: &[(&str, &str)] = &[
    ("миллиметр", "мм"),
    ("килограмм", "кг"),
    ("литр", "л"),
    ("штука", "шт"),
    ("метр", "м"),
];

fn tax_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A bare run of 10 or 12 digits inside a counterparty name is almost
    // always an embedded ИНН; reformat with a recognizable prefix.
    RE.get_or_init(|| Regex::new(r"\b(\d{10}|\d{12})\b").unwrap())
}

fn apply_unit_dictionary(text: &str) -> (String, bool) {
    let mut result = text.to_string();
    let mut matched = false;
    for (long_form, short_form) in UNIT_DICTIONARY {
        if result.contains(long_form) {
            result = result.replace(long_form, short_form);
            matched = true;
        }
    }
    (result, matched)
}

fn reformat_tax_ids(text: &str) -> (String, bool) {
    if !tax_id_regex().is_match(text) {
        return (text.to_string(), false);
    }
    let rewritten = tax_id_regex().replace_all(text, "ИНН $1").into_owned();
    (rewritten, true)
}

#[async_trait]
impl StageExecutor for PatternsExecutor {
    fn stage(&self) -> Stage {
        Stage::Patterns
    }

    async fn run(&self, ctx: &StageContext, rows: Vec<StageRow>) -> Result<StageRunResult, StageError> {
        let rows_in = rows.len() as u64;
        let mut out = Vec::with_capacity(rows.len());

        for mut row in rows {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let (after_units, units_matched) = apply_unit_dictionary(&row.normalized_name);
            let (after_tax_id, tax_matched) = match ctx.project_type {
                ProjectType::Counterparty => reformat_tax_ids(&after_units),
                ProjectType::Nomenclature => (after_units, false),
            };
            row.normalized_name = after_tax_id;
            if units_matched || tax_matched {
                row.ai_confidence = 1.0;
            }
            out.push(row);
        }

        Ok(StageRunResult {
            stats: StageStats {
                rows_in,
                rows_out: out.len() as u64,
                rows_failed: 0,
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
    use catnorm_protocol::ProcessingLevel;
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

    fn ctx(project_type: ProjectType) -> StageContext {
        StageContext {
            session_id: catnorm_ids::SessionId::new(),
            project_id: catnorm_ids::ProjectId::new(),
            client_id: catnorm_ids::ClientId::new(),
            project_type,
            version: 1,
            config: crate::stage::StageConfig::default(),
            db: sqlx::SqlitePool::connect_lazy("sqlite::memory:").unwrap(),
            llm: None,
            cancel: catnorm_protocol::CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn unit_dictionary_rewrite_earns_full_confidence() {
        let executor = PatternsExecutor;
        let rows = vec![row("болт 5 миллиметр")];
        let result = executor.run(&ctx(ProjectType::Nomenclature), rows).await.unwrap();
        assert_eq!(result.rows[0].normalized_name, "болт 5 мм");
        assert_eq!(result.rows[0].ai_confidence, 1.0);
    }

    #[tokio::test]
    async fn unmatched_row_keeps_prior_confidence() {
        let executor = PatternsExecutor;
        let rows = vec![row("совершенно обычное имя")];
        let result = executor.run(&ctx(ProjectType::Nomenclature), rows).await.unwrap();
        assert_eq!(result.rows[0].ai_confidence, 0.0);
    }

    #[tokio::test]
    async fn tax_id_reformatted_only_for_counterparty() {
        let executor = PatternsExecutor;
        let rows = vec![row("ооо ромашка 7712345678")];
        let result = executor.run(&ctx(ProjectType::Counterparty), rows).await.unwrap();
        assert!(result.rows[0].normalized_name.contains("ИНН 7712345678"));
        assert_eq!(result.rows[0].ai_confidence, 1.0);
    }
}
