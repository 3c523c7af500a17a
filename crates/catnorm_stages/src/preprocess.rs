//! Preprocess stage: C1 text normalization plus attribute extraction from
//! semi-structured source fields.

use crate::stage::{StageContext, StageError, StageExecutor, StageRow, StageRunResult, StageStats};
use async_trait::async_trait;
use catnorm_protocol::{ProcessingLevel, ProjectType, Stage};
use catnorm_text::{normalize, NormalizeOptions};
use regex::Regex;
use std::sync::OnceLock;

pub struct PreprocessExecutor;

/// Options tailored per project type: nomenclature names tend to carry
/// transliteration noise from scanned catalogs, counterparty names don't.
fn options_for(project_type: ProjectType) -> NormalizeOptions {
    match project_type {
        ProjectType::Nomenclature => NormalizeOptions {
            transliterate: true,
            remove_stop_words: false,
            stem: false,
            ..NormalizeOptions::default()
        },
        ProjectType::Counterparty => NormalizeOptions {
            transliterate: false,
            remove_stop_words: true,
            stem: false,
            ..NormalizeOptions::default()
        },
    }
}

fn comma_list_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[\w\p{Cyrillic}\- ]+(?:,\s*[\w\p{Cyrillic}\- ]+)+\s*$").unwrap())
}

fn xml_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(\w+)>([^<]*)</\w+>").unwrap())
}

/// Pull additional key/value attributes out of a free-form source field:
/// embedded XML fragments become `tag -> [text]`, bare comma lists become
/// `extra -> [each token]`.
fn extract_attributes(raw: &str) -> Vec<(String, String)> {
    let mut found = Vec::new();
    for cap in xml_tag_regex().captures_iter(raw) {
        let tag = cap[1].to_string();
        let value = cap[2].trim().to_string();
        if !value.is_empty() {
            found.push((tag, value));
        }
    }
    if found.is_empty() && comma_list_regex().is_match(raw) {
        for token in raw.split(',') {
            let token = token.trim();
            if !token.is_empty() {
                found.push(("extra".to_string(), token.to_string()));
            }
        }
    }
    found
}

#[async_trait]
impl StageExecutor for PreprocessExecutor {
    fn stage(&self) -> Stage {
        Stage::Preprocess
    }

    async fn run(&self, ctx: &StageContext, rows: Vec<StageRow>) -> Result<StageRunResult, StageError> {
        let options = options_for(ctx.project_type);
        let rows_in = rows.len() as u64;
        let mut out = Vec::with_capacity(rows.len());
        let mut failed = 0u64;

        for mut row in rows {
            if ctx.cancel.is_cancelled() {
                break;
            }
            match normalize(&row.source_name, &options) {
                Ok(normalized) => {
                    row.normalized_name = normalized;
                    row.processing_level = ProcessingLevel::Basic;
                    for (key, value) in extract_attributes(&row.source_name) {
                        row.attributes.entry(key).or_default().push(value);
                    }
                    out.push(row);
                }
                Err(err) => {
                    tracing::warn!(source_reference = %row.source_reference, error = %err, "preprocess normalize failed");
                    failed += 1;
                }
            }
        }

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
    use std::collections::HashMap;

    fn row(name: &str) -> StageRow {
        StageRow {
            source_item_id: CatalogItemId(1),
            source_reference: "1".into(),
            source_name: name.into(),
            code: None,
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
    async fn normalizes_and_extracts_xml_attributes() {
        let executor = PreprocessExecutor;
        let rows = vec![row("<unit>кг</unit> Болт М6")];
        let result = executor.run(&ctx(ProjectType::Nomenclature), rows).await.unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].attributes.get("unit"), Some(&vec!["кг".to_string()]));
        assert!(result.rows[0].normalized_name.contains("болт"));
    }

    #[tokio::test]
    async fn extracts_comma_list_when_no_xml_present() {
        let executor = PreprocessExecutor;
        let rows = vec![row("красный, синий, зеленый")];
        let result = executor.run(&ctx(ProjectType::Nomenclature), rows).await.unwrap();
        assert_eq!(result.rows[0].attributes.get("extra").map(|v| v.len()), Some(3));
    }

    #[tokio::test]
    async fn stops_dispatching_once_cancelled() {
        let executor = PreprocessExecutor;
        let rows = vec![row("болт"), row("гайка")];
        let context = ctx(ProjectType::Nomenclature);
        context.cancel.cancel();
        let result = executor.run(&context, rows).await.unwrap();
        assert!(result.rows.is_empty());
    }
}
