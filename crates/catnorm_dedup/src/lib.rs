//! Duplicate detection and master-record selection (§4.3).
//!
//! Three passes each produce candidate groups over one project's (and
//! optionally one source database's) normalized rows; `analyze` merges
//! overlapping groups and scores a master record for each.

mod analyzer;
mod config;
mod error;
mod group;
mod item;
mod union_find;

pub use analyzer::analyze;
pub use config::DuplicateConfig;
pub use error::DedupError;
pub use group::DuplicateGroup;
pub use item::DedupItem;

#[cfg(test)]
mod tests {
    use super::*;
    use catnorm_ids::NormalizedItemId;
    use catnorm_protocol::ProcessingLevel;

    fn item(name: &str, category: &str, quality: f64, level: ProcessingLevel) -> DedupItem {
        DedupItem {
            id: NormalizedItemId::new(),
            normalized_name: name.to_string(),
            category: category.to_string(),
            quality_score: quality,
            processing_level: level,
            merged_count: 0,
            attribute_count: 2,
        }
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let groups = analyze(&[], &DuplicateConfig::default()).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn invalid_threshold_is_rejected() {
        let config = DuplicateConfig {
            threshold: 2.0,
            ..DuplicateConfig::default()
        };
        assert!(analyze(&[], &config).is_err());
    }

    #[test]
    fn exact_duplicates_form_one_group() {
        let items = vec![
            item("болт м6", "крепеж", 0.5, ProcessingLevel::Basic),
            item("болт м6", "крепеж", 0.9, ProcessingLevel::AiEnhanced),
        ];
        let groups = analyze(&items, &DuplicateConfig::default()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].items.len(), 2);
        // higher processing_level + quality should win master selection
        assert_eq!(groups[0].suggested_master, items[1].id);
    }

    #[test]
    fn dissimilar_names_yield_no_fuzzy_groups() {
        let items = vec![
            item("болт м6", "крепеж", 0.5, ProcessingLevel::Basic),
            item("совершенно другое значение текста", "крепеж", 0.5, ProcessingLevel::Basic),
        ];
        let config = DuplicateConfig {
            threshold: 0.9,
            ..DuplicateConfig::default()
        };
        let groups = analyze(&items, &config).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn row_with_empty_name_is_excluded() {
        let items = vec![item("болт м6", "крепеж", 0.5, ProcessingLevel::Basic), item("", "крепеж", 0.5, ProcessingLevel::Basic)];
        let groups = analyze(&items, &DuplicateConfig::default()).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn min_confidence_filters_weak_groups() {
        let items = vec![
            item("болт м6х20", "крепеж", 0.5, ProcessingLevel::Basic),
            item("болт м6х25", "крепеж", 0.5, ProcessingLevel::Basic),
        ];
        let lenient = DuplicateConfig {
            threshold: 0.6,
            min_confidence: 0.0,
            ..DuplicateConfig::default()
        };
        let strict = DuplicateConfig {
            threshold: 0.6,
            min_confidence: 0.999,
            ..DuplicateConfig::default()
        };
        assert!(!analyze(&items, &lenient).unwrap().is_empty());
        assert!(analyze(&items, &strict).unwrap().is_empty());
    }
}
