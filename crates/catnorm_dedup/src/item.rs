use catnorm_ids::NormalizedItemId;
use catnorm_protocol::ProcessingLevel;

/// One normalized catalog row as the duplicate analyzer sees it. Produced
/// by `catnorm_stages` from a `normalized_data` row plus its attribute
/// count; this crate has no database dependency of its own.
#[derive(Debug, Clone)]
pub struct DedupItem {
    pub id: NormalizedItemId,
    pub normalized_name: String,
    pub category: String,
    pub quality_score: f64,
    pub processing_level: ProcessingLevel,
    pub merged_count: u32,
    pub attribute_count: u32,
}

impl DedupItem {
    pub(crate) fn name_length(&self) -> usize {
        self.normalized_name.chars().count()
    }
}
