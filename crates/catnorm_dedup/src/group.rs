use catnorm_ids::NormalizedItemId;
use catnorm_protocol::DuplicateGroupType;

/// A set of items deemed to refer to the same real entity (§3, §4.3).
/// Transient: never persisted as a first-class row, materialized fresh
/// by each `analyze` call.
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub group_type: DuplicateGroupType,
    pub items: Vec<NormalizedItemId>,
    pub similarity: f64,
    pub confidence: f64,
    pub suggested_master: NormalizedItemId,
    pub reason: String,
}
