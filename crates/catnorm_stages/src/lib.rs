//! The four pipeline stage executors (§4.5): Preprocess, Patterns, AI,
//! Categorize. Each implements the shared `StageExecutor` trait so the
//! session controller can drive them uniformly.

mod ai;
mod categorize;
mod patterns;
mod preprocess;
mod stage;

pub use ai::AiExecutor;
pub use categorize::{CategorizeExecutor, ClassificationCandidate, ClassificationReference, NoopClassificationReference};
pub use patterns::PatternsExecutor;
pub use preprocess::PreprocessExecutor;
pub use stage::{StageConfig, StageContext, StageError, StageExecutor, StageRow, StageRunResult, StageStats};
