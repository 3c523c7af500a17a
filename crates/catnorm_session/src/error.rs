//! Session-facing error taxonomy (§7).
//!
//! Lower-layer errors are wrapped rather than flattened, so a caller that
//! cares can still match on `catnorm_db::DbError` or `LlmErrorKind`
//! underneath; everything else collapses to the coarse kinds the status
//! surface reports.

use catnorm_protocol::LlmErrorKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Db(#[from] catnorm_db::DbError),

    #[error("stage error: {0}")]
    Stage(#[from] catnorm_stages::StageError),

    #[error("duplicate analysis error: {0}")]
    Dedup(#[from] catnorm_dedup::DedupError),

    #[error("llm gateway error: {0}")]
    Llm(LlmErrorKind),

    #[error("session cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Machine-readable reason code for the status/event surface (§7
    /// "status endpoints return ... a machine-readable reason code").
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::InputInvalid(_) => "input_invalid",
            SessionError::NotFound(_) => "not_found",
            SessionError::Db(_) => "db_error",
            SessionError::Stage(_) => "stage_error",
            SessionError::Dedup(_) => "dedup_error",
            SessionError::Llm(_) => "llm_error",
            SessionError::Cancelled => "cancelled",
            SessionError::Internal(_) => "internal",
        }
    }
}

impl From<LlmErrorKind> for SessionError {
    fn from(kind: LlmErrorKind) -> Self {
        SessionError::Llm(kind)
    }
}
