//! Error types for the persistence layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

/// Errors surfaced by connection setup, queries and the source-database
/// validator (§6, §7).
#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("operation requires write access but the database was opened read-only")]
    ReadOnly,

    #[error("rejected source database: {0}")]
    InvalidSourceDatabase(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}
