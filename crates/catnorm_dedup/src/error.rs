use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DedupError {
    #[error("invalid duplicate-analyzer config: {0}")]
    ConfigInvalid(String),
}
