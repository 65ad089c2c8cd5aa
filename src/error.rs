//! Error taxonomy shared by every stage of the curation core.

use thiserror::Error;

use crate::domain::record::RecordId;

/// Structural failures that abort an operation before anything is mutated.
///
/// Per-record embedding problems are not represented here; they are collected
/// as [`crate::processing::embedding::EmbeddingFailure`] values instead.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("record {0} is unknown or has been removed")]
    NotFound(RecordId),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("index built at store version {built} but store is at version {current}")]
    StaleIndex { built: u64, current: u64 },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector index error: {0}")]
    Index(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        CoreError::InvalidParameter(message.into())
    }
}
