//! Error types for checkpoint operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CheckpointError>;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid checkpoint: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Custom(String),
}
