//! Error types for chunk-tracker.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("tracker not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored status code that no `SchedulingStatus` carries.
    #[error("serialization error: unknown scheduling status code {0}")]
    UnknownStatus(i16),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
