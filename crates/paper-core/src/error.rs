//! Error types for paper-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid instrument id: {0}")]
    InvalidInstrumentId(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
