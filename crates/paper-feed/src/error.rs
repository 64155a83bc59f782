//! Feed store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Invalid share quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Position not found: {0}")]
    PositionNotFound(String),
}

pub type FeedResult<T> = Result<T, FeedError>;
