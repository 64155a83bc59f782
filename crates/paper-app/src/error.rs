//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<paper_ws::WsError>),

    #[error("Feed error: {0}")]
    Feed(#[from] paper_feed::FeedError),
}

pub type AppResult<T> = Result<T, AppError>;
