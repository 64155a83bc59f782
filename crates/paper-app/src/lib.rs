//! Paper trading application.
//!
//! Composition root for the market feed:
//! - Loads configuration and seeds the position book
//! - Owns the feed client and both price stores
//! - Drives caller-side reconnects with exponential backoff
//! - Mirrors feed and portfolio state into metrics

pub mod app;
pub mod config;
pub mod error;

pub use app::{Application, ReconnectState, SupervisorAction};
pub use config::{AppConfig, PositionSeed, ReconnectConfig};
pub use error::{AppError, AppResult};
