//! Prometheus metrics and structured logging for the paper trader.
//!
//! - Structured logging with tracing (JSON in production)
//! - Prometheus metrics for the market feed and portfolio valuation

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::{FeedCounters, Metrics};
