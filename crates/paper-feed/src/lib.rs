//! Consumer stores for the market feed.
//!
//! Two independent [`PriceSink`](paper_core::PriceSink) implementations:
//!
//! - [`PositionBook`]: marks paper positions to the latest midpoint and
//!   publishes the aggregate portfolio valuation
//! - [`QuoteBoard`]: last-known quote per instrument for display surfaces
//!
//! Neither store reads the other.

pub mod error;
pub mod positions;
pub mod quotes;

pub use error::{FeedError, FeedResult};
pub use positions::{PortfolioValuation, Position, PositionBook};
pub use quotes::{display_percent, Quote, QuoteBoard, QuoteChanged};
