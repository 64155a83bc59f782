//! Core domain types for the paper trading market feed.
//!
//! This crate provides the types shared by the feed client and its consumers:
//! - `InstrumentId`: Opaque venue token identifying one tradable outcome
//! - `PriceUpdate`: Normalized midpoint update for one instrument
//! - `PriceSink`: The consumer interface price updates are fanned out to

pub mod error;
pub mod instrument;
pub mod price;
pub mod sink;

pub use error::{CoreError, Result};
pub use instrument::InstrumentId;
pub use price::{midpoint_from_quotes, parse_positive_price, price_from_trade, PriceUpdate};
pub use sink::{PriceSink, SinkSet};
