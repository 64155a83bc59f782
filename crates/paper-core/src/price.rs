//! Normalized price updates.
//!
//! The venue sends best bid/ask and last trade prices as decimal strings.
//! They are reduced to a single midpoint per instrument, which is `None`
//! whenever the raw values cannot produce a valid price.

use crate::instrument::InstrumentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized midpoint update for one instrument.
///
/// Derived from the latest raw venue message and never accumulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub instrument_id: InstrumentId,
    /// `None` when one side is zero, missing or unparseable.
    pub midpoint_price: Option<f64>,
    /// Venue timestamp, when the message carried one.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl PriceUpdate {
    pub fn new(instrument_id: InstrumentId, midpoint_price: Option<f64>) -> Self {
        Self {
            instrument_id,
            midpoint_price,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Parse a venue price string, accepting only finite values strictly above zero.
#[inline]
pub fn parse_positive_price(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|px| px.is_finite() && *px > 0.0)
}

/// Midpoint of best bid and best ask.
///
/// Both sides must parse and be strictly positive, otherwise there is no
/// midpoint.
pub fn midpoint_from_quotes(bid: Option<&str>, ask: Option<&str>) -> Option<f64> {
    let bid = parse_positive_price(bid?)?;
    let ask = parse_positive_price(ask?)?;
    Some((bid + ask) / 2.0)
}

/// Price of a last trade, valid only when strictly positive.
pub fn price_from_trade(price: Option<&str>) -> Option<f64> {
    parse_positive_price(price?)
}
