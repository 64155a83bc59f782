//! Market channel wire types.
//!
//! Outbound: one JSON subscribe frame with replace semantics, plus the
//! literal `PING` keepalive. Inbound: the literal `PONG` ack, or a JSON
//! object / array of objects discriminated by `event_type`.

use crate::error::{WsError, WsResult};
use chrono::{DateTime, Utc};
use paper_core::{midpoint_from_quotes, price_from_trade, InstrumentId, PriceUpdate};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Outbound keepalive frame.
pub const KEEPALIVE_PING: &str = "PING";
/// Inbound keepalive acknowledgment.
pub const KEEPALIVE_PONG: &str = "PONG";

/// Channel name sent in every subscribe frame.
pub const MARKET_CHANNEL: &str = "market";

// ============================================================================
// Subscribe Request (Outgoing)
// ============================================================================

/// Market channel subscription.
///
/// The venue replaces the whole subscription with `assets_ids` on every
/// frame; there is no incremental subscribe/unsubscribe.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest<'a> {
    #[serde(rename = "type")]
    pub channel: &'static str,
    pub assets_ids: &'a [InstrumentId],
}

impl<'a> SubscribeRequest<'a> {
    pub fn market(assets_ids: &'a [InstrumentId]) -> Self {
        Self {
            channel: MARKET_CHANNEL,
            assets_ids,
        }
    }

    pub fn to_json(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Venue Messages (Incoming)
// ============================================================================

/// One entry of a `price_change` message.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceChangeEntry {
    pub asset_id: InstrumentId,
    #[serde(default, deserialize_with = "lenient_string")]
    pub best_bid: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub best_ask: Option<String>,
}

impl PriceChangeEntry {
    pub fn midpoint(&self) -> Option<f64> {
        midpoint_from_quotes(self.best_bid.as_deref(), self.best_ask.as_deref())
    }
}

/// Best bid/ask changes for one or more instruments.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceChangeMessage {
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub price_changes: Vec<PriceChangeEntry>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub timestamp: Option<String>,
}

/// Price of the most recent trade on one instrument.
#[derive(Debug, Clone, Deserialize)]
pub struct LastTradePriceMessage {
    pub asset_id: InstrumentId,
    #[serde(default, deserialize_with = "lenient_string")]
    pub price: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub timestamp: Option<String>,
}

/// Decoded venue message.
#[derive(Debug, Clone)]
pub enum VenueMessage {
    PriceChange(PriceChangeMessage),
    LastTradePrice(LastTradePriceMessage),
    /// Full order book snapshot. Not consumed.
    Book,
    /// Tick size change. Not consumed.
    TickSizeChange,
    /// Unrecognized `event_type`.
    Unknown(String),
}

impl VenueMessage {
    /// Decode one JSON object by its `event_type` discriminator.
    pub fn from_value(value: Value) -> WsResult<Self> {
        let event_type = match value.get("event_type").and_then(Value::as_str) {
            Some(tag) => tag.to_owned(),
            None => {
                return Err(WsError::ParseError(
                    "venue message has no event_type".to_string(),
                ))
            }
        };

        match event_type.as_str() {
            "price_change" => Ok(Self::PriceChange(serde_json::from_value(value)?)),
            "last_trade_price" => Ok(Self::LastTradePrice(serde_json::from_value(value)?)),
            "book" => Ok(Self::Book),
            "tick_size_change" => Ok(Self::TickSizeChange),
            _ => Ok(Self::Unknown(event_type)),
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::PriceChange(_) => "price_change",
            Self::LastTradePrice(_) => "last_trade_price",
            Self::Book => "book",
            Self::TickSizeChange => "tick_size_change",
            Self::Unknown(tag) => tag.as_str(),
        }
    }

    /// Normalized price updates carried by this message, in wire order.
    pub fn price_updates(&self) -> Vec<PriceUpdate> {
        match self {
            Self::PriceChange(msg) => {
                let timestamp = parse_timestamp(msg.timestamp.as_deref());
                msg.price_changes
                    .iter()
                    .map(|entry| {
                        PriceUpdate::new(entry.asset_id.clone(), entry.midpoint())
                            .with_timestamp(timestamp)
                    })
                    .collect()
            }
            Self::LastTradePrice(msg) => vec![PriceUpdate::new(
                msg.asset_id.clone(),
                price_from_trade(msg.price.as_deref()),
            )
            .with_timestamp(parse_timestamp(msg.timestamp.as_deref()))],
            Self::Book | Self::TickSizeChange | Self::Unknown(_) => Vec::new(),
        }
    }
}

// ============================================================================
// Frame decoding
// ============================================================================

/// Result of decoding one transport frame.
#[derive(Debug)]
pub enum InboundFrame {
    /// `PONG` acknowledgment.
    Keepalive,
    /// One message, or a batch for snapshot delivery. Each element decodes
    /// independently.
    Messages(Vec<WsResult<VenueMessage>>),
}

/// Decode a text frame.
///
/// Fails only when the frame is not JSON, or is JSON but neither an object
/// nor an array.
pub fn decode_text(text: &str) -> WsResult<InboundFrame> {
    if text == KEEPALIVE_PONG {
        return Ok(InboundFrame::Keepalive);
    }

    match serde_json::from_str::<Value>(text)? {
        Value::Array(items) => Ok(InboundFrame::Messages(
            items.into_iter().map(VenueMessage::from_value).collect(),
        )),
        obj @ Value::Object(_) => Ok(InboundFrame::Messages(vec![VenueMessage::from_value(obj)])),
        other => Err(WsError::ParseError(format!(
            "expected object or array, got {}",
            json_kind(&other)
        ))),
    }
}

/// Decode a binary frame as UTF-8 text.
pub fn decode_binary(data: &[u8]) -> WsResult<InboundFrame> {
    let text = std::str::from_utf8(data)
        .map_err(|e| WsError::ParseError(format!("binary frame is not UTF-8: {e}")))?;
    decode_text(text)
}

/// Venue timestamps are epoch milliseconds.
fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let millis = raw?.trim().parse::<i64>().ok()?;
    DateTime::from_timestamp_millis(millis)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Accept a string or a bare number; anything else is treated as absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
