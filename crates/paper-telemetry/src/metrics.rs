//! Prometheus metrics for the paper trader.
//!
//! Covers:
//! - Feed connection state and reconnects
//! - Frame, update and drop counters mirrored from the feed client
//! - Keepalive pings
//! - Portfolio valuation and per-instrument midpoints
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means duplicate metric
//! names, which must crash at startup. These panics only occur during
//! static initialization, never at runtime.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_int_counter,
    register_int_counter_vec, register_int_gauge, CounterVec, Encoder, Gauge, GaugeVec,
    IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

/// Feed connection state (1 = connected, 0 = disconnected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "paper_ws_connected",
        "Market feed connection state (1=connected)"
    )
    .unwrap()
});

/// Connection state machine current state.
/// Labels: state (disconnected/connecting/connected)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "paper_ws_state",
        "Market feed state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Caller-driven reconnect attempts.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "paper_ws_reconnect_total",
        "Total market feed reconnection attempts",
        &["outcome"]
    )
    .unwrap()
});

pub static FEED_FRAMES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "paper_feed_frames_total",
        "Inbound frames received from the venue"
    )
    .unwrap()
});

pub static FEED_PRICE_UPDATES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "paper_feed_price_updates_total",
        "Normalized price updates delivered to the sinks"
    )
    .unwrap()
});

/// Messages or updates dropped without delivery.
/// Labels: reason (malformed/unknown/ignored/unsubscribed)
pub static FEED_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "paper_feed_dropped_total",
        "Inbound messages dropped without a sink delivery",
        &["reason"]
    )
    .unwrap()
});

pub static KEEPALIVE_PINGS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("paper_keepalive_pings_total", "Keepalive PING frames sent").unwrap()
});

pub static KEEPALIVE_PONGS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "paper_keepalive_pongs_total",
        "Keepalive PONG frames received"
    )
    .unwrap()
});

pub static SUBSCRIBED_INSTRUMENTS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "paper_subscribed_instruments",
        "Instruments in the current feed subscription"
    )
    .unwrap()
});

pub static PORTFOLIO_MARKET_VALUE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "paper_portfolio_market_value",
        "Portfolio value at the latest midpoints"
    )
    .unwrap()
});

pub static PORTFOLIO_COST_BASIS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("paper_portfolio_cost_basis", "Portfolio cost basis").unwrap()
});

pub static PORTFOLIO_UNREALIZED_PNL: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "paper_portfolio_unrealized_pnl",
        "Unrealized PnL over marked positions"
    )
    .unwrap()
});

/// Latest midpoint per instrument. Removed when the quote becomes unpriced.
pub static QUOTE_MIDPOINT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "paper_quote_midpoint",
        "Latest midpoint price per instrument",
        &["instrument"]
    )
    .unwrap()
});

/// Cumulative feed counters, as reported by the feed client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedCounters {
    pub frames: u64,
    pub price_updates: u64,
    pub malformed: u64,
    pub unknown: u64,
    pub ignored: u64,
    pub unsubscribed: u64,
    pub pings_sent: u64,
    pub pongs_received: u64,
}

impl FeedCounters {
    /// Growth since `earlier`. Counters never go backwards.
    #[must_use]
    pub fn delta_since(&self, earlier: &Self) -> Self {
        Self {
            frames: self.frames.saturating_sub(earlier.frames),
            price_updates: self.price_updates.saturating_sub(earlier.price_updates),
            malformed: self.malformed.saturating_sub(earlier.malformed),
            unknown: self.unknown.saturating_sub(earlier.unknown),
            ignored: self.ignored.saturating_sub(earlier.ignored),
            unsubscribed: self.unsubscribed.saturating_sub(earlier.unsubscribed),
            pings_sent: self.pings_sent.saturating_sub(earlier.pings_sent),
            pongs_received: self.pongs_received.saturating_sub(earlier.pongs_received),
        }
    }
}

/// Metrics helper.
pub struct Metrics;

impl Metrics {
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
    }

    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    /// Set the active state to 1 and all others to 0.
    pub fn ws_state_set(state: &str) {
        for s in &["disconnected", "connecting", "connected"] {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
    }

    /// Record a reconnect attempt ("success" / "failure").
    pub fn ws_reconnect(outcome: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Add counter growth reported by the feed client.
    pub fn feed_counters(delta: &FeedCounters) {
        FEED_FRAMES_TOTAL.inc_by(delta.frames);
        FEED_PRICE_UPDATES_TOTAL.inc_by(delta.price_updates);
        FEED_DROPPED_TOTAL
            .with_label_values(&["malformed"])
            .inc_by(delta.malformed);
        FEED_DROPPED_TOTAL
            .with_label_values(&["unknown"])
            .inc_by(delta.unknown);
        FEED_DROPPED_TOTAL
            .with_label_values(&["ignored"])
            .inc_by(delta.ignored);
        FEED_DROPPED_TOTAL
            .with_label_values(&["unsubscribed"])
            .inc_by(delta.unsubscribed);
        KEEPALIVE_PINGS_TOTAL.inc_by(delta.pings_sent);
        KEEPALIVE_PONGS_TOTAL.inc_by(delta.pongs_received);
    }

    pub fn subscribed_instruments(count: usize) {
        SUBSCRIBED_INSTRUMENTS.set(count as i64);
    }

    pub fn portfolio(market_value: f64, cost_basis: f64, unrealized_pnl: f64) {
        PORTFOLIO_MARKET_VALUE.set(market_value);
        PORTFOLIO_COST_BASIS.set(cost_basis);
        PORTFOLIO_UNREALIZED_PNL.set(unrealized_pnl);
    }

    pub fn quote_midpoint(instrument: &str, midpoint: Option<f64>) {
        match midpoint {
            Some(value) => QUOTE_MIDPOINT.with_label_values(&[instrument]).set(value),
            None => {
                let _ = QUOTE_MIDPOINT.remove_label_values(&[instrument]);
            }
        }
    }

    /// Render the default registry in the Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
