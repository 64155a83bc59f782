//! Last-known quote per instrument.
//!
//! Display surfaces read the board directly or follow [`QuoteChanged`]
//! events. Each update replaces the cached quote, including with a null
//! midpoint: a quote that cannot be priced is shown as unpriced rather than
//! stale.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use paper_core::{InstrumentId, PriceSink, PriceUpdate};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Default capacity of the change channel.
pub const DEFAULT_CHANGE_CAPACITY: usize = 1024;

/// Midpoint as a percentage rounded to one decimal (0.6149 -> 61.5).
pub fn display_percent(midpoint: f64) -> f64 {
    (midpoint * 1000.0).round() / 10.0
}

/// Cached quote for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub instrument_id: InstrumentId,
    pub midpoint: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub fn display_percent(&self) -> Option<f64> {
        self.midpoint.map(display_percent)
    }
}

/// Emitted when an instrument's cached midpoint changes.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteChanged {
    pub instrument_id: InstrumentId,
    pub previous: Option<f64>,
    pub current: Option<f64>,
}

/// Display/quote sink.
pub struct QuoteBoard {
    quotes: DashMap<InstrumentId, Quote>,
    changes: broadcast::Sender<QuoteChanged>,
}

impl Default for QuoteBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteBoard {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANGE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            quotes: DashMap::new(),
            changes,
        }
    }

    pub fn quote(&self, instrument_id: &InstrumentId) -> Option<Quote> {
        self.quotes.get(instrument_id).map(|q| q.clone())
    }

    pub fn midpoint(&self, instrument_id: &InstrumentId) -> Option<f64> {
        self.quotes.get(instrument_id).and_then(|q| q.midpoint)
    }

    pub fn display_percent(&self, instrument_id: &InstrumentId) -> Option<f64> {
        self.midpoint(instrument_id).map(display_percent)
    }

    /// All cached quotes, ordered by instrument id.
    pub fn snapshot(&self) -> Vec<Quote> {
        let mut quotes: Vec<Quote> = self.quotes.iter().map(|q| q.value().clone()).collect();
        quotes.sort_by(|a, b| a.instrument_id.cmp(&b.instrument_id));
        quotes
    }

    /// Receiver for change events. Slow receivers lag rather than block.
    pub fn subscribe(&self) -> broadcast::Receiver<QuoteChanged> {
        self.changes.subscribe()
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

impl PriceSink for QuoteBoard {
    fn apply_price_update(&self, update: &PriceUpdate) {
        let quote = Quote {
            instrument_id: update.instrument_id.clone(),
            midpoint: update.midpoint_price,
            updated_at: update.timestamp.unwrap_or_else(Utc::now),
        };

        let previous = self.quotes.insert(update.instrument_id.clone(), quote);
        let changed = previous
            .as_ref()
            .map_or(true, |p| p.midpoint != update.midpoint_price);
        if !changed {
            return;
        }

        trace!(
            instrument = %update.instrument_id,
            midpoint = ?update.midpoint_price,
            "Quote changed"
        );
        // No receivers is fine
        let _ = self.changes.send(QuoteChanged {
            instrument_id: update.instrument_id.clone(),
            previous: previous.and_then(|p| p.midpoint),
            current: update.midpoint_price,
        });
    }

    fn name(&self) -> &str {
        "quotes"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> InstrumentId {
        InstrumentId::new(raw)
    }

    fn apply(board: &QuoteBoard, raw: &str, midpoint: Option<f64>) {
        board.apply_price_update(&PriceUpdate::new(id(raw), midpoint));
    }

    #[test]
    fn test_display_percent_rounding() {
        assert_eq!(display_percent(0.61), 61.0);
        assert_eq!(display_percent(0.6149), 61.5);
        assert_eq!(display_percent(0.456), 45.6);
        assert_eq!(display_percent(0.005), 0.5);
    }

    #[test]
    fn test_update_replaces_quote() {
        let board = QuoteBoard::new();
        apply(&board, "tokenA", Some(0.25));
        apply(&board, "tokenA", Some(0.5));

        assert_eq!(board.midpoint(&id("tokenA")), Some(0.5));
        assert_eq!(board.display_percent(&id("tokenA")), Some(50.0));
        assert_eq!(board.len(), 1);
    }

    #[test]
    fn test_null_midpoint_replaces_cached_price() {
        let board = QuoteBoard::new();
        apply(&board, "tokenA", Some(0.25));
        apply(&board, "tokenA", None);

        let quote = board.quote(&id("tokenA")).unwrap();
        assert_eq!(quote.midpoint, None);
        assert_eq!(quote.display_percent(), None);
    }

    #[test]
    fn test_snapshot_sorted() {
        let board = QuoteBoard::new();
        apply(&board, "b", Some(0.5));
        apply(&board, "a", None);

        let ids: Vec<_> = board.snapshot().into_iter().map(|q| q.instrument_id).collect();
        assert_eq!(ids, vec![id("a"), id("b")]);
    }

    #[tokio::test]
    async fn test_change_events() {
        let board = QuoteBoard::new();
        let mut rx = board.subscribe();

        apply(&board, "tokenA", Some(0.25));
        apply(&board, "tokenA", Some(0.25));
        apply(&board, "tokenA", Some(0.5));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.previous, None);
        assert_eq!(first.current, Some(0.25));

        // Repeated midpoint emits nothing
        let second = rx.recv().await.unwrap();
        assert_eq!(second.previous, Some(0.25));
        assert_eq!(second.current, Some(0.5));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_apply_without_receivers() {
        let board = QuoteBoard::with_capacity(1);
        for _ in 0..3 {
            apply(&board, "tokenA", Some(0.5));
            apply(&board, "tokenA", Some(0.25));
        }
        assert_eq!(board.midpoint(&id("tokenA")), Some(0.25));
    }
}
