//! Paper position book.
//!
//! Holds at most one position per instrument and marks it to the latest
//! midpoint delivered by the feed. Every mark or book change recomputes the
//! aggregate valuation and publishes it on a watch channel, so readers only
//! ever see the most recent value.

use crate::error::{FeedError, FeedResult};
use chrono::{DateTime, Utc};
use paper_core::{InstrumentId, PriceSink, PriceUpdate};
use parking_lot::RwLock;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

// ============================================================================
// Position
// ============================================================================

/// A paper position in one outcome token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub instrument_id: InstrumentId,
    /// Number of outcome shares held (always positive).
    pub shares: Decimal,
    /// Volume-weighted average entry price.
    pub avg_price: Decimal,
    /// Latest valid midpoint, if one has been seen.
    pub mark_price: Option<Decimal>,
    pub marked_at: Option<DateTime<Utc>>,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    #[must_use]
    pub fn new(instrument_id: InstrumentId, shares: Decimal, avg_price: Decimal) -> Self {
        Self {
            instrument_id,
            shares,
            avg_price,
            mark_price: None,
            marked_at: None,
            opened_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn cost_basis(&self) -> Decimal {
        self.shares * self.avg_price
    }

    /// Value at the current mark. `None` until the first valid midpoint.
    #[must_use]
    pub fn market_value(&self) -> Option<Decimal> {
        self.mark_price.map(|mark| self.shares * mark)
    }

    #[must_use]
    pub fn unrealized_pnl(&self) -> Option<Decimal> {
        self.market_value().map(|value| value - self.cost_basis())
    }

    /// Add shares at `price`, re-averaging the entry price.
    fn add(&mut self, shares: Decimal, price: Decimal) {
        let total = self.shares + shares;
        self.avg_price = (self.cost_basis() + shares * price) / total;
        self.shares = total;
    }
}

// ============================================================================
// PortfolioValuation
// ============================================================================

/// Aggregate valuation over every held position.
///
/// Positions without a mark contribute to `cost_basis` only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortfolioValuation {
    pub market_value: Decimal,
    pub cost_basis: Decimal,
    pub unrealized_pnl: Decimal,
    pub marked_positions: usize,
    pub unmarked_positions: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PortfolioValuation {
    fn compute<'a>(positions: impl Iterator<Item = &'a Position>) -> Self {
        let mut valuation = Self {
            updated_at: Some(Utc::now()),
            ..Self::default()
        };

        for position in positions {
            valuation.cost_basis += position.cost_basis();
            match (position.market_value(), position.unrealized_pnl()) {
                (Some(value), Some(pnl)) => {
                    valuation.market_value += value;
                    valuation.unrealized_pnl += pnl;
                    valuation.marked_positions += 1;
                }
                _ => valuation.unmarked_positions += 1,
            }
        }

        valuation
    }

    pub fn position_count(&self) -> usize {
        self.marked_positions + self.unmarked_positions
    }
}

// ============================================================================
// PositionBook
// ============================================================================

/// Position-valuation sink.
pub struct PositionBook {
    positions: RwLock<HashMap<InstrumentId, Position>>,
    valuation_tx: watch::Sender<PortfolioValuation>,
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionBook {
    pub fn new() -> Self {
        let (valuation_tx, _) = watch::channel(PortfolioValuation::default());
        Self {
            positions: RwLock::new(HashMap::new()),
            valuation_tx,
        }
    }

    /// Open a position, or add to the existing one for the same instrument.
    ///
    /// Prices are outcome-share prices and must lie in `(0, 1]`.
    pub fn open_position(
        &self,
        instrument_id: InstrumentId,
        shares: Decimal,
        price: Decimal,
    ) -> FeedResult<Position> {
        if shares <= Decimal::ZERO {
            return Err(FeedError::InvalidQuantity(format!(
                "{shares} shares for {instrument_id}"
            )));
        }
        if price <= Decimal::ZERO || price > Decimal::ONE {
            return Err(FeedError::InvalidPrice(format!(
                "{price} for {instrument_id} (must be in (0, 1])"
            )));
        }

        let position = {
            let mut positions = self.positions.write();
            let position = positions
                .entry(instrument_id.clone())
                .and_modify(|p| p.add(shares, price))
                .or_insert_with(|| Position::new(instrument_id.clone(), shares, price))
                .clone();
            self.publish_valuation(&positions);
            position
        };

        info!(
            instrument = %instrument_id,
            shares = %position.shares,
            avg_price = %position.avg_price,
            "Position opened"
        );
        Ok(position)
    }

    /// Remove a position entirely, returning its last state.
    pub fn close_position(&self, instrument_id: &InstrumentId) -> FeedResult<Position> {
        let removed = {
            let mut positions = self.positions.write();
            let removed = positions.remove(instrument_id);
            if removed.is_some() {
                self.publish_valuation(&positions);
            }
            removed
        };
        let position =
            removed.ok_or_else(|| FeedError::PositionNotFound(instrument_id.to_string()))?;

        info!(
            instrument = %instrument_id,
            shares = %position.shares,
            pnl = ?position.unrealized_pnl(),
            "Position closed"
        );
        Ok(position)
    }

    pub fn position(&self, instrument_id: &InstrumentId) -> Option<Position> {
        self.positions.read().get(instrument_id).cloned()
    }

    /// All positions, ordered by instrument id.
    pub fn positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.positions.read().values().cloned().collect();
        positions.sort_by(|a, b| a.instrument_id.cmp(&b.instrument_id));
        positions
    }

    /// Instruments the feed should stream for this book, ordered.
    pub fn instrument_ids(&self) -> Vec<InstrumentId> {
        let mut ids: Vec<InstrumentId> = self.positions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.positions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.read().is_empty()
    }

    /// Latest published valuation.
    pub fn valuation(&self) -> PortfolioValuation {
        self.valuation_tx.borrow().clone()
    }

    /// Receiver notified on every valuation change.
    pub fn subscribe(&self) -> watch::Receiver<PortfolioValuation> {
        self.valuation_tx.subscribe()
    }

    /// Revalue and publish. Callers hold the write lock so the last value
    /// sent always matches the last book change.
    fn publish_valuation(&self, positions: &HashMap<InstrumentId, Position>) {
        let valuation = PortfolioValuation::compute(positions.values());
        trace!(
            market_value = %valuation.market_value,
            unrealized_pnl = %valuation.unrealized_pnl,
            "Portfolio revalued"
        );
        self.valuation_tx.send_replace(valuation);
    }
}

impl PriceSink for PositionBook {
    fn apply_price_update(&self, update: &PriceUpdate) {
        // A null midpoint keeps the last valid mark
        let Some(midpoint) = update.midpoint_price else {
            trace!(instrument = %update.instrument_id, "No midpoint, mark unchanged");
            return;
        };
        let Some(mark) = Decimal::from_f64(midpoint) else {
            warn!(instrument = %update.instrument_id, midpoint, "Unrepresentable midpoint");
            return;
        };

        let mut positions = self.positions.write();
        let Some(position) = positions.get_mut(&update.instrument_id) else {
            return;
        };
        position.mark_price = Some(mark);
        position.marked_at = Some(update.timestamp.unwrap_or_else(Utc::now));
        self.publish_valuation(&positions);
        drop(positions);

        debug!(instrument = %update.instrument_id, %mark, "Position marked");
    }

    fn name(&self) -> &str {
        "positions"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn id(raw: &str) -> InstrumentId {
        InstrumentId::new(raw)
    }

    fn mark(book: &PositionBook, raw: &str, midpoint: Option<f64>) {
        book.apply_price_update(&PriceUpdate::new(id(raw), midpoint));
    }

    #[test]
    fn test_position_value_and_pnl() {
        let mut pos = Position::new(id("tokenA"), dec!(100), dec!(0.40));
        assert_eq!(pos.cost_basis(), dec!(40));
        assert_eq!(pos.market_value(), None);

        pos.mark_price = Some(dec!(0.5));
        assert_eq!(pos.market_value(), Some(dec!(50)));
        assert_eq!(pos.unrealized_pnl(), Some(dec!(10)));
    }

    #[test]
    fn test_open_adds_and_reaverages() {
        let book = PositionBook::new();
        book.open_position(id("tokenA"), dec!(100), dec!(0.40)).unwrap();
        let pos = book
            .open_position(id("tokenA"), dec!(100), dec!(0.60))
            .unwrap();

        assert_eq!(pos.shares, dec!(200));
        assert_eq!(pos.avg_price, dec!(0.50));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_open_rejects_invalid_input() {
        let book = PositionBook::new();

        assert!(matches!(
            book.open_position(id("a"), dec!(0), dec!(0.5)),
            Err(FeedError::InvalidQuantity(_))
        ));
        assert!(matches!(
            book.open_position(id("a"), dec!(10), dec!(0)),
            Err(FeedError::InvalidPrice(_))
        ));
        assert!(matches!(
            book.open_position(id("a"), dec!(10), dec!(1.5)),
            Err(FeedError::InvalidPrice(_))
        ));
        assert!(book.is_empty());
    }

    #[test]
    fn test_update_marks_matching_position_only() {
        let book = PositionBook::new();
        book.open_position(id("tokenA"), dec!(100), dec!(0.40)).unwrap();
        book.open_position(id("tokenB"), dec!(10), dec!(0.20)).unwrap();

        mark(&book, "tokenA", Some(0.5));

        assert_eq!(book.position(&id("tokenA")).unwrap().mark_price, Some(dec!(0.5)));
        assert_eq!(book.position(&id("tokenB")).unwrap().mark_price, None);

        let valuation = book.valuation();
        assert_eq!(valuation.market_value, dec!(50));
        assert_eq!(valuation.cost_basis, dec!(42));
        assert_eq!(valuation.unrealized_pnl, dec!(10));
        assert_eq!(valuation.marked_positions, 1);
        assert_eq!(valuation.unmarked_positions, 1);
    }

    #[test]
    fn test_null_midpoint_keeps_last_mark() {
        let book = PositionBook::new();
        book.open_position(id("tokenA"), dec!(100), dec!(0.40)).unwrap();

        mark(&book, "tokenA", Some(0.25));
        mark(&book, "tokenA", None);

        assert_eq!(book.position(&id("tokenA")).unwrap().mark_price, Some(dec!(0.25)));
        assert_eq!(book.valuation().market_value, dec!(25));
    }

    #[test]
    fn test_update_for_unheld_instrument_is_ignored() {
        let book = PositionBook::new();
        let rx = book.subscribe();

        mark(&book, "tokenZ", Some(0.5));

        assert!(!rx.has_changed().unwrap());
        assert!(book.is_empty());
    }

    #[test]
    fn test_close_position() {
        let book = PositionBook::new();
        book.open_position(id("tokenA"), dec!(100), dec!(0.40)).unwrap();
        mark(&book, "tokenA", Some(0.5));

        let closed = book.close_position(&id("tokenA")).unwrap();
        assert_eq!(closed.unrealized_pnl(), Some(dec!(10)));
        assert!(book.is_empty());
        assert_eq!(book.valuation().position_count(), 0);

        assert!(matches!(
            book.close_position(&id("tokenA")),
            Err(FeedError::PositionNotFound(_))
        ));
    }

    #[test]
    fn test_instrument_ids_sorted() {
        let book = PositionBook::new();
        book.open_position(id("c"), dec!(1), dec!(0.5)).unwrap();
        book.open_position(id("a"), dec!(1), dec!(0.5)).unwrap();
        book.open_position(id("b"), dec!(1), dec!(0.5)).unwrap();

        assert_eq!(book.instrument_ids(), vec![id("a"), id("b"), id("c")]);
        let ordered: Vec<_> = book.positions().into_iter().map(|p| p.instrument_id).collect();
        assert_eq!(ordered, vec![id("a"), id("b"), id("c")]);
    }

    #[test]
    fn test_concurrent_changes_publish_latest_valuation() {
        let book = PositionBook::new();
        for i in 0..8 {
            book.open_position(id(&format!("held{i}")), dec!(10), dec!(0.5))
                .unwrap();
        }

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for round in 0..500 {
                    let midpoint = if round % 2 == 0 { 0.25 } else { 0.75 };
                    for i in 0..8 {
                        mark(&book, &format!("held{i}"), Some(midpoint));
                    }
                }
            });
            scope.spawn(|| {
                for i in 0..200 {
                    book.open_position(id(&format!("new{i}")), dec!(1), dec!(0.5))
                        .unwrap();
                }
            });
        });

        let expected = PortfolioValuation::compute(book.positions().iter());
        let published = book.valuation();
        assert_eq!(published.position_count(), 208);
        assert_eq!(published.cost_basis, expected.cost_basis);
        assert_eq!(published.market_value, expected.market_value);
        assert_eq!(published.unrealized_pnl, expected.unrealized_pnl);
    }

    #[tokio::test]
    async fn test_subscriber_sees_revaluation() {
        let book = PositionBook::new();
        book.open_position(id("tokenA"), dec!(10), dec!(0.5)).unwrap();
        let mut rx = book.subscribe();

        mark(&book, "tokenA", Some(0.75));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().market_value, dec!(7.5));
        assert_eq!(rx.borrow().unrealized_pnl, dec!(2.5));
    }
}
