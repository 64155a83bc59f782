//! Main application orchestration.
//!
//! Owns the feed client and both stores, decides whether to `connect` or
//! `update_subscription` when the watch list changes, and supervises the
//! connection with caller-driven reconnects.

use crate::config::AppConfig;
use crate::error::AppResult;
use paper_core::{InstrumentId, SinkSet};
use paper_feed::{PortfolioValuation, Position, PositionBook, QuoteBoard};
use paper_telemetry::{FeedCounters, Metrics};
use paper_ws::{FeedClient, WsError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};

/// Reconnect bookkeeping carried between supervisor passes.
#[derive(Debug, Default)]
pub struct ReconnectState {
    failed_attempts: u32,
    next_attempt_at: Option<Instant>,
    gave_up: bool,
}

impl ReconnectState {
    /// Consecutive failed attempts since the last healthy check.
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn gave_up(&self) -> bool {
        self.gave_up
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Outcome of one supervisor pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    Healthy,
    Disabled,
    /// Backoff delay still running.
    Waiting,
    Reconnected,
    RetryScheduled { attempt: u32 },
    GaveUp,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    feed: Arc<FeedClient>,
    positions: Arc<PositionBook>,
    quotes: Arc<QuoteBoard>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the stores, seed positions and wire the feed client.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;

        let positions = Arc::new(PositionBook::new());
        for seed in &config.positions {
            positions.open_position(seed.instrument_id.clone(), seed.shares, seed.avg_price)?;
        }
        let quotes = Arc::new(QuoteBoard::new());

        // Valuation before display
        let sinks = SinkSet::new()
            .with(positions.clone())
            .with(quotes.clone());

        let feed = Arc::new(FeedClient::new(config.feed.clone(), sinks));
        feed.set_error_handler(|e: &WsError| {
            warn!(error = %e, "Market feed reported an error");
            Metrics::ws_disconnected();
        });

        info!(
            positions = positions.len(),
            instruments = config.instruments.len(),
            url = %config.feed.url,
            "Application initialized"
        );

        Ok(Self {
            config,
            feed,
            positions,
            quotes,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn feed(&self) -> &Arc<FeedClient> {
        &self.feed
    }

    pub fn positions(&self) -> &Arc<PositionBook> {
        &self.positions
    }

    pub fn quotes(&self) -> &Arc<QuoteBoard> {
        &self.quotes
    }

    /// Stop `run` at the next loop turn.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Instruments to stream: configured ones first, then held positions.
    pub fn watch_list(&self) -> Vec<InstrumentId> {
        let mut seen = HashSet::new();
        self.config
            .instruments
            .iter()
            .cloned()
            .chain(self.positions.instrument_ids())
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }

    /// Open the feed with the full watch list.
    pub async fn start(&self) -> AppResult<()> {
        Metrics::ws_state_set("connecting");
        let result = self.feed.connect(self.watch_list()).await;
        self.record_connection_state();
        result.map_err(Box::new)?;
        Ok(())
    }

    /// Open a paper position and make sure its instrument is streamed.
    pub fn open_position(
        &self,
        instrument_id: InstrumentId,
        shares: Decimal,
        price: Decimal,
    ) -> AppResult<Position> {
        let position = self.positions.open_position(instrument_id, shares, price)?;
        self.sync_subscription();
        Ok(position)
    }

    pub fn close_position(&self, instrument_id: &InstrumentId) -> AppResult<Position> {
        let position = self.positions.close_position(instrument_id)?;
        self.sync_subscription();
        Ok(position)
    }

    /// Push the watch list to the venue when it differs from the live one.
    ///
    /// While disconnected nothing is sent; the next connect carries the
    /// whole list.
    pub fn sync_subscription(&self) {
        let wanted = self.watch_list();
        if wanted == self.feed.current_subscription() {
            return;
        }

        if self.feed.is_connected() {
            self.feed.update_subscription(wanted);
            Metrics::subscribed_instruments(self.feed.current_subscription().len());
        } else {
            debug!(
                instruments = wanted.len(),
                "Feed not connected, watch list applies on next connect"
            );
        }
    }

    /// One supervisor pass: reconnect with backoff when the feed is down.
    pub async fn supervise(&self, state: &mut ReconnectState) -> SupervisorAction {
        if self.feed.is_connected() {
            if state.failed_attempts > 0 {
                info!(
                    failed_attempts = state.failed_attempts,
                    "Market feed healthy again"
                );
            }
            state.reset();
            return SupervisorAction::Healthy;
        }

        if !self.config.reconnect.enabled {
            return SupervisorAction::Disabled;
        }
        if state.gave_up {
            return SupervisorAction::GaveUp;
        }
        if state.next_attempt_at.is_some_and(|at| Instant::now() < at) {
            return SupervisorAction::Waiting;
        }

        let ids = self.watch_list();
        info!(
            attempt = state.failed_attempts + 1,
            instruments = ids.len(),
            "Reconnecting market feed"
        );

        match self.feed.connect(ids).await {
            Ok(()) => {
                Metrics::ws_reconnect("success");
                self.record_connection_state();
                state.reset();
                SupervisorAction::Reconnected
            }
            Err(e) => {
                Metrics::ws_reconnect("failure");
                self.record_connection_state();
                self.schedule_retry(state, &e)
            }
        }
    }

    fn schedule_retry(
        &self,
        state: &mut ReconnectState,
        e: &dyn std::fmt::Display,
    ) -> SupervisorAction {
        let policy = &self.config.reconnect;
        state.failed_attempts += 1;

        if policy.exhausted(state.failed_attempts) {
            error!(
                attempts = state.failed_attempts,
                error = %e,
                "Giving up on market feed reconnect"
            );
            state.gave_up = true;
            return SupervisorAction::GaveUp;
        }

        let delay = policy.backoff_delay(state.failed_attempts);
        warn!(
            attempt = state.failed_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "Market feed connect failed, retry scheduled"
        );
        state.next_attempt_at = Some(Instant::now() + delay);
        SupervisorAction::RetryScheduled {
            attempt: state.failed_attempts,
        }
    }

    /// Mirror feed counters into metrics and log a summary.
    pub fn report_stats(&self, last: &mut FeedCounters) {
        let feed = self.feed.stats();
        let keepalive = self.feed.keepalive_stats();
        let current = FeedCounters {
            frames: feed.frames_received,
            price_updates: feed.price_updates,
            malformed: feed.malformed_frames,
            unknown: feed.unknown_events,
            ignored: feed.ignored_events,
            unsubscribed: feed.unsubscribed_updates,
            pings_sent: keepalive.pings_sent,
            pongs_received: keepalive.pongs_received,
        };

        Metrics::feed_counters(&current.delta_since(last));
        *last = current;
        self.record_connection_state();

        info!(
            state = %self.feed.state(),
            frames = current.frames,
            price_updates = current.price_updates,
            malformed = current.malformed,
            unknown = current.unknown,
            pings_sent = current.pings_sent,
            last_pong = ?keepalive.last_pong,
            "Market feed stats"
        );

        if tracing::enabled!(Level::DEBUG) {
            match Metrics::gather_text() {
                Ok(text) => debug!(metrics = %text, "Metrics snapshot"),
                Err(e) => warn!(error = %e, "Failed to render metrics"),
            }
        }
    }

    fn record_connection_state(&self) {
        Metrics::ws_state_set(&self.feed.state().to_string());
        if self.feed.is_connected() {
            Metrics::ws_connected();
        } else {
            Metrics::ws_disconnected();
        }
        Metrics::subscribed_instruments(self.feed.current_subscription().len());
    }

    fn record_valuation(valuation: &PortfolioValuation) {
        Metrics::portfolio(
            valuation.market_value.to_f64().unwrap_or_default(),
            valuation.cost_basis.to_f64().unwrap_or_default(),
            valuation.unrealized_pnl.to_f64().unwrap_or_default(),
        );
    }

    fn log_valuation(&self) {
        let valuation = self.positions.valuation();
        info!(
            market_value = %valuation.market_value,
            cost_basis = %valuation.cost_basis,
            unrealized_pnl = %valuation.unrealized_pnl,
            marked = valuation.marked_positions,
            unmarked = valuation.unmarked_positions,
            "Portfolio valuation"
        );
    }

    /// Run until ctrl-c or [`shutdown`](Self::shutdown), then end the session.
    pub async fn run(&self) -> AppResult<()> {
        let mut reconnect = ReconnectState::default();

        if let Err(e) = self.start().await {
            if !self.config.reconnect.enabled
                || self.schedule_retry(&mut reconnect, &e) == SupervisorAction::GaveUp
            {
                return Err(e);
            }
        }

        let mut supervisor = interval(self.config.reconnect.check_interval());
        supervisor.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats_tick = interval(self.config.stats_interval());
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut valuation_tick = interval(self.config.valuation_log_interval());
        valuation_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut valuation_rx = self.positions.subscribe();
        let mut quote_rx = self.quotes.subscribe();
        let mut last_counters = FeedCounters::default();
        Self::record_valuation(&self.positions.valuation());

        info!("Entering main event loop");
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }

                _ = supervisor.tick() => {
                    self.supervise(&mut reconnect).await;
                }

                _ = stats_tick.tick() => self.report_stats(&mut last_counters),

                _ = valuation_tick.tick() => self.log_valuation(),

                Ok(()) = valuation_rx.changed() => {
                    let valuation = valuation_rx.borrow_and_update().clone();
                    Self::record_valuation(&valuation);
                }

                change = quote_rx.recv() => match change {
                    Ok(change) => {
                        Metrics::quote_midpoint(change.instrument_id.as_str(), change.current);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Quote change receiver lagged");
                    }
                    // The board outlives this loop
                    Err(RecvError::Closed) => {}
                },
            }
        }

        info!("Shutting down");
        self.feed.end_session().await;
        self.report_stats(&mut last_counters);
        self.log_valuation();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PositionSeed, ReconnectConfig};
    use rust_decimal_macros::dec;

    fn id(raw: &str) -> InstrumentId {
        InstrumentId::new(raw)
    }

    /// Config pointing at a port nothing listens on.
    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.feed.url = "ws://127.0.0.1:1".to_string();
        config.reconnect = ReconnectConfig {
            base_delay_ms: 200,
            max_delay_ms: 800,
            jitter_ms: 0,
            ..Default::default()
        };
        config
    }

    #[test]
    fn test_new_seeds_positions() {
        let mut config = offline_config();
        config.positions = vec![PositionSeed {
            instrument_id: id("tokenB"),
            shares: dec!(10),
            avg_price: dec!(0.5),
        }];

        let app = Application::new(config).unwrap();
        assert_eq!(app.positions().len(), 1);
        assert_eq!(app.positions().valuation().cost_basis, dec!(5));
    }

    #[test]
    fn test_new_rejects_invalid_seed() {
        let mut config = offline_config();
        config.positions = vec![PositionSeed {
            instrument_id: id("tokenB"),
            shares: dec!(10),
            avg_price: dec!(2),
        }];

        assert!(Application::new(config).is_err());
    }

    #[test]
    fn test_watch_list_merges_and_dedupes() {
        let mut config = offline_config();
        config.instruments = vec![id("tokenA"), id("tokenB"), id("tokenA")];
        let app = Application::new(config).unwrap();

        app.open_position(id("tokenC"), dec!(1), dec!(0.5)).unwrap();
        app.open_position(id("tokenB"), dec!(1), dec!(0.5)).unwrap();

        assert_eq!(app.watch_list(), vec![id("tokenA"), id("tokenB"), id("tokenC")]);
    }

    #[test]
    fn test_sync_while_disconnected_leaves_subscription() {
        let app = Application::new(offline_config()).unwrap();
        app.open_position(id("tokenA"), dec!(1), dec!(0.5)).unwrap();

        assert!(app.feed().current_subscription().is_empty());
        assert_eq!(app.watch_list(), vec![id("tokenA")]);
    }

    #[test]
    fn test_report_stats_populates_registry() {
        let app = Application::new(offline_config()).unwrap();
        let mut last = FeedCounters::default();

        app.report_stats(&mut last);

        assert_eq!(last, FeedCounters::default());
        let text = Metrics::gather_text().unwrap();
        assert!(text.contains("paper_ws_state"));
        assert!(text.contains("paper_subscribed_instruments"));
    }

    #[tokio::test]
    async fn test_supervisor_backs_off_after_failure() {
        let app = Application::new(offline_config()).unwrap();
        let mut state = ReconnectState::default();

        let first = app.supervise(&mut state).await;
        assert_eq!(first, SupervisorAction::RetryScheduled { attempt: 1 });
        assert_eq!(state.failed_attempts(), 1);

        // 200ms backoff still running
        assert_eq!(app.supervise(&mut state).await, SupervisorAction::Waiting);

        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        let second = app.supervise(&mut state).await;
        assert_eq!(second, SupervisorAction::RetryScheduled { attempt: 2 });
    }

    #[tokio::test]
    async fn test_supervisor_gives_up_after_max_attempts() {
        let mut config = offline_config();
        config.reconnect.max_attempts = 1;
        let app = Application::new(config).unwrap();
        let mut state = ReconnectState::default();

        assert_eq!(app.supervise(&mut state).await, SupervisorAction::GaveUp);
        assert!(state.gave_up());
        assert_eq!(app.supervise(&mut state).await, SupervisorAction::GaveUp);
    }

    #[tokio::test]
    async fn test_supervisor_disabled() {
        let mut config = offline_config();
        config.reconnect.enabled = false;
        let app = Application::new(config).unwrap();

        let mut state = ReconnectState::default();
        assert_eq!(app.supervise(&mut state).await, SupervisorAction::Disabled);
        assert_eq!(state.failed_attempts(), 0);
    }

    #[tokio::test]
    async fn test_run_fails_when_reconnect_disabled() {
        let mut config = offline_config();
        config.reconnect.enabled = false;
        let app = Application::new(config).unwrap();

        assert!(app.run().await.is_err());
        assert!(!app.feed().is_connected());
    }
}
