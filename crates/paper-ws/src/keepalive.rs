//! Keepalive for the market feed connection.
//!
//! The venue drops idle sockets, so a literal `PING` goes out on a fixed
//! cadence while connected. A missing `PONG` is not an error: the venue's
//! close frame is the liveness signal.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Default keepalive cadence expected by the venue.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Ticker for one connection.
///
/// The first tick fires one full period after creation. Dropping the ticker
/// stops the keepalive.
pub fn keepalive_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Keepalive bookkeeping shared between the client and its session task.
#[derive(Debug, Default)]
pub struct KeepaliveTracker {
    last_ping: RwLock<Option<DateTime<Utc>>>,
    last_pong: RwLock<Option<DateTime<Utc>>>,
    pings_sent: AtomicU64,
    pongs_received: AtomicU64,
}

impl KeepaliveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset per-connection timestamps (called on connect).
    pub fn reset(&self) {
        *self.last_ping.write() = None;
        *self.last_pong.write() = None;
    }

    pub fn record_ping(&self) {
        let now = Utc::now();
        *self.last_ping.write() = Some(now);
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
        debug!(time = %now, "Sent keepalive ping");
    }

    pub fn record_pong(&self) {
        let now = Utc::now();
        *self.last_pong.write() = Some(now);
        self.pongs_received.fetch_add(1, Ordering::Relaxed);

        if let Some(ping_time) = *self.last_ping.read() {
            let rtt_ms = (now - ping_time).num_milliseconds();
            debug!(rtt_ms, "Received keepalive pong");
        }
    }

    pub fn stats(&self) -> KeepaliveStats {
        KeepaliveStats {
            last_ping: *self.last_ping.read(),
            last_pong: *self.last_pong.read(),
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            pongs_received: self.pongs_received.load(Ordering::Relaxed),
        }
    }
}

/// Keepalive statistics.
#[derive(Debug, Clone, Default)]
pub struct KeepaliveStats {
    pub last_ping: Option<DateTime<Utc>>,
    pub last_pong: Option<DateTime<Utc>>,
    /// Lifetime total across reconnects.
    pub pings_sent: u64,
    pub pongs_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_ping_pong() {
        let tracker = KeepaliveTracker::new();
        assert!(tracker.stats().last_ping.is_none());

        tracker.record_ping();
        tracker.record_pong();

        let stats = tracker.stats();
        assert_eq!(stats.pings_sent, 1);
        assert_eq!(stats.pongs_received, 1);
        assert!(stats.last_ping.is_some());
        assert!(stats.last_pong.is_some());
    }

    #[test]
    fn test_reset_keeps_counters() {
        let tracker = KeepaliveTracker::new();
        tracker.record_ping();
        tracker.reset();

        let stats = tracker.stats();
        assert!(stats.last_ping.is_none());
        assert_eq!(stats.pings_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_fires_once_per_period() {
        let period = Duration::from_millis(10_000);
        let start = Instant::now();
        let mut ticker = keepalive_ticker(period);

        for n in 1..=3u32 {
            ticker.tick().await;
            assert_eq!(start.elapsed(), period * n);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_does_not_fire_early() {
        let period = Duration::from_millis(10_000);
        let mut ticker = keepalive_ticker(period);
        let mut tick = tokio_test::task::spawn(ticker.tick());

        tokio_test::assert_pending!(tick.poll());
        tokio::time::advance(period - Duration::from_millis(1)).await;
        tokio_test::assert_pending!(tick.poll());
        tokio::time::advance(Duration::from_millis(1)).await;
        tokio_test::assert_ready!(tick.poll());
    }
}
