//! Frame and event counters for the feed.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lifetime counters, shared between the client and its session task.
#[derive(Debug, Default)]
pub struct FeedStats {
    frames_received: AtomicU64,
    price_updates: AtomicU64,
    keepalive_acks: AtomicU64,
    malformed_frames: AtomicU64,
    ignored_events: AtomicU64,
    unknown_events: AtomicU64,
    unsubscribed_updates: AtomicU64,
}

impl FeedStats {
    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_price_update(&self) {
        self.price_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_keepalive_ack(&self) {
        self.keepalive_acks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self) {
        self.ignored_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown(&self) {
        self.unknown_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unsubscribed(&self) {
        self.unsubscribed_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FeedStatsSnapshot {
        FeedStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            price_updates: self.price_updates.load(Ordering::Relaxed),
            keepalive_acks: self.keepalive_acks.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            ignored_events: self.ignored_events.load(Ordering::Relaxed),
            unknown_events: self.unknown_events.load(Ordering::Relaxed),
            unsubscribed_updates: self.unsubscribed_updates.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`FeedStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStatsSnapshot {
    pub frames_received: u64,
    /// Updates delivered to the sinks.
    pub price_updates: u64,
    pub keepalive_acks: u64,
    /// Frames or batch elements that failed to decode.
    pub malformed_frames: u64,
    /// `book` and `tick_size_change` events.
    pub ignored_events: u64,
    pub unknown_events: u64,
    /// Updates dropped because the instrument is no longer subscribed.
    pub unsubscribed_updates: u64,
}
