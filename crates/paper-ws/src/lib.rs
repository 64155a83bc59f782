//! Streaming market feed client for the paper trading venue.
//!
//! Provides the venue market-channel connection with:
//! - One transport per client, replaced on reconnect
//! - Replace-semantics subscription management
//! - `PING` keepalive every 10s while connected
//! - Decoding of `price_change` / `last_trade_price` into midpoint updates
//! - Synchronous fan-out to the registered price sinks

pub mod connection;
pub mod error;
pub mod keepalive;
pub mod message;
pub mod router;
pub mod stats;
pub mod subscription;

pub use connection::{ConnectionState, ErrorHandler, FeedClient, FeedConfig, DEFAULT_MARKET_URL};
pub use error::{WsError, WsResult};
pub use keepalive::{KeepaliveStats, KeepaliveTracker};
pub use message::{
    decode_binary, decode_text, InboundFrame, LastTradePriceMessage, PriceChangeEntry,
    PriceChangeMessage, SubscribeRequest, VenueMessage, KEEPALIVE_PING, KEEPALIVE_PONG,
};
pub use router::FrameRouter;
pub use stats::{FeedStats, FeedStatsSnapshot};
pub use subscription::{SubscriptionDiff, SubscriptionManager};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
