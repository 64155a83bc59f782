//! Inbound frame routing.
//!
//! Decodes each frame, normalizes venue messages into price updates and
//! fans them out to the sinks. Nothing here returns an error: bad frames
//! are logged, counted and dropped, and the connection stays up.

use crate::error::WsResult;
use crate::keepalive::KeepaliveTracker;
use crate::message::{decode_binary, decode_text, InboundFrame, VenueMessage};
use crate::stats::FeedStats;
use crate::subscription::SubscriptionManager;
use paper_core::SinkSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Routes decoded frames to the sinks.
pub struct FrameRouter {
    subscriptions: Arc<SubscriptionManager>,
    sinks: SinkSet,
    keepalive: Arc<KeepaliveTracker>,
    stats: Arc<FeedStats>,
}

impl FrameRouter {
    pub fn new(
        subscriptions: Arc<SubscriptionManager>,
        sinks: SinkSet,
        keepalive: Arc<KeepaliveTracker>,
        stats: Arc<FeedStats>,
    ) -> Self {
        Self {
            subscriptions,
            sinks,
            keepalive,
            stats,
        }
    }

    /// Handle a text frame. Returns the number of updates delivered.
    pub fn handle_text(&self, text: &str) -> usize {
        self.dispatch(decode_text(text))
    }

    /// Handle a binary frame. Decoded inline so frame order is preserved.
    pub fn handle_binary(&self, data: &[u8]) -> usize {
        self.dispatch(decode_binary(data))
    }

    fn dispatch(&self, decoded: WsResult<InboundFrame>) -> usize {
        self.stats.record_frame();

        match decoded {
            Ok(InboundFrame::Keepalive) => {
                self.keepalive.record_pong();
                self.stats.record_keepalive_ack();
                0
            }
            Ok(InboundFrame::Messages(messages)) => messages
                .into_iter()
                .map(|msg| self.handle_message(msg))
                .sum(),
            Err(e) => {
                self.stats.record_malformed();
                warn!(error = %e, "Dropping malformed frame");
                0
            }
        }
    }

    fn handle_message(&self, msg: WsResult<VenueMessage>) -> usize {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                self.stats.record_malformed();
                warn!(error = %e, "Dropping undecodable venue message");
                return 0;
            }
        };

        match &msg {
            VenueMessage::Book | VenueMessage::TickSizeChange => {
                self.stats.record_ignored();
                trace!(event_type = msg.event_type(), "Ignoring venue event");
                0
            }
            VenueMessage::Unknown(event_type) => {
                self.stats.record_unknown();
                warn!(%event_type, "Unknown venue event type");
                0
            }
            VenueMessage::PriceChange(_) | VenueMessage::LastTradePrice(_) => {
                let mut delivered = 0;
                for update in msg.price_updates() {
                    if !self.subscriptions.contains(&update.instrument_id) {
                        self.stats.record_unsubscribed();
                        debug!(
                            instrument = %update.instrument_id,
                            "Dropping update for unsubscribed instrument"
                        );
                        continue;
                    }
                    trace!(
                        instrument = %update.instrument_id,
                        midpoint = ?update.midpoint_price,
                        "Price update"
                    );
                    self.sinks.publish(&update);
                    self.stats.record_price_update();
                    delivered += 1;
                }
                delivered
            }
        }
    }
}
