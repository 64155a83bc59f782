//! Market feed connection manager.
//!
//! Owns the single streaming connection to the venue: opens it, sends the
//! subscribe frame, runs the keepalive and hands every inbound frame to the
//! router. Reconnecting is the caller's job; a closed connection stays
//! closed until `connect` is called again.

use crate::error::{WsError, WsResult};
use crate::keepalive::{
    keepalive_ticker, KeepaliveStats, KeepaliveTracker, DEFAULT_KEEPALIVE_INTERVAL,
};
use crate::message::{SubscribeRequest, KEEPALIVE_PING};
use crate::router::FrameRouter;
use crate::stats::{FeedStats, FeedStatsSnapshot};
use crate::subscription::SubscriptionManager;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use paper_core::{InstrumentId, SinkSet};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Market channel endpoint.
pub const DEFAULT_MARKET_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Callback for transport errors.
pub type ErrorHandler = Arc<dyn Fn(&WsError) + Send + Sync>;

/// Feed connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// WebSocket URL of the market channel.
    #[serde(default = "default_url")]
    pub url: String,
    /// Keepalive interval. Default: 10,000 (venue expectation).
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    /// Upper bound on the opening handshake. Default: none.
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    /// How long `disconnect` waits for the venue's close reply. Default: 1,000.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

fn default_url() -> String {
    DEFAULT_MARKET_URL.to_string()
}

fn default_keepalive_interval_ms() -> u64 {
    DEFAULT_KEEPALIVE_INTERVAL.as_millis() as u64
}

fn default_close_timeout_ms() -> u64 {
    1_000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            connect_timeout_ms: None,
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl FeedConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Handle to the running session task.
struct Session {
    outbound_tx: mpsc::UnboundedSender<Message>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Session {
    fn is_open(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Streaming market feed client.
///
/// One instance owns at most one transport. Construct it at the composition
/// root and share it by reference; all methods take `&self`.
pub struct FeedClient {
    config: FeedConfig,
    state: Arc<RwLock<ConnectionState>>,
    subscriptions: Arc<SubscriptionManager>,
    keepalive: Arc<KeepaliveTracker>,
    stats: Arc<FeedStats>,
    sinks: SinkSet,
    error_handler: Arc<RwLock<Option<ErrorHandler>>>,
    session: Mutex<Option<Session>>,
    /// Serializes `connect` / `disconnect`.
    lifecycle: TokioMutex<()>,
}

impl FeedClient {
    /// Create a new client delivering updates to `sinks`, in their order.
    pub fn new(config: FeedConfig, sinks: SinkSet) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            subscriptions: Arc::new(SubscriptionManager::new()),
            keepalive: Arc::new(KeepaliveTracker::new()),
            stats: Arc::new(FeedStats::default()),
            sinks,
            error_handler: Arc::new(RwLock::new(None)),
            session: Mutex::new(None),
            lifecycle: TokioMutex::new(()),
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Register the transport error callback, replacing any previous one.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&WsError) + Send + Sync + 'static,
    {
        *self.error_handler.write() = Some(Arc::new(handler));
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// True iff state is `Connected` and the transport is still open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
            && self.session.lock().as_ref().is_some_and(Session::is_open)
    }

    /// Copy of the current subscription list.
    pub fn current_subscription(&self) -> Vec<InstrumentId> {
        self.subscriptions.current()
    }

    pub fn keepalive_stats(&self) -> KeepaliveStats {
        self.keepalive.stats()
    }

    pub fn stats(&self) -> FeedStatsSnapshot {
        self.stats.snapshot()
    }

    /// Open the transport and subscribe to `instrument_ids`.
    ///
    /// Any existing connection is fully closed first. Returns once the
    /// transport is open and the subscribe frame has been written.
    pub async fn connect(&self, instrument_ids: Vec<InstrumentId>) -> WsResult<()> {
        let _guard = self.lifecycle.lock().await;

        if self.close_session().await {
            info!("Closed previous market feed connection before reconnecting");
        }

        self.subscriptions.replace(instrument_ids);
        *self.state.write() = ConnectionState::Connecting;
        info!(
            url = %self.config.url,
            instruments = self.subscriptions.len(),
            "Connecting to market feed"
        );

        let (mut write, read) = match self.open_transport().await {
            Ok(stream) => stream.split(),
            Err(e) => return Err(self.fail_connect(e)),
        };

        let subscribe = match self.subscriptions.subscribe_frame() {
            Ok(frame) => frame,
            Err(e) => return Err(self.fail_connect(e)),
        };
        if let Err(e) = write.send(Message::Text(subscribe)).await {
            return Err(self.fail_connect(e.into()));
        }

        self.keepalive.reset();
        *self.state.write() = ConnectionState::Connected;
        info!(
            instruments = self.subscriptions.len(),
            "Market feed connected"
        );

        let shutdown = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = SessionTask {
            write,
            read,
            outbound_rx,
            shutdown: shutdown.clone(),
            router: FrameRouter::new(
                self.subscriptions.clone(),
                self.sinks.clone(),
                self.keepalive.clone(),
                self.stats.clone(),
            ),
            keepalive: self.keepalive.clone(),
            keepalive_interval: self.config.keepalive_interval(),
            close_timeout: self.config.close_timeout(),
            state: self.state.clone(),
            error_handler: self.error_handler.clone(),
        };

        *self.session.lock() = Some(Session {
            outbound_tx,
            shutdown,
            task: tokio::spawn(task.run()),
        });

        Ok(())
    }

    /// Close the connection. Safe to call in any state.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;

        if self.close_session().await {
            info!("Market feed disconnected");
        } else {
            debug!("Disconnect requested with no active connection");
        }
    }

    /// Disconnect and forget the subscription list (logout / session end).
    pub async fn end_session(&self) {
        self.disconnect().await;
        self.subscriptions.clear();
        info!("Market feed session ended");
    }

    /// Replace the subscription with `instrument_ids`.
    ///
    /// No-op with an error log when not connected: there is no channel to
    /// tell the venue, so the local list is left untouched.
    pub fn update_subscription(&self, instrument_ids: Vec<InstrumentId>) {
        if !self.is_connected() {
            error!(
                requested = instrument_ids.len(),
                state = %self.state(),
                "Cannot update subscription: market feed not connected"
            );
            return;
        }

        let frame = match SubscribeRequest::market(&instrument_ids).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Failed to encode subscribe frame");
                return;
            }
        };

        let queued = self
            .session
            .lock()
            .as_ref()
            .is_some_and(|session| session.outbound_tx.send(Message::Text(frame)).is_ok());
        if !queued {
            error!("Cannot update subscription: session closed");
            return;
        }

        let diff = self.subscriptions.replace(instrument_ids);
        info!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            total = self.subscriptions.len(),
            "Subscription updated"
        );
    }

    async fn open_transport(&self) -> WsResult<WsStream> {
        // disable_nagle = true
        let handshake = connect_async_tls_with_config(&self.config.url, None, true, None);

        let (stream, _response) = match self.config.connect_timeout() {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| WsError::ConnectTimeout {
                    timeout_ms: limit.as_millis() as u64,
                })??,
            None => handshake.await?,
        };

        Ok(stream)
    }

    fn fail_connect(&self, e: WsError) -> WsError {
        *self.state.write() = ConnectionState::Disconnected;
        error!(error = %e, url = %self.config.url, "Market feed connection failed");
        report_error(&self.error_handler, &e);
        e
    }

    /// Stop the current session, if any, and wait for it to finish.
    /// Returns whether a session existed.
    async fn close_session(&self) -> bool {
        let Some(session) = self.session.lock().take() else {
            *self.state.write() = ConnectionState::Disconnected;
            return false;
        };

        *self.state.write() = ConnectionState::Disconnected;
        session.shutdown.cancel();
        if let Err(e) = session.task.await {
            warn!(error = %e, "Market feed session task did not exit cleanly");
        }
        true
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.shutdown.cancel();
        }
    }
}

fn report_error(handler: &RwLock<Option<ErrorHandler>>, e: &WsError) {
    let handler = handler.read().clone();
    if let Some(handler) = handler {
        handler(e);
    }
}

/// Why the session loop ended.
enum SessionEnd {
    /// `disconnect` or a newer `connect`.
    Requested,
    /// The venue closed the socket.
    Closed { code: u16, reason: String },
    /// Transport error after open.
    Failed(WsError),
}

/// Owns the socket for one connection.
struct SessionTask {
    write: WsWrite,
    read: WsRead,
    outbound_rx: mpsc::UnboundedReceiver<Message>,
    shutdown: CancellationToken,
    router: FrameRouter,
    keepalive: Arc<KeepaliveTracker>,
    keepalive_interval: Duration,
    close_timeout: Duration,
    state: Arc<RwLock<ConnectionState>>,
    error_handler: Arc<RwLock<Option<ErrorHandler>>>,
}

/// Forces the shared state to `Disconnected` however the session task exits,
/// unwinding included.
struct DisconnectOnDrop(Arc<RwLock<ConnectionState>>);

impl Drop for DisconnectOnDrop {
    fn drop(&mut self) {
        *self.0.write() = ConnectionState::Disconnected;
        if std::thread::panicking() {
            error!("Market feed session task panicked");
        }
    }
}

impl SessionTask {
    async fn run(mut self) {
        let _disconnect = DisconnectOnDrop(self.state.clone());
        let mut ticker = keepalive_ticker(self.keepalive_interval);

        let end = loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break SessionEnd::Requested,

                msg = self.read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.router.handle_text(&text);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        self.router.handle_binary(&data);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = self.write.send(Message::Pong(data)).await {
                            break SessionEnd::Failed(e.into());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((1000, "Normal close".to_string()));
                        break SessionEnd::Closed { code, reason };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break SessionEnd::Failed(e.into()),
                    None => {
                        break SessionEnd::Closed {
                            code: 1006,
                            reason: "Stream ended".to_string(),
                        }
                    }
                },

                Some(frame) = self.outbound_rx.recv() => {
                    if let Err(e) = self.write.send(frame).await {
                        break SessionEnd::Failed(e.into());
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.write.send(Message::Text(KEEPALIVE_PING.to_string())).await {
                        break SessionEnd::Failed(e.into());
                    }
                    self.keepalive.record_ping();
                }
            }
        };

        // Keepalive stops before the socket is released
        drop(ticker);
        *self.state.write() = ConnectionState::Disconnected;

        match end {
            SessionEnd::Requested => self.close_gracefully().await,
            SessionEnd::Closed { code, reason } => {
                warn!(code, %reason, "Market feed closed by venue");
                // Flush the queued close reply
                if let Err(e) = self.write.close().await {
                    debug!(error = %e, "Failed to complete close handshake");
                }
            }
            SessionEnd::Failed(e) => {
                error!(error = %e, "Market feed transport error");
                report_error(&self.error_handler, &e);
            }
        }
    }

    /// Send a close frame and wait briefly for the venue's reply.
    async fn close_gracefully(&mut self) {
        if let Err(e) = self.write.send(Message::Close(None)).await {
            debug!(error = %e, "Failed to send close frame");
            return;
        }

        let confirmed = tokio::time::timeout(self.close_timeout, async {
            while let Some(msg) = self.read.next().await {
                match msg {
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        if confirmed.is_err() {
            debug!("Close handshake not confirmed before timeout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FeedConfig::default();
        assert_eq!(config.url, DEFAULT_MARKET_URL);
        assert_eq!(config.keepalive_interval_ms, 10_000);
        assert_eq!(config.connect_timeout(), None);
    }

    #[test]
    fn test_config_deserialize_fills_defaults() {
        let config: FeedConfig = serde_json::from_str(r#"{"connect_timeout_ms": 5000}"#).unwrap();
        assert_eq!(config.url, DEFAULT_MARKET_URL);
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.close_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_new_client_is_disconnected() {
        let client = FeedClient::new(FeedConfig::default(), SinkSet::new());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert!(client.current_subscription().is_empty());
    }

    #[test]
    fn test_update_subscription_when_disconnected_is_noop() {
        let client = FeedClient::new(FeedConfig::default(), SinkSet::new());
        client.update_subscription(vec![InstrumentId::new("tokenA")]);
        assert!(client.current_subscription().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let client = FeedClient::new(FeedConfig::default(), SinkSet::new());
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
