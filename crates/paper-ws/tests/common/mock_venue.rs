//! Mock market venue for integration tests.
//!
//! Provides a WebSocket server that can:
//! - Accept connections and track how many are live
//! - Record every text frame received
//! - Answer `PING` with `PONG`
//! - Push text, binary and close frames to connected clients
//! - Drop the TCP stream without a close handshake

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Frame pushed from the venue to every connected client.
#[derive(Debug, Clone)]
pub enum VenueFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
    /// Drop the socket with no close frame.
    Reset,
}

/// A mock venue server.
pub struct MockVenue {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicU32>,
    live: Arc<AtomicU32>,
    close_replies: Arc<AtomicU32>,
    push_tx: broadcast::Sender<VenueFrame>,
}

impl MockVenue {
    /// Start a new mock venue on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicU32::new(0));
        let live = Arc::new(AtomicU32::new(0));
        let close_replies = Arc::new(AtomicU32::new(0));
        let (push_tx, _) = broadcast::channel(64);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let received_clone = received.clone();
        let connections_clone = connections.clone();
        let live_clone = live.clone();
        let close_clone = close_replies.clone();
        let push_clone = push_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        connections_clone.fetch_add(1, Ordering::SeqCst);
                        // Subscribe before the handshake completes so no push is missed
                        let push_rx = push_clone.subscribe();
                        tokio::spawn(handle_connection(
                            stream,
                            received_clone.clone(),
                            live_clone.clone(),
                            close_clone.clone(),
                            push_rx,
                        ));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            received,
            connections,
            live,
            close_replies,
            push_tx,
        }
    }

    /// Get the venue's WebSocket URL.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Total connections accepted.
    pub fn connection_count(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    pub fn live_connections(&self) -> u32 {
        self.live.load(Ordering::SeqCst)
    }

    /// Close frames received from clients.
    pub fn close_replies(&self) -> u32 {
        self.close_replies.load(Ordering::SeqCst)
    }

    /// All text frames received, in arrival order.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Subscribe frames received, in arrival order.
    pub fn subscribe_frames(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .filter(|m| m.starts_with('{'))
            .collect()
    }

    /// Number of keepalive pings received.
    pub fn ping_count(&self) -> usize {
        self.received().iter().filter(|m| *m == "PING").count()
    }

    /// Push a frame to every connected client.
    pub fn push(&self, frame: VenueFrame) {
        let _ = self.push_tx.send(frame);
    }

    /// Shutdown the listener.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    received: Arc<Mutex<Vec<String>>>,
    live: Arc<AtomicU32>,
    close_replies: Arc<AtomicU32>,
    mut push_rx: broadcast::Receiver<VenueFrame>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    live.fetch_add(1, Ordering::SeqCst);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    received.lock().unwrap().push(text.clone());
                    if text == "PING" {
                        let _ = write.send(Message::Text("PONG".to_string())).await;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    close_replies.fetch_add(1, Ordering::SeqCst);
                }
                // Keep reading so the close reply is flushed
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
            frame = push_rx.recv() => match frame {
                Ok(VenueFrame::Text(text)) => {
                    let _ = write.send(Message::Text(text)).await;
                }
                Ok(VenueFrame::Binary(data)) => {
                    let _ = write.send(Message::Binary(data)).await;
                }
                Ok(VenueFrame::Close) => {
                    let _ = write.send(Message::Close(None)).await;
                }
                Ok(VenueFrame::Reset) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    live.fetch_sub(1, Ordering::SeqCst);
}
