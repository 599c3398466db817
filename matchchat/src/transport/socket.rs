//! WebSocket transport for the `MatchChat` live channel.
//!
//! Owns a single persistent connection to the chat server. A background
//! reader task decodes inbound frames and fans them out to subscribers;
//! when the connection drops unexpectedly, the same task reconnects with
//! exponential backoff, replays join intents queued while the connection
//! was down, and publishes the state transitions the membership layer uses
//! to re-join the active room.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use matchchat_proto::frame::{self, ClientFrame, ServerFrame};

use super::{ConnectionState, Transport, TransportError, TransportEvent};

/// Type alias for the write half of the WebSocket connection.
type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

/// Type alias for the read half of the WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for establishing the WebSocket connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Reconnection behavior after an unexpected connection loss.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound for the exponentially growing delay.
    pub max_delay: Duration,
    /// Number of attempts before giving up and reporting `Disconnected`.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

/// WebSocket transport implementing the [`Transport`] trait.
///
/// Created disconnected via [`SocketTransport::new`]; [`connect`] is
/// idempotent and a no-op while a connection is active. One instance is
/// shared per client process.
///
/// [`connect`]: SocketTransport::connect
pub struct SocketTransport {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    reconnect: ReconnectConfig,
    events: broadcast::Sender<TransportEvent>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    state: parking_lot::Mutex<ConnectionState>,
    pending_joins: parking_lot::Mutex<Vec<ClientFrame>>,
    shutdown: AtomicBool,
}

impl SocketTransport {
    /// Create a disconnected transport for the given `ws://`/`wss://` URL.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] if the URL cannot be parsed.
    pub fn new(url: &str, reconnect: ReconnectConfig) -> Result<Self, TransportError> {
        url::Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                url: url.to_string(),
                reconnect,
                events,
                sink: tokio::sync::Mutex::new(None),
                state: parking_lot::Mutex::new(ConnectionState::Disconnected),
                pending_joins: parking_lot::Mutex::new(Vec::new()),
                shutdown: AtomicBool::new(false),
            }),
        })
    }

    /// Establish the connection. No-op if already connected.
    ///
    /// Spawns the background reader/reconnect task on success.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Timeout`] if the connection attempt times
    /// out, or [`TransportError::Io`] for dial failures.
    pub async fn connect(&self) -> Result<(), TransportError> {
        match self.inner.current_state() {
            // Already connected, or the background task is restoring the
            // connection — either way there is nothing to do.
            ConnectionState::Connected | ConnectionState::Reconnecting => return Ok(()),
            ConnectionState::Disconnected => {}
        }
        self.inner.shutdown.store(false, Ordering::SeqCst);

        let (sink, reader) = dial(&self.inner.url).await?;
        *self.inner.sink.lock().await = Some(sink);
        self.inner.flush_pending_joins().await;
        self.inner.set_state(ConnectionState::Connected);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(run(inner, reader));
        Ok(())
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            let _ = sink.send(WsMessage::Close(None)).await;
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// The server URL this transport connects to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }
}

impl Transport for SocketTransport {
    async fn emit(&self, frame: ClientFrame) -> Result<(), TransportError> {
        if self.inner.current_state() != ConnectionState::Connected {
            self.inner.queue_if_join(frame);
            return Ok(());
        }

        let text = frame::encode(&frame)?;
        let mut sink = self.inner.sink.lock().await;
        match sink.as_mut() {
            Some(ws) => {
                if let Err(e) = ws.send(WsMessage::Text(text.into())).await {
                    tracing::warn!(err = %e, "socket send failed");
                    drop(sink);
                    self.inner.queue_if_join(frame);
                }
            }
            None => {
                drop(sink);
                self.inner.queue_if_join(frame);
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }

    fn state(&self) -> ConnectionState {
        self.inner.current_state()
    }
}

impl Inner {
    fn current_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = {
            let mut current = self.state.lock();
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        };
        if changed {
            tracing::debug!(state = %state, "transport state changed");
            let _ = self.events.send(TransportEvent::State(state));
        }
    }

    /// Join intents are queued for redelivery after reconnect; everything
    /// else emitted while disconnected is dropped.
    fn queue_if_join(&self, frame: ClientFrame) {
        if matches!(frame, ClientFrame::Join { .. }) {
            tracing::debug!("queueing join intent while disconnected");
            self.pending_joins.lock().push(frame);
        } else {
            tracing::debug!("dropping frame emitted while disconnected");
        }
    }

    /// Redeliver join intents queued while the connection was down.
    async fn flush_pending_joins(&self) {
        let queued: Vec<ClientFrame> = self.pending_joins.lock().drain(..).collect();
        if queued.is_empty() {
            return;
        }
        let mut sink = self.sink.lock().await;
        let Some(ws) = sink.as_mut() else { return };
        for frame in queued {
            match frame::encode(&frame) {
                Ok(text) => {
                    if let Err(e) = ws.send(WsMessage::Text(text.into())).await {
                        tracing::warn!(err = %e, "failed to redeliver queued join");
                        break;
                    }
                }
                Err(e) => tracing::warn!(err = %e, "failed to encode queued join"),
            }
        }
    }
}

/// Establish the WebSocket connection and split it into halves.
async fn dial(url: &str) -> Result<(WsSink, WsReader), TransportError> {
    let (stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
        .await
        .map_err(|_| {
            tracing::warn!(url, "socket connect timed out");
            TransportError::Timeout
        })?
        .map_err(|e| {
            tracing::warn!(url, err = %e, "socket connect failed");
            map_ws_error(e)
        })?;
    Ok(stream.split())
}

/// Background task: read frames until the connection drops, then reconnect
/// with exponential backoff until it succeeds or attempts are exhausted.
async fn run(inner: Arc<Inner>, mut reader: WsReader) {
    loop {
        read_until_closed(&inner, &mut reader).await;
        drop(inner.sink.lock().await.take());

        if inner.shutdown.load(Ordering::SeqCst) {
            inner.set_state(ConnectionState::Disconnected);
            return;
        }

        inner.set_state(ConnectionState::Reconnecting);
        match reconnect_with_backoff(&inner).await {
            Some(new_reader) => {
                inner.flush_pending_joins().await;
                inner.set_state(ConnectionState::Connected);
                reader = new_reader;
            }
            None => {
                tracing::warn!(url = %inner.url, "reconnect attempts exhausted");
                inner.set_state(ConnectionState::Disconnected);
                return;
            }
        }
    }
}

/// Pump inbound WebSocket messages to subscribers until the stream ends.
async fn read_until_closed(inner: &Arc<Inner>, reader: &mut WsReader) {
    while let Some(msg_result) = reader.next().await {
        match msg_result {
            Ok(WsMessage::Text(text)) => match frame::decode::<ServerFrame>(&text) {
                Ok(server_frame) => {
                    let _ = inner.events.send(TransportEvent::Frame(server_frame));
                }
                Err(e) => {
                    // Malformed frames are skipped, never fatal.
                    tracing::warn!(err = %e, "malformed server frame, skipping");
                }
            },
            Ok(WsMessage::Close(_)) => {
                tracing::info!("server closed the connection");
                return;
            }
            Ok(_) => {
                // Binary, ping, pong frames are not part of the protocol.
            }
            Err(e) => {
                tracing::warn!(err = %e, "socket read error");
                return;
            }
        }
    }
}

/// Attempt to re-establish the connection, doubling the delay each try.
///
/// Returns the new read half on success, or `None` once
/// `reconnect.max_attempts` have failed or shutdown was requested.
async fn reconnect_with_backoff(inner: &Arc<Inner>) -> Option<WsReader> {
    let mut delay = inner.reconnect.initial_delay;
    for attempt in 1..=inner.reconnect.max_attempts {
        tokio::time::sleep(delay).await;
        if inner.shutdown.load(Ordering::SeqCst) {
            return None;
        }

        tracing::info!(
            attempt,
            max_attempts = inner.reconnect.max_attempts,
            url = %inner.url,
            "attempting reconnect"
        );
        match dial(&inner.url).await {
            Ok((sink, reader)) => {
                *inner.sink.lock().await = Some(sink);
                return Some(reader);
            }
            Err(e) => {
                tracing::warn!(attempt, err = %e, "reconnect attempt failed");
            }
        }

        delay = (delay * 2).min(inner.reconnect.max_delay);
    }
    None
}

/// Map a `tokio_tungstenite` error to a [`TransportError`].
fn map_ws_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => TransportError::Io(io_err),
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::ConnectionClosed,
        other => TransportError::Io(std::io::Error::other(format!("websocket error: {other}"))),
    }
}
