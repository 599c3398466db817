//! Transport layer abstraction for `MatchChat`.
//!
//! Defines the [`Transport`] trait that all transport implementations must
//! satisfy. Concrete implementations:
//! - [`socket::SocketTransport`] — WebSocket connection to the live server
//!   with automatic reconnection
//! - [`loopback::LoopbackTransport`] — in-process scriptable transport for
//!   testing
//!
//! A transport carries decoded protocol frames, not raw bytes: outbound
//! [`ClientFrame`]s via [`Transport::emit`], inbound [`ServerFrame`]s and
//! connection-state changes via the broadcast channel returned by
//! [`Transport::subscribe`]. Dropping a receiver is the unsubscribe
//! operation.

pub mod loopback;
pub mod socket;

use std::fmt;

use tokio::sync::broadcast;

use matchchat_proto::frame::{ClientFrame, ServerFrame};

/// Connection lifecycle of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The connection is established and frames flow in both directions.
    Connected,
    /// No connection; no reconnection attempt is running.
    Disconnected,
    /// The connection was lost and the transport is attempting to restore it.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Notifications delivered to transport subscribers.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A decoded server frame arrived on the connection.
    Frame(ServerFrame),
    /// The connection state changed.
    State(ConnectionState),
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection has been closed and will not be restored.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The server URL could not be parsed or resolved.
    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    /// A frame could not be encoded for transmission.
    #[error("codec error: {0}")]
    Codec(#[from] matchchat_proto::frame::CodecError),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Async transport trait for the live chat channel.
///
/// # Emit semantics while disconnected
///
/// `emit` never surfaces disconnection to the caller. A [`ClientFrame::Join`]
/// emitted while the connection is down is queued and redelivered after the
/// next successful reconnect; every other frame is dropped — in particular
/// `send_message`, whose loss the session layer surfaces through the
/// optimistic entry's echo timeout rather than through a transport error.
pub trait Transport: Send + Sync {
    /// Send a frame to the server.
    ///
    /// Returns `Ok(())` once the frame has been handed off to the underlying
    /// connection (or queued/dropped per the disconnection semantics above).
    /// This does NOT guarantee processing — callers wait for the matching
    /// server frame.
    fn emit(
        &self,
        frame: ClientFrame,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Subscribe to inbound frames and connection-state notifications.
    ///
    /// Every subscriber receives every event from the moment of
    /// subscription. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Current connection state.
    fn state(&self) -> ConnectionState;
}
