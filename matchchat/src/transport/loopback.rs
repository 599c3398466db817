//! Loopback transport for testing.
//!
//! Plays the server side of the connection in-process: tests push
//! [`ServerFrame`]s toward subscribers with [`LoopbackTransport::push_frame`],
//! inspect what the client emitted with [`LoopbackTransport::take_emitted`],
//! and drive connection-state transitions with
//! [`LoopbackTransport::set_state`]. Join intents emitted while the
//! transport is down are queued and replayed on reconnect, mirroring the
//! socket transport's contract.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use matchchat_proto::frame::{ClientFrame, ServerFrame};
use matchchat_proto::message::ChatId;

use super::{ConnectionState, Transport, TransportError, TransportEvent};

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// In-process transport whose server side is scripted by the test.
pub struct LoopbackTransport {
    events: broadcast::Sender<TransportEvent>,
    emitted: Mutex<VecDeque<ClientFrame>>,
    state: Mutex<ConnectionState>,
    pending_joins: Mutex<Vec<ClientFrame>>,
    auto_join_ack: AtomicBool,
}

impl LoopbackTransport {
    /// Create a connected loopback transport.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            events,
            emitted: Mutex::new(VecDeque::new()),
            state: Mutex::new(ConnectionState::Connected),
            pending_joins: Mutex::new(Vec::new()),
            auto_join_ack: AtomicBool::new(false),
        }
    }

    /// When enabled, every emitted `Join` is immediately answered with a
    /// `Joined` frame, so session tests don't have to script the handshake.
    pub fn set_auto_join_ack(&self, enabled: bool) {
        self.auto_join_ack.store(enabled, Ordering::SeqCst);
    }

    /// Deliver a server frame to all subscribers.
    pub fn push_frame(&self, frame: ServerFrame) {
        let _ = self.events.send(TransportEvent::Frame(frame));
    }

    /// Transition the connection state, notifying subscribers.
    ///
    /// Entering `Connected` replays join intents queued while the transport
    /// was down, the same way the socket transport does after a reconnect.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
        let _ = self.events.send(TransportEvent::State(state));

        if state == ConnectionState::Connected {
            let queued: Vec<ClientFrame> = self.pending_joins.lock().drain(..).collect();
            for frame in queued {
                self.record(frame);
            }
        }
    }

    /// Drain and return every frame the client has emitted so far.
    pub fn take_emitted(&self) -> Vec<ClientFrame> {
        self.emitted.lock().drain(..).collect()
    }

    /// Return the chat ids of all `Join` frames emitted so far, without
    /// draining other frames.
    pub fn joined_chats(&self) -> Vec<ChatId> {
        self.emitted
            .lock()
            .iter()
            .filter_map(|f| match f {
                ClientFrame::Join { chat_id } => Some(*chat_id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, frame: ClientFrame) {
        let ack = if self.auto_join_ack.load(Ordering::SeqCst)
            && let ClientFrame::Join { chat_id } = &frame
        {
            Some(*chat_id)
        } else {
            None
        };
        self.emitted.lock().push_back(frame);
        if let Some(chat_id) = ack {
            let _ = self
                .events
                .send(TransportEvent::Frame(ServerFrame::Joined { chat_id }));
        }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    async fn emit(&self, frame: ClientFrame) -> Result<(), TransportError> {
        if *self.state.lock() == ConnectionState::Connected {
            self.record(frame);
        } else if matches!(frame, ClientFrame::Join { .. }) {
            self.pending_joins.lock().push(frame);
        }
        // Non-join frames emitted while down are dropped silently.
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }
}
