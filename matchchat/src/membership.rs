//! Room membership management for `MatchChat`.
//!
//! Contains the [`RoomManager`], which issues join/leave intents for chat
//! rooms over the transport and tracks the membership state machine. A join
//! resolves when the server acknowledges it or when the first live message
//! for that room arrives, whichever comes first; a leave is fire-and-forget
//! and never blocks a detach.
//!
//! Serialization guarantee: `leave(a)` followed by `join(b)` emits the two
//! intents in program order on the underlying connection — the leave's emit
//! completes before `join` is entered — without waiting for the server to
//! acknowledge the leave.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use matchchat_proto::frame::{ClientFrame, ServerFrame};
use matchchat_proto::message::ChatId;

use crate::transport::{Transport, TransportError, TransportEvent};

/// Membership lifecycle of the client with respect to one room.
///
/// Transitions only along `Unjoined → Joining → Joined` and
/// `Joined → Leaving → Unjoined`. A leave completes to `Unjoined` as soon
/// as the intent is on the wire, so a subsequent join never observes
/// `Leaving`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    /// Not a member of any room.
    Unjoined,
    /// A join intent is outstanding.
    Joining,
    /// The room is joined and live messages flow.
    Joined,
    /// A leave intent is being emitted.
    Leaving,
}

impl std::fmt::Display for MembershipState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unjoined => write!(f, "unjoined"),
            Self::Joining => write!(f, "joining"),
            Self::Joined => write!(f, "joined"),
            Self::Leaving => write!(f, "leaving"),
        }
    }
}

/// Errors that can occur during room membership operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// No acknowledgement or live event arrived within the join timeout.
    /// The state remains `Joining`; the caller may retry.
    #[error("join timed out for chat {0}")]
    JoinTimeout(ChatId),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

struct RoomState {
    membership: MembershipState,
    /// The chat the most recent join targets, or the joined chat.
    target: Option<ChatId>,
}

/// Issues join/leave intents and tracks membership for the active room.
///
/// Live-message delivery to the session is handled by the session's own
/// transport subscription; the manager only consumes events to detect join
/// completion. Each attach cycle creates a fresh subscription and drops the
/// previous one, so a room's handler is never left stacked from an earlier
/// room.
pub struct RoomManager<T: Transport> {
    transport: Arc<T>,
    join_timeout: Duration,
    state: Mutex<RoomState>,
}

impl<T: Transport> RoomManager<T> {
    /// Creates a manager issuing intents over the given transport.
    pub fn new(transport: Arc<T>, join_timeout: Duration) -> Self {
        Self {
            transport,
            join_timeout,
            state: Mutex::new(RoomState {
                membership: MembershipState::Unjoined,
                target: None,
            }),
        }
    }

    /// Current membership state.
    #[must_use]
    pub fn membership(&self) -> MembershipState {
        self.state.lock().membership
    }

    /// The chat currently joined or being joined, if any.
    #[must_use]
    pub fn current(&self) -> Option<ChatId> {
        self.state.lock().target
    }

    /// Join a chat room.
    ///
    /// Emits the join intent and waits until the server acknowledges it or
    /// the first live message for the room arrives. On timeout the state is
    /// left `Joining` and the caller may retry; a later call for the same
    /// chat re-emits the intent.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::JoinTimeout`] after `join_timeout` without an
    /// acknowledgement, or [`RoomError::Transport`] if the intent could not
    /// be handed to the transport.
    pub async fn join(&self, chat_id: ChatId) -> Result<(), RoomError> {
        // Subscribe before emitting so the acknowledgement cannot be missed.
        let mut rx = self.transport.subscribe();

        {
            let mut state = self.state.lock();
            state.membership = MembershipState::Joining;
            state.target = Some(chat_id);
        }

        self.transport.emit(ClientFrame::Join { chat_id }).await?;

        let acked = tokio::time::timeout(self.join_timeout, wait_for_join(&mut rx, chat_id)).await;
        match acked {
            Ok(true) => {
                let mut state = self.state.lock();
                // A later join may have retargeted the manager while this
                // one was waiting; only the current target's ack counts.
                if state.target == Some(chat_id) {
                    state.membership = MembershipState::Joined;
                }
                tracing::debug!(chat_id = %chat_id, "room joined");
                Ok(())
            }
            Ok(false) => Err(RoomError::Transport(TransportError::ConnectionClosed)),
            Err(_) => {
                tracing::warn!(chat_id = %chat_id, timeout = ?self.join_timeout, "join timed out");
                Err(RoomError::JoinTimeout(chat_id))
            }
        }
    }

    /// Leave a chat room. Fire-and-forget: completes once the intent has
    /// been handed to the transport, without waiting for any server reply.
    pub async fn leave(&self, chat_id: ChatId) {
        {
            let mut state = self.state.lock();
            if state.target == Some(chat_id) {
                state.membership = MembershipState::Leaving;
            }
        }

        if let Err(e) = self.transport.emit(ClientFrame::Leave { chat_id }).await {
            tracing::warn!(chat_id = %chat_id, err = %e, "failed to emit leave intent");
        }

        let mut state = self.state.lock();
        if state.target == Some(chat_id) {
            state.membership = MembershipState::Unjoined;
            state.target = None;
        }
    }

    /// Re-join the active room after the transport reconnected.
    ///
    /// Re-emits the join intent for the current target; a no-op when no
    /// room is active.
    pub async fn handle_reconnected(&self) {
        let target = {
            let state = self.state.lock();
            match state.membership {
                MembershipState::Joined | MembershipState::Joining => state.target,
                MembershipState::Unjoined | MembershipState::Leaving => None,
            }
        };
        let Some(chat_id) = target else { return };

        tracing::info!(chat_id = %chat_id, "re-joining room after reconnect");
        if let Err(e) = self.transport.emit(ClientFrame::Join { chat_id }).await {
            tracing::warn!(chat_id = %chat_id, err = %e, "re-join emit failed");
        }
    }
}

/// Wait until the room is acknowledged, either explicitly or by its first
/// live message. Returns `false` if the event channel closes.
async fn wait_for_join(rx: &mut broadcast::Receiver<TransportEvent>, chat_id: ChatId) -> bool {
    loop {
        match rx.recv().await {
            Ok(TransportEvent::Frame(ServerFrame::Joined { chat_id: id })) if id == chat_id => {
                return true;
            }
            Ok(TransportEvent::Frame(ServerFrame::ReceiveMessage { message }))
                if message.chat_id == chat_id =>
            {
                return true;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "membership subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return false,
        }
    }
}
