//! Chat session orchestration for `MatchChat`.
//!
//! Contains the [`SessionManager`], which owns at most one attached chat
//! session at a time: it runs the room join and the history load
//! concurrently, funnels both into the [`MessageLog`], exposes send with
//! optimistic feedback, and detaches cleanly — including under rapid chat
//! switching.
//!
//! Every asynchronous result is tagged with the generation at which it was
//! started; results whose generation no longer matches the session are
//! dropped unconditionally. This replaces flag-based cancellation and keeps
//! rapid attach/detach cycles race-free without task-level cancellation.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use matchchat_proto::frame::{ClientFrame, ServerFrame};
use matchchat_proto::message::{ChatId, Message, MessageId, UserId, ValidationError};

use crate::config::EngineConfig;
use crate::history::{HistoryClient, HistoryError, HistoryOutcome};
use crate::membership::{MembershipState, RoomManager};
use crate::merge::{LogEntry, MessageLog};
use crate::transport::socket::SocketTransport;
use crate::transport::{ConnectionState, Transport, TransportError, TransportEvent};

/// Identity of the logged-in user, supplied by the embedding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    /// Account id.
    pub id: UserId,
    /// Display name used on outgoing messages.
    pub username: String,
}

/// Lifecycle of the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No chat attached.
    Idle,
    /// Join and history load are in flight.
    Attaching,
    /// The session is live; send and receive operate.
    Active,
    /// Teardown in progress.
    Detaching,
}

/// Backlog loading state of the attached session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryState {
    /// No load started.
    NotLoaded,
    /// The load is in flight.
    Loading,
    /// The backlog was merged.
    Loaded,
    /// The load failed; the session runs live-only.
    Failed,
}

/// Degradation flags reported to the embedding UI. Nothing here is fatal:
/// the session stays usable and the flags describe what it may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatus {
    /// The backlog could not be loaded; only live messages are shown.
    pub history_unavailable: bool,
    /// The join was not acknowledged; live updates may be missed.
    pub join_degraded: bool,
}

/// Events emitted toward the embedding UI.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A live message was applied to the log.
    MessageReceived {
        /// The delivered message.
        message: Message,
    },
    /// The log changed for a reason other than a live delivery
    /// (history merge, optimistic insert, seen update, failed send).
    LogChanged,
    /// An optimistic send saw no echo within the timeout.
    SendFailed {
        /// Correlation id of the failed entry.
        client_ref: Uuid,
    },
    /// A degradation flag changed.
    StatusChanged {
        /// The new status.
        status: SessionStatus,
    },
    /// The history load failed (the session continues live-only).
    HistoryFailed {
        /// Failure description from the loader.
        reason: String,
    },
}

/// Errors surfaced by [`SessionManager::send`] and
/// [`SessionManager::mark_seen`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The message content failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// There is no active session to operate on.
    #[error("no active chat session")]
    NotActive,
}

/// Errors constructing an engine from configuration.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The socket transport could not be created or connected.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The history client could not be created.
    #[error("history error: {0}")]
    History(#[from] HistoryError),
}

struct SessionState {
    phase: SessionPhase,
    chat: Option<ChatId>,
    user: Option<UserProfile>,
    generation: u64,
    history: HistoryState,
    log: MessageLog,
    status: SessionStatus,
}

impl SessionState {
    const fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            chat: None,
            user: None,
            generation: 0,
            history: HistoryState::NotLoaded,
            log: MessageLog::new(),
            status: SessionStatus {
                history_unavailable: false,
                join_degraded: false,
            },
        }
    }
}

/// Orchestrates the attached chat session over a transport, the room
/// membership manager, and the history loader.
///
/// The manager is the only writer to the session state; the merger computes
/// new log values which the manager installs under the state lock.
pub struct SessionManager<T: Transport + 'static> {
    transport: Arc<T>,
    rooms: Arc<RoomManager<T>>,
    history: Arc<HistoryClient>,
    config: EngineConfig,
    state: Arc<Mutex<SessionState>>,
    event_tx: mpsc::Sender<SessionEvent>,
    pump: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SessionManager<SocketTransport> {
    /// Build an engine from configuration: a connected socket transport,
    /// a history client, and the session manager wired to both.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the transport cannot connect or the
    /// history client cannot be built.
    pub async fn connect(
        config: EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), EngineError> {
        let transport = Arc::new(SocketTransport::new(
            &config.ws_url,
            config.reconnect.clone(),
        )?);
        transport.connect().await?;
        let history = Arc::new(HistoryClient::new(
            config.http_base_url.clone(),
            config.connect_timeout,
        )?);
        Ok(Self::new(transport, history, config))
    }
}

impl<T: Transport + 'static> SessionManager<T> {
    /// Creates a session manager over an existing transport and history
    /// client. Returns the manager and the receiver for [`SessionEvent`]s
    /// the UI layer should consume.
    pub fn new(
        transport: Arc<T>,
        history: Arc<HistoryClient>,
        config: EngineConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let rooms = Arc::new(RoomManager::new(
            Arc::clone(&transport),
            config.join_timeout,
        ));
        let manager = Self {
            transport,
            rooms,
            history,
            config,
            state: Arc::new(Mutex::new(SessionState::new())),
            event_tx,
            pump: Mutex::new(None),
        };
        (manager, event_rx)
    }

    /// Attach to a chat room for the given user.
    ///
    /// Any previously attached session is detached first, sequentially, so
    /// generations stay ordered. The room join and the history load run
    /// concurrently; the session becomes `Active` once both have a terminal
    /// outcome for this generation. Neither failure is fatal — see
    /// [`SessionStatus`].
    ///
    /// Re-attaching the already-active (user, chat) pair is a no-op.
    pub async fn attach(&self, user: UserProfile, chat_id: ChatId) {
        {
            let s = self.state.lock();
            if s.phase == SessionPhase::Active
                && s.chat == Some(chat_id)
                && s.user.as_ref().map(|u| u.id) == Some(user.id)
            {
                return;
            }
        }

        self.detach().await;

        let generation = {
            let mut s = self.state.lock();
            s.generation += 1;
            s.phase = SessionPhase::Attaching;
            s.chat = Some(chat_id);
            s.user = Some(user);
            s.history = HistoryState::Loading;
            s.log = MessageLog::new();
            s.status = SessionStatus::default();
            s.generation
        };
        tracing::info!(chat_id = %chat_id, generation, "attaching chat session");

        self.start_pump(chat_id, generation);

        let (join_result, history_outcome) =
            tokio::join!(self.rooms.join(chat_id), self.history.load(chat_id));

        self.install_history(generation, history_outcome);
        if let Err(e) = join_result {
            let applied = apply_if_current(&self.state, generation, |s| {
                s.status.join_degraded = true;
                s.status
            });
            if let Some(status) = applied {
                tracing::warn!(chat_id = %chat_id, err = %e, "join degraded, live updates may be missed");
                self.emit(SessionEvent::StatusChanged { status });
                self.schedule_join_retry(generation, chat_id);
            }
        }

        if apply_if_current(&self.state, generation, |s| {
            s.phase = SessionPhase::Active;
        })
        .is_some()
        {
            tracing::info!(chat_id = %chat_id, generation, "chat session active");
        }
    }

    /// Send a message to the attached chat.
    ///
    /// Inserts an optimistic entry into the log before the network send and
    /// arms the echo timeout that flags it as failed if the server never
    /// echoes it back. Returns the correlation id of the optimistic entry.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotActive`] outside the `Active` phase, or
    /// [`SendError::Validation`] for empty or oversized content.
    pub async fn send(&self, content: impl Into<String>) -> Result<Uuid, SendError> {
        let content = content.into();
        let (chat_id, user, generation) = {
            let s = self.state.lock();
            match (s.phase, s.chat, s.user.clone()) {
                (SessionPhase::Active, Some(chat), Some(user)) => (chat, user, s.generation),
                _ => return Err(SendError::NotActive),
            }
        };

        let client_ref = Uuid::now_v7();
        let message = Message {
            id: MessageId::Local(client_ref),
            chat_id,
            sender_id: user.id,
            sender_username: user.username,
            sender_avatar: None,
            content,
            file_url: None,
            timestamp: Utc::now(),
            seen: false,
            client_ref: Some(client_ref),
        };
        message.validate()?;

        let inserted = apply_if_current(&self.state, generation, |s| {
            s.log.push_optimistic(message.clone());
        });
        if inserted.is_none() {
            return Err(SendError::NotActive);
        }
        self.emit(SessionEvent::LogChanged);

        let frame = ClientFrame::SendMessage {
            chat_id,
            content: message.content.clone(),
            file_url: None,
            sender_id: message.sender_id,
            client_ref,
        };
        if let Err(e) = self.transport.emit(frame).await {
            // The optimistic entry stays; the echo timeout below surfaces it.
            tracing::warn!(err = %e, "send emit failed");
        }

        self.arm_echo_timeout(generation, client_ref);
        Ok(client_ref)
    }

    /// Acknowledge that messages up to and including `up_to` were read,
    /// both locally and toward the server.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotActive`] outside the `Active` phase.
    pub async fn mark_seen(&self, up_to: MessageId) -> Result<(), SendError> {
        let (chat_id, generation) = {
            let s = self.state.lock();
            match (s.phase, s.chat) {
                (SessionPhase::Active, Some(chat)) => (chat, s.generation),
                _ => return Err(SendError::NotActive),
            }
        };

        if apply_if_current(&self.state, generation, |s| s.log.apply_seen(up_to)).is_some() {
            self.emit(SessionEvent::LogChanged);
        }
        if let Err(e) = self
            .transport
            .emit(ClientFrame::MarkSeen { chat_id, up_to })
            .await
        {
            tracing::warn!(err = %e, "mark_seen emit failed");
        }
        Ok(())
    }

    /// Detach from the attached chat, if any.
    ///
    /// Unregisters the live handler, emits the leave intent, and resets the
    /// session to `Idle`. Safe to call repeatedly and from cleanup paths.
    pub async fn detach(&self) {
        let (chat, generation) = {
            let mut s = self.state.lock();
            if s.phase == SessionPhase::Idle {
                return;
            }
            s.phase = SessionPhase::Detaching;
            (s.chat, s.generation)
        };

        // The live handler must be gone before the next generation's join
        // can complete.
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }

        if let Some(chat_id) = chat {
            self.rooms.leave(chat_id).await;
        }

        let mut s = self.state.lock();
        if s.generation == generation {
            s.phase = SessionPhase::Idle;
            s.chat = None;
            s.user = None;
            s.history = HistoryState::NotLoaded;
            s.log = MessageLog::new();
            s.status = SessionStatus::default();
        }
        drop(s);
        tracing::info!(generation, "chat session detached");
    }

    /// React to a change of the logged-in identity: when the user id
    /// differs from the attached session's, the session re-attaches under
    /// the new identity.
    pub async fn update_identity(&self, user: UserProfile) {
        let current = {
            let s = self.state.lock();
            (s.phase, s.chat, s.user.clone())
        };
        if let (SessionPhase::Active, Some(chat_id), Some(existing)) = current
            && existing.id != user.id
        {
            tracing::info!(user_id = %user.id, "identity changed, re-attaching session");
            self.attach(user, chat_id).await;
        }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase
    }

    /// Current degradation flags.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    /// Backlog loading state.
    #[must_use]
    pub fn history_state(&self) -> HistoryState {
        self.state.lock().history
    }

    /// The attached chat, if any.
    #[must_use]
    pub fn chat(&self) -> Option<ChatId> {
        self.state.lock().chat
    }

    /// Current attach generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Room membership state, delegated to the membership manager.
    #[must_use]
    pub fn membership(&self) -> MembershipState {
        self.rooms.membership()
    }

    /// Snapshot of the merged message log.
    #[must_use]
    pub fn messages(&self) -> Vec<LogEntry> {
        self.state.lock().log.entries().to_vec()
    }

    /// Spawn the per-generation event pump: applies live frames for this
    /// chat to the log and triggers the room re-join after a reconnect.
    fn start_pump(&self, chat_id: ChatId, generation: u64) {
        let mut rx = self.transport.subscribe();
        let state = Arc::clone(&self.state);
        let rooms = Arc::clone(&self.rooms);
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            let mut reconnecting = false;
            loop {
                match rx.recv().await {
                    Ok(TransportEvent::Frame(frame)) => {
                        handle_frame(&state, &event_tx, chat_id, generation, frame);
                    }
                    Ok(TransportEvent::State(ConnectionState::Reconnecting)) => {
                        reconnecting = true;
                    }
                    Ok(TransportEvent::State(ConnectionState::Connected)) if reconnecting => {
                        reconnecting = false;
                        if apply_if_current(&state, generation, |_| ()).is_some() {
                            rooms.handle_reconnected().await;
                        }
                    }
                    Ok(TransportEvent::State(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "session pump lagged behind transport events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if let Some(old) = self.pump.lock().replace(handle) {
            old.abort();
        }
    }

    /// Install the history outcome for this generation.
    fn install_history(&self, generation: u64, outcome: HistoryOutcome) {
        match outcome {
            HistoryOutcome::Loaded(batch) => {
                let merged = apply_if_current(&self.state, generation, |s| {
                    s.history = HistoryState::Loaded;
                    s.log.merge_history(batch)
                });
                if merged == Some(true) {
                    self.emit(SessionEvent::LogChanged);
                }
            }
            HistoryOutcome::Failed { status, reason } => {
                let applied = apply_if_current(&self.state, generation, |s| {
                    s.history = HistoryState::Failed;
                    s.status.history_unavailable = true;
                    s.status
                });
                if let Some(status_now) = applied {
                    tracing::warn!(
                        http_status = ?status,
                        reason = %reason,
                        "history unavailable, continuing live-only"
                    );
                    self.emit(SessionEvent::HistoryFailed { reason });
                    self.emit(SessionEvent::StatusChanged { status: status_now });
                }
            }
        }
    }

    /// Retry a timed-out join in the background, clearing the degradation
    /// flag on success. Runs at most `join_retry_limit` attempts.
    fn schedule_join_retry(&self, generation: u64, chat_id: ChatId) {
        let rooms = Arc::clone(&self.rooms);
        let state = Arc::clone(&self.state);
        let event_tx = self.event_tx.clone();
        let retries = self.config.join_retry_limit;

        tokio::spawn(async move {
            for attempt in 1..=retries {
                if apply_if_current(&state, generation, |_| ()).is_none() {
                    return;
                }
                tracing::info!(chat_id = %chat_id, attempt, "retrying join");
                if rooms.join(chat_id).await.is_ok() {
                    let cleared = apply_if_current(&state, generation, |s| {
                        s.status.join_degraded = false;
                        s.status
                    });
                    if let Some(status) = cleared {
                        let _ = event_tx.try_send(SessionEvent::StatusChanged { status });
                    }
                    return;
                }
            }
            tracing::warn!(chat_id = %chat_id, "join retries exhausted, staying degraded");
        });
    }

    /// One-shot deferred check: if the optimistic entry is still pending
    /// when the echo timeout elapses, flag it as failed.
    fn arm_echo_timeout(&self, generation: u64, client_ref: Uuid) {
        let state = Arc::clone(&self.state);
        let event_tx = self.event_tx.clone();
        let timeout = self.config.echo_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let failed =
                apply_if_current(&state, generation, |s| s.log.mark_send_failed(client_ref));
            if failed == Some(true) {
                let _ = event_tx.try_send(SessionEvent::SendFailed { client_ref });
                let _ = event_tx.try_send(SessionEvent::LogChanged);
            }
        });
    }

    fn emit(&self, event: SessionEvent) {
        // Best-effort; if the UI stopped consuming, drop the event.
        let _ = self.event_tx.try_send(event);
    }
}

/// Run `f` on the session state only if it still belongs to `generation`
/// and has not been torn down. Returns `None` when the result was stale.
fn apply_if_current<R>(
    state: &Arc<Mutex<SessionState>>,
    generation: u64,
    f: impl FnOnce(&mut SessionState) -> R,
) -> Option<R> {
    let mut s = state.lock();
    if s.generation != generation
        || matches!(s.phase, SessionPhase::Idle | SessionPhase::Detaching)
    {
        return None;
    }
    Some(f(&mut s))
}

/// Apply one inbound frame for the pump's chat and generation.
fn handle_frame(
    state: &Arc<Mutex<SessionState>>,
    event_tx: &mpsc::Sender<SessionEvent>,
    chat_id: ChatId,
    generation: u64,
    frame: ServerFrame,
) {
    match frame {
        ServerFrame::ReceiveMessage { message } if message.chat_id == chat_id => {
            let applied = apply_if_current(state, generation, |s| {
                s.log.apply_live(message.clone());
            });
            if applied.is_some() {
                let _ = event_tx.try_send(SessionEvent::MessageReceived { message });
            }
        }
        ServerFrame::SeenUpdated {
            chat_id: id,
            up_to,
        } if id == chat_id => {
            if apply_if_current(state, generation, |s| s.log.apply_seen(up_to)).is_some() {
                let _ = event_tx.try_send(SessionEvent::LogChanged);
            }
        }
        ServerFrame::Error { message } => {
            tracing::warn!(message = %message, "server reported an error");
        }
        ServerFrame::AuthCheck {
            authenticated,
            user_id,
        } => {
            tracing::debug!(authenticated, user_id = ?user_id, "auth check received");
        }
        ServerFrame::ReceiveMessage { .. }
        | ServerFrame::SeenUpdated { .. }
        | ServerFrame::Joined { .. } => {
            // Frames for other chats and join acks are not the pump's
            // concern; the membership manager consumes join acks.
        }
    }
}
