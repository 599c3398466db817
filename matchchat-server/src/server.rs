//! Chat server core: shared state, WebSocket handler, and the REST
//! history endpoint.
//!
//! The server accepts WebSocket connections, tracks room membership per
//! connection, assigns server ids to incoming messages, and fans each
//! message out to every member of its room — the sender included, which
//! produces the echo clients use to resolve optimistic sends.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

use matchchat_proto::frame::{self, ClientFrame, ServerFrame};
use matchchat_proto::message::{ChatId, Message};

use crate::rooms::{ConnId, RoomRegistry};
use crate::store::MessageStore;

/// Shared server state: room registry, message store, and the set of open
/// connections.
pub struct ServerState {
    /// Which connections are joined to which room.
    pub rooms: RoomRegistry,
    /// Stored messages and server id assignment.
    pub store: MessageStore,
    /// All open connections, for broadcast-independent operations.
    connections: RwLock<HashMap<ConnId, mpsc::UnboundedSender<WsMessage>>>,
    next_conn_id: AtomicU64,
}

impl ServerState {
    /// Creates an empty server state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: RoomRegistry::new(),
            store: MessageStore::new(),
            connections: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Send a WebSocket Close frame to every open connection.
    ///
    /// Each connection's writer task forwards the close frame, which the
    /// client side observes as a disconnect. Useful for graceful shutdown
    /// and for driving the client's reconnect path in tests.
    pub async fn close_all_connections(&self) {
        let connections = self.connections.read().await;
        for (conn, tx) in connections.iter() {
            tracing::info!(conn, "sending close frame");
            let _ = tx.send(WsMessage::Close(None));
        }
    }

    async fn register(&self, conn: ConnId, tx: mpsc::UnboundedSender<WsMessage>) {
        self.connections.write().await.insert(conn, tx);
    }

    async fn unregister(&self, conn: ConnId) {
        self.connections.write().await.remove(&conn);
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles an upgraded WebSocket connection.
///
/// Lifecycle:
/// 1. Register the connection and emit `auth_check`.
/// 2. Spawn a writer task fed by the connection's channel.
/// 3. Process inbound frames until the connection closes.
/// 4. Remove the connection from every room and the connection set.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let conn = state.next_conn_id.fetch_add(1, Ordering::Relaxed);
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    state.register(conn, tx.clone()).await;
    tracing::info!(conn, "connection established");

    // The session cookie is the web app's concern; this server accepts
    // every connection and reports it as authenticated.
    send_frame(
        &tx,
        &ServerFrame::AuthCheck {
            authenticated: true,
            user_id: None,
        },
    );

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if ws_sender.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let reader_tx = tx;
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                WsMessage::Text(text) => {
                    match frame::decode::<ClientFrame>(&text) {
                        Ok(client_frame) => {
                            handle_client_frame(conn, client_frame, &reader_state, &reader_tx)
                                .await;
                        }
                        Err(e) => {
                            tracing::warn!(conn, err = %e, "malformed client frame, skipping");
                        }
                    }
                }
                WsMessage::Close(_) => {
                    tracing::info!(conn, "received close frame");
                    break;
                }
                _ => {
                    // Binary, ping, pong frames are not part of the protocol.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    state.rooms.remove_connection(conn).await;
    state.unregister(conn).await;
    tracing::info!(conn, "connection closed");
}

/// Process one decoded client frame.
async fn handle_client_frame(
    conn: ConnId,
    frame: ClientFrame,
    state: &Arc<ServerState>,
    tx: &mpsc::UnboundedSender<WsMessage>,
) {
    match frame {
        ClientFrame::Join { chat_id } => {
            state.rooms.join(chat_id, conn, tx.clone()).await;
            tracing::info!(conn, chat_id = %chat_id, "joined room");
            send_frame(tx, &ServerFrame::Joined { chat_id });
        }
        ClientFrame::Leave { chat_id } => {
            state.rooms.leave(chat_id, conn).await;
            tracing::info!(conn, chat_id = %chat_id, "left room");
        }
        ClientFrame::SendMessage {
            chat_id,
            content,
            file_url,
            sender_id,
            client_ref,
        } => {
            if content.trim().is_empty() {
                send_frame(
                    tx,
                    &ServerFrame::Error {
                        message: "Message content is required".to_string(),
                    },
                );
                return;
            }
            if !state.rooms.is_member(chat_id, conn).await {
                send_frame(
                    tx,
                    &ServerFrame::Error {
                        message: format!("Not a member of chat {chat_id}"),
                    },
                );
                return;
            }

            let message = state
                .store
                .append(
                    chat_id,
                    sender_id,
                    format!("user-{sender_id}"),
                    content,
                    file_url,
                    Some(client_ref),
                )
                .await;
            tracing::debug!(conn, chat_id = %chat_id, id = %message.id, "message stored");

            broadcast(state, chat_id, &ServerFrame::ReceiveMessage { message }).await;
        }
        ClientFrame::MarkSeen { chat_id, up_to } => {
            let Some(limit) = up_to.as_server() else {
                return;
            };
            if state.store.mark_seen(chat_id, limit).await {
                broadcast(state, chat_id, &ServerFrame::SeenUpdated { chat_id, up_to }).await;
            }
        }
    }
}

/// Fan a frame out to every member of a room, the sender included.
async fn broadcast(state: &Arc<ServerState>, chat_id: ChatId, server_frame: &ServerFrame) {
    let text = match frame::encode(server_frame) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(err = %e, "failed to encode frame for broadcast");
            return;
        }
    };
    for member in state.rooms.members(chat_id).await {
        let _ = member.send(WsMessage::Text(text.clone().into()));
    }
}

/// Encode and queue a frame on a single connection's channel.
fn send_frame(tx: &mpsc::UnboundedSender<WsMessage>, server_frame: &ServerFrame) {
    match frame::encode(server_frame) {
        Ok(text) => {
            let _ = tx.send(WsMessage::Text(text.into()));
        }
        Err(e) => tracing::error!(err = %e, "failed to encode frame"),
    }
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// REST history endpoint: the chat's messages ordered by send time.
async fn history_handler(
    axum::extract::Path(chat_id): axum::extract::Path<u64>,
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> axum::Json<Vec<Message>> {
    axum::Json(state.store.history(ChatId::new(chat_id)).await)
}

/// Starts the chat server on the given address and returns the bound
/// address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ServerState::new())).await
}

/// Starts the chat server with a pre-configured [`ServerState`].
///
/// This is the primary entry point used by `main.rs` and test code, which
/// may seed the state's store beforehand.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route("/chats/{chat_id}/messages", axum::routing::get(history_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "chat server error");
        }
    });

    Ok((bound_addr, handle))
}
