//! Room registry for the chat server.
//!
//! Tracks which connections are members of which chat room, so live
//! messages can be fanned out to every member — including the sender,
//! whose echo the client's optimistic reconciliation depends on.

use std::collections::HashMap;

use axum::extract::ws::Message as WsMessage;
use tokio::sync::{RwLock, mpsc};

use matchchat_proto::message::ChatId;

/// Identifies one WebSocket connection for the lifetime of the process.
pub type ConnId = u64;

/// Maps chat rooms to the connections currently joined to them.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<ChatId, HashMap<ConnId, mpsc::UnboundedSender<WsMessage>>>>,
}

impl RoomRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection to a room. Joining a room twice replaces the
    /// stored sender, so the operation is idempotent.
    pub async fn join(&self, chat_id: ChatId, conn: ConnId, tx: mpsc::UnboundedSender<WsMessage>) {
        let mut rooms = self.rooms.write().await;
        rooms.entry(chat_id).or_default().insert(conn, tx);
    }

    /// Remove a connection from a room. Unknown rooms and non-members are
    /// ignored.
    pub async fn leave(&self, chat_id: ChatId, conn: ConnId) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(&chat_id) {
            members.remove(&conn);
            if members.is_empty() {
                rooms.remove(&chat_id);
            }
        }
    }

    /// Whether the connection is currently a member of the room.
    pub async fn is_member(&self, chat_id: ChatId, conn: ConnId) -> bool {
        self.rooms
            .read()
            .await
            .get(&chat_id)
            .is_some_and(|members| members.contains_key(&conn))
    }

    /// Senders for every member of the room.
    pub async fn members(&self, chat_id: ChatId) -> Vec<mpsc::UnboundedSender<WsMessage>> {
        self.rooms
            .read()
            .await
            .get(&chat_id)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a connection from every room it joined. Called on disconnect.
    pub async fn remove_connection(&self, conn: ConnId) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&conn);
            !members.is_empty()
        });
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
