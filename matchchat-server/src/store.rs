//! In-memory message store for the chat server.
//!
//! Messages are kept per chat in send order. The store assigns the
//! per-chat monotonically increasing server ids that clients rely on for
//! ordering and de-duplication.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use matchchat_proto::message::{ChatId, Message, MessageId, UserId};

struct ChatLog {
    next_id: u64,
    messages: Vec<Message>,
}

impl ChatLog {
    const fn new() -> Self {
        Self {
            next_id: 1,
            messages: Vec::new(),
        }
    }
}

/// Per-chat ordered message storage with server id assignment.
pub struct MessageStore {
    chats: Mutex<HashMap<ChatId, ChatLog>>,
}

impl MessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chats: Mutex::new(HashMap::new()),
        }
    }

    /// Store a new message, assigning the next server id for its chat and
    /// stamping the current time. Returns the stored message.
    pub async fn append(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        sender_username: String,
        content: String,
        file_url: Option<String>,
        client_ref: Option<Uuid>,
    ) -> Message {
        let mut chats = self.chats.lock().await;
        let log = chats.entry(chat_id).or_insert_with(ChatLog::new);

        let id = log.next_id;
        log.next_id += 1;

        let message = Message {
            id: MessageId::Server(id),
            chat_id,
            sender_id,
            sender_username,
            sender_avatar: None,
            content,
            file_url,
            timestamp: Utc::now(),
            seen: false,
            client_ref,
        };
        log.messages.push(message.clone());
        message
    }

    /// Convenience for tests and local development: store a message with a
    /// derived username and no correlation id.
    pub async fn seed(&self, chat_id: ChatId, sender_id: UserId, content: &str) -> Message {
        self.append(
            chat_id,
            sender_id,
            format!("user-{sender_id}"),
            content.to_string(),
            None,
            None,
        )
        .await
    }

    /// The chat's messages in send order. Empty for an unknown chat.
    pub async fn history(&self, chat_id: ChatId) -> Vec<Message> {
        self.chats
            .lock()
            .await
            .get(&chat_id)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }

    /// Flip `seen` on every message with an id up to and including
    /// `up_to`. Returns `true` if any message changed.
    pub async fn mark_seen(&self, chat_id: ChatId, up_to: u64) -> bool {
        let mut chats = self.chats.lock().await;
        let Some(log) = chats.get_mut(&chat_id) else {
            return false;
        };

        let mut changed = false;
        for message in &mut log.messages {
            if let Some(id) = message.id.as_server()
                && id <= up_to
                && !message.seen
            {
                message.seen = true;
                changed = true;
            }
        }
        changed
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}
