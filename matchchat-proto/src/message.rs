//! Message and identifier types for the `MatchChat` protocol.
//!
//! All types in this module represent the on-the-wire shape of chat data:
//! JSON over the live WebSocket channel and over the REST history endpoint.
//! The backend assigns numeric message ids; messages a client has sent but
//! the server has not yet acknowledged carry a client-generated correlation
//! id instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed message content size in bytes (16 KB).
pub const MAX_CONTENT_SIZE: usize = 16 * 1024;

/// Identifies a chat room (the backend calls these discussions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChatId(u64);

impl ChatId {
    /// Creates a chat identifier from its numeric value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the numeric value of this chat id.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(u64);

impl UserId {
    /// Creates a user identifier from its numeric value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the numeric value of this user id.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a message.
///
/// The backend assigns `Server` ids — unique and monotonically increasing
/// within a chat. A message the client has sent optimistically carries a
/// `Local` correlation id (UUID v7) until the server echo resolves it to
/// its final `Server` id.
///
/// Two `Server` ids compare by value; a `Local` id never equals a `Server`
/// id, and the two kinds are not ordered against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Backend-assigned id, unique within the owning chat.
    Server(u64),
    /// Client-generated correlation id for a not-yet-acknowledged message.
    Local(Uuid),
}

impl MessageId {
    /// Creates a fresh `Local` correlation id (UUID v7, time-ordered).
    #[must_use]
    pub fn local() -> Self {
        Self::Local(Uuid::now_v7())
    }

    /// Returns the server-assigned value, if this id has been resolved.
    #[must_use]
    pub const fn as_server(self) -> Option<u64> {
        match self {
            Self::Server(id) => Some(id),
            Self::Local(_) => None,
        }
    }

    /// Returns `true` for a backend-assigned id.
    #[must_use]
    pub const fn is_server(self) -> bool {
        matches!(self, Self::Server(_))
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server(id) => write!(f, "{id}"),
            Self::Local(uuid) => write!(f, "local:{uuid}"),
        }
    }
}

/// A chat message as carried on the wire.
///
/// Messages are immutable once created, with two exceptions handled by
/// dedicated protocol frames: the `seen` flag, and the resolution of a
/// `Local` id to its final `Server` id when the echo arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message identity; `Local` until the server echo assigns a server id.
    pub id: MessageId,
    /// The chat this message belongs to.
    pub chat_id: ChatId,
    /// The sending user.
    pub sender_id: UserId,
    /// Display name of the sender at send time.
    pub sender_username: String,
    /// Avatar reference of the sender, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_avatar: Option<String>,
    /// Text payload. Non-empty for a valid message.
    pub content: String,
    /// Reference to a file attached to the message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    /// Send time. Non-decreasing within a chat for server-assigned messages.
    pub timestamp: DateTime<Utc>,
    /// Whether the message has been read by the other side.
    #[serde(default)]
    pub seen: bool,
    /// Correlation id carried through the server echo so the sender can
    /// resolve its optimistic entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<Uuid>,
}

/// Error returned when a message fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message content is empty or whitespace-only.
    #[error("message content is empty")]
    Empty,
    /// Message content exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

impl Message {
    /// Validates this message for sending.
    ///
    /// Checks that the content is non-empty after trimming and within the
    /// size limit ([`MAX_CONTENT_SIZE`]).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] if the trimmed content is empty,
    /// or [`ValidationError::TooLarge`] if it exceeds `MAX_CONTENT_SIZE`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.content.trim().is_empty() {
            return Err(ValidationError::Empty);
        }
        let size = self.content.len();
        if size > MAX_CONTENT_SIZE {
            return Err(ValidationError::TooLarge {
                size,
                max: MAX_CONTENT_SIZE,
            });
        }
        Ok(())
    }
}
