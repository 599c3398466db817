//! Protocol frames exchanged over the live WebSocket channel.
//!
//! Frames are JSON text messages tagged with an `event` field, matching the
//! backend's event-based channel. [`ClientFrame`] covers client→server
//! intents, [`ServerFrame`] covers server→client deliveries — including the
//! echo of the sender's own messages, which the client relies on to resolve
//! optimistic sends.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{ChatId, Message, MessageId, UserId};

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("frame codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Client→server intents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Enter a chat room to receive its live messages.
    Join {
        /// The chat to join.
        chat_id: ChatId,
    },
    /// Leave a chat room.
    Leave {
        /// The chat to leave.
        chat_id: ChatId,
    },
    /// Send a message to a chat room.
    SendMessage {
        /// The chat to send into.
        chat_id: ChatId,
        /// Text payload.
        content: String,
        /// Reference to an already-uploaded attachment, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
        /// The sending user.
        sender_id: UserId,
        /// Correlation id the server must copy into the echoed message.
        client_ref: Uuid,
    },
    /// Acknowledge that messages up to and including `up_to` have been read.
    MarkSeen {
        /// The chat whose messages were read.
        chat_id: ChatId,
        /// Highest message id covered by this acknowledgement.
        up_to: MessageId,
    },
}

/// Server→client deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A message delivered live to a joined room. Includes the echo of the
    /// receiving client's own sends, with `client_ref` preserved.
    ReceiveMessage {
        /// The delivered message.
        message: Message,
    },
    /// Acknowledgement that a join intent was accepted.
    Joined {
        /// The chat that was joined.
        chat_id: ChatId,
    },
    /// Another member read the chat up to the given message.
    SeenUpdated {
        /// The chat whose messages were read.
        chat_id: ChatId,
        /// Highest message id covered by the acknowledgement.
        up_to: MessageId,
    },
    /// Emitted by the server once per connection, confirming the session.
    AuthCheck {
        /// Whether the connection carries a valid session.
        authenticated: bool,
        /// The authenticated user, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
    },
    /// Server-side rejection of a prior intent.
    Error {
        /// Human-readable error description.
        message: String,
    },
}

/// Encodes a frame into its JSON text representation.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode<F: Serialize>(frame: &F) -> Result<String, CodecError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decodes a frame from its JSON text representation.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the text is not a valid frame.
pub fn decode<F: for<'de> Deserialize<'de>>(text: &str) -> Result<F, CodecError> {
    Ok(serde_json::from_str(text)?)
}
