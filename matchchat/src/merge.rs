//! Canonical message log for an attached chat session.
//!
//! [`MessageLog`] merges the REST-fetched backlog and the live event stream
//! into one de-duplicated, ordered sequence. The session layer computes the
//! next log state through the methods here and installs the result; nothing
//! else writes to the log.
//!
//! Ordering rules: entries sort by `(timestamp, id)`, where equal timestamps
//! break ties by ascending server id. A `Local` id (an optimistic entry not
//! yet acknowledged) is not comparable with a server id, and the sort is
//! stable, so client-side insertion order is preserved for such pairs. A
//! live message that resolves an existing entry replaces it in place rather
//! than re-sorting, keeping the entry's position stable for the UI.

use std::cmp::Ordering;

use uuid::Uuid;

use matchchat_proto::message::{Message, MessageId};

/// Delivery state of a log entry, tracked alongside the immutable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Acknowledged by the server (history entries and live deliveries).
    Confirmed,
    /// Optimistic entry awaiting the server echo.
    Pending,
    /// No echo arrived within the send timeout; eligible for a UI retry.
    /// The entry is kept — losing user input silently is worse than
    /// showing a failed-send indicator.
    Failed,
}

/// One message in the merged log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// The message itself.
    pub message: Message,
    /// Its delivery state.
    pub delivery: Delivery,
}

/// The merged, ordered view of a chat's messages.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
    history_merged: bool,
}

impl MessageLog {
    /// Creates an empty log.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            history_merged: false,
        }
    }

    /// The current ordered entries.
    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Number of entries in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a history batch has already been merged.
    #[must_use]
    pub const fn history_merged(&self) -> bool {
        self.history_merged
    }

    /// Merge the history backlog into the log.
    ///
    /// The union of the current entries and the batch is de-duplicated by
    /// resolved id and re-sorted by `(timestamp, id)`. History merges at
    /// most once per log: repeated batches are ignored so they cannot
    /// resurrect messages that later live events superseded.
    ///
    /// Returns `false` when the batch was ignored.
    pub fn merge_history(&mut self, batch: Vec<Message>) -> bool {
        if self.history_merged {
            tracing::debug!("history already merged for this session, ignoring batch");
            return false;
        }
        self.history_merged = true;

        for message in batch {
            if self.position_of(&message).is_none() {
                self.entries.push(LogEntry {
                    message,
                    delivery: Delivery::Confirmed,
                });
            }
        }
        self.entries.sort_by(order);
        true
    }

    /// Apply a live message.
    ///
    /// If the message resolves an existing entry — same server id, or the
    /// echo of an optimistic entry identified by its correlation id — the
    /// entry is replaced in place, preserving its position. Otherwise the
    /// message is appended: live events arrive in send order within a room,
    /// so no re-sort is needed.
    pub fn apply_live(&mut self, message: Message) {
        if let Some(pos) = self.position_of(&message) {
            tracing::trace!(id = %message.id, "live message resolved existing entry");
            self.entries[pos] = LogEntry {
                message,
                delivery: Delivery::Confirmed,
            };
        } else {
            self.entries.push(LogEntry {
                message,
                delivery: Delivery::Confirmed,
            });
        }
    }

    /// Append an optimistic entry for a message this client just sent,
    /// ahead of any server acknowledgement.
    pub fn push_optimistic(&mut self, message: Message) {
        self.entries.push(LogEntry {
            message,
            delivery: Delivery::Pending,
        });
    }

    /// Mark the optimistic entry with the given correlation id as failed.
    ///
    /// Returns `false` when no pending entry matches — the echo already
    /// resolved it, or it was marked before.
    pub fn mark_send_failed(&mut self, client_ref: Uuid) -> bool {
        let entry = self.entries.iter_mut().find(|e| {
            e.delivery == Delivery::Pending && e.message.id == MessageId::Local(client_ref)
        });
        match entry {
            Some(e) => {
                tracing::warn!(client_ref = %client_ref, "send echo timed out, marking failed");
                e.delivery = Delivery::Failed;
                true
            }
            None => false,
        }
    }

    /// Flip `seen` on every confirmed entry with a server id up to and
    /// including `up_to`. Ignored when `up_to` is not a server id.
    pub fn apply_seen(&mut self, up_to: MessageId) {
        let Some(limit) = up_to.as_server() else {
            return;
        };
        for entry in &mut self.entries {
            if let Some(id) = entry.message.id.as_server()
                && id <= limit
            {
                entry.message.seen = true;
            }
        }
    }

    /// Find the entry this message resolves to, if any.
    ///
    /// Matches, in order: an entry with the same server id; the optimistic
    /// entry carrying the message's correlation id; and — for backends that
    /// drop the correlation id from the echo — the oldest pending entry
    /// from the same sender with identical content.
    fn position_of(&self, message: &Message) -> Option<usize> {
        if message.id.is_server()
            && let Some(pos) = self
                .entries
                .iter()
                .position(|e| e.message.id == message.id)
        {
            return Some(pos);
        }

        if let Some(client_ref) = message.client_ref
            && let Some(pos) = self.entries.iter().position(|e| {
                e.message.id == MessageId::Local(client_ref)
                    || e.message.client_ref == Some(client_ref)
            })
        {
            return Some(pos);
        }

        if message.id.is_server() && message.client_ref.is_none() {
            return self.entries.iter().position(|e| {
                e.delivery == Delivery::Pending
                    && e.message.sender_id == message.sender_id
                    && e.message.content == message.content
            });
        }

        None
    }
}

/// Sort order for merged entries: timestamp, then server id. Incomparable
/// ids (local vs. server) compare equal so the stable sort keeps their
/// insertion order.
fn order(a: &LogEntry, b: &LogEntry) -> Ordering {
    a.message
        .timestamp
        .cmp(&b.message.timestamp)
        .then_with(|| match (a.message.id, b.message.id) {
            (MessageId::Server(x), MessageId::Server(y)) => x.cmp(&y),
            _ => Ordering::Equal,
        })
}
