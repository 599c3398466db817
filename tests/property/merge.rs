//! Property-based tests for the message log merger.
//!
//! For arbitrary interleavings of a history batch and live deliveries the
//! merged log must:
//! 1. Never contain two entries with the same resolved server id.
//! 2. Be ordered by `(timestamp, id)` after the history merge.
//! 3. Treat physical redelivery as idempotent.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use matchchat::merge::MessageLog;
use matchchat_proto::message::{ChatId, Message, MessageId, UserId};

/// Build a server message with the id doubling as its content marker.
fn server_message(id: u64, at: i64) -> Message {
    Message {
        id: MessageId::Server(id),
        chat_id: ChatId::new(1),
        sender_id: UserId::new(2),
        sender_username: "bob".into(),
        sender_avatar: None,
        content: format!("msg {id}"),
        file_url: None,
        timestamp: Utc
            .timestamp_opt(at, 0)
            .single()
            .unwrap_or_default(),
        seen: false,
        client_ref: None,
    }
}

/// A history batch: distinct ids with non-decreasing timestamps, the way
/// the loader hands batches to the merger.
fn arb_history() -> impl Strategy<Value = Vec<Message>> {
    prop::collection::btree_set(1u64..40, 0..12).prop_map(|ids| {
        ids.into_iter()
            .map(|id| server_message(id, i64::try_from(id).unwrap_or(0) * 10))
            .collect()
    })
}

/// A live sequence: ids that may overlap the history batch and each other.
fn arb_live() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1u64..40, 0..12)
}

/// Count of distinct server ids vs. entries claiming one.
fn no_duplicate_server_ids(log: &MessageLog) -> bool {
    let mut ids: Vec<u64> = log
        .entries()
        .iter()
        .filter_map(|e| e.message.id.as_server())
        .collect();
    let claiming = ids.len();
    ids.sort_unstable();
    ids.dedup();
    ids.len() == claiming
}

proptest! {
    /// No interleaving of live deliveries around a history merge produces
    /// a duplicated server id.
    #[test]
    fn merged_log_never_duplicates_server_ids(
        history in arb_history(),
        live_before in arb_live(),
        live_after in arb_live(),
    ) {
        let mut log = MessageLog::new();
        for id in live_before {
            log.apply_live(server_message(id, i64::try_from(id).unwrap_or(0) * 10));
        }
        log.merge_history(history);
        for id in live_after {
            log.apply_live(server_message(id, i64::try_from(id).unwrap_or(0) * 10));
        }
        prop_assert!(no_duplicate_server_ids(&log));
    }

    /// After the history merge the log is ordered by `(timestamp, id)`.
    #[test]
    fn history_merge_orders_entries(
        history in arb_history(),
        live_before in arb_live(),
    ) {
        let mut log = MessageLog::new();
        for id in live_before {
            log.apply_live(server_message(id, i64::try_from(id).unwrap_or(0) * 10));
        }
        log.merge_history(history);

        let entries = log.entries();
        for pair in entries.windows(2) {
            let a = &pair[0].message;
            let b = &pair[1].message;
            prop_assert!(a.timestamp <= b.timestamp);
            if a.timestamp == b.timestamp
                && let (Some(x), Some(y)) = (a.id.as_server(), b.id.as_server())
            {
                prop_assert!(x < y);
            }
        }
    }

    /// Applying the same live message repeatedly never grows the log.
    #[test]
    fn redelivery_is_idempotent(id in 1u64..40, repeats in 1usize..5) {
        let mut log = MessageLog::new();
        for _ in 0..repeats {
            log.apply_live(server_message(id, 10));
        }
        prop_assert_eq!(log.len(), 1);
    }

    /// A second history batch never changes the log, whatever it contains.
    #[test]
    fn repeated_history_merge_is_ignored(
        first in arb_history(),
        second in arb_history(),
    ) {
        let mut log = MessageLog::new();
        log.merge_history(first);
        let before: Vec<_> = log.entries().to_vec();
        log.merge_history(second);
        prop_assert_eq!(log.entries(), before.as_slice());
    }
}
