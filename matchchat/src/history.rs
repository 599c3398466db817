//! Message backlog loading for `MatchChat`.
//!
//! The [`HistoryClient`] fetches a chat's ordered message history over the
//! REST endpoint. Failures are returned as a [`HistoryOutcome::Failed`]
//! value rather than an error, so the session can keep admitting live
//! messages while history is retried or abandoned.
//!
//! A single request per chat is in flight at any time: a second `load` for
//! the same chat while one is outstanding awaits the same pending request
//! instead of issuing a duplicate.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use matchchat_proto::message::{ChatId, Message};

/// Errors constructing the history client.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// The underlying HTTP client could not be built.
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Result of a history load. `Failed` is a value, not an error: the caller
/// decides whether to retry, and the session degrades to live-only either
/// way.
#[derive(Debug, Clone)]
pub enum HistoryOutcome {
    /// The backlog, ordered chronologically.
    Loaded(Vec<Message>),
    /// The load did not produce a backlog.
    Failed {
        /// HTTP status code, when the server answered at all.
        status: Option<u16>,
        /// Server-provided error string or transport failure description.
        reason: String,
    },
}

impl HistoryOutcome {
    /// Returns `true` for a successful load.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

type SharedLoad = Shared<BoxFuture<'static, HistoryOutcome>>;

/// Fetches message backlogs over the REST history endpoint.
pub struct HistoryClient {
    http: reqwest::Client,
    base_url: String,
    in_flight: Mutex<HashMap<ChatId, SharedLoad>>,
}

impl HistoryClient {
    /// Creates a client for the given HTTP base URL
    /// (e.g. `http://127.0.0.1:5005`).
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Client`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, HistoryError> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout.max(Duration::from_secs(30)))
            .build()?;
        let base_url = base_url.into();
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Load the message backlog for a chat.
    ///
    /// Concurrent calls for the same chat share one in-flight request; the
    /// shared request is forgotten once it completes, so a later call
    /// issues a fresh one.
    pub async fn load(&self, chat_id: ChatId) -> HistoryOutcome {
        let shared = {
            let mut in_flight = self.in_flight.lock();
            if let Some(existing) = in_flight.get(&chat_id) {
                tracing::debug!(chat_id = %chat_id, "joining in-flight history request");
                existing.clone()
            } else {
                let fut = fetch(self.http.clone(), self.base_url.clone(), chat_id)
                    .boxed()
                    .shared();
                in_flight.insert(chat_id, fut.clone());
                fut
            }
        };

        let outcome = shared.await;
        self.in_flight.lock().remove(&chat_id);
        outcome
    }
}

/// Perform the actual request, mapping every failure mode to a
/// [`HistoryOutcome::Failed`] value.
async fn fetch(http: reqwest::Client, base_url: String, chat_id: ChatId) -> HistoryOutcome {
    let url = format!("{base_url}/chats/{chat_id}/messages");

    let response = match http.get(&url).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(chat_id = %chat_id, err = %e, "history request failed");
            return HistoryOutcome::Failed {
                status: None,
                reason: e.to_string(),
            };
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let reason = if body.is_empty() {
            status.to_string()
        } else {
            body
        };
        tracing::warn!(chat_id = %chat_id, status = status.as_u16(), "history load rejected");
        return HistoryOutcome::Failed {
            status: Some(status.as_u16()),
            reason,
        };
    }

    match response.json::<Vec<Message>>().await {
        Ok(messages) => HistoryOutcome::Loaded(ensure_ordered(messages)),
        Err(e) => {
            tracing::warn!(chat_id = %chat_id, err = %e, "history payload was not valid");
            HistoryOutcome::Failed {
                status: Some(status.as_u16()),
                reason: format!("invalid history payload: {e}"),
            }
        }
    }
}

/// The backend returns messages already ordered chronologically; verify
/// that and restore the order if the source misbehaved.
fn ensure_ordered(mut messages: Vec<Message>) -> Vec<Message> {
    let ordered = messages
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp);
    if !ordered {
        tracing::warn!("history batch arrived out of order, re-sorting");
        messages.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.id.as_server().cmp(&b.id.as_server()))
        });
    }
    messages
}
