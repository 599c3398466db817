// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for history/live merging against a real server.
//!
//! Verifies that attaching a session loads the backlog, live deliveries
//! append in order, and no interleaving of backlog and live traffic
//! duplicates a message.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use matchchat::config::EngineConfig;
use matchchat::session::{HistoryState, SessionManager, SessionPhase, UserProfile};
use matchchat::transport::socket::{ReconnectConfig, SocketTransport};
use matchchat_proto::message::{ChatId, MessageId, UserId};
use matchchat_server::server::ServerState;

fn engine_config(addr: SocketAddr) -> EngineConfig {
    EngineConfig {
        ws_url: format!("ws://{addr}/ws"),
        http_base_url: format!("http://{addr}"),
        join_timeout: Duration::from_secs(5),
        echo_timeout: Duration::from_secs(5),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_attempts: 20,
        },
        ..EngineConfig::default()
    }
}

async fn start_engine(addr: SocketAddr) -> SessionManager<SocketTransport> {
    let (manager, _events) = SessionManager::connect(engine_config(addr))
        .await
        .expect("engine should connect");
    manager
}

fn user(id: u64, name: &str) -> UserProfile {
    UserProfile {
        id: UserId::new(id),
        username: name.to_string(),
    }
}

async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

#[tokio::test]
async fn attach_loads_seeded_history() {
    let state = Arc::new(ServerState::new());
    state.store.seed(ChatId::new(1), UserId::new(2), "first").await;
    state.store.seed(ChatId::new(1), UserId::new(2), "second").await;
    let (addr, _handle) =
        matchchat_server::server::start_server_with_state("127.0.0.1:0", state)
            .await
            .unwrap();

    let alice = start_engine(addr).await;
    alice.attach(user(7, "alice"), ChatId::new(1)).await;

    assert_eq!(alice.phase(), SessionPhase::Active);
    assert_eq!(alice.history_state(), HistoryState::Loaded);
    assert!(!alice.status().history_unavailable);

    let entries = alice.messages();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].message.content, "first");
    assert_eq!(entries[1].message.content, "second");
    assert_eq!(entries[0].message.id, MessageId::Server(1));
    assert_eq!(entries[1].message.id, MessageId::Server(2));
}

#[tokio::test]
async fn history_then_live_appends_in_order() {
    let state = Arc::new(ServerState::new());
    state.store.seed(ChatId::new(1), UserId::new(2), "one").await;
    state.store.seed(ChatId::new(1), UserId::new(2), "two").await;
    let (addr, _handle) =
        matchchat_server::server::start_server_with_state("127.0.0.1:0", state)
            .await
            .unwrap();

    let alice = start_engine(addr).await;
    alice.attach(user(7, "alice"), ChatId::new(1)).await;

    let bob = start_engine(addr).await;
    bob.attach(user(2, "bob"), ChatId::new(1)).await;
    bob.send("three").await.unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || alice.messages().len() == 3).await,
        "live message should arrive, got {:?}",
        alice.messages()
    );

    let ids: Vec<_> = alice.messages().iter().map(|e| e.message.id).collect();
    assert_eq!(
        ids,
        vec![
            MessageId::Server(1),
            MessageId::Server(2),
            MessageId::Server(3)
        ]
    );
}

#[tokio::test]
async fn reattach_does_not_duplicate_messages() {
    let (addr, _handle) = matchchat_server::server::start_server("127.0.0.1:0")
        .await
        .unwrap();

    let alice = start_engine(addr).await;
    let bob = start_engine(addr).await;

    alice.attach(user(7, "alice"), ChatId::new(1)).await;
    bob.attach(user(2, "bob"), ChatId::new(1)).await;

    bob.send("before switch").await.unwrap();
    assert!(wait_until(Duration::from_secs(5), || alice.messages().len() == 1).await);

    // Re-attach: the backlog now contains the message that previously
    // arrived live. It must appear exactly once.
    alice.detach().await;
    alice.attach(user(7, "alice"), ChatId::new(1)).await;

    bob.send("after switch").await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || alice.messages().len() == 2).await,
        "expected both messages exactly once, got {:?}",
        alice.messages()
    );

    let contents: Vec<_> = alice
        .messages()
        .iter()
        .map(|e| e.message.content.clone())
        .collect();
    assert_eq!(contents, vec!["before switch", "after switch"]);

    let mut server_ids: Vec<_> = alice
        .messages()
        .iter()
        .filter_map(|e| e.message.id.as_server())
        .collect();
    server_ids.dedup();
    assert_eq!(server_ids.len(), 2);
}

#[tokio::test]
async fn two_clients_converge_on_the_same_log() {
    let (addr, _handle) = matchchat_server::server::start_server("127.0.0.1:0")
        .await
        .unwrap();

    let alice = start_engine(addr).await;
    let bob = start_engine(addr).await;
    alice.attach(user(7, "alice"), ChatId::new(1)).await;
    bob.attach(user(2, "bob"), ChatId::new(1)).await;

    alice.send("from alice").await.unwrap();
    bob.send("from bob").await.unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        alice.messages().len() == 2 && bob.messages().len() == 2
    })
    .await);

    // Entry order may differ while an optimistic entry is being resolved,
    // but both clients must end up holding exactly the same messages.
    let mut alice_ids: Vec<_> = alice
        .messages()
        .iter()
        .filter_map(|e| e.message.id.as_server())
        .collect();
    let mut bob_ids: Vec<_> = bob
        .messages()
        .iter()
        .filter_map(|e| e.message.id.as_server())
        .collect();
    alice_ids.sort_unstable();
    bob_ids.sort_unstable();
    assert_eq!(alice_ids, vec![1, 2]);
    assert_eq!(bob_ids, vec![1, 2]);
}
