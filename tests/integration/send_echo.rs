// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for optimistic sends and echo reconciliation.
//!
//! Sending a message must insert a pending entry immediately, and the
//! server echo must resolve that entry — same slot, final server id,
//! exactly one copy.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use matchchat::config::EngineConfig;
use matchchat::merge::Delivery;
use matchchat::session::{SendError, SessionManager, UserProfile};
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

fn alice() -> UserProfile {
    UserProfile {
        id: UserId::new(7),
        username: "alice".to_string(),
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
async fn echo_resolves_optimistic_entry_to_server_id() {
    let (addr, _handle) = matchchat_server::server::start_server("127.0.0.1:0")
        .await
        .unwrap();

    let manager = start_engine(addr).await;
    manager.attach(alice(), ChatId::new(1)).await;

    let client_ref = manager.send("hello there").await.unwrap();

    // The optimistic entry is visible before any network round-trip
    // completes, carrying the local correlation id.
    let entries = manager.messages();
    assert_eq!(entries.len(), 1);
    assert!(
        entries[0].message.id == MessageId::Local(client_ref)
            || entries[0].message.id.is_server(),
        "expected the optimistic entry or an already-resolved echo"
    );

    assert!(
        wait_until(Duration::from_secs(5), || {
            manager
                .messages()
                .first()
                .is_some_and(|e| e.message.id.is_server() && e.delivery == Delivery::Confirmed)
        })
        .await,
        "echo should resolve the entry, got {:?}",
        manager.messages()
    );

    // Exactly one final entry, with content intact.
    let entries = manager.messages();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message.content, "hello there");
}

#[tokio::test]
async fn echo_keeps_the_optimistic_slot() {
    let state = Arc::new(ServerState::new());
    // Two older messages so the optimistic entry lands in slot 2.
    state.store.seed(ChatId::new(1), UserId::new(2), "older 1").await;
    state.store.seed(ChatId::new(1), UserId::new(2), "older 2").await;
    let (addr, _handle) =
        matchchat_server::server::start_server_with_state("127.0.0.1:0", state)
            .await
            .unwrap();

    let manager = start_engine(addr).await;
    manager.attach(alice(), ChatId::new(1)).await;
    assert_eq!(manager.messages().len(), 2);

    manager.send("mine").await.unwrap();
    assert_eq!(manager.messages().len(), 3);

    assert!(
        wait_until(Duration::from_secs(5), || {
            manager.messages()[2].message.id == MessageId::Server(3)
        })
        .await,
        "echo should resolve in slot 2, got {:?}",
        manager.messages()
    );
    assert_eq!(manager.messages().len(), 3);
    assert_eq!(manager.messages()[2].message.content, "mine");
}

#[tokio::test]
async fn consecutive_sends_keep_send_order() {
    let (addr, _handle) = matchchat_server::server::start_server("127.0.0.1:0")
        .await
        .unwrap();

    let manager = start_engine(addr).await;
    manager.attach(alice(), ChatId::new(1)).await;

    for i in 0..5 {
        manager.send(format!("message {i}")).await.unwrap();
    }

    assert!(
        wait_until(Duration::from_secs(5), || {
            manager.messages().len() == 5
                && manager.messages().iter().all(|e| e.message.id.is_server())
        })
        .await,
        "all echoes should arrive, got {:?}",
        manager.messages()
    );

    for (i, entry) in manager.messages().iter().enumerate() {
        assert_eq!(entry.message.content, format!("message {i}"));
        assert_eq!(entry.delivery, Delivery::Confirmed);
    }
}

#[tokio::test]
async fn empty_send_is_rejected_without_an_entry() {
    let (addr, _handle) = matchchat_server::server::start_server("127.0.0.1:0")
        .await
        .unwrap();

    let manager = start_engine(addr).await;
    manager.attach(alice(), ChatId::new(1)).await;

    let result = manager.send("").await;
    assert!(matches!(result, Err(SendError::Validation(_))));
    assert!(manager.messages().is_empty());
}
