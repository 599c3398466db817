// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for read acknowledgements.
//!
//! One member marking the chat as read must flip the `seen` flag on the
//! other members' logs, and the flag must survive in stored history.

use std::net::SocketAddr;
use std::time::Duration;

use matchchat::config::EngineConfig;
use matchchat::session::{SessionManager, UserProfile};
use matchchat::transport::socket::{ReconnectConfig, SocketTransport};
use matchchat_proto::message::{ChatId, MessageId, UserId};

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
async fn mark_seen_propagates_to_other_members() {
    let (addr, _handle) = matchchat_server::server::start_server("127.0.0.1:0")
        .await
        .unwrap();

    let alice = start_engine(addr).await;
    let bob = start_engine(addr).await;
    alice.attach(user(7, "alice"), ChatId::new(1)).await;
    bob.attach(user(2, "bob"), ChatId::new(1)).await;

    alice.send("read me").await.unwrap();
    assert!(wait_until(Duration::from_secs(5), || bob.messages().len() == 1).await);
    assert!(!alice.messages()[0].message.seen);

    bob.mark_seen(MessageId::Server(1)).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            alice
                .messages()
                .first()
                .is_some_and(|e| e.message.seen)
        })
        .await,
        "alice should observe the read flag, got {:?}",
        alice.messages()
    );
}

#[tokio::test]
async fn seen_flag_survives_in_history() {
    let (addr, _handle) = matchchat_server::server::start_server("127.0.0.1:0")
        .await
        .unwrap();

    let alice = start_engine(addr).await;
    let bob = start_engine(addr).await;
    alice.attach(user(7, "alice"), ChatId::new(1)).await;
    bob.attach(user(2, "bob"), ChatId::new(1)).await;

    alice.send("persisted read").await.unwrap();
    assert!(wait_until(Duration::from_secs(5), || bob.messages().len() == 1).await);
    bob.mark_seen(MessageId::Server(1)).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            alice.messages().first().is_some_and(|e| e.message.seen)
        })
        .await
    );

    // A fresh attach loads the flag from history.
    let carol = start_engine(addr).await;
    carol.attach(user(3, "carol"), ChatId::new(1)).await;
    assert_eq!(carol.messages().len(), 1);
    assert!(carol.messages()[0].message.seen);
}
