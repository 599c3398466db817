//! `MatchChat` — chat session synchronization engine.
//!
//! Joins a chat room over a persistent connection, reconciles the
//! REST-fetched message backlog with the live event stream into one
//! canonical ordered log, and exposes send/receive operations with
//! delivery feedback to the embedding UI.

pub mod config;
pub mod history;
pub mod membership;
pub mod merge;
pub mod session;
pub mod transport;
