//! `MatchChat` wire protocol library.

pub mod frame;
pub mod message;
