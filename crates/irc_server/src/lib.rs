//! Channel subsystem of an IRC server, plus the thin connection layer
//! (registration, CAP negotiation, command dispatch) that makes it
//! reachable from a socket.
//!
//! The core — [`channel`], [`modes`], [`mask`], [`members`], [`mode_engine`],
//! [`name`] — owns no I/O and depends only on the [`client::Client`] and
//! [`server::ServerContext`] collaborator traits. Everything under
//! [`registration`], [`cap`], and [`dispatch`] exists only to drive that
//! core from a real TCP connection.

pub mod cap;
pub mod channel;
pub mod client;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod errors;
pub mod mask;
pub mod members;
pub mod mode_engine;
pub mod modes;
pub mod name;
pub mod parsers;
pub mod persistence;
pub mod registration;
pub mod server;
