//! Placeholder for a future standalone IRC client library.
//!
//! The channel subsystem crate (`irc_server`) only needs a `Client`
//! collaborator trait, which it defines itself; this crate is reserved for
//! an eventual real client implementation and currently carries no code.
