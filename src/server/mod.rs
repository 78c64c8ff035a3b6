//! QUIC chat server
//!
//! This module wires the pieces of the server together:
//!
//! - **Connection handling**: one control stream per client, carrying the
//!   handshake, client commands and server-pushed events
//! - **Fan-out routing**: deciding which connections receive each new post,
//!   vote update or deletion
//! - **Snapshot loading**: the filtered history view sent on connect and on
//!   matching-relevant settings changes
//! - **Moderation**: automatic removal of posts past the downvote threshold

pub mod connection;
pub mod moderation;
pub mod ripple_server;
pub mod router;
pub mod snapshot;

pub use connection::{ConnectionCommand, ConnectionHandler, ServerEvent};
pub use moderation::ModerationTrigger;
pub use ripple_server::{RippleServer, ServerConfig};
pub use router::FanoutRouter;
pub use snapshot::SnapshotLoader;
