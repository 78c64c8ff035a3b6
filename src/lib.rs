//! QUIC-based ephemeral chat server with channel fan-out
//!
//! This library provides a real-time group-chat service where clients connect
//! over QUIC, declare a channel (a shared topic string) and a display name,
//! and exchange short text/image posts with peers in the same channel.
//! Community voting can automatically remove unpopular posts.

pub mod admin;
pub mod client;
pub mod error;
pub mod matching;
pub mod protocol;
pub mod registry;
pub mod selfcheck;
pub mod server;
pub mod store;

pub use client::{ClientConfig, RippleClient};
pub use error::{Result, RippleError};
pub use registry::{Participant, ParticipantRegistry, SettingsUpdate};
pub use server::RippleServer;

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a unique post ID
pub fn generate_post_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a session ID for a new connection
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get current timestamp in milliseconds since UNIX epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
