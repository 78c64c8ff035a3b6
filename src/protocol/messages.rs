//! Protocol message types for the chat system
//!
//! All message payloads that can be serialized/deserialized within frames.
//! Uses serde for JSON serialization (can be swapped for protobuf/flatbuffers).

use serde::{Deserialize, Serialize};

/// Protocol version spoken by this crate
pub const PROTOCOL_VERSION: u32 = 1;

// =============================================================================
// Control Messages (0x00 - 0x0F)
// =============================================================================

/// Initial handshake from client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    /// Protocol version
    pub version: u32,
    /// Client capabilities
    pub capabilities: Vec<String>,
}

impl Default for Hello {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            capabilities: vec!["posts".to_string(), "votes".to_string()],
        }
    }
}

/// Server response to Hello
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloAck {
    /// Server protocol version
    pub version: u32,
    /// Session ID assigned to this connection, used as the client's
    /// author/voter identity for the connection's lifetime
    pub session_id: String,
}

/// Ping message for keepalive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    /// Timestamp when ping was sent (for RTT measurement)
    pub timestamp: u64,
}

/// Pong response to Ping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pong {
    /// Echo back the timestamp from Ping
    pub timestamp: u64,
}

/// Graceful disconnect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goodbye {
    /// Reason for disconnect
    pub reason: String,
}

// =============================================================================
// Client Commands (0x10 - 0x2F) - Client -> Server
// =============================================================================

/// Partial settings update; only the fields present are merged into the
/// participant. Absent fields leave the current value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    /// New display name (trimmed; empty falls back to the default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// New channel (normalized before storage)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Latitude in degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Longitude in degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Receive radius in miles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_miles: Option<f64>,
}

/// Send a new post to the participant's current channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessage {
    /// Message text
    pub message: String,
    /// Optional opaque image reference (upload handling is external)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Cast a vote on a post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastVote {
    /// Post being voted on
    pub post_id: String,
    /// Vote direction
    pub vote_type: VoteType,
}

/// Vote direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Up,
    Down,
}

// =============================================================================
// Server Events (0x30 - 0x4F) - Server -> Client
// =============================================================================

/// One persisted chat post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    /// Post ID, generated by the server at send time
    pub id: String,
    /// Author's session ID, snapshotted at send time
    pub session_id: String,
    /// Author's display name, snapshotted at send time
    pub display_name: String,
    /// Message text
    pub message: String,
    /// Opaque image reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Normalized channel the post was sent to
    pub channel: String,
    /// Latitude at send time (0.0 when geofencing is disabled)
    pub latitude: f64,
    /// Longitude at send time (0.0 when geofencing is disabled)
    pub longitude: f64,
    /// Timestamp (Unix ms)
    pub timestamp: u64,
}

/// Full snapshot of recent posts visible to the receiving participant.
/// The client is expected to clear and redraw, not merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posts {
    /// Posts in ascending chronological order
    pub posts: Vec<Post>,
}

/// Aggregate vote tallies for a post
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCounts {
    pub up: u64,
    pub down: u64,
}

/// Vote tally change notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteUpdate {
    /// Post whose tally changed
    pub post_id: String,
    /// Current tallies
    pub counts: VoteCounts,
}

/// Why a post was deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteReason {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "auto-moderation")]
    AutoModeration,
}

impl std::fmt::Display for DeleteReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeleteReason::Admin => write!(f, "admin"),
            DeleteReason::AutoModeration => write!(f, "auto-moderation"),
        }
    }
}

/// Post deletion notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeleted {
    /// Deleted post
    pub post_id: String,
    /// Deletion reason
    pub reason: DeleteReason,
    /// Distinct downvoter count that triggered auto-moderation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downvote_count: Option<u64>,
}

// =============================================================================
// Error (0xFF)
// =============================================================================

/// Error notification sent to a single connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Error {
    /// Error code
    pub code: u32,
    /// Human-readable error message
    pub message: String,
}

impl Error {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_reason_wire_names() {
        let admin = serde_json::to_string(&DeleteReason::Admin).unwrap();
        let auto = serde_json::to_string(&DeleteReason::AutoModeration).unwrap();
        assert_eq!(admin, "\"admin\"");
        assert_eq!(auto, "\"auto-moderation\"");
    }

    #[test]
    fn test_vote_type_wire_names() {
        let up = serde_json::to_string(&VoteType::Up).unwrap();
        let down = serde_json::to_string(&VoteType::Down).unwrap();
        assert_eq!(up, "\"up\"");
        assert_eq!(down, "\"down\"");
    }

    #[test]
    fn test_settings_update_partial_json() {
        // A sparse payload leaves the other fields as None
        let update: SettingsUpdate = serde_json::from_str(r#"{"channel":"  General "}"#).unwrap();
        assert_eq!(update.channel.as_deref(), Some("  General "));
        assert!(update.display_name.is_none());
        assert!(update.latitude.is_none());
        assert!(update.radius_miles.is_none());
    }

    #[test]
    fn test_message_deleted_omits_absent_count() {
        let deleted = MessageDeleted {
            post_id: "p1".to_string(),
            reason: DeleteReason::Admin,
            downvote_count: None,
        };
        let json = serde_json::to_string(&deleted).unwrap();
        assert!(!json.contains("downvote_count"));
    }
}
