//! Membership registry for connected participants
//!
//! This module owns the only shared mutable state in the server: the mapping
//! from connection ID to the live participant behind it, together with the
//! outbox used to push events to that connection. A participant exists here
//! if and only if its connection is currently open.

use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc};
use tracing::warn;

use crate::current_timestamp;
use crate::generate_session_id;
use crate::matching::normalize_channel;
use crate::server::connection::ConnectionCommand;

pub use crate::protocol::messages::SettingsUpdate;

/// Display name assigned to participants that never chose one
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

/// A coordinate pair supplied by a client
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// The live, in-memory identity and preferences of one open connection
#[derive(Debug, Clone)]
pub struct Participant {
    /// Opaque identifier, unique per live connection
    pub connection_id: String,
    /// Stable pseudo-identity for the connection's lifetime; the author and
    /// voter identity, distinct from the connection ID
    pub session_id: String,
    /// Display name; never empty after normalization
    pub display_name: String,
    /// Normalized channel; empty string is the default/public channel
    pub channel: String,
    /// Latitude, absent until the client supplies it
    pub latitude: Option<f64>,
    /// Longitude, absent until the client supplies it
    pub longitude: Option<f64>,
    /// Receive radius in miles
    pub radius_miles: Option<f64>,
    /// When the connection registered (Unix ms, informational)
    pub connected_at: u64,
}

impl Participant {
    /// Create a participant with default identity and a fresh session ID
    pub fn new(connection_id: String) -> Self {
        Self {
            connection_id,
            session_id: generate_session_id(),
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            channel: String::new(),
            latitude: None,
            longitude: None,
            radius_miles: None,
            connected_at: current_timestamp(),
        }
    }

    /// The participant's location, present only once both coordinates arrived
    pub fn location(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }
}

/// Normalize a client-supplied display name; empty collapses to the default
pub fn normalize_display_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        DEFAULT_DISPLAY_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// One registry entry: the participant plus the outbox for pushing events
#[derive(Debug, Clone)]
struct ClientEntry {
    participant: Participant,
    outbox: mpsc::UnboundedSender<ConnectionCommand>,
}

/// Registry of all currently connected participants
///
/// Injected into the server, router and snapshot loader; guarded by an
/// `RwLock` so `register`/`update`/`deregister`/`snapshot` are safe under
/// concurrent connection handling. Snapshots are cloned out so a concurrent
/// deregistration can never corrupt an in-flight fan-out iteration.
pub struct ParticipantRegistry {
    clients: RwLock<HashMap<String, ClientEntry>>,
}

impl ParticipantRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection, creating a participant with defaults.
    /// Expected exactly once per connection lifetime.
    pub async fn register(
        &self,
        connection_id: &str,
        outbox: mpsc::UnboundedSender<ConnectionCommand>,
    ) -> Participant {
        let participant = Participant::new(connection_id.to_string());
        let entry = ClientEntry {
            participant: participant.clone(),
            outbox,
        };

        let mut clients = self.clients.write().await;
        if clients.insert(connection_id.to_string(), entry).is_some() {
            warn!("Connection {} registered twice", connection_id);
        }

        participant
    }

    /// Merge a partial settings update into the participant.
    ///
    /// Returns the updated participant and whether a matching-affecting field
    /// (channel, latitude, longitude, radius; not display name) changed.
    /// Returns `None` when the connection is no longer registered; a settings
    /// update racing a disconnect is a silent no-op, never an error.
    pub async fn update(
        &self,
        connection_id: &str,
        settings: &SettingsUpdate,
    ) -> Option<(Participant, bool)> {
        let mut clients = self.clients.write().await;
        let entry = clients.get_mut(connection_id)?;
        let participant = &mut entry.participant;

        let mut matching_changed = false;

        if let Some(name) = &settings.display_name {
            participant.display_name = normalize_display_name(name);
        }

        if let Some(channel) = &settings.channel {
            // Store the normalized form, never the raw client string
            let normalized = normalize_channel(channel);
            if participant.channel != normalized {
                participant.channel = normalized;
                matching_changed = true;
            }
        }

        if let Some(latitude) = settings.latitude {
            if participant.latitude != Some(latitude) {
                participant.latitude = Some(latitude);
                matching_changed = true;
            }
        }

        if let Some(longitude) = settings.longitude {
            if participant.longitude != Some(longitude) {
                participant.longitude = Some(longitude);
                matching_changed = true;
            }
        }

        if let Some(radius) = settings.radius_miles {
            if participant.radius_miles != Some(radius) {
                participant.radius_miles = Some(radius);
                matching_changed = true;
            }
        }

        Some((participant.clone(), matching_changed))
    }

    /// Remove a connection. Idempotent; deregistering twice is a no-op.
    pub async fn deregister(&self, connection_id: &str) -> Option<Participant> {
        let mut clients = self.clients.write().await;
        clients.remove(connection_id).map(|e| e.participant)
    }

    /// Get a point-in-time copy of one participant
    pub async fn get(&self, connection_id: &str) -> Option<Participant> {
        let clients = self.clients.read().await;
        clients.get(connection_id).map(|e| e.participant.clone())
    }

    /// Get the outbox for one connection, if it is still registered
    pub async fn outbox(
        &self,
        connection_id: &str,
    ) -> Option<mpsc::UnboundedSender<ConnectionCommand>> {
        let clients = self.clients.read().await;
        clients.get(connection_id).map(|e| e.outbox.clone())
    }

    /// Point-in-time view of all participants
    pub async fn all(&self) -> Vec<Participant> {
        let clients = self.clients.read().await;
        clients.values().map(|e| e.participant.clone()).collect()
    }

    /// Point-in-time snapshot of participants with their outboxes, for fan-out
    pub async fn snapshot(
        &self,
    ) -> Vec<(Participant, mpsc::UnboundedSender<ConnectionCommand>)> {
        let clients = self.clients.read().await;
        clients
            .values()
            .map(|e| (e.participant.clone(), e.outbox.clone()))
            .collect()
    }

    /// Number of live connections
    pub async fn len(&self) -> usize {
        let clients = self.clients.read().await;
        clients.len()
    }

    /// Whether any connections are live
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Participant counts per normalized channel, for the admin surface
    pub async fn channel_counts(&self) -> HashMap<String, usize> {
        let clients = self.clients.read().await;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for entry in clients.values() {
            *counts.entry(entry.participant.channel.clone()).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for ParticipantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbox() -> mpsc::UnboundedSender<ConnectionCommand> {
        let (tx, _rx) = mpsc::unbounded_channel();
        tx
    }

    #[tokio::test]
    async fn test_register_creates_defaults() {
        let registry = ParticipantRegistry::new();
        let participant = registry.register("conn-1", outbox()).await;

        assert_eq!(participant.display_name, DEFAULT_DISPLAY_NAME);
        assert_eq!(participant.channel, "");
        assert!(participant.latitude.is_none());
        assert!(!participant.session_id.is_empty());
        assert_ne!(participant.session_id, participant.connection_id);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_register_then_deregister_leaves_registry_empty() {
        let registry = ParticipantRegistry::new();
        registry.register("conn-1", outbox()).await;
        registry.deregister("conn-1").await;

        assert!(registry.all().await.is_empty());

        // Deregistering again is a no-op, not an error
        assert!(registry.deregister("conn-1").await.is_none());
    }

    #[tokio::test]
    async fn test_update_merges_only_present_fields() {
        let registry = ParticipantRegistry::new();
        registry.register("conn-1", outbox()).await;

        let (updated, _) = registry
            .update(
                "conn-1",
                &SettingsUpdate {
                    display_name: Some("  alice  ".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.display_name, "alice");
        assert_eq!(updated.channel, "");

        // A later channel-only update leaves the name alone
        let (updated, _) = registry
            .update(
                "conn-1",
                &SettingsUpdate {
                    channel: Some(" General ".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.display_name, "alice");
        assert_eq!(updated.channel, "general");
    }

    #[tokio::test]
    async fn test_update_reports_matching_affecting_changes() {
        let registry = ParticipantRegistry::new();
        registry.register("conn-1", outbox()).await;

        // Display name changes never require a snapshot refresh
        let (_, changed) = registry
            .update(
                "conn-1",
                &SettingsUpdate {
                    display_name: Some("bob".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!changed);

        // Channel changes do
        let (_, changed) = registry
            .update(
                "conn-1",
                &SettingsUpdate {
                    channel: Some("alpha".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(changed);

        // Setting the same channel again does not
        let (_, changed) = registry
            .update(
                "conn-1",
                &SettingsUpdate {
                    channel: Some(" Alpha ".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!changed);

        // Location changes do
        let (_, changed) = registry
            .update(
                "conn-1",
                &SettingsUpdate {
                    latitude: Some(40.7),
                    longitude: Some(-74.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(changed);
    }

    #[tokio::test]
    async fn test_update_unregistered_connection_is_silent_noop() {
        let registry = ParticipantRegistry::new();
        let result = registry
            .update(
                "gone",
                &SettingsUpdate {
                    channel: Some("alpha".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_empty_display_name_falls_back_to_default() {
        let registry = ParticipantRegistry::new();
        registry.register("conn-1", outbox()).await;

        let (updated, _) = registry
            .update(
                "conn-1",
                &SettingsUpdate {
                    display_name: Some("   ".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.display_name, DEFAULT_DISPLAY_NAME);
    }

    #[tokio::test]
    async fn test_location_requires_both_coordinates() {
        let registry = ParticipantRegistry::new();
        registry.register("conn-1", outbox()).await;

        let (updated, _) = registry
            .update(
                "conn-1",
                &SettingsUpdate {
                    latitude: Some(40.7),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.location().is_none());

        let (updated, _) = registry
            .update(
                "conn-1",
                &SettingsUpdate {
                    longitude: Some(-74.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let location = updated.location().unwrap();
        assert_eq!(location.latitude, 40.7);
        assert_eq!(location.longitude, -74.0);
    }

    #[tokio::test]
    async fn test_channel_counts() {
        let registry = ParticipantRegistry::new();
        registry.register("a", outbox()).await;
        registry.register("b", outbox()).await;
        registry.register("c", outbox()).await;

        registry
            .update(
                "a",
                &SettingsUpdate {
                    channel: Some("alpha".to_string()),
                    ..Default::default()
                },
            )
            .await;
        registry
            .update(
                "b",
                &SettingsUpdate {
                    channel: Some(" ALPHA ".to_string()),
                    ..Default::default()
                },
            )
            .await;

        let counts = registry.channel_counts().await;
        assert_eq!(counts.get("alpha"), Some(&2));
        assert_eq!(counts.get(""), Some(&1));
    }
}
