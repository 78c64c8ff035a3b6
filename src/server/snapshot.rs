//! Snapshot loader for initial and refreshed history views
//!
//! On connect, and again whenever a settings change affects matching, one
//! participant receives the filtered recent history as a single full-replace
//! `Posts` event. Loads for different connections are independent and
//! interleave freely with live broadcasts; a client may see a post in its
//! snapshot and again as a live event, and deduplicates on its side.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Result, RippleError};
use crate::matching::{MatchMode, matches};
use crate::protocol::messages::{Error as ErrorMessage, Posts};
use crate::registry::ParticipantRegistry;
use crate::server::connection::ConnectionCommand;
use crate::store::PostStore;

/// Loads and pushes filtered history snapshots to single participants
pub struct SnapshotLoader {
    registry: Arc<ParticipantRegistry>,
    store: Arc<dyn PostStore>,
    mode: MatchMode,
    limit: usize,
}

impl SnapshotLoader {
    /// Create a loader reading at most `limit` recent posts per snapshot
    pub fn new(
        registry: Arc<ParticipantRegistry>,
        store: Arc<dyn PostStore>,
        mode: MatchMode,
        limit: usize,
    ) -> Self {
        Self {
            registry,
            store,
            mode,
            limit,
        }
    }

    /// Build and push the snapshot for one connection.
    ///
    /// A store failure is surfaced to that connection as an `Error` frame and
    /// abandoned; no state changes and nothing is retried. A connection that
    /// deregistered while the load was in flight is a silent no-op.
    pub async fn load_for(&self, connection_id: &str) -> Result<()> {
        let participant = match self.registry.get(connection_id).await {
            Some(p) => p,
            None => {
                debug!("Snapshot requested for unregistered connection {}", connection_id);
                return Ok(());
            }
        };

        let recent = match self.store.recent_posts(self.limit).await {
            Ok(posts) => posts,
            Err(e) => {
                warn!("Snapshot load failed for {}: {:#}", connection_id, e);
                let err = RippleError::from(e);
                self.send(
                    connection_id,
                    ConnectionCommand::SendError(ErrorMessage::new(
                        err.code(),
                        err.message().to_string(),
                    )),
                )
                .await;
                return Err(err);
            }
        };

        // The store returns newest first; the client renders oldest first
        let posts: Vec<_> = recent
            .into_iter()
            .rev()
            .filter(|post| matches(&participant, post, self.mode))
            .collect();

        debug!(
            "Snapshot for {} in channel '{}': {} post(s)",
            connection_id,
            participant.channel,
            posts.len()
        );

        self.send(connection_id, ConnectionCommand::SendPosts(Posts { posts }))
            .await;

        Ok(())
    }

    /// Best-effort send to one connection
    async fn send(&self, connection_id: &str, cmd: ConnectionCommand) {
        if let Some(outbox) = self.registry.outbox(connection_id).await {
            if outbox.send(cmd).is_err() {
                debug!("Connection {} closed before snapshot delivery", connection_id);
            }
        }
    }
}
