//! Fan-out router for pushing events to connected participants
//!
//! Given a new post, a vote tally change, or a deletion, decides which
//! connections receive it and pushes the event through each connection's
//! outbox. Every send is best-effort: a closed or slow connection is skipped
//! and can never abort the loop over the remaining participants. The router
//! only reads the registry; it never mutates it or the store.

use std::sync::Arc;

use tracing::{debug, info};

use crate::matching::{MatchMode, matches};
use crate::protocol::messages::{DeleteReason, MessageDeleted, Post, VoteCounts, VoteUpdate};
use crate::registry::ParticipantRegistry;
use crate::server::connection::ConnectionCommand;

/// Routes posts, vote updates and deletions to connected participants
pub struct FanoutRouter {
    registry: Arc<ParticipantRegistry>,
    mode: MatchMode,
}

impl FanoutRouter {
    /// Create a router over the given registry
    pub fn new(registry: Arc<ParticipantRegistry>, mode: MatchMode) -> Self {
        Self { registry, mode }
    }

    /// The filtering mode this router applies to posts
    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Push a new post to every participant the matching rule selects.
    ///
    /// Visits a point-in-time snapshot of the registry, so each currently
    /// registered participant is considered exactly once even while
    /// connections come and go mid-broadcast.
    pub async fn broadcast_new_post(&self, post: &Post) {
        let mut delivered = 0usize;

        for (participant, outbox) in self.registry.snapshot().await {
            if !matches(&participant, post, self.mode) {
                continue;
            }

            if outbox
                .send(ConnectionCommand::SendNewPost(post.clone()))
                .is_err()
            {
                debug!(
                    "Skipping closed connection {} during post fan-out",
                    participant.connection_id
                );
                continue;
            }
            delivered += 1;
        }

        debug!(
            "Post {} fanned out to {} participant(s) in channel '{}'",
            post.id, delivered, post.channel
        );
    }

    /// Push a vote tally change to every connection, unconditionally.
    ///
    /// Vote updates are deliberately not channel/location filtered: any
    /// participant may still have the post rendered from an earlier channel
    /// and needs the fresh tally.
    pub async fn broadcast_vote_update(&self, post_id: &str, counts: VoteCounts) {
        let update = VoteUpdate {
            post_id: post_id.to_string(),
            counts,
        };

        for (participant, outbox) in self.registry.snapshot().await {
            if outbox
                .send(ConnectionCommand::SendVoteUpdate(update.clone()))
                .is_err()
            {
                debug!(
                    "Skipping closed connection {} during vote fan-out",
                    participant.connection_id
                );
            }
        }
    }

    /// Push a deletion notification to every connection, unconditionally.
    pub async fn broadcast_deletion(
        &self,
        post_id: &str,
        reason: DeleteReason,
        downvote_count: Option<u64>,
    ) {
        info!("Broadcasting deletion of {} ({})", post_id, reason);

        let deleted = MessageDeleted {
            post_id: post_id.to_string(),
            reason,
            downvote_count,
        };

        for (participant, outbox) in self.registry.snapshot().await {
            if outbox
                .send(ConnectionCommand::SendMessageDeleted(deleted.clone()))
                .is_err()
            {
                debug!(
                    "Skipping closed connection {} during deletion fan-out",
                    participant.connection_id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::SettingsUpdate;
    use crate::{current_timestamp, generate_post_id};
    use tokio::sync::mpsc;

    fn post(channel: &str) -> Post {
        Post {
            id: generate_post_id(),
            session_id: "author".to_string(),
            display_name: "Anonymous".to_string(),
            message: "hello".to_string(),
            image: None,
            channel: channel.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            timestamp: current_timestamp(),
        }
    }

    async fn join(
        registry: &ParticipantRegistry,
        conn_id: &str,
        channel: &str,
    ) -> mpsc::UnboundedReceiver<ConnectionCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(conn_id, tx).await;
        registry
            .update(
                conn_id,
                &SettingsUpdate {
                    channel: Some(channel.to_string()),
                    ..Default::default()
                },
            )
            .await;
        rx
    }

    fn received_new_post(rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>) -> bool {
        matches!(rx.try_recv(), Ok(ConnectionCommand::SendNewPost(_)))
    }

    #[tokio::test]
    async fn test_post_fanout_filters_by_normalized_channel() {
        let registry = Arc::new(ParticipantRegistry::new());
        let router = FanoutRouter::new(Arc::clone(&registry), MatchMode::ChannelOnly);

        let mut rx_alpha = join(&registry, "c1", "alpha").await;
        let mut rx_alpha_raw = join(&registry, "c2", "Alpha ").await;
        let mut rx_beta = join(&registry, "c3", "beta").await;

        router.broadcast_new_post(&post("alpha")).await;

        assert!(received_new_post(&mut rx_alpha));
        assert!(received_new_post(&mut rx_alpha_raw));
        assert!(!received_new_post(&mut rx_beta));
    }

    #[tokio::test]
    async fn test_each_matching_participant_receives_exactly_once() {
        let registry = Arc::new(ParticipantRegistry::new());
        let router = FanoutRouter::new(Arc::clone(&registry), MatchMode::ChannelOnly);

        let mut rx = join(&registry, "c1", "alpha").await;
        router.broadcast_new_post(&post("alpha")).await;

        assert!(received_new_post(&mut rx));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_connection_does_not_abort_fanout() {
        let registry = Arc::new(ParticipantRegistry::new());
        let router = FanoutRouter::new(Arc::clone(&registry), MatchMode::ChannelOnly);

        // First participant's receiver is dropped, simulating a connection
        // that died without deregistering yet
        let rx_dead = join(&registry, "c1", "alpha").await;
        drop(rx_dead);
        let mut rx_live = join(&registry, "c2", "alpha").await;

        router.broadcast_new_post(&post("alpha")).await;

        assert!(received_new_post(&mut rx_live));
    }

    #[tokio::test]
    async fn test_vote_updates_reach_all_channels() {
        let registry = Arc::new(ParticipantRegistry::new());
        let router = FanoutRouter::new(Arc::clone(&registry), MatchMode::ChannelOnly);

        let mut rx_alpha = join(&registry, "c1", "alpha").await;
        let mut rx_beta = join(&registry, "c2", "beta").await;

        router
            .broadcast_vote_update("p-1", VoteCounts { up: 2, down: 1 })
            .await;

        for rx in [&mut rx_alpha, &mut rx_beta] {
            match rx.try_recv() {
                Ok(ConnectionCommand::SendVoteUpdate(update)) => {
                    assert_eq!(update.post_id, "p-1");
                    assert_eq!(update.counts, VoteCounts { up: 2, down: 1 });
                }
                other => panic!("Expected vote update, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_deletion_reaches_all_channels_with_reason() {
        let registry = Arc::new(ParticipantRegistry::new());
        let router = FanoutRouter::new(Arc::clone(&registry), MatchMode::ChannelOnly);

        let mut rx_alpha = join(&registry, "c1", "alpha").await;
        let mut rx_beta = join(&registry, "c2", "beta").await;

        router
            .broadcast_deletion("p-1", DeleteReason::AutoModeration, Some(3))
            .await;

        for rx in [&mut rx_alpha, &mut rx_beta] {
            match rx.try_recv() {
                Ok(ConnectionCommand::SendMessageDeleted(deleted)) => {
                    assert_eq!(deleted.post_id, "p-1");
                    assert_eq!(deleted.reason, DeleteReason::AutoModeration);
                    assert_eq!(deleted.downvote_count, Some(3));
                }
                other => panic!("Expected deletion, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_geofenced_fanout_requires_location() {
        let registry = Arc::new(ParticipantRegistry::new());
        let router = FanoutRouter::new(Arc::clone(&registry), MatchMode::Geofenced);

        let mut rx_unlocated = join(&registry, "c1", "local").await;
        let mut rx_located = join(&registry, "c2", "local").await;
        registry
            .update(
                "c2",
                &SettingsUpdate {
                    latitude: Some(0.0),
                    longitude: Some(0.0),
                    radius_miles: Some(100.0),
                    ..Default::default()
                },
            )
            .await;

        let mut nearby = post("local");
        nearby.latitude = 0.0;
        nearby.longitude = 0.5;
        router.broadcast_new_post(&nearby).await;

        assert!(!received_new_post(&mut rx_unlocated));
        assert!(received_new_post(&mut rx_located));
    }
}
