//! Automatic moderation of heavily downvoted posts
//!
//! Each post is either live or deleted; deletion is terminal and happens
//! through exactly one of an admin action or the downvote threshold. The
//! trigger recomputes the distinct-downvoter count from the store on every
//! downvote, since votes can be added, removed or flipped at any time.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::messages::DeleteReason;
use crate::server::router::FanoutRouter;
use crate::store::PostStore;

/// Default number of distinct downvoters that removes a post
pub const DEFAULT_DOWNVOTE_THRESHOLD: u64 = 3;

/// Deletes posts whose distinct-downvoter count reaches the threshold
pub struct ModerationTrigger {
    store: Arc<dyn PostStore>,
    router: Arc<FanoutRouter>,
    threshold: u64,
}

impl ModerationTrigger {
    pub fn new(store: Arc<dyn PostStore>, router: Arc<FanoutRouter>, threshold: u64) -> Self {
        Self {
            store,
            router,
            threshold,
        }
    }

    /// The configured downvote threshold
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Re-check a post after a downvote was cast or flipped to.
    ///
    /// The count-then-delete pair is not atomic against concurrent votes on
    /// the same post; the store's idempotent delete makes a second threshold
    /// breach a safe no-op and no duplicate deletion is broadcast.
    pub async fn handle_downvote(&self, post_id: &str) -> Result<()> {
        let count = self
            .store
            .downvoter_count(post_id)
            .await
            .map_err(|e| {
                warn!("Downvote count lookup failed for {}: {:#}", post_id, e);
                e
            })?;

        if count < self.threshold {
            debug!(
                "Post {} at {}/{} downvotes, below threshold",
                post_id, count, self.threshold
            );
            return Ok(());
        }

        let deleted = self.store.delete_post(post_id).await?;
        if !deleted {
            debug!("Post {} already deleted, skipping broadcast", post_id);
            return Ok(());
        }

        info!(
            "Auto-moderation removed post {} at {} downvotes",
            post_id, count
        );
        self.router
            .broadcast_deletion(post_id, DeleteReason::AutoModeration, Some(count))
            .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::MatchMode;
    use crate::protocol::messages::{Post, VoteType};
    use crate::registry::ParticipantRegistry;
    use crate::server::connection::ConnectionCommand;
    use crate::store::MemoryStore;
    use crate::{current_timestamp, generate_post_id};
    use tokio::sync::mpsc;

    struct Fixture {
        store: Arc<MemoryStore>,
        trigger: ModerationTrigger,
        rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    }

    async fn fixture() -> Fixture {
        let registry = Arc::new(ParticipantRegistry::new());
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register("observer", tx).await;

        let store = Arc::new(MemoryStore::new());
        let router = Arc::new(FanoutRouter::new(
            Arc::clone(&registry),
            MatchMode::ChannelOnly,
        ));
        let trigger = ModerationTrigger::new(
            Arc::clone(&store) as Arc<dyn PostStore>,
            router,
            DEFAULT_DOWNVOTE_THRESHOLD,
        );

        Fixture { store, trigger, rx }
    }

    fn post() -> Post {
        Post {
            id: generate_post_id(),
            session_id: "author".to_string(),
            display_name: "Anonymous".to_string(),
            message: "controversial".to_string(),
            image: None,
            channel: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            timestamp: current_timestamp(),
        }
    }

    fn deletion_broadcasts(rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>) -> Vec<u64> {
        let mut counts = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            if let ConnectionCommand::SendMessageDeleted(deleted) = cmd {
                assert_eq!(deleted.reason, DeleteReason::AutoModeration);
                counts.push(deleted.downvote_count.unwrap());
            }
        }
        counts
    }

    #[tokio::test]
    async fn test_below_threshold_does_nothing() {
        let mut f = fixture().await;
        let p = post();
        f.store.create_post(&p).await.unwrap();

        for voter in ["v1", "v2"] {
            f.store.add_vote(&p.id, voter, VoteType::Down).await.unwrap();
            f.trigger.handle_downvote(&p.id).await.unwrap();
        }

        assert_eq!(f.store.post_count().await, 1);
        assert!(deletion_broadcasts(&mut f.rx).is_empty());
    }

    #[tokio::test]
    async fn test_third_distinct_downvoter_deletes_once() {
        let mut f = fixture().await;
        let p = post();
        f.store.create_post(&p).await.unwrap();

        for voter in ["v1", "v2", "v3"] {
            f.store.add_vote(&p.id, voter, VoteType::Down).await.unwrap();
            f.trigger.handle_downvote(&p.id).await.unwrap();
        }

        assert_eq!(f.store.post_count().await, 0);
        assert_eq!(deletion_broadcasts(&mut f.rx), vec![3]);
    }

    #[tokio::test]
    async fn test_fourth_downvote_on_deleted_post_is_noop() {
        let mut f = fixture().await;
        let p = post();
        f.store.create_post(&p).await.unwrap();

        for voter in ["v1", "v2", "v3"] {
            f.store.add_vote(&p.id, voter, VoteType::Down).await.unwrap();
            f.trigger.handle_downvote(&p.id).await.unwrap();
        }
        assert_eq!(deletion_broadcasts(&mut f.rx).len(), 1);

        // A latecomer downvotes the already-deleted post
        f.store.add_vote(&p.id, "v4", VoteType::Down).await.unwrap();
        f.trigger.handle_downvote(&p.id).await.unwrap();

        assert!(deletion_broadcasts(&mut f.rx).is_empty());
    }

    #[tokio::test]
    async fn test_toggled_off_downvotes_do_not_count() {
        let mut f = fixture().await;
        let p = post();
        f.store.create_post(&p).await.unwrap();

        // Two downvotes, one of which is withdrawn
        f.store.add_vote(&p.id, "v1", VoteType::Down).await.unwrap();
        f.store.add_vote(&p.id, "v2", VoteType::Down).await.unwrap();
        f.store.add_vote(&p.id, "v2", VoteType::Down).await.unwrap(); // toggle off

        f.store.add_vote(&p.id, "v3", VoteType::Down).await.unwrap();
        f.trigger.handle_downvote(&p.id).await.unwrap();

        // Only two distinct downvoters remain
        assert_eq!(f.store.post_count().await, 1);
        assert!(deletion_broadcasts(&mut f.rx).is_empty());
    }
}
